//! Process-tree termination.
//!
//! The shell is spawned as the leader of its own process group, so a group
//! signal reaches everything it started unless a descendant called `setsid`.
//! Those escapees are found by walking the process table from the root pid.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSignal {
    /// Ask politely (SIGTERM).
    Terminate,
    /// Force (SIGKILL).
    Kill,
}

impl TreeSignal {
    const fn as_sysinfo(self) -> sysinfo::Signal {
        match self {
            Self::Terminate => sysinfo::Signal::Term,
            Self::Kill => sysinfo::Signal::Kill,
        }
    }

    #[cfg(unix)]
    const fn as_nix(self) -> nix::sys::signal::Signal {
        match self {
            Self::Terminate => nix::sys::signal::Signal::SIGTERM,
            Self::Kill => nix::sys::signal::Signal::SIGKILL,
        }
    }
}

/// Signal the process group led by `pid` and every descendant of `pid`.
pub fn signal_process_tree(pid: u32, signal: TreeSignal) {
    signal_process_group(pid, signal);

    let sys = process_table();
    let tree = collect_process_tree(&sys, sysinfo::Pid::from_u32(pid));

    // Leaves first so parents cannot respawn them.
    for pid in tree.into_iter().rev() {
        if let Some(proc_) = sys.process(pid) {
            send(proc_, signal);
        }
    }
}

fn process_table() -> sysinfo::System {
    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    sys
}

fn send(proc_: &sysinfo::Process, signal: TreeSignal) {
    match proc_.kill_with(signal.as_sysinfo()) {
        Some(true) => {}
        Some(false) | None => {
            if signal == TreeSignal::Kill && !proc_.kill() {
                tracing::warn!(pid = proc_.pid().as_u32(), "Failed to kill process");
            }
        }
    }
}

/// `root` followed by its descendants, parents before children.
fn collect_process_tree(sys: &sysinfo::System, root: sysinfo::Pid) -> Vec<sysinfo::Pid> {
    let mut children_map: HashMap<sysinfo::Pid, Vec<sysinfo::Pid>> = HashMap::new();
    for (p, proc_) in sys.processes() {
        if let Some(parent) = proc_.parent() {
            children_map.entry(parent).or_default().push(*p);
        }
    }

    let mut tree = Vec::new();
    let mut pending = vec![root];
    while let Some(pid) = pending.pop() {
        tree.push(pid);
        if let Some(children) = children_map.get(&pid) {
            pending.extend(children.iter().rev());
        }
    }
    tree
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Member {
    pid: sysinfo::Pid,
    start_time: u64,
}

/// The members of a process tree recorded while its root was alive.
///
/// Once the root is reaped, descendants that left its process group can no
/// longer be found by walking from it. A member is matched by pid and start
/// time, so a recycled pid is never signalled.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    members: Vec<Member>,
}

impl TreeSnapshot {
    pub fn capture(pid: u32) -> Self {
        let sys = process_table();
        let members = collect_process_tree(&sys, sysinfo::Pid::from_u32(pid))
            .into_iter()
            .filter_map(|pid| {
                sys.process(pid).map(|proc_| Member {
                    pid,
                    start_time: proc_.start_time(),
                })
            })
            .collect();
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Recorded members that are still running. Zombies count as gone.
    fn survivors(&self) -> (sysinfo::System, Vec<sysinfo::Pid>) {
        let pids: Vec<sysinfo::Pid> = self.members.iter().map(|member| member.pid).collect();
        let mut sys = sysinfo::System::new();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&pids), true);
        let alive = self
            .members
            .iter()
            .filter(|member| {
                sys.process(member.pid).is_some_and(|proc_| {
                    proc_.start_time() == member.start_time
                        && proc_.status() != sysinfo::ProcessStatus::Zombie
                })
            })
            .map(|member| member.pid)
            .collect();
        (sys, alive)
    }

    pub fn any_alive(&self) -> bool {
        !self.survivors().1.is_empty()
    }

    /// Signal the recorded members that are still running, leaves first.
    /// Returns how many were signalled.
    pub fn signal(&self, signal: TreeSignal) -> usize {
        let (sys, alive) = self.survivors();
        for pid in alive.iter().rev() {
            if let Some(proc_) = sys.process(*pid) {
                send(proc_, signal);
            }
        }
        alive.len()
    }
}

#[cfg(unix)]
fn group_id(pgid: u32) -> Option<nix::unistd::Pid> {
    i32::try_from(pgid).ok().map(nix::unistd::Pid::from_raw)
}

/// Signal every member of process group `pgid`.
#[cfg(unix)]
pub fn signal_process_group(pgid: u32, signal: TreeSignal) {
    let Some(group) = group_id(pgid) else {
        return;
    };
    match nix::sys::signal::killpg(group, signal.as_nix()) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => tracing::warn!(pgid, error = %err, "Failed to signal process group"),
    }
}

#[cfg(not(unix))]
pub fn signal_process_group(_pgid: u32, _signal: TreeSignal) {}

/// Whether any member of the process group is still present.
#[cfg(unix)]
pub fn group_alive(pgid: u32) -> bool {
    group_id(pgid).is_some_and(|group| nix::sys::signal::killpg(group, None).is_ok())
}

#[cfg(not(unix))]
pub fn group_alive(_pgid: u32) -> bool {
    false
}

/// Poll until the group is gone or `timeout` elapses. Returns whether it is gone.
pub async fn wait_for_group_exit(pgid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !group_alive(pgid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Kills the tree rooted at the shell when dropped while armed.
///
/// Held by an execution for its whole lifetime so a cancelled or panicking
/// caller cannot leak processes. Disarm it once the shell has been reaped and
/// the group cleaned up, since the pid may be reused after that.
#[derive(Debug)]
pub struct ProcessTreeGuard {
    pid: Option<u32>,
}

impl ProcessTreeGuard {
    pub const fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn signal(&self, signal: TreeSignal) {
        if let Some(pid) = self.pid {
            signal_process_tree(pid, signal);
        }
    }

    pub const fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessTreeGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            tracing::debug!(pid, "Killing process tree on drop");
            signal_process_tree(pid, TreeSignal::Kill);
        }
    }
}
