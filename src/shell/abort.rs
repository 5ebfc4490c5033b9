//! Cooperative cancellation handle shared between a caller and an execution.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

type AbortCallback = Box<dyn FnOnce() + Send>;

struct Inner {
    flag: watch::Sender<bool>,
    callbacks: Mutex<Vec<AbortCallback>>,
}

/// A cloneable abort flag. Raising it once is final; every clone observes it.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                flag,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Raise the signal and run registered callbacks. Later calls are no-ops.
    pub fn abort(&self) {
        if self.inner.flag.send_replace(true) {
            return;
        }
        let callbacks = std::mem::take(
            &mut *self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_aborted(&self) -> bool {
        *self.inner.flag.borrow()
    }

    /// Run `callback` once the signal is raised, or immediately if it already is.
    pub fn on_abort(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_aborted() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Resolves once the signal is raised.
    pub async fn aborted(&self) {
        let mut rx = self.inner.flag.subscribe();
        // The sender lives as long as `self`, so this only returns once raised.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}
