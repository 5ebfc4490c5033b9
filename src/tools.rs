//! Built-in tool adapters.
//!
//! Five tools are exposed to the model: read, write, edit, patch, bash. Each
//! validates its JSON input, delegates to an engine, and always returns a
//! [`ToolOutput`]; failures become `is_error = true` with the message as
//! content and the error taxonomy tag under `details.errorKind`.

use crate::config::ToolSettings;
use crate::edit::{self, ApplyOptions};
use crate::error::{Error, Result};
use crate::model::ContentBlock;
use crate::path::{resolve_read_path, resolve_to_cwd};
use crate::shell::{AbortSignal, ExecOptions, ShellExecutor, ShellUpdate};
use crate::truncate::{TruncationLimits, format_size, split_lines, truncate_for_read};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Tool Trait
// ============================================================================

/// A tool that can be executed by the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name.
    fn name(&self) -> &str;

    /// Get the tool label (display name).
    fn label(&self) -> &str;

    /// Get the tool description.
    fn description(&self) -> &str;

    /// Get the tool parameters as JSON Schema.
    fn parameters(&self) -> Value;

    /// Execute the tool.
    ///
    /// Tools may call `on_update` to stream incremental results while a
    /// long-running command is still producing output. Errors are reported
    /// through [`ToolOutput::is_error`], never as a panic or `Err`.
    async fn execute(
        &self,
        tool_call_id: &str,
        input: Value,
        on_update: Option<ToolUpdateCallback>,
    ) -> ToolOutput;
}

pub type ToolUpdateCallback = Box<dyn Fn(ToolUpdate) + Send + Sync>;

/// Tool execution output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde requires `fn(&bool) -> bool` for `skip_serializing_if`
const fn is_false(value: &bool) -> bool {
    !*value
}

impl ToolOutput {
    pub fn text(text: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            details,
            is_error: false,
        }
    }

    pub fn error(err: &Error) -> Self {
        Self {
            content: vec![ContentBlock::text(err.to_string())],
            details: Some(json!({ "errorKind": err.kind() })),
            is_error: true,
        }
    }

    /// Concatenated text of every text block.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Incremental update during tool execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUpdate {
    pub content: Vec<ContentBlock>,
    pub details: Option<Value>,
}

fn parse_input<T: for<'de> Deserialize<'de>>(input: Value) -> Result<T> {
    serde_json::from_value(input).map_err(|e| Error::validation(e.to_string()))
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Registry of the built-in tools bound to one working directory.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a registry with every built-in tool.
    pub fn new(cwd: &Path, settings: &ToolSettings) -> Self {
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(ReadTool::with_settings(cwd, settings)),
            Box::new(WriteTool::new(cwd)),
            Box::new(EditTool::new(cwd)),
            Box::new(PatchTool::with_settings(cwd, settings)),
            Box::new(BashTool::with_settings(cwd, settings)),
        ];
        Self { tools }
    }

    /// Construct a registry from a pre-built tool list.
    pub fn from_tools(tools: Vec<Box<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Get all tools.
    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(std::convert::AsRef::as_ref)
    }
}

// ============================================================================
// Read Tool
// ============================================================================

/// Input parameters for the read tool.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadInput {
    path: String,
    offset: Option<i64>,
    limit: Option<i64>,
}

pub struct ReadTool {
    cwd: PathBuf,
    limits: TruncationLimits,
}

impl ReadTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            limits: TruncationLimits::default(),
        }
    }

    pub fn with_settings(cwd: &Path, settings: &ToolSettings) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            limits: settings.limits(),
        }
    }

    async fn read(&self, input: ReadInput) -> Result<ToolOutput> {
        let path = resolve_read_path(&input.path, &self.cwd);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(format!("File not found: {}", input.path))
            } else {
                Error::from(e)
            }
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text);

        let lines = split_lines(text);
        let width = lines.len().to_string().len().max(5);
        let numbered = lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let line = line.strip_suffix('\r').unwrap_or(line);
                format!("{:>width$}→{line}", i + 1)
            })
            .collect::<Vec<_>>()
            .join("\n");

        // Offsets are 1-based at the tool boundary.
        let offset = match input.offset {
            Some(n) if n > 0 => usize::try_from(n - 1).unwrap_or(usize::MAX),
            _ => 0,
        };
        let limit = input
            .limit
            .map(|n| usize::try_from(n.max(0)).unwrap_or(usize::MAX));

        let window = truncate_for_read(&numbered, offset, limit, self.limits).map_err(|err| {
            match err {
                Error::OffsetBeyondEnd { total_lines, .. } => Error::OffsetBeyondEnd {
                    offset: usize::try_from(input.offset.unwrap_or(0)).unwrap_or(0),
                    total_lines,
                },
                other => other,
            }
        })?;

        let mut output = window.text.clone();
        if window.truncation.first_line_exceeds_limit {
            let raw_line = lines.get(offset).copied().unwrap_or("");
            let line_no = window.start_line;
            output = format!(
                "[Line {line_no} is {}, exceeds {} limit. Use bash: sed -n '{line_no}p' {} | head -c {}]",
                format_size(raw_line.trim_end_matches('\r').len()),
                format_size(self.limits.max_bytes),
                input.path,
                self.limits.max_bytes
            );
        }

        let details = window.truncation.truncated.then(|| {
            json!({
                "truncation": window.truncation,
                "nextOffset": window.next_offset(),
            })
        });
        Ok(ToolOutput::text(output, details))
    }
}

#[async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }
    fn label(&self) -> &str {
        "read"
    }
    fn description(&self) -> &str {
        "Read the contents of a text file. Output is truncated to 2000 lines or 50KB (whichever is hit first). Use offset/limit for large files. When you need the full file, continue with offset until complete."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (relative or absolute)"
                },
                "offset": {
                    "type": "number",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        input: Value,
        _on_update: Option<ToolUpdateCallback>,
    ) -> ToolOutput {
        let result = match parse_input::<ReadInput>(input) {
            Ok(input) => self.read(input).await,
            Err(err) => Err(err),
        };
        result.unwrap_or_else(|err| ToolOutput::error(&err))
    }
}

// ============================================================================
// Write Tool
// ============================================================================

/// Input parameters for the write tool.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteInput {
    path: String,
    content: String,
}

pub struct WriteTool {
    cwd: PathBuf,
}

impl WriteTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }

    fn write(&self, input: &WriteInput) -> Result<ToolOutput> {
        let path = resolve_to_cwd(&input.path, &self.cwd);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        edit::write_atomic(&path, input.content.as_bytes())?;
        tracing::debug!(path = %path.display(), bytes = input.content.len(), "Wrote file");

        Ok(ToolOutput::text(
            format!(
                "Successfully wrote {} bytes to {}",
                input.content.len(),
                input.path
            ),
            None,
        ))
    }
}

#[async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }
    fn label(&self) -> &str {
        "write"
    }
    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does. Automatically creates parent directories."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write (relative or absolute)"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        input: Value,
        _on_update: Option<ToolUpdateCallback>,
    ) -> ToolOutput {
        parse_input::<WriteInput>(input)
            .and_then(|input| self.write(&input))
            .unwrap_or_else(|err| ToolOutput::error(&err))
    }
}

// ============================================================================
// Edit Tool
// ============================================================================

/// Input parameters for the edit tool.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditInput {
    path: String,
    old_text: String,
    new_text: String,
}

pub struct EditTool {
    cwd: PathBuf,
}

impl EditTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }
    fn label(&self) -> &str {
        "edit"
    }
    fn description(&self) -> &str {
        "Edit a file by replacing exact text. The oldText must match exactly (including whitespace) and occur exactly once. Use this for precise, surgical edits."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit (relative or absolute)"
                },
                "oldText": {
                    "type": "string",
                    "description": "Exact text to find and replace (must match exactly)"
                },
                "newText": {
                    "type": "string",
                    "description": "New text to replace the old text with"
                }
            },
            "required": ["path", "oldText", "newText"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        input: Value,
        _on_update: Option<ToolUpdateCallback>,
    ) -> ToolOutput {
        let input = match parse_input::<EditInput>(input) {
            Ok(input) => input,
            Err(err) => return ToolOutput::error(&err),
        };
        let path = resolve_to_cwd(&input.path, &self.cwd);
        let result = edit::edit_file_labeled(&path, &input.path, &input.old_text, &input.new_text);

        if !result.success {
            return edit_failure(&result);
        }
        ToolOutput::text(
            format!("Successfully replaced text in {}.", input.path),
            Some(json!({
                "diff": result.diff,
                "firstChangedLine": result.first_changed_line,
                "strategy": result.strategy,
            })),
        )
    }
}

fn edit_failure(result: &edit::EditResult) -> ToolOutput {
    ToolOutput {
        content: vec![ContentBlock::text(
            result.error.clone().unwrap_or_else(|| "Edit failed".to_string()),
        )],
        details: Some(json!({
            "errorKind": result.error_kind,
            "hunksApplied": result.hunks_applied,
            "hunksFailed": result.hunks_failed,
        })),
        is_error: true,
    }
}

// ============================================================================
// Patch Tool
// ============================================================================

/// Input parameters for the patch tool.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchInput {
    path: String,
    diff: String,
    fuzz: Option<usize>,
}

pub struct PatchTool {
    cwd: PathBuf,
    default_fuzz: usize,
}

impl PatchTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            default_fuzz: 0,
        }
    }

    pub fn with_settings(cwd: &Path, settings: &ToolSettings) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            default_fuzz: settings.patch_fuzz(),
        }
    }
}

#[async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl Tool for PatchTool {
    fn name(&self) -> &str {
        "patch"
    }
    fn label(&self) -> &str {
        "patch"
    }
    fn description(&self) -> &str {
        "Apply a unified diff to a file. Hunks are applied in order; if any hunk does not match, the file is left unchanged. Set fuzz to let hunks match a few lines away from their stated position."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to patch (relative or absolute)"
                },
                "diff": {
                    "type": "string",
                    "description": "Unified diff with @@ hunk headers"
                },
                "fuzz": {
                    "type": "integer",
                    "description": "Maximum line drift allowed when locating a hunk (default: 0)",
                    "minimum": 0
                }
            },
            "required": ["path", "diff"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        input: Value,
        _on_update: Option<ToolUpdateCallback>,
    ) -> ToolOutput {
        let input = match parse_input::<PatchInput>(input) {
            Ok(input) => input,
            Err(err) => return ToolOutput::error(&err),
        };
        let path = resolve_to_cwd(&input.path, &self.cwd);
        let options = ApplyOptions {
            fuzz: input.fuzz.unwrap_or(self.default_fuzz),
        };
        let result = edit::patch::apply_diff_to_file_labeled(&path, &input.path, &input.diff, options);

        if !result.success {
            return edit_failure(&result);
        }
        let plural = if result.hunks_applied == 1 { "" } else { "s" };
        ToolOutput::text(
            format!(
                "Applied {} hunk{plural} to {}.",
                result.hunks_applied, input.path
            ),
            Some(json!({
                "diff": result.diff,
                "firstChangedLine": result.first_changed_line,
                "hunksApplied": result.hunks_applied,
                "hunksFailed": result.hunks_failed,
            })),
        )
    }
}

// ============================================================================
// Bash Tool
// ============================================================================

/// Input parameters for the bash tool.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BashInput {
    command: String,
    timeout: Option<u64>,
}

pub struct BashTool {
    executor: ShellExecutor,
    abort: Option<AbortSignal>,
}

impl BashTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            executor: ShellExecutor::new(cwd),
            abort: None,
        }
    }

    pub fn with_settings(cwd: &Path, settings: &ToolSettings) -> Self {
        Self {
            executor: ShellExecutor::from_settings(cwd, settings),
            abort: None,
        }
    }

    /// Cancel running commands when `signal` is raised.
    #[must_use]
    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }
}

#[async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }
    fn label(&self) -> &str {
        "bash"
    }
    fn description(&self) -> &str {
        "Execute a bash command in the current working directory. Returns stdout and stderr. Output is truncated to last 2000 lines or 50KB (whichever is hit first). If truncated, full output is saved to a temp file. Optionally provide a timeout in seconds (default 120, 0 disables)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Bash command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 120, 0 disables)",
                    "minimum": 0
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        input: Value,
        on_update: Option<ToolUpdateCallback>,
    ) -> ToolOutput {
        let input = match parse_input::<BashInput>(input) {
            Ok(input) => input,
            Err(err) => return ToolOutput::error(&err),
        };

        let on_update = on_update.map(|callback| {
            let callback: Arc<dyn Fn(ToolUpdate) + Send + Sync> = Arc::from(callback);
            Arc::new(move |update: &ShellUpdate| {
                let mut details = serde_json::Map::new();
                if update.truncation.truncated {
                    details.insert("truncation".to_string(), json!(update.truncation));
                }
                if let Some(path) = update.full_output_path.as_ref() {
                    details.insert(
                        "fullOutputPath".to_string(),
                        Value::String(path.display().to_string()),
                    );
                }
                callback(ToolUpdate {
                    content: vec![ContentBlock::text(update.output.clone())],
                    details: (!details.is_empty()).then_some(Value::Object(details)),
                });
            }) as crate::shell::UpdateCallback
        });

        let options = ExecOptions {
            timeout: input.timeout.map(Duration::from_secs),
            abort: self.abort.clone(),
            cwd: None,
            on_update,
        };
        let result = self.executor.execute(&input.command, options).await;

        ToolOutput {
            content: vec![ContentBlock::text(result.output.clone())],
            details: Some(json!({
                "exitCode": result.exit_code,
                "state": result.state,
                "truncation": result.truncation,
                "fullOutputPath": result.full_output_path,
                "errorKind": result.error_kind,
            })),
            is_error: !result.success,
        }
    }
}
