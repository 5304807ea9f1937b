use std::fs;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use agent_provider::{ContentBlock, ToolDefinition};
use serde_json::{json, Value};
use similar::TextDiff;
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::containment::{absolutize, clean_path, is_contained};
use crate::policy::PermissionPolicy;
use crate::validator::{validate_command, CommandRejection};

pub const READ_FILE_TOOL: &str = "read_file";
pub const WRITE_FILE_TOOL: &str = "write_file";
pub const BASH_COMMAND_TOOL: &str = "bash_command";

pub const DEFAULT_BASH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BASH_MAX_OUTPUT_BYTES: usize = 100 * 1024;
const DEFAULT_READ_MAX_BYTES: usize = 200 * 1024;
const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    BashCommand { command: String, reason: String },
}

impl ToolCall {
    /// Builds a typed call from a provider `tool_use` block.
    pub fn parse(name: &str, input: &Value) -> Result<Self, ToolError> {
        match name {
            READ_FILE_TOOL => Ok(Self::ReadFile {
                path: required_string(name, input, "path")?,
            }),
            WRITE_FILE_TOOL => Ok(Self::WriteFile {
                path: required_string(name, input, "path")?,
                content: required_string(name, input, "content")?,
            }),
            BASH_COMMAND_TOOL => Ok(Self::BashCommand {
                command: required_string(name, input, "command")?,
                reason: required_string(name, input, "reason")?,
            }),
            unknown => Err(ToolError::UnknownTool {
                name: unknown.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => READ_FILE_TOOL,
            Self::WriteFile { .. } => WRITE_FILE_TOOL,
            Self::BashCommand { .. } => BASH_COMMAND_TOOL,
        }
    }
}

fn required_string(tool: &str, input: &Value, field: &'static str) -> Result<String, ToolError> {
    match input.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ToolError::invalid_input(tool, field, "must be a string")),
        None => Err(ToolError::invalid_input(tool, field, "is required")),
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input for {tool}: field '{field}' {problem}")]
    InvalidInput {
        tool: String,
        field: &'static str,
        problem: &'static str,
    },

    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("path escapes working directory: {}", .path.display())]
    PathEscape { path: PathBuf },

    #[error("path is reserved and cannot be accessed by tools: {}", .path.display())]
    ProtectedPath { path: PathBuf },

    #[error("command rejected: {0}")]
    CommandRejected(#[from] CommandRejection),

    #[error("command timed out after {}s", .timeout.as_secs())]
    Timeout { timeout: Duration, output: String },

    #[error("command failed with {status}")]
    NonZeroExit { status: String, output: String },

    #[error("file exceeds max read size ({size} bytes > {limit} bytes)")]
    TooLarge { size: u64, limit: usize },

    #[error("file is not valid UTF-8 text: {}", .path.display())]
    NotUtf8 { path: PathBuf },

    #[error("failed {operation} {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ToolError {
    fn invalid_input(tool: &str, field: &'static str, problem: &'static str) -> Self {
        Self::InvalidInput {
            tool: tool.to_string(),
            field,
            problem,
        }
    }

    fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Captured command output that accompanies a failed command.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Timeout { output, .. } | Self::NonZeroExit { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub ok: bool,
    pub content: String,
    pub dry_run: bool,
    /// Unified diff of a file write, for presentation only.
    pub diff: Option<String>,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: content.into(),
            dry_run: false,
            diff: None,
            error: None,
        }
    }

    /// A permitted refusal: the action is described, not performed.
    pub fn dry_run(content: impl Into<String>) -> Self {
        Self {
            dry_run: true,
            ..Self::ok(content)
        }
    }

    pub fn fail(error: &ToolError) -> Self {
        let mut content = format!("Error: {error}");
        if let Some(output) = error.output().filter(|output| !output.is_empty()) {
            content.push('\n');
            content.push_str(output);
        }

        Self {
            ok: false,
            content,
            dry_run: false,
            diff: None,
            error: Some(error.to_string()),
        }
    }

    pub fn with_diff(mut self, diff: Option<String>) -> Self {
        self.diff = diff;
        self
    }

    /// First line of the content, shortened for the audit log.
    pub fn summary(&self) -> String {
        let first_line = self.content.lines().next().unwrap_or_default();
        if first_line.chars().count() <= SUMMARY_MAX_CHARS {
            return first_line.to_string();
        }

        let mut summary: String = first_line.chars().take(SUMMARY_MAX_CHARS).collect();
        summary.push_str("...");
        summary
    }

    pub fn to_content_block(&self, tool_use_id: &str) -> ContentBlock {
        if self.ok {
            ContentBlock::tool_result(tool_use_id, self.content.clone())
        } else {
            ContentBlock::tool_error(tool_use_id, self.content.clone())
        }
    }
}

pub trait ToolExecutor {
    fn execute(&mut self, call: ToolCall) -> ToolOutput;

    /// Parses and runs a raw `tool_use`. Never fails; errors become outputs.
    fn execute_tool_use(&mut self, name: &str, input: &Value) -> ToolOutput {
        match ToolCall::parse(name, input) {
            Ok(call) => self.execute(call),
            Err(error) => ToolOutput::fail(&error),
        }
    }
}

/// Tool definitions advertised to the provider.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: READ_FILE_TOOL.to_string(),
            description: "Read a UTF-8 text file inside the working directory.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path, relative to the working directory."
                    }
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: WRITE_FILE_TOOL.to_string(),
            description: "Create or overwrite a file inside the working directory.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path, relative to the working directory."
                    },
                    "content": {
                        "type": "string",
                        "description": "Complete new file content."
                    }
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: BASH_COMMAND_TOOL.to_string(),
            description: "Run a read-only shell pipeline built from whitelisted commands \
                          (ls, cat, head, tail, grep, find, wc, git log/diff/show/status/blame, ...). \
                          Chaining, redirection and substitution are rejected."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The command line to run."
                    },
                    "reason": {
                        "type": "string",
                        "description": "Why the command is needed."
                    }
                },
                "required": ["command", "reason"]
            }),
        },
    ]
}

/// Executes tool calls confined to one working directory under a permission policy.
#[derive(Debug, Clone)]
pub struct ToolSandbox {
    working_dir: PathBuf,
    policy: PermissionPolicy,
    protected: Vec<PathBuf>,
    bash_timeout: Duration,
    bash_max_output_bytes: usize,
    read_max_bytes: usize,
}

impl ToolSandbox {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        policy: PermissionPolicy,
    ) -> Result<Self, ToolError> {
        let working_dir = working_dir.into();
        let canonical_dir = working_dir.canonicalize().map_err(|source| {
            ToolError::io("resolving working directory", &working_dir, source)
        })?;

        if !canonical_dir.is_dir() {
            return Err(ToolError::io(
                "resolving working directory",
                canonical_dir,
                io::Error::other("not a directory"),
            ));
        }

        Ok(Self {
            working_dir: canonical_dir,
            policy,
            protected: Vec::new(),
            bash_timeout: DEFAULT_BASH_TIMEOUT,
            bash_max_output_bytes: DEFAULT_BASH_MAX_OUTPUT_BYTES,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
        })
    }

    /// Keeps tools out of `path` and everything below it, e.g. the
    /// conversation directory when it lives inside the working directory.
    pub fn with_protected_path(mut self, path: impl AsRef<Path>) -> Self {
        let absolute = clean_path(&absolutize(&self.working_dir, path.as_ref()));
        let resolved = absolute.canonicalize().unwrap_or(absolute);
        self.protected.push(resolved);
        self
    }

    pub fn with_bash_timeout(mut self, timeout: Duration) -> Self {
        self.bash_timeout = timeout;
        self
    }

    pub fn with_bash_max_output_bytes(mut self, max_bytes: usize) -> Self {
        self.bash_max_output_bytes = max_bytes;
        self
    }

    pub fn with_read_max_bytes(mut self, max_bytes: usize) -> Self {
        self.read_max_bytes = max_bytes;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn read_file(&self, path: &str) -> Result<String, ToolError> {
        let resolved = self.resolve_existing_path(READ_FILE_TOOL, path)?;
        let metadata = fs::metadata(&resolved)
            .map_err(|source| ToolError::io("reading metadata of", &resolved, source))?;

        if metadata.len() > self.read_max_bytes as u64 {
            return Err(ToolError::TooLarge {
                size: metadata.len(),
                limit: self.read_max_bytes,
            });
        }

        let bytes =
            fs::read(&resolved).map_err(|source| ToolError::io("reading", &resolved, source))?;
        String::from_utf8(bytes).map_err(|_| ToolError::NotUtf8 { path: resolved })
    }

    fn write_file(&self, path: &str, content: &str) -> Result<ToolOutput, ToolError> {
        let resolved = self.resolve_write_path(path)?;
        let shown = self.relative_display(&resolved);

        let previous = match fs::read_to_string(&resolved) {
            Ok(previous) => Some(previous),
            Err(error) if error.kind() == ErrorKind::NotFound => None,
            Err(source) => return Err(ToolError::io("reading existing", &resolved, source)),
        };
        let diff = unified_diff(&shown, previous.as_deref().unwrap_or_default(), content);

        if !self.policy.allow_write {
            let target = if previous.is_some() {
                "overwrite"
            } else {
                "create"
            };
            return Ok(ToolOutput::dry_run(format!(
                "Dry run: permission policy '{}' does not allow writes. Would {target} {shown} with {} bytes.",
                self.policy,
                content.len()
            ))
            .with_diff(diff));
        }

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ToolError::io("creating parent directories", parent, source))?;
            let canonical_parent = parent
                .canonicalize()
                .map_err(|source| ToolError::io("resolving", parent, source))?;
            self.ensure_accessible(canonical_parent)?;
        }

        fs::write(&resolved, content)
            .map_err(|source| ToolError::io("writing", &resolved, source))?;
        debug!(path = %shown, bytes = content.len(), "wrote file");

        Ok(ToolOutput::ok(format!("Wrote {} bytes to {shown}", content.len())).with_diff(diff))
    }

    fn bash_command(&self, command: &str, reason: &str) -> ToolOutput {
        if let Err(rejection) = validate_command(command) {
            warn!(command, %rejection, "rejected bash command");
            return ToolOutput::fail(&ToolError::CommandRejected(rejection));
        }

        if !self.policy.allow_commands {
            return ToolOutput::dry_run(format!(
                "Dry run: permission policy '{}' does not allow commands. Would run `{command}` in {} ({reason}).",
                self.policy,
                self.working_dir.display()
            ));
        }

        match self.run_bash(command) {
            Ok(content) => ToolOutput::ok(content),
            Err(error) => ToolOutput::fail(&error),
        }
    }

    fn run_bash(&self, command: &str) -> Result<String, ToolError> {
        let mut builder = Command::new("bash");
        builder
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            builder.process_group(0);
        }

        let mut child = builder
            .spawn()
            .map_err(|source| ToolError::io("launching bash in", &self.working_dir, source))?;
        let stdout = spawn_pipe_reader(child.stdout.take(), self.bash_max_output_bytes);
        let stderr = spawn_pipe_reader(child.stderr.take(), self.bash_max_output_bytes);

        let status = match child.wait_timeout(self.bash_timeout) {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                kill_process_group(&mut child);
                let _ = child.wait();
                None
            }
            Err(source) => {
                kill_process_group(&mut child);
                let _ = child.wait();
                return Err(ToolError::io("waiting for bash in", &self.working_dir, source));
            }
        };

        let stdout = join_pipe_reader(stdout);
        let stderr = join_pipe_reader(stderr);

        match status {
            None => {
                warn!(command, timeout_sec = self.bash_timeout.as_secs(), "bash command timed out");
                let label = format!("timeout after {}s", self.bash_timeout.as_secs());
                Err(ToolError::Timeout {
                    timeout: self.bash_timeout,
                    output: self.format_command_output(&label, &stdout, &stderr),
                })
            }
            Some(status) if status.success() => {
                Ok(self.format_command_output(&format_exit_status(status), &stdout, &stderr))
            }
            Some(status) => {
                let label = format_exit_status(status);
                Err(ToolError::NonZeroExit {
                    output: self.format_command_output(&label, &stdout, &stderr),
                    status: label,
                })
            }
        }
    }

    fn format_command_output(&self, status_label: &str, stdout: &[u8], stderr: &[u8]) -> String {
        let content = format!(
            "status: {status_label}\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(stdout),
            String::from_utf8_lossy(stderr)
        );
        truncate_to_byte_limit(content, self.bash_max_output_bytes)
    }

    fn resolve_existing_path(&self, tool: &str, path: &str) -> Result<PathBuf, ToolError> {
        let candidate = self.contained_candidate(tool, path)?;
        let canonical = candidate
            .canonicalize()
            .map_err(|source| ToolError::io("resolving", &candidate, source))?;

        self.ensure_accessible(canonical)
    }

    fn resolve_write_path(&self, path: &str) -> Result<PathBuf, ToolError> {
        let candidate = self.contained_candidate(WRITE_FILE_TOOL, path)?;
        if candidate == self.working_dir {
            return Err(ToolError::invalid_input(
                WRITE_FILE_TOOL,
                "path",
                "must name a file",
            ));
        }

        if fs::symlink_metadata(&candidate).is_ok() {
            let canonical = candidate
                .canonicalize()
                .map_err(|source| ToolError::io("resolving", &candidate, source))?;
            self.ensure_accessible(canonical)?;
        } else if let Some(parent) = candidate.parent() {
            let anchor = canonicalize_existing_ancestor(parent)?;
            self.ensure_accessible(anchor)?;
        }

        Ok(candidate)
    }

    /// Absolutized, lexically cleaned path that passed the containment check.
    fn contained_candidate(&self, tool: &str, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::invalid_input(tool, "path", "must not be empty"));
        }

        let candidate = clean_path(&absolutize(&self.working_dir, Path::new(path)));
        if !is_contained(&self.working_dir, &candidate) {
            warn!(tool, path, "path escapes working directory");
            return Err(ToolError::PathEscape { path: candidate });
        }

        self.ensure_unprotected(candidate)
    }

    /// Resolved paths must stay inside the working directory and outside
    /// every protected path.
    fn ensure_accessible(&self, canonical_path: PathBuf) -> Result<PathBuf, ToolError> {
        if !is_contained(&self.working_dir, &canonical_path) {
            warn!(path = %canonical_path.display(), "resolved path escapes working directory");
            return Err(ToolError::PathEscape {
                path: canonical_path,
            });
        }

        self.ensure_unprotected(canonical_path)
    }

    fn ensure_unprotected(&self, path: PathBuf) -> Result<PathBuf, ToolError> {
        if self
            .protected
            .iter()
            .any(|protected| is_contained(protected, &path))
        {
            warn!(path = %path.display(), "path is protected");
            return Err(ToolError::ProtectedPath { path });
        }

        Ok(path)
    }

    fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.working_dir)
            .map(|relative| relative.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }
}

impl ToolExecutor for ToolSandbox {
    fn execute(&mut self, call: ToolCall) -> ToolOutput {
        match call {
            ToolCall::ReadFile { path } => match self.read_file(&path) {
                Ok(content) => ToolOutput::ok(content),
                Err(error) => ToolOutput::fail(&error),
            },
            ToolCall::WriteFile { path, content } => match self.write_file(&path, &content) {
                Ok(output) => output,
                Err(error) => ToolOutput::fail(&error),
            },
            ToolCall::BashCommand { command, reason } => self.bash_command(&command, &reason),
        }
    }
}

fn unified_diff(label: &str, old: &str, new: &str) -> Option<String> {
    if old == new {
        return None;
    }

    let diff = TextDiff::from_lines(old, new);
    let rendered = diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{label}"), &format!("b/{label}"))
        .to_string();
    Some(rendered)
}

fn spawn_pipe_reader<R>(pipe: Option<R>, limit: usize) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = pipe
            .by_ref()
            .take(limit as u64 + 1)
            .read_to_end(&mut bytes);
        // Keep draining so the child never blocks on a full pipe.
        let _ = io::copy(&mut pipe, &mut io::sink());
        bytes
    }))
}

fn join_pipe_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };

    // SAFETY: kill(2) takes no pointers; a negative pid targets the group the
    // child leads because it was spawned with process_group(0).
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes.min(content.len());
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, ToolError> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor
                .canonicalize()
                .map_err(|source| ToolError::io("resolving", ancestor, source));
        }
    }

    Err(ToolError::io(
        "resolving",
        path,
        io::Error::new(ErrorKind::NotFound, "no existing ancestor"),
    ))
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}
