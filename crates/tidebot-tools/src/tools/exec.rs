//! `exec` tool: run a shell command with a timeout and safety guards.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ToolContext;
use crate::registry::{Tool, ToolDefinition};
use crate::tools::truncate_chars;
use crate::{ToolError, optional_str, required_str};

/// Maximum output size in characters before truncation.
const MAX_OUTPUT_CHARS: usize = 10_000;

/// Commands that are refused outright.
static DENY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\brm\s+-[a-z]*r[a-z]*f?\s+/(\s|$|\*)",
        r"\brm\s+-[a-z]*f[a-z]*r\s+/(\s|$|\*)",
        r"\b(mkfs|diskpart)\b",
        r"\bformat\s+[a-z]:",
        r"\bdd\s+if=",
        r">\s*/dev/sd[a-z]",
        r"\b(shutdown|reboot|poweroff|halt)\b",
        r":\(\)\s*\{\s*:\|:&\s*\};:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("exec deny pattern should compile"))
    .collect()
});

pub struct ExecTool {
    workspace: PathBuf,
    timeout_secs: u64,
    restrict: bool,
    definition: ToolDefinition,
}

impl ExecTool {
    pub fn new(workspace: PathBuf, timeout_secs: u64, restrict: bool) -> Self {
        let definition = ToolDefinition {
            name: "exec".to_string(),
            description: format!(
                "Execute a shell command and return its output. \
                 Commands time out after {timeout_secs}s."
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute."
                    },
                    "working_dir": {
                        "type": "string",
                        "description": "Working directory. Defaults to the workspace."
                    }
                },
                "required": ["command"]
            }),
        };
        Self {
            workspace,
            timeout_secs,
            restrict,
            definition,
        }
    }

    /// Reason the command may not run, if any.
    fn guard(&self, command: &str) -> Option<String> {
        let lowered = command.to_lowercase();
        if DENY_PATTERNS.iter().any(|re| re.is_match(&lowered)) {
            return Some("command blocked by safety guard (dangerous pattern)".to_string());
        }
        if self.restrict && (command.contains("../") || command.contains("..\\")) {
            return Some("command blocked by safety guard (path traversal)".to_string());
        }
        None
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let command = required_str(&params, "command")?;
        if let Some(reason) = self.guard(command) {
            warn!(%command, "Refusing to run command");
            return Err(ToolError::Failed(reason));
        }

        let working_dir = optional_str(&params, "working_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.workspace.clone());

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(%command, cwd = %working_dir.display(), "Running command");
        let timeout = Duration::from_secs(self.timeout_secs);
        let output = tokio::select! {
            result = tokio::time::timeout(timeout, cmd.output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(ToolError::Failed(format!("command execution failed: {e}"))),
                Err(_) => return Err(ToolError::Timeout(self.timeout_secs)),
            },
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut result = String::new();
        if !stdout.is_empty() {
            result.push_str(&stdout);
        }
        if !stderr.trim().is_empty() {
            if !result.is_empty() && !result.ends_with('\n') {
                result.push('\n');
            }
            result.push_str("STDERR:\n");
            result.push_str(&stderr);
        }
        if !output.status.success() {
            if !result.is_empty() && !result.ends_with('\n') {
                result.push('\n');
            }
            result.push_str(&format!(
                "Exit code: {}",
                output.status.code().unwrap_or(-1)
            ));
        }
        if result.is_empty() {
            result.push_str("(no output)");
        }

        let (result, _) = truncate_chars(&result, MAX_OUTPUT_CHARS);
        Ok(result)
    }
}
