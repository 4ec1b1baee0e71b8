//! `read_file`, `write_file` and `list_dir` tools.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::context::ToolContext;
use crate::registry::{Tool, ToolDefinition};
use crate::tools::truncate_chars;
use crate::{ToolError, required_str};

/// Largest file body returned to the model.
const MAX_READ_CHARS: usize = 128_000;

/// Resolve a model-supplied path.
///
/// Relative paths and `~` are resolved against the workspace and home
/// directory. With `restrict` set, the result must stay inside `workspace`.
fn resolve_path(raw: &str, workspace: &Path, restrict: bool) -> Result<PathBuf, ToolError> {
    let expanded = match raw.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    };
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        workspace.join(expanded)
    };
    let path = normalize(&joined);

    if restrict && !path.starts_with(normalize(workspace)) {
        return Err(ToolError::Failed(format!(
            "path '{raw}' is outside the workspace {}",
            workspace.display()
        )));
    }
    Ok(path)
}

/// Lexically resolve `.` and `..` so paths that do not exist yet can be checked.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct ReadFileTool {
    workspace: PathBuf,
    restrict: bool,
    definition: ToolDefinition,
}

impl ReadFileTool {
    pub fn new(workspace: PathBuf, restrict: bool) -> Self {
        let definition = ToolDefinition {
            name: "read_file".to_string(),
            description: "Read the contents of a text file.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path, absolute or relative to the workspace."
                    }
                },
                "required": ["path"]
            }),
        };
        Self {
            workspace,
            restrict,
            definition,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let raw = required_str(&params, "path")?;
        let path = resolve_path(raw, &self.workspace, self.restrict)?;

        if !path.exists() {
            return Err(ToolError::Failed(format!("file not found: {raw}")));
        }
        if !path.is_file() {
            return Err(ToolError::Failed(format!("not a file: {raw}")));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let (content, _) = truncate_chars(&content, MAX_READ_CHARS);
        Ok(content)
    }
}

pub struct WriteFileTool {
    workspace: PathBuf,
    restrict: bool,
    definition: ToolDefinition,
}

impl WriteFileTool {
    pub fn new(workspace: PathBuf, restrict: bool) -> Self {
        let definition = ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file, creating parent directories as needed. \
                          Overwrites an existing file."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path, absolute or relative to the workspace."
                    },
                    "content": {
                        "type": "string",
                        "description": "The full file content."
                    }
                },
                "required": ["path", "content"]
            }),
        };
        Self {
            workspace,
            restrict,
            definition,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let raw = required_str(&params, "path")?;
        let content = required_str(&params, "content")?;
        let path = resolve_path(raw, &self.workspace, self.restrict)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path.display()
        ))
    }
}

pub struct ListDirTool {
    workspace: PathBuf,
    restrict: bool,
    definition: ToolDefinition,
}

impl ListDirTool {
    pub fn new(workspace: PathBuf, restrict: bool) -> Self {
        let definition = ToolDefinition {
            name: "list_dir".to_string(),
            description: "List the entries of a directory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory path, absolute or relative to the workspace. Defaults to the workspace."
                    }
                }
            }),
        };
        Self {
            workspace,
            restrict,
            definition,
        }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let raw = crate::optional_str(&params, "path").unwrap_or(".");
        let path = resolve_path(raw, &self.workspace, self.restrict)?;

        if !path.is_dir() {
            return Err(ToolError::Failed(format!("not a directory: {raw}")));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }

        if entries.is_empty() {
            return Ok(format!("Directory {} is empty", path.display()));
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}
