//! tidebot-tools: Tool trait, registry and built-in tools.
//!
//! Provides:
//! - The [`Tool`] trait and [`ToolRegistry`] the agent loops call through
//! - Tool group definitions (fs, runtime, web, messaging, automation)
//! - File, shell and web tools shared by the main agent and subagents
//! - The `message` and `cron` tools, which only the main agent gets

pub mod context;
pub mod groups;
pub mod registry;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use context::ToolContext;
pub use registry::{Tool, ToolDefinition, ToolRegistry};

use tidebot_config::ToolsConfig;

/// Errors a tool can return. The registry renders them as text for the model.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("cancelled")]
    Cancelled,
}

/// Fetch a required string parameter.
pub(crate) fn required_str<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParams(format!("missing required parameter: {key}")))
}

pub(crate) fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Construct a self-contained tool by name.
///
/// Tools that need a live bus or scheduler (`message`, `cron`, `spawn`) are
/// wired by the runtime and yield `None` here, as do unknown names.
pub fn create_tool(name: &str, workspace: &Path, config: &ToolsConfig) -> Option<Arc<dyn Tool>> {
    let restrict = config.restrict_to_workspace;
    let workspace = workspace.to_path_buf();
    let tool: Arc<dyn Tool> = match name {
        "read_file" => Arc::new(tools::fs::ReadFileTool::new(workspace, restrict)),
        "write_file" => Arc::new(tools::fs::WriteFileTool::new(workspace, restrict)),
        "list_dir" => Arc::new(tools::fs::ListDirTool::new(workspace, restrict)),
        "exec" => Arc::new(tools::exec::ExecTool::new(
            workspace,
            config.exec.timeout_secs,
            restrict,
        )),
        "web_search" => Arc::new(tools::web::WebSearchTool::new(
            config.web.resolved_search_api_key(),
            config.web.max_results,
        )),
        "web_fetch" => Arc::new(tools::web::WebFetchTool::new()),
        _ => return None,
    };
    Some(tool)
}

/// Create the file, shell and web tools: everything in
/// [`groups::SUBAGENT_TOOLS`].
pub fn create_builtin_tools(workspace: PathBuf, config: &ToolsConfig) -> Vec<Arc<dyn Tool>> {
    groups::expand_names(groups::SUBAGENT_TOOLS)
        .iter()
        .filter_map(|name| {
            let tool = create_tool(name, &workspace, config);
            if tool.is_none() {
                tracing::warn!(tool = %name, "Tool group names an unknown tool");
            }
            tool
        })
        .collect()
}
