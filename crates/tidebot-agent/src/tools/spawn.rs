//! `spawn` tool: delegate a task to a background subagent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use tidebot_tools::{Tool, ToolContext, ToolDefinition, ToolError};

use crate::subagent::{SpawnRequest, SubagentManager};

pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    definition: ToolDefinition,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        let definition = ToolDefinition {
            name: "spawn".to_string(),
            description: "Spawn a subagent to handle a task in the background. Use it for \
                          complex or slow tasks that can run independently. The subagent \
                          reports back when it is done."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task": {
                        "type": "string",
                        "description": "The task for the subagent to complete."
                    },
                    "label": {
                        "type": "string",
                        "description": "Optional short label for the task."
                    }
                },
                "required": ["task"]
            }),
        };
        Self {
            manager,
            definition,
        }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let task = params
            .get("task")
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidParams("missing required parameter: task".into()))?;

        let mut request = SpawnRequest::new(task).with_origin(&ctx.channel, &ctx.chat_id);
        if let Some(label) = params.get("label").and_then(|v| v.as_str()) {
            request = request.with_label(label);
        }
        Ok(self.manager.spawn(request).await)
    }
}
