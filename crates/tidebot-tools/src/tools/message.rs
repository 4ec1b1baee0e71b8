//! `message` tool: send a message to a chat through the bus.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use tidebot_bus::MessageBus;
use tidebot_types::OutboundMessage;

use crate::context::ToolContext;
use crate::registry::{Tool, ToolDefinition};
use crate::{ToolError, optional_str, required_str};

pub struct MessageTool {
    bus: Arc<MessageBus>,
    definition: ToolDefinition,
}

impl MessageTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        let definition = ToolDefinition {
            name: "message".to_string(),
            description: "Send a message to the user. Defaults to the current chat; \
                          set channel and chat_id to message a different chat."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "The message text to send."
                    },
                    "channel": {
                        "type": "string",
                        "description": "Target channel (e.g. telegram, cli)."
                    },
                    "chat_id": {
                        "type": "string",
                        "description": "Target chat on that channel."
                    }
                },
                "required": ["content"]
            }),
        };
        Self { bus, definition }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
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
        let content = required_str(&params, "content")?;
        let channel = optional_str(&params, "channel").unwrap_or(&ctx.channel);
        let chat_id = optional_str(&params, "chat_id").unwrap_or(&ctx.chat_id);

        self.bus
            .publish_outbound(OutboundMessage::new(channel, chat_id, content));
        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}
