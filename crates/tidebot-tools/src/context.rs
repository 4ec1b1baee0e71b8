//! Per-call tool context.

use tidebot_types::{CLI_CHANNEL, DIRECT_CHAT_ID, InboundMessage};

/// Where the current turn came from.
///
/// Tools that talk back to the user (`message`, `spawn`, `cron`) use it as
/// the default destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub channel: String,
    pub chat_id: String,
}

impl ToolContext {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn from_inbound(msg: &InboundMessage) -> Self {
        Self::new(&msg.channel, &msg.chat_id)
    }

    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(CLI_CHANNEL, DIRECT_CHAT_ID)
    }
}
