use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ──────────────────── Channel Names ────────────────────

/// Channel used for runtime-internal messages (subagent reports, cron turns).
pub const SYSTEM_CHANNEL: &str = "system";

/// Channel name of the interactive console.
pub const CLI_CHANNEL: &str = "cli";

/// Chat id used when a message has no external origin.
pub const DIRECT_CHAT_ID: &str = "direct";

// ──────────────────── Bus Messages ────────────────────

/// Message travelling from a chat channel to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel name (e.g. "telegram", "cli", "system").
    pub channel: String,
    /// Identifier of whoever sent the message.
    pub sender_id: String,
    /// Chat / conversation identifier on the channel.
    pub chat_id: String,
    /// Message text content.
    pub content: String,
    /// Receipt time (unix millis).
    pub timestamp: i64,
    /// Media references (paths or URLs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    /// Channel-specific metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Build an inbound message stamped with the current time.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Key identifying the conversation this message belongs to.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// Message travelling from the agent to a chat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Destination channel name.
    pub channel: String,
    /// Destination chat identifier.
    pub chat_id: String,
    /// Response text content.
    pub content: String,
    /// Platform message id this replies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Media references (paths or URLs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    /// Channel-specific metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

// ──────────────────── Channel Status ────────────────────

/// Status of a channel plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Channel is not running.
    Stopped,
    /// Channel is initializing.
    Starting,
    /// Channel is running and accepting messages.
    Running,
    /// Channel encountered an error.
    Error(String),
}

/// Summary information about a registered channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name, also the bus routing key.
    pub name: String,
    /// Current status.
    pub status: ChannelStatus,
}
