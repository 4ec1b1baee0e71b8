//! LLM provider abstraction.
//!
//! The agent loops only see [`LlmProvider`]; [`OpenAiProvider`] talks to any
//! OpenAI-compatible chat completions endpoint.

mod openai;
mod types;

pub use openai::OpenAiProvider;
pub use types::{ChatMessage, ChatOptions, LlmResponse, Role, ToolCall};

use async_trait::async_trait;
use tidebot_tools::ToolDefinition;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One chat completion. `tools` may be empty.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError>;
}
