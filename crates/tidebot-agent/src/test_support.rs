//! Mock LLM providers shared by the crate's tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use tidebot_tools::ToolDefinition;

use crate::llm::{ChatMessage, ChatOptions, LlmError, LlmProvider, LlmResponse, ToolCall};

pub fn options() -> ChatOptions {
    ChatOptions {
        model: "test-model".into(),
        max_tokens: 256,
        temperature: 0.0,
    }
}

/// Replays canned responses in order; errors once they run out.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Message lists seen by each call.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".into()))
    }
}

/// Always asks for `list_dir` on the workspace root.
#[derive(Default)]
pub struct AlwaysToolProvider {
    calls: AtomicUsize,
}

impl AlwaysToolProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for AlwaysToolProvider {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LlmResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: format!("call_{n}"),
                name: "list_dir".into(),
                arguments: json!({"path": "."}),
            }],
            finish_reason: Some("tool_calls".into()),
        })
    }
}

/// Never answers until cancelled.
pub struct StallingProvider;

#[async_trait]
impl LlmProvider for StallingProvider {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(LlmResponse::text("too late"))
    }
}

/// Panics inside `chat`.
pub struct PanickingProvider;

#[async_trait]
impl LlmProvider for PanickingProvider {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        panic!("provider blew up");
    }
}
