//! The LLM ↔ tool iteration shared by the main agent and subagents.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tidebot_tools::{ToolContext, ToolRegistry};

use crate::llm::{ChatMessage, ChatOptions, LlmError, LlmProvider};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("cancelled")]
    Cancelled,
}

/// How a tool loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model answered without calling tools.
    Reply(String),
    /// Every iteration asked for tools; no final text was produced.
    IterationLimit,
}

/// Drive the model until it answers in plain text or `max_iterations` LLM
/// calls have been made.
///
/// `messages` is extended in place with every assistant turn and tool result.
/// The LLM call and each tool execution are raced against `cancel`.
pub async fn run_tool_loop(
    provider: &dyn LlmProvider,
    tools: &ToolRegistry,
    options: &ChatOptions,
    messages: &mut Vec<ChatMessage>,
    max_iterations: usize,
    ctx: &ToolContext,
    cancel: &CancellationToken,
) -> Result<LoopOutcome, AgentError> {
    let definitions = tools.definitions();

    for iteration in 1..=max_iterations {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = provider.chat(messages, &definitions, options) => r?,
        };

        if !response.has_tool_calls() {
            let text = response.content.unwrap_or_default();
            messages.push(ChatMessage::assistant(text.clone()));
            debug!(iteration, "Tool loop finished with a reply");
            return Ok(LoopOutcome::Reply(text));
        }

        let calls = response.tool_calls;
        messages.push(ChatMessage::assistant_with_tools(
            response.content.unwrap_or_default(),
            calls.clone(),
        ));

        for call in calls {
            debug!(iteration, tool = %call.name, "Executing tool call");
            let params = if call.arguments.is_null() {
                Value::Object(Default::default())
            } else {
                call.arguments
            };
            let output = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                out = tools.execute(&call.name, params, ctx, cancel.child_token()) => out,
            };
            messages.push(ChatMessage::tool_result(call.id, call.name, output));
        }
    }

    debug!(max_iterations, "Tool loop hit its iteration ceiling");
    Ok(LoopOutcome::IterationLimit)
}
