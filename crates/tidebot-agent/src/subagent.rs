//! Background subagents.
//!
//! A subagent runs one delegated task in its own tool loop with the
//! file, shell and web tools only. It cannot message the user or spawn
//! further subagents; its result reaches the user solely as a `system`
//! inbound message that the main agent turns into a reply.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tidebot_bus::MessageBus;
use tidebot_config::ToolsConfig;
use tidebot_tools::{ToolContext, ToolRegistry, create_builtin_tools};
use tidebot_types::{CLI_CHANNEL, DIRECT_CHAT_ID, InboundMessage, SYSTEM_CHANNEL};

use crate::llm::{ChatMessage, ChatOptions, LlmProvider};
use crate::runner::{AgentError, LoopOutcome, run_tool_loop};

/// LLM calls a subagent may make before it is stopped.
pub const SUBAGENT_MAX_ITERATIONS: usize = 15;

/// Result text when the ceiling is reached without a final answer.
pub const NO_FINAL_RESPONSE: &str = "Task completed but no final response was generated.";

/// Sender id on subagent announcements.
pub const SUBAGENT_SENDER: &str = "subagent";

const LABEL_CHARS: usize = 30;

/// Parameters of a spawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    pub task: String,
    pub label: Option<String>,
    /// Channel the result is announced to; defaults to `cli`.
    pub origin_channel: Option<String>,
    /// Chat the result is announced to; defaults to `direct`.
    pub origin_chat_id: Option<String>,
}

impl SpawnRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_origin(mut self, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        self.origin_channel = Some(channel.into());
        self.origin_chat_id = Some(chat_id.into());
        self
    }
}

/// A subagent that has not settled yet.
#[derive(Debug, Clone)]
pub struct RunningSubagent {
    pub id: String,
    pub label: String,
    cancel: CancellationToken,
}

/// Everything one run needs, moved into its task.
struct SubagentRun {
    id: String,
    label: String,
    task: String,
    origin_channel: String,
    origin_chat_id: String,
    cancel: CancellationToken,
}

pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
    workspace: PathBuf,
    tools_config: ToolsConfig,
    options: ChatOptions,
    running: RwLock<HashMap<String, RunningSubagent>>,
}

impl SubagentManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        bus: Arc<MessageBus>,
        workspace: PathBuf,
        tools_config: ToolsConfig,
        options: ChatOptions,
    ) -> Self {
        Self {
            provider,
            bus,
            workspace,
            tools_config,
            options,
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Start a subagent and return an acknowledgement immediately.
    ///
    /// The run is supervised: its outcome, including a panic, is announced on
    /// the bus exactly once and the running entry is removed when it settles.
    pub async fn spawn(self: &Arc<Self>, request: SpawnRequest) -> String {
        let id = short_id();
        let label = request
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| default_label(&request.task));
        let cancel = CancellationToken::new();

        self.running.write().await.insert(
            id.clone(),
            RunningSubagent {
                id: id.clone(),
                label: label.clone(),
                cancel: cancel.clone(),
            },
        );

        let run = SubagentRun {
            id: id.clone(),
            label: label.clone(),
            task: request.task,
            origin_channel: request
                .origin_channel
                .unwrap_or_else(|| CLI_CHANNEL.to_string()),
            origin_chat_id: request
                .origin_chat_id
                .unwrap_or_else(|| DIRECT_CHAT_ID.to_string()),
            cancel,
        };
        info!(subagent_id = %id, %label, "Spawned subagent");

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.supervise(run).await });

        format!("Subagent [{label}] started (id: {id}). I'll notify you when it completes.")
    }

    /// Cancel a running subagent. Its announcement reports `cancelled`.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.running.read().await.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(subagent_id = %id, "Cancelling subagent");
                true
            }
            None => false,
        }
    }

    /// Cancel every running subagent.
    pub async fn cancel_all(&self) {
        for entry in self.running.read().await.values() {
            entry.cancel.cancel();
        }
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    pub async fn list_running(&self) -> Vec<RunningSubagent> {
        let mut list: Vec<_> = self.running.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    async fn supervise(self: Arc<Self>, run: SubagentRun) {
        let worker = {
            let manager = Arc::clone(&self);
            let task = run.task.clone();
            let ctx = ToolContext::new(&run.origin_channel, &run.origin_chat_id);
            let cancel = run.cancel.clone();
            tokio::spawn(async move { manager.run_task(&task, &ctx, &cancel).await })
        };

        let outcome = match worker.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(join_error_message(e)),
        };

        self.running.write().await.remove(&run.id);

        match &outcome {
            Ok(_) => info!(subagent_id = %run.id, "Subagent completed"),
            Err(e) => warn!(subagent_id = %run.id, "Subagent failed: {e}"),
        }
        self.announce(&run, outcome);
    }

    async fn run_task(
        &self,
        task: &str,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let mut tools = ToolRegistry::new();
        for tool in create_builtin_tools(self.workspace.clone(), &self.tools_config) {
            tools.register(tool);
        }

        let mut messages = vec![
            ChatMessage::system(self.system_prompt(task)),
            ChatMessage::user(task),
        ];
        let outcome = run_tool_loop(
            self.provider.as_ref(),
            &tools,
            &self.options,
            &mut messages,
            SUBAGENT_MAX_ITERATIONS,
            ctx,
            cancel,
        )
        .await?;

        Ok(match outcome {
            LoopOutcome::Reply(text) => text,
            LoopOutcome::IterationLimit => NO_FINAL_RESPONSE.to_string(),
        })
    }

    fn system_prompt(&self, task: &str) -> String {
        format!(
            "# Subagent\n\n\
             You are a subagent spawned by the main agent to complete one task.\n\n\
             ## Your task\n{task}\n\n\
             ## Rules\n\
             - Stay focused on the assigned task.\n\
             - Your final response is reported back to the main agent.\n\
             - You cannot message the user or spawn other subagents.\n\n\
             ## Workspace\n{}\n",
            self.workspace.display()
        )
    }

    fn announce(&self, run: &SubagentRun, outcome: Result<String, String>) {
        let (status, result) = match outcome {
            Ok(text) => ("completed successfully", text),
            Err(e) => ("failed", e),
        };
        let content = format!(
            "[Subagent '{}' {status}]\n\n\
             Task: {}\n\n\
             Result:\n{result}\n\n\
             Summarize this naturally for the user. Keep it brief (1-2 sentences). \
             Do not mention technical details like \"subagent\" or task IDs.",
            run.label, run.task
        );

        let msg = InboundMessage::new(
            SYSTEM_CHANNEL,
            SUBAGENT_SENDER,
            format!("{}:{}", run.origin_channel, run.origin_chat_id),
            content,
        )
        .with_metadata("subagent_id", json!(run.id));
        self.bus.publish_inbound(msg);
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn default_label(task: &str) -> String {
    let mut label: String = task.chars().take(LABEL_CHARS).collect();
    if task.chars().count() > LABEL_CHARS {
        label.push_str("...");
    }
    label
}

fn join_error_message(e: tokio::task::JoinError) -> String {
    if e.is_cancelled() {
        return "subagent task was aborted".to_string();
    }
    let payload = e.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!("Subagent panicked: {detail}");
    format!("subagent panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmResponse;
    use crate::test_support::{
        AlwaysToolProvider, PanickingProvider, ScriptedProvider, StallingProvider, options,
    };
    use std::time::Duration;

    fn manager(provider: Arc<dyn LlmProvider>, dir: &tempfile::TempDir) -> Arc<SubagentManager> {
        Arc::new(SubagentManager::new(
            provider,
            Arc::new(MessageBus::new()),
            dir.path().to_path_buf(),
            ToolsConfig::default(),
            options(),
        ))
    }

    async fn next_announcement(manager: &SubagentManager) -> InboundMessage {
        manager
            .bus
            .consume_inbound_timeout(Duration::from_secs(10))
            .await
            .expect("subagent should announce")
    }

    #[test]
    fn test_default_label() {
        assert_eq!(default_label("short task"), "short task");
        let long = "a".repeat(40);
        assert_eq!(default_label(&long), format!("{}...", "a".repeat(30)));
    }

    #[tokio::test]
    async fn test_spawn_announces_result_to_origin() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![LlmResponse::text(
            "Found 3 files.",
        )]));
        let manager = manager(provider.clone(), &dir);

        let ack = manager
            .spawn(
                SpawnRequest::new("count the files")
                    .with_label("counter")
                    .with_origin("telegram", "42"),
            )
            .await;
        assert!(ack.starts_with("Subagent [counter] started (id: "));

        let msg = next_announcement(&manager).await;
        assert_eq!(msg.channel, SYSTEM_CHANNEL);
        assert_eq!(msg.sender_id, SUBAGENT_SENDER);
        assert_eq!(msg.chat_id, "telegram:42");
        assert!(msg.content.starts_with("[Subagent 'counter' completed successfully]"));
        assert!(msg.content.contains("Task: count the files"));
        assert!(msg.content.contains("Result:\nFound 3 files."));
        assert_eq!(manager.running_count().await, 0);

        // Task-scoped system prompt followed by the task itself.
        let request = &provider.requests()[0];
        assert!(request[0].content.contains("count the files"));
        assert_eq!(request[1].content, "count the files");
    }

    #[tokio::test]
    async fn test_origin_defaults_to_cli_direct() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(
            Arc::new(ScriptedProvider::new(vec![LlmResponse::text("ok")])),
            &dir,
        );
        manager.spawn(SpawnRequest::new("x")).await;
        let msg = next_announcement(&manager).await;
        assert_eq!(msg.chat_id, "cli:direct");
    }

    #[tokio::test]
    async fn test_iteration_ceiling_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let provider = Arc::new(AlwaysToolProvider::default());
        let manager = manager(provider.clone(), &dir);

        manager.spawn(SpawnRequest::new("needs 20 steps")).await;
        let msg = next_announcement(&manager).await;

        assert_eq!(provider.calls(), SUBAGENT_MAX_ITERATIONS);
        assert!(msg.content.contains("completed successfully"));
        assert!(msg.content.contains(NO_FINAL_RESPONSE));
    }

    #[tokio::test]
    async fn test_llm_error_is_reported_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(ScriptedProvider::new(vec![])), &dir);

        manager.spawn(SpawnRequest::new("x").with_label("broken")).await;
        let msg = next_announcement(&manager).await;

        assert!(msg.content.starts_with("[Subagent 'broken' failed]"));
        assert!(msg.content.contains("script exhausted"));
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(PanickingProvider), &dir);

        manager.spawn(SpawnRequest::new("x")).await;
        let msg = next_announcement(&manager).await;

        assert!(msg.content.contains("failed"));
        assert!(msg.content.contains("subagent panicked: provider blew up"));
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_running_subagent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(StallingProvider), &dir);

        manager.spawn(SpawnRequest::new("wait").with_label("waiter")).await;
        let running = manager.list_running().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].label, "waiter");

        assert!(manager.cancel(&running[0].id).await);
        assert!(!manager.cancel("nope").await);

        let msg = next_announcement(&manager).await;
        assert!(msg.content.starts_with("[Subagent 'waiter' failed]"));
        assert!(msg.content.contains("Result:\ncancelled"));
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_subagents_each_announce_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(
            Arc::new(ScriptedProvider::new(vec![
                LlmResponse::text("one"),
                LlmResponse::text("two"),
            ])),
            &dir,
        );

        manager.spawn(SpawnRequest::new("a")).await;
        manager.spawn(SpawnRequest::new("b")).await;
        next_announcement(&manager).await;
        next_announcement(&manager).await;
        assert!(
            manager
                .bus
                .consume_inbound_timeout(Duration::from_millis(100))
                .await
                .is_none()
        );
    }
}
