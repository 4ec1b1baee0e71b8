//! The main agent: consumes inbound messages, runs the tool loop and
//! publishes replies.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tidebot_bus::MessageBus;
use tidebot_config::AgentSettings;
use tidebot_tools::{ToolContext, ToolRegistry};
use tidebot_types::{CLI_CHANNEL, DIRECT_CHAT_ID, InboundMessage, OutboundMessage, SYSTEM_CHANNEL};

use crate::llm::{ChatMessage, ChatOptions, LlmProvider};
use crate::runner::{AgentError, LoopOutcome, run_tool_loop};

const INBOUND_POLL: Duration = Duration::from_secs(1);

const ERROR_REPLY: &str = "Sorry, I ran into an error while processing your message.";

const NO_REPLY: &str = "I've completed processing but have no response to give.";

pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    options: ChatOptions,
    workspace: PathBuf,
    max_iterations: usize,
    history_limit: usize,
    /// session key → user/assistant turns.
    sessions: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl AgentLoop {
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        tools: ToolRegistry,
        settings: &AgentSettings,
        workspace: PathBuf,
    ) -> Self {
        Self {
            bus,
            provider,
            tools,
            options: ChatOptions::from_settings(settings),
            workspace,
            max_iterations: settings.max_tool_iterations,
            history_limit: settings.history_limit,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Process inbound messages one at a time until `shutdown` fires.
    ///
    /// Each turn runs as its own task; a panic in the provider or a tool is
    /// answered with an apology and the loop moves on to the next message.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(tools = self.tools.len(), "Agent loop started");
        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                msg = self.bus.consume_inbound_timeout(INBOUND_POLL) => msg,
            };
            let Some(msg) = msg else { continue };

            let (channel, chat_id) = reply_target(&msg);
            let deliver = wants_reply(&msg);
            let agent = self.clone();
            let cancel = shutdown.clone();
            let turn = tokio::spawn(async move { agent.process_message(msg, &cancel).await });

            match turn.await {
                Ok(Some(reply)) => self.bus.publish_outbound(reply),
                Ok(None) => {}
                Err(e) => {
                    error!(%channel, %chat_id, "Agent turn crashed: {e}");
                    if deliver {
                        self.bus
                            .publish_outbound(OutboundMessage::new(channel, chat_id, ERROR_REPLY));
                    }
                }
            }
        }
        info!("Agent loop stopped");
    }

    /// Handle one inbound message and return the reply to publish, if any.
    ///
    /// `system` messages (subagent reports, cron turns) carry their origin as
    /// `channel:chat_id` and are answered there. A `deliver: false` metadata
    /// flag runs the turn without replying.
    pub async fn process_message(
        &self,
        msg: InboundMessage,
        cancel: &CancellationToken,
    ) -> Option<OutboundMessage> {
        let (channel, chat_id) = reply_target(&msg);
        let deliver = wants_reply(&msg);
        debug!(
            channel = %msg.channel,
            sender = %msg.sender_id,
            target = %format!("{channel}:{chat_id}"),
            "Processing message"
        );

        let ctx = ToolContext::new(&channel, &chat_id);
        let reply = match self.run_turn(&ctx, &msg.content, cancel).await {
            Ok(text) => text,
            Err(AgentError::Cancelled) => return None,
            Err(e) => {
                error!(session = %ctx.session_key(), "Agent turn failed: {e}");
                ERROR_REPLY.to_string()
            }
        };

        if !deliver {
            debug!(session = %ctx.session_key(), "Reply suppressed");
            return None;
        }
        if reply.trim().is_empty() {
            return None;
        }
        Some(OutboundMessage::new(channel, chat_id, reply))
    }

    /// Run one turn in the `cli:direct` session and return the reply text.
    pub async fn process_direct(
        &self,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        self.run_turn(&ToolContext::default(), content, cancel).await
    }

    async fn run_turn(
        &self,
        ctx: &ToolContext,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let session_key = ctx.session_key();
        let history = self
            .sessions
            .lock()
            .await
            .get(&session_key)
            .cloned()
            .unwrap_or_default();

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt(ctx)));
        messages.extend(history);
        messages.push(ChatMessage::user(content));

        let outcome = run_tool_loop(
            self.provider.as_ref(),
            &self.tools,
            &self.options,
            &mut messages,
            self.max_iterations,
            ctx,
            cancel,
        )
        .await?;
        let reply = match outcome {
            LoopOutcome::Reply(text) => text,
            LoopOutcome::IterationLimit => NO_REPLY.to_string(),
        };

        // Only plain turns are kept: a trimmed window must never start with a
        // tool result whose call was cut off.
        let mut sessions = self.sessions.lock().await;
        let turns = sessions.entry(session_key).or_default();
        turns.push(ChatMessage::user(content));
        turns.push(ChatMessage::assistant(reply.clone()));
        if turns.len() > self.history_limit {
            let excess = turns.len() - self.history_limit;
            turns.drain(..excess);
        }

        Ok(reply)
    }

    fn system_prompt(&self, ctx: &ToolContext) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!(
            "# tidebot\n\n\
             You are tidebot, a helpful personal assistant. You can read and write \
             files, run shell commands, search and fetch the web, message the user, \
             schedule jobs with the cron tool and delegate long tasks with spawn.\n\n\
             ## Current time\n{now}\n\n\
             ## Workspace\n{}\n\n\
             ## Session\nChannel: {}\nChat ID: {}\n",
            self.workspace.display(),
            ctx.channel,
            ctx.chat_id
        )
    }

    /// Number of messages kept for a session.
    pub async fn history_len(&self, session_key: &str) -> usize {
        self.sessions
            .lock()
            .await
            .get(session_key)
            .map_or(0, Vec::len)
    }
}

/// Where the reply to `msg` goes.
fn reply_target(msg: &InboundMessage) -> (String, String) {
    if msg.channel == SYSTEM_CHANNEL {
        parse_origin(&msg.chat_id)
    } else {
        (msg.channel.clone(), msg.chat_id.clone())
    }
}

fn wants_reply(msg: &InboundMessage) -> bool {
    msg.metadata
        .get("deliver")
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

/// Split a `channel:chat_id` origin; anything else is answered on the CLI.
fn parse_origin(chat_id: &str) -> (String, String) {
    match chat_id.split_once(':') {
        Some((channel, chat)) if !channel.is_empty() => (channel.to_string(), chat.to_string()),
        _ => (CLI_CHANNEL.to_string(), chat_id_or_direct(chat_id)),
    }
}

fn chat_id_or_direct(chat_id: &str) -> String {
    if chat_id.is_empty() {
        DIRECT_CHAT_ID.to_string()
    } else {
        chat_id.to_string()
    }
}
