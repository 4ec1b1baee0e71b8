use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tidebot_agent::{LlmProvider, OpenAiProvider, Runtime};
use tidebot_bus::{ChannelPlugin, MessageBus};
use tidebot_config::TidebotConfig;
use tidebot_types::{CLI_CHANNEL, ChannelStatus, DIRECT_CHAT_ID, InboundMessage, OutboundMessage};

/// Load config, falling back to defaults when the file is unreadable.
pub fn load_config() -> TidebotConfig {
    tidebot_config::load_config().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {e}");
        TidebotConfig::default()
    })
}

/// Build a runtime backed by the configured provider.
pub fn build_runtime(config: &TidebotConfig) -> Result<Runtime> {
    let provider: Arc<dyn LlmProvider> = Arc::new(
        OpenAiProvider::from_config(&config.provider).context("Failed to set up LLM provider")?,
    );
    Runtime::build(config, provider)
}

/// Run `tidebot agent`.
pub async fn run_agent(message: Option<String>) -> Result<()> {
    let config = load_config();
    let mut runtime = build_runtime(&config)?;

    if let Some(message) = message {
        let reply = runtime
            .agent
            .process_direct(&message, &runtime.shutdown_token())
            .await?;
        println!("{reply}");
        runtime.shutdown().await;
        return Ok(());
    }

    let console = Arc::new(ConsoleChannel::new(runtime.shutdown_token()));
    runtime.add_channel(console).await;

    println!("tidebot (model: {})", config.agent.model);
    println!("Type your message and press Enter. Type 'exit' or Ctrl+D to quit.\n");
    runtime.start().await?;

    let shutdown = runtime.shutdown_token();
    tokio::select! {
        _ = shutdown.cancelled() => {}
        r = tokio::signal::ctrl_c() => r?,
    }

    runtime.shutdown().await;
    println!("Goodbye!");
    Ok(())
}

/// The interactive console as a bus channel.
///
/// Lines typed on stdin become `cli:direct` inbound messages; replies
/// addressed to `cli` are printed.
pub struct ConsoleChannel {
    status: Mutex<ChannelStatus>,
    shutdown: CancellationToken,
}

impl ConsoleChannel {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            status: Mutex::new(ChannelStatus::Stopped),
            shutdown,
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        if let Ok(mut s) = self.status.lock() {
            *s = status;
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

/// What a typed line means to the console.
#[derive(Debug, PartialEq, Eq)]
enum ConsoleInput<'a> {
    Skip,
    Quit,
    Message(&'a str),
}

fn classify_input(line: &str) -> ConsoleInput<'_> {
    match line.trim() {
        "" => ConsoleInput::Skip,
        "exit" | "quit" | "/exit" | "/quit" => ConsoleInput::Quit,
        text => ConsoleInput::Message(text),
    }
}

#[async_trait]
impl ChannelPlugin for ConsoleChannel {
    fn name(&self) -> &str {
        CLI_CHANNEL
    }

    async fn start(&self, bus: Arc<MessageBus>) -> anyhow::Result<()> {
        let shutdown = self.shutdown.clone();
        // Blocking stdin reads live on their own thread so they never hold up
        // runtime shutdown.
        std::thread::Builder::new()
            .name("tidebot-console".into())
            .spawn(move || {
                prompt();
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    match classify_input(&line) {
                        ConsoleInput::Skip => prompt(),
                        ConsoleInput::Quit => break,
                        ConsoleInput::Message(text) => bus.publish_inbound(InboundMessage::new(
                            CLI_CHANNEL,
                            "user",
                            DIRECT_CHAT_ID,
                            text,
                        )),
                    }
                    if shutdown.is_cancelled() {
                        break;
                    }
                }
                shutdown.cancel();
            })?;
        self.set_status(ChannelStatus::Running);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.set_status(ChannelStatus::Stopped);
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        println!("\n{}\n", message.content);
        prompt();
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| ChannelStatus::Error(e.to_string()))
    }
}
