//! Wires the bus, scheduler, subagents, agent loop and channels together.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tidebot_bus::{ChannelManager, ChannelPlugin, MessageBus};
use tidebot_config::TidebotConfig;
use tidebot_cron::{CronService, CronServiceConfig, JobHandler};
use tidebot_tools::tools::{cron::CronTool, message::MessageTool};
use tidebot_tools::{ToolRegistry, create_builtin_tools};

use crate::agent_loop::AgentLoop;
use crate::cron_handler::BusJobHandler;
use crate::llm::{ChatOptions, LlmProvider};
use crate::subagent::SubagentManager;
use crate::tools::spawn::SpawnTool;

/// A fully wired assistant. Nothing runs until [`start`](Self::start).
pub struct Runtime {
    pub bus: Arc<MessageBus>,
    pub cron: CronService,
    pub subagents: Arc<SubagentManager>,
    pub agent: Arc<AgentLoop>,
    pub channels: ChannelManager,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Build every component from config. Must be called inside a tokio
    /// runtime because the scheduler task is spawned here.
    pub fn build(config: &TidebotConfig, provider: Arc<dyn LlmProvider>) -> anyhow::Result<Self> {
        let workspace = config.workspace_path()?;
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("creating workspace {}", workspace.display()))?;

        let shutdown = CancellationToken::new();
        let bus = Arc::new(MessageBus::new());

        let handler: Arc<dyn JobHandler> = Arc::new(BusJobHandler::new(bus.clone()));
        let heartbeat_interval = config
            .heartbeat
            .enabled
            .then(|| Duration::from_secs(config.heartbeat.interval_secs.max(1)));
        let cron = CronService::spawn(
            CronServiceConfig {
                store_path: config.cron_store_path()?,
                workspace: Some(workspace.clone()),
                heartbeat_interval,
            },
            Some(handler),
            shutdown.child_token(),
        );

        let options = ChatOptions::from_settings(&config.agent);
        let subagents = Arc::new(SubagentManager::new(
            provider.clone(),
            bus.clone(),
            workspace.clone(),
            config.tools.clone(),
            options,
        ));

        let mut tools = ToolRegistry::new();
        for tool in create_builtin_tools(workspace.clone(), &config.tools) {
            tools.register(tool);
        }
        tools.register(Arc::new(MessageTool::new(bus.clone())));
        tools.register(Arc::new(SpawnTool::new(subagents.clone())));
        tools.register(Arc::new(CronTool::new(cron.clone())));

        let agent = Arc::new(AgentLoop::new(
            bus.clone(),
            provider,
            tools,
            &config.agent,
            workspace,
        ));
        let channels = ChannelManager::new(bus.clone());

        Ok(Self {
            bus,
            cron,
            subagents,
            agent,
            channels,
            shutdown,
            tasks: Vec::new(),
        })
    }

    pub async fn add_channel(&self, channel: Arc<dyn ChannelPlugin>) {
        self.channels.register(channel).await;
    }

    /// Start the outbound dispatcher, the scheduler, the agent loop and every
    /// registered channel.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.tasks.push(tokio::spawn(self.bus.clone().dispatch_outbound()));

        self.cron.start().await?;

        let agent = self.agent.clone();
        let shutdown = self.shutdown.clone();
        self.tasks
            .push(tokio::spawn(async move { agent.run(shutdown).await }));

        self.channels.start_all().await;
        info!("Runtime started");
        Ok(())
    }

    /// Token that stops the runtime when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop channels, subagents, the scheduler and the background loops.
    pub async fn shutdown(mut self) {
        info!("Shutting down runtime");
        self.channels.stop_all().await;
        self.subagents.cancel_all().await;
        if let Err(e) = self.cron.stop().await {
            warn!("Failed to stop cron service: {e}");
        }
        self.shutdown.cancel();
        self.bus.stop();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Runtime task ended abnormally: {e}");
            }
        }
        info!("Runtime stopped");
    }
}
