//! Chat channel plugins and their wiring to the bus.
//!
//! A channel adapter publishes what its users type with
//! [`MessageBus::publish_inbound`] and receives replies through
//! [`ChannelPlugin::send`], which [`ChannelManager`] subscribes to outbound
//! messages addressed to the channel's name:
//!
//! ```text
//! platform ──start()──▶ publish_inbound ──▶ agent
//! platform ◀──send()─── dispatch_outbound ◀── publish_outbound
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use tidebot_types::{ChannelInfo, ChannelStatus, OutboundMessage};

use crate::bus::{MessageBus, outbound_handler};

/// A chat platform adapter.
///
/// All methods take `&self`; keep mutable state behind a lock.
#[async_trait::async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Channel name; outbound messages are routed by this key.
    fn name(&self) -> &str;

    /// Start the channel, connecting to the platform.
    ///
    /// Incoming messages go to `bus.publish_inbound`. Implementations
    /// typically spawn a background task for the listener.
    async fn start(&self, bus: Arc<MessageBus>) -> anyhow::Result<()>;

    /// Stop the channel, disconnecting from the platform.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver a message to the platform.
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()>;

    fn status(&self) -> ChannelStatus;
}

/// Owns the registered channel plugins and their bus subscriptions.
pub struct ChannelManager {
    bus: Arc<MessageBus>,
    channels: RwLock<HashMap<String, Arc<dyn ChannelPlugin>>>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a channel plugin and subscribe it to outbound messages
    /// addressed to its name. Replaces any existing channel with the same name.
    pub async fn register(&self, channel: Arc<dyn ChannelPlugin>) {
        let name = channel.name().to_string();
        info!(channel = %name, "Registering channel plugin");

        self.bus.unsubscribe_outbound(&name).await;
        let sender = channel.clone();
        self.bus
            .subscribe_outbound(
                &name,
                outbound_handler(move |msg| {
                    let sender = sender.clone();
                    async move { sender.send(msg).await }
                }),
            )
            .await;

        self.channels.write().await.insert(name, channel);
    }

    /// Unregister a channel plugin by name. Stops it if running.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.channels.write().await.remove(name);
        match removed {
            Some(channel) => {
                self.bus.unsubscribe_outbound(name).await;
                if channel.status() == ChannelStatus::Running {
                    if let Err(e) = channel.stop().await {
                        warn!(channel = name, "Failed to stop channel during unregister: {e}");
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Start a specific channel by name.
    pub async fn start_channel(&self, name: &str) -> anyhow::Result<()> {
        let channels = self.channels.read().await;
        let channel = channels
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Channel not found: {name}"))?;

        channel.start(self.bus.clone()).await
    }

    /// Stop a specific channel by name.
    pub async fn stop_channel(&self, name: &str) -> anyhow::Result<()> {
        let channels = self.channels.read().await;
        let channel = channels
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Channel not found: {name}"))?;

        channel.stop().await
    }

    /// Start every registered channel; failures are logged.
    pub async fn start_all(&self) {
        let channels = self.channels.read().await;
        for (name, channel) in channels.iter() {
            if let Err(e) = channel.start(self.bus.clone()).await {
                warn!(channel = %name, "Failed to start channel: {e}");
            }
        }
    }

    pub async fn stop_all(&self) {
        let channels = self.channels.read().await;
        for (name, channel) in channels.iter() {
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, "Failed to stop channel: {e}");
            }
        }
    }

    /// Registered channels and their status, by name.
    pub async fn list_channels(&self) -> Vec<ChannelInfo> {
        let channels = self.channels.read().await;
        let mut list: Vec<ChannelInfo> = channels
            .values()
            .map(|ch| ChannelInfo {
                name: ch.name().to_string(),
                status: ch.status(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn channel_status(&self, name: &str) -> Option<ChannelStatus> {
        let channels = self.channels.read().await;
        channels.get(name).map(|ch| ch.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use tidebot_types::InboundMessage;

    /// Records what it is sent and greets the bus on start.
    struct RecordingChannel {
        name: String,
        status: Mutex<ChannelStatus>,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl RecordingChannel {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                status: Mutex::new(ChannelStatus::Stopped),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ChannelPlugin for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self, bus: Arc<MessageBus>) -> anyhow::Result<()> {
            *self.status.lock().unwrap() = ChannelStatus::Running;
            bus.publish_inbound(InboundMessage::new(&self.name, "user-1", "chat-1", "hello"));
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            *self.status.lock().unwrap() = ChannelStatus::Stopped;
            Ok(())
        }

        async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn status(&self) -> ChannelStatus {
            self.status.lock().unwrap().clone()
        }
    }

    fn test_bus() -> Arc<MessageBus> {
        Arc::new(MessageBus::new().with_dispatch_poll(Duration::from_millis(20)))
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let mgr = ChannelManager::new(test_bus());
        mgr.register(Arc::new(RecordingChannel::new("telegram"))).await;
        mgr.register(Arc::new(RecordingChannel::new("cli"))).await;

        let names: Vec<_> = mgr.list_channels().await.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["cli", "telegram"]);
        assert_eq!(mgr.channel_status("cli").await, Some(ChannelStatus::Stopped));
        assert_eq!(mgr.channel_status("discord").await, None);
    }

    #[tokio::test]
    async fn test_start_stop_channel() {
        let bus = test_bus();
        let mgr = ChannelManager::new(bus.clone());
        mgr.register(Arc::new(RecordingChannel::new("mock"))).await;

        mgr.start_channel("mock").await.unwrap();
        assert_eq!(mgr.channel_status("mock").await, Some(ChannelStatus::Running));
        assert_eq!(bus.consume_inbound().await.content, "hello");

        mgr.stop_channel("mock").await.unwrap();
        assert_eq!(mgr.channel_status("mock").await, Some(ChannelStatus::Stopped));
    }

    #[tokio::test]
    async fn test_unregister() {
        let bus = test_bus();
        let mgr = ChannelManager::new(bus.clone());
        mgr.register(Arc::new(RecordingChannel::new("mock"))).await;

        assert!(mgr.unregister("mock").await);
        assert!(!mgr.unregister("mock").await);
        assert!(mgr.list_channels().await.is_empty());
        assert_eq!(bus.unsubscribe_outbound("mock").await, 0);
    }

    #[tokio::test]
    async fn test_outbound_reaches_registered_channel() {
        let bus = test_bus();
        let mgr = ChannelManager::new(bus.clone());
        let ch = Arc::new(RecordingChannel::new("mock"));
        mgr.register(ch.clone()).await;

        let dispatcher = tokio::spawn(bus.clone().dispatch_outbound());
        bus.publish_outbound(OutboundMessage::new("mock", "chat-1", "Hello!"));
        bus.publish_outbound(OutboundMessage::new("other", "chat-1", "ignored"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        bus.stop();
        dispatcher.await.unwrap();

        let sent = ch.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "Hello!");
    }

    #[tokio::test]
    async fn test_reregister_replaces_subscription() {
        let bus = test_bus();
        let mgr = ChannelManager::new(bus.clone());
        mgr.register(Arc::new(RecordingChannel::new("mock"))).await;
        mgr.register(Arc::new(RecordingChannel::new("mock"))).await;
        assert_eq!(bus.unsubscribe_outbound("mock").await, 1);
    }

    #[tokio::test]
    async fn test_start_nonexistent_channel() {
        let mgr = ChannelManager::new(test_bus());
        assert!(mgr.start_channel("nonexistent").await.is_err());
    }
}
