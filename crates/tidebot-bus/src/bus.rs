//! Message bus: inbound/outbound queues plus outbound subscriber fan-out.
//!
//! ```text
//! Channel adapter ──publish_inbound──▶ [inbound] ──consume_inbound──▶ Agent
//! Agent ──publish_outbound──▶ [outbound] ──dispatch loop──▶ subscribers[channel]
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use tidebot_types::{InboundMessage, OutboundMessage};

use crate::queue::AsyncQueue;

/// Async outbound subscriber.
pub type OutboundHandler =
    Arc<dyn Fn(OutboundMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`OutboundHandler`].
pub fn outbound_handler<F, Fut>(f: F) -> OutboundHandler
where
    F: Fn(OutboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |msg| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f(msg)) })
}

/// How often the dispatch loop wakes up to check for a stop request when idle.
const DEFAULT_DISPATCH_POLL: Duration = Duration::from_secs(1);

/// Decouples chat channels from the agent.
///
/// The two queues share no state: a backlog on one never delays the other.
pub struct MessageBus {
    inbound: AsyncQueue<InboundMessage>,
    outbound: AsyncQueue<OutboundMessage>,
    subscribers: RwLock<HashMap<String, Vec<OutboundHandler>>>,
    running: AtomicBool,
    dispatch_poll: Duration,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inbound: AsyncQueue::new(),
            outbound: AsyncQueue::new(),
            subscribers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            dispatch_poll: DEFAULT_DISPATCH_POLL,
        }
    }

    /// Override how long the dispatch loop waits for an item before it
    /// re-checks the running flag.
    pub fn with_dispatch_poll(mut self, poll: Duration) -> Self {
        self.dispatch_poll = poll;
        self
    }

    // ─── Inbound ────────────────────────────────────────────

    /// Publish a message from a channel to the agent.
    pub fn publish_inbound(&self, msg: InboundMessage) {
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, "Inbound message queued");
        self.inbound.push(msg);
    }

    /// Wait for the next inbound message.
    pub async fn consume_inbound(&self) -> InboundMessage {
        self.inbound.pop().await
    }

    /// Wait up to `timeout` for the next inbound message.
    pub async fn consume_inbound_timeout(&self, timeout: Duration) -> Option<InboundMessage> {
        self.inbound.pop_timeout(timeout).await
    }

    pub fn inbound_size(&self) -> usize {
        self.inbound.len()
    }

    // ─── Outbound ───────────────────────────────────────────

    /// Publish a response from the agent to a channel.
    pub fn publish_outbound(&self, msg: OutboundMessage) {
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, "Outbound message queued");
        self.outbound.push(msg);
    }

    /// Wait for the next outbound message.
    pub async fn consume_outbound(&self) -> OutboundMessage {
        self.outbound.pop().await
    }

    /// Wait up to `timeout` for the next outbound message.
    pub async fn consume_outbound_timeout(&self, timeout: Duration) -> Option<OutboundMessage> {
        self.outbound.pop_timeout(timeout).await
    }

    pub fn outbound_size(&self) -> usize {
        self.outbound.len()
    }

    // ─── Subscribers ────────────────────────────────────────

    /// Register a handler for outbound messages addressed to `channel`.
    pub async fn subscribe_outbound(&self, channel: &str, handler: OutboundHandler) {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(channel.to_string())
            .or_default()
            .push(handler);
    }

    /// Drop every handler registered for `channel`. Returns how many were removed.
    pub async fn unsubscribe_outbound(&self, channel: &str) -> usize {
        self.subscribers
            .write()
            .await
            .remove(channel)
            .map_or(0, |handlers| handlers.len())
    }

    // ─── Dispatch ───────────────────────────────────────────

    /// Run the outbound dispatch loop until [`stop`](Self::stop) is called.
    ///
    /// Should be spawned as a background task.
    pub async fn dispatch_outbound(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!("Outbound dispatcher started");

        while self.running.load(Ordering::SeqCst) {
            if let Some(msg) = self.consume_outbound_timeout(self.dispatch_poll).await {
                self.deliver(msg).await;
            }
        }

        info!("Outbound dispatcher stopped");
    }

    /// Fan one message out to every subscriber of its channel.
    ///
    /// Each handler runs as its own task so that an error or a panic in one
    /// subscriber is logged and the remaining subscribers still receive it.
    async fn deliver(&self, msg: OutboundMessage) {
        let handlers = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(&msg.channel) {
                Some(list) => list.clone(),
                None => {
                    debug!(channel = %msg.channel, "No subscribers, dropping outbound message");
                    return;
                }
            }
        };

        for handler in handlers {
            let channel = msg.channel.clone();
            let msg = msg.clone();
            // The handler is called inside the task too: a panic while it
            // builds its future must not unwind the dispatch loop.
            match tokio::spawn(async move { handler(msg).await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%channel, "Outbound subscriber failed: {e:#}"),
                Err(e) => error!(%channel, "Outbound subscriber panicked: {e}"),
            }
        }
    }

    /// Ask the dispatch loop to exit after its current wait.
    ///
    /// Queued messages are left in place.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex;

    fn recording_handler(log: Arc<Mutex<Vec<String>>>) -> OutboundHandler {
        outbound_handler(move |msg: OutboundMessage| {
            let log = log.clone();
            async move {
                log.lock().await.push(msg.content);
                Ok(())
            }
        })
    }

    fn fast_bus() -> Arc<MessageBus> {
        Arc::new(MessageBus::new().with_dispatch_poll(Duration::from_millis(20)))
    }

    #[tokio::test]
    async fn test_inbound_round_trip() {
        let bus = MessageBus::new();
        bus.publish_inbound(InboundMessage::new("cli", "user", "direct", "first"));
        bus.publish_inbound(InboundMessage::new("cli", "user", "direct", "second"));
        assert_eq!(bus.inbound_size(), 2);

        assert_eq!(bus.consume_inbound().await.content, "first");
        assert_eq!(bus.consume_inbound().await.content, "second");
        assert_eq!(bus.inbound_size(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let bus = MessageBus::new();
        bus.publish_outbound(OutboundMessage::new("cli", "direct", "out"));
        assert!(
            bus.consume_inbound_timeout(Duration::from_millis(20))
                .await
                .is_none()
        );
        assert_eq!(bus.outbound_size(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_channel() {
        let bus = fast_bus();
        let cli_log = Arc::new(Mutex::new(Vec::new()));
        let tg_log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_outbound("cli", recording_handler(cli_log.clone()))
            .await;
        bus.subscribe_outbound("telegram", recording_handler(tg_log.clone()))
            .await;

        let dispatcher = tokio::spawn(bus.clone().dispatch_outbound());
        bus.publish_outbound(OutboundMessage::new("cli", "direct", "a"));
        bus.publish_outbound(OutboundMessage::new("telegram", "42", "b"));
        bus.publish_outbound(OutboundMessage::new("cli", "direct", "c"));
        bus.publish_outbound(OutboundMessage::new("nobody", "x", "dropped"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        bus.stop();
        dispatcher.await.unwrap();

        assert_eq!(*cli_log.lock().await, vec!["a", "c"]);
        assert_eq!(*tg_log.lock().await, vec!["b"]);
        assert_eq!(bus.outbound_size(), 0);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let bus = fast_bus();
        let calls = Arc::new(AtomicU32::new(0));

        bus.subscribe_outbound(
            "cli",
            outbound_handler(|_msg| async { Err::<(), _>(anyhow::anyhow!("boom")) }),
        )
        .await;
        bus.subscribe_outbound(
            "cli",
            outbound_handler(|msg: OutboundMessage| async move {
                if msg.content.is_empty() {
                    return Ok::<(), anyhow::Error>(());
                }
                panic!("subscriber panic")
            }),
        )
        .await;
        let c = calls.clone();
        bus.subscribe_outbound(
            "cli",
            outbound_handler(move |_msg| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .await;

        let dispatcher = tokio::spawn(bus.clone().dispatch_outbound());
        bus.publish_outbound(OutboundMessage::new("cli", "direct", "one"));
        bus.publish_outbound(OutboundMessage::new("cli", "direct", "two"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bus.is_running());
        bus.stop();
        dispatcher.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscriber_panicking_before_its_future_keeps_dispatching() {
        let bus = fast_bus();
        let calls = Arc::new(AtomicU32::new(0));

        let eager: OutboundHandler =
            Arc::new(|_msg: OutboundMessage| -> BoxFuture<'static, anyhow::Result<()>> {
                panic!("handler failed to start")
            });
        bus.subscribe_outbound("cli", eager).await;
        let c = calls.clone();
        bus.subscribe_outbound(
            "cli",
            outbound_handler(move |_msg| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .await;

        let dispatcher = tokio::spawn(bus.clone().dispatch_outbound());
        bus.publish_outbound(OutboundMessage::new("cli", "direct", "one"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!dispatcher.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.publish_outbound(OutboundMessage::new("cli", "direct", "two"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(bus.outbound_size(), 0);

        bus.stop();
        assert!(dispatcher.await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_leaves_queue_untouched() {
        let bus = fast_bus();
        let dispatcher = tokio::spawn(bus.clone().dispatch_outbound());
        tokio::time::sleep(Duration::from_millis(30)).await;
        bus.stop();
        tokio::time::timeout(Duration::from_secs(1), dispatcher)
            .await
            .expect("dispatcher should exit promptly")
            .unwrap();

        bus.publish_outbound(OutboundMessage::new("cli", "direct", "late"));
        assert_eq!(bus.outbound_size(), 1);
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = MessageBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_outbound("cli", recording_handler(log.clone()))
            .await;
        bus.subscribe_outbound("cli", recording_handler(log)).await;
        assert_eq!(bus.unsubscribe_outbound("cli").await, 2);
        assert_eq!(bus.unsubscribe_outbound("cli").await, 0);
    }
}
