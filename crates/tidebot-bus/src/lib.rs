//! tidebot-bus: the message bus between chat channels and the agent.
//!
//! Provides:
//! - `AsyncQueue`, an unbounded multi-producer/multi-consumer FIFO
//! - `MessageBus` with independent inbound and outbound queues and
//!   per-channel outbound fan-out
//! - `ChannelPlugin` / `ChannelManager` for wiring channel adapters to the bus

pub mod bus;
pub mod channel;
pub mod queue;

pub use bus::{MessageBus, OutboundHandler, outbound_handler};
pub use channel::{ChannelManager, ChannelPlugin};
pub use queue::AsyncQueue;
