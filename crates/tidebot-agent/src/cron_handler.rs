//! Turns fired cron jobs into agent turns.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use tidebot_bus::MessageBus;
use tidebot_cron::{JobHandler, ScheduledJob};
use tidebot_types::{CLI_CHANNEL, InboundMessage, SYSTEM_CHANNEL};

/// Sender id on cron-originated messages.
pub const CRON_SENDER: &str = "cron";

/// CLI chat that owns turns for jobs with no delivery target, keeping them
/// out of the interactive console's session.
pub const CRON_CHAT_ID: &str = "cron";

/// Publishes each fired job as a `system` inbound message.
///
/// The handler does not wait for the agent's reply: the agent loop may itself
/// be calling into the scheduler (through the `cron` tool), so the job is
/// settled as soon as the turn is queued.
pub struct BusJobHandler {
    bus: Arc<MessageBus>,
}

impl BusJobHandler {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

/// Build the inbound message for a fired job.
pub fn job_message(job: &ScheduledJob) -> InboundMessage {
    let origin = match (&job.payload.channel, &job.payload.to) {
        (Some(channel), Some(to)) if job.payload.deliver => format!("{channel}:{to}"),
        _ => format!("{CLI_CHANNEL}:{CRON_CHAT_ID}"),
    };
    InboundMessage::new(SYSTEM_CHANNEL, CRON_SENDER, origin, &job.payload.message)
        .with_metadata("deliver", json!(job.payload.deliver))
        .with_metadata("job_id", json!(job.id))
}

#[async_trait]
impl JobHandler for BusJobHandler {
    async fn on_job(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        debug!(job_id = %job.id, name = %job.name, "Queueing cron turn");
        self.bus.publish_inbound(job_message(job));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidebot_cron::heartbeat::heartbeat_job;
    use tidebot_cron::{JobPayload, JobState, Schedule};

    fn job(payload: JobPayload) -> ScheduledJob {
        ScheduledJob {
            id: "abcd1234".into(),
            name: "water".into(),
            enabled: true,
            schedule: Schedule::every(60_000),
            payload,
            state: JobState::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
            delete_after_run: false,
        }
    }

    #[test]
    fn test_delivered_job_targets_its_chat() {
        let msg = job_message(&job(
            JobPayload::agent_turn("drink water").deliver_to("telegram", "42"),
        ));
        assert_eq!(msg.channel, SYSTEM_CHANNEL);
        assert_eq!(msg.sender_id, CRON_SENDER);
        assert_eq!(msg.chat_id, "telegram:42");
        assert_eq!(msg.content, "drink water");
        assert_eq!(msg.metadata["deliver"], true);
        assert_eq!(msg.metadata["job_id"], "abcd1234");
    }

    #[test]
    fn test_undelivered_job_uses_own_cli_session() {
        let msg = job_message(&heartbeat_job(1_000, 0));
        assert_eq!(msg.chat_id, "cli:cron");
        assert_eq!(msg.metadata["deliver"], false);

        let msg = job_message(&job(JobPayload::agent_turn("tidy up")));
        assert_eq!(msg.chat_id, "cli:cron");
    }

    #[tokio::test]
    async fn test_on_job_publishes() {
        let bus = Arc::new(MessageBus::new());
        let handler = BusJobHandler::new(bus.clone());
        handler
            .on_job(&job(JobPayload::agent_turn("hi")))
            .await
            .unwrap();
        assert_eq!(bus.inbound_size(), 1);
    }
}
