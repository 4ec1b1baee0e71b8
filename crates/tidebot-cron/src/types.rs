//! Job data model, serialized as the camelCase JSON job store.

use serde::{Deserialize, Serialize};

/// Current job store format version.
pub const STORE_VERSION: u32 = 1;

/// When a job fires.
///
/// Fields are optional so that a hand-edited store with a missing value
/// loads as a job that never fires instead of failing the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schedule {
    /// Fire once at an absolute unix-millis timestamp.
    At {
        #[serde(rename = "atMs", default, skip_serializing_if = "Option::is_none")]
        at_ms: Option<i64>,
    },
    /// Fire repeatedly on a fixed interval.
    Every {
        #[serde(rename = "everyMs", default, skip_serializing_if = "Option::is_none")]
        every_ms: Option<i64>,
    },
    /// Fire on a cron expression, optionally in an IANA timezone.
    Cron {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl Schedule {
    pub fn at(at_ms: i64) -> Self {
        Schedule::At { at_ms: Some(at_ms) }
    }

    pub fn every(every_ms: i64) -> Self {
        Schedule::Every {
            every_ms: Some(every_ms),
        }
    }

    pub fn cron(expr: impl Into<String>, tz: Option<String>) -> Self {
        Schedule::Cron {
            expr: Some(expr.into()),
            tz,
        }
    }

    /// One-shot schedules are disabled or deleted after they fire.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Schedule::At { .. })
    }

    /// Short human-readable form for listings.
    pub fn describe(&self) -> String {
        match self {
            Schedule::At { at_ms: Some(ms) } => chrono::DateTime::from_timestamp_millis(*ms)
                .map(|dt| format!("at {}", dt.to_rfc3339()))
                .unwrap_or_else(|| format!("at {ms}")),
            Schedule::Every { every_ms: Some(ms) } => format!("every {}s", ms / 1000),
            Schedule::Cron {
                expr: Some(expr),
                tz,
            } => match tz {
                Some(tz) => format!("cron {expr} ({tz})"),
                None => format!("cron {expr}"),
            },
            _ => "invalid".to_string(),
        }
    }
}

/// What a job does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    SystemEvent,
    AgentTurn,
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub kind: PayloadKind,
    pub message: String,
    /// Deliver the agent's reply to `channel`/`to`.
    #[serde(default)]
    pub deliver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl JobPayload {
    /// An agent turn whose reply is not delivered anywhere.
    pub fn agent_turn(message: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::AgentTurn,
            message: message.into(),
            deliver: false,
            channel: None,
            to: None,
        }
    }

    /// Deliver the reply to a chat.
    pub fn deliver_to(mut self, channel: impl Into<String>, to: impl Into<String>) -> Self {
        self.deliver = true;
        self.channel = Some(channel.into());
        self.to = Some(to.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
    Skipped,
}

/// Mutable runtime status of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// `None` means the job will not fire again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: Schedule,
    pub payload: JobPayload,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    #[serde(default)]
    pub delete_after_run: bool,
}

fn default_true() -> bool {
    true
}

impl ScheduledJob {
    pub fn is_heartbeat(&self) -> bool {
        self.payload.kind == PayloadKind::Heartbeat
    }

    /// Enabled with a pending fire time at or before `now_ms`.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.enabled && self.state.next_run_at_ms.is_some_and(|next| now_ms >= next)
    }
}

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStore {
    pub version: u32,
    pub jobs: Vec<ScheduledJob>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            jobs: Vec::new(),
        }
    }
}

/// Parameters for `CronService::add_job`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub schedule: Schedule,
    pub payload: JobPayload,
    pub delete_after_run: bool,
}

impl NewJob {
    pub fn new(name: impl Into<String>, schedule: Schedule, payload: JobPayload) -> Self {
        Self {
            name: name.into(),
            schedule,
            payload,
            delete_after_run: false,
        }
    }

    pub fn delete_after_run(mut self, delete: bool) -> Self {
        self.delete_after_run = delete;
        self
    }
}

/// Scheduler summary returned by `CronService::status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronStatus {
    pub running: bool,
    /// Number of jobs, heartbeat excluded.
    pub jobs: usize,
    pub next_wake_at_ms: Option<i64>,
}
