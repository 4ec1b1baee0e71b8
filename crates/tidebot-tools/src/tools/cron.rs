//! `cron` tool: manage scheduled jobs.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use tidebot_cron::schedule::validate_cron;
use tidebot_cron::{CronService, JobPayload, NewJob, Schedule, ScheduledJob};

use crate::context::ToolContext;
use crate::registry::{Tool, ToolDefinition};
use crate::{ToolError, optional_str, required_str};

pub struct CronTool {
    cron: CronService,
    definition: ToolDefinition,
}

impl CronTool {
    pub fn new(cron: CronService) -> Self {
        let definition = ToolDefinition {
            name: "cron".to_string(),
            description: "Schedule reminders and recurring tasks. Actions: add, list, remove, \
                          enable, disable, run. Job replies are delivered to the current chat."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["add", "list", "remove", "enable", "disable", "run"],
                        "description": "The action to perform."
                    },
                    "message": {
                        "type": "string",
                        "description": "What the agent should do when the job fires (add)."
                    },
                    "name": {
                        "type": "string",
                        "description": "Short job name (add). Defaults to the message."
                    },
                    "every_seconds": {
                        "type": "integer",
                        "description": "Fire every N seconds (add)."
                    },
                    "cron_expr": {
                        "type": "string",
                        "description": "Cron expression such as '0 9 * * *' (add)."
                    },
                    "tz": {
                        "type": "string",
                        "description": "IANA timezone for cron_expr, e.g. 'Europe/Berlin' (add)."
                    },
                    "at": {
                        "type": "string",
                        "description": "Fire once at this ISO-8601 time (add)."
                    },
                    "job_id": {
                        "type": "string",
                        "description": "Job ID (remove, enable, disable, run)."
                    }
                },
                "required": ["action"]
            }),
        };
        Self { cron, definition }
    }

    async fn add(&self, params: &Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let message = required_str(params, "message")?;
        let name = optional_str(params, "name")
            .map(str::to_string)
            .unwrap_or_else(|| message.chars().take(30).collect());

        let (schedule, one_shot) = parse_schedule(params)?;
        let payload = JobPayload::agent_turn(message).deliver_to(&ctx.channel, &ctx.chat_id);
        let job = self
            .cron
            .add_job(NewJob::new(name, schedule, payload).delete_after_run(one_shot))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        Ok(format!("Created job '{}' (id: {})", job.name, job.id))
    }

    async fn list(&self) -> Result<String, ToolError> {
        let jobs = self
            .cron
            .list_jobs(true)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        if jobs.is_empty() {
            return Ok("No scheduled jobs.".to_string());
        }
        let lines: Vec<String> = jobs.iter().map(describe_job).collect();
        Ok(format!("Scheduled jobs:\n{}", lines.join("\n")))
    }
}

fn parse_schedule(params: &Value) -> Result<(Schedule, bool), ToolError> {
    if let Some(secs) = params.get("every_seconds").and_then(|v| v.as_i64()) {
        if secs <= 0 {
            return Err(ToolError::InvalidParams(
                "every_seconds must be positive".to_string(),
            ));
        }
        return Ok((Schedule::every(secs.saturating_mul(1000)), false));
    }

    if let Some(expr) = optional_str(params, "cron_expr") {
        let tz = optional_str(params, "tz");
        validate_cron(expr, tz).map_err(ToolError::InvalidParams)?;
        return Ok((Schedule::cron(expr, tz.map(str::to_string)), false));
    }

    if let Some(at) = optional_str(params, "at") {
        let at_ms = parse_at(at)?;
        return Ok((Schedule::at(at_ms), true));
    }

    Err(ToolError::InvalidParams(
        "one of every_seconds, cron_expr or at is required".to_string(),
    ))
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` taken as local time.
fn parse_at(at: &str) -> Result<i64, ToolError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(at) {
        return Ok(dt.timestamp_millis());
    }
    let naive = NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M"))
        .map_err(|_| ToolError::InvalidParams(format!("invalid datetime: {at}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| ToolError::InvalidParams(format!("nonexistent local time: {at}")))
}

fn describe_job(job: &ScheduledJob) -> String {
    let next = job
        .state
        .next_run_at_ms
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
    let enabled = if job.enabled { "" } else { ", disabled" };
    format!(
        "- {} (id: {}, {}, next: {}{})",
        job.name,
        job.id,
        job.schedule.describe(),
        next,
        enabled
    )
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let action = required_str(&params, "action")?;
        let failed = |e: tidebot_cron::CronError| ToolError::Failed(e.to_string());

        match action {
            "add" => self.add(&params, ctx).await,
            "list" => self.list().await,
            "remove" => {
                let id = required_str(&params, "job_id")?;
                if self.cron.remove_job(id).await.map_err(failed)? {
                    Ok(format!("Removed job {id}"))
                } else {
                    Err(ToolError::Failed(format!("job {id} not found")))
                }
            }
            "enable" | "disable" => {
                let id = required_str(&params, "job_id")?;
                let enabled = action == "enable";
                match self.cron.enable_job(id, enabled).await.map_err(failed)? {
                    Some(job) => Ok(format!("Job '{}' {action}d", job.name)),
                    None => Err(ToolError::Failed(format!("job {id} not found"))),
                }
            }
            "run" => {
                let id = required_str(&params, "job_id")?;
                if self.cron.run_job(id, true).await.map_err(failed)? {
                    Ok(format!("Ran job {id}"))
                } else {
                    Err(ToolError::Failed(format!("job {id} not found")))
                }
            }
            other => Err(ToolError::InvalidParams(format!(
                "unknown cron action: {other}"
            ))),
        }
    }
}
