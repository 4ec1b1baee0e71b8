use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Local};
use clap::{ArgGroup, Args, Subcommand};
use tokio_util::sync::CancellationToken;

use tidebot_config::TidebotConfig;
use tidebot_cron::schedule::validate_cron;
use tidebot_cron::{CronService, CronServiceConfig, JobPayload, JobStatus, NewJob, Schedule, ScheduledJob};

use crate::chat::{build_runtime, load_config};

#[derive(Subcommand)]
pub enum CronCommand {
    /// List scheduled jobs
    List {
        /// Include disabled jobs
        #[arg(short, long)]
        all: bool,
    },
    /// Add a job
    Add(AddArgs),
    /// Remove a job
    Remove { id: String },
    /// Enable or disable a job
    Enable {
        id: String,
        /// Disable instead of enable
        #[arg(long)]
        disable: bool,
    },
    /// Run a job now and print the agent's reply
    Run {
        id: String,
        /// Run even if the job is disabled
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("schedule").required(true).args(["every", "cron", "at"])))]
pub struct AddArgs {
    /// Job name
    #[arg(short, long)]
    name: String,
    /// Message the agent receives when the job fires
    #[arg(short, long)]
    message: String,
    /// Run every N seconds
    #[arg(short, long)]
    every: Option<i64>,
    /// Cron expression, e.g. "0 9 * * *"
    #[arg(short, long)]
    cron: Option<String>,
    /// IANA timezone for --cron
    #[arg(long, requires = "cron")]
    tz: Option<String>,
    /// Run once at an RFC 3339 time
    #[arg(long)]
    at: Option<String>,
    /// Deliver the reply to a chat
    #[arg(short, long, requires = "channel", requires = "to")]
    deliver: bool,
    /// Channel to deliver to (e.g. telegram)
    #[arg(long)]
    channel: Option<String>,
    /// Chat ID to deliver to
    #[arg(long)]
    to: Option<String>,
}

/// Open the job store without arming the timer or installing the heartbeat.
fn open_service(config: &TidebotConfig) -> Result<CronService> {
    Ok(CronService::spawn(
        CronServiceConfig {
            store_path: config.cron_store_path()?,
            workspace: None,
            heartbeat_interval: None,
        },
        None,
        CancellationToken::new(),
    ))
}

pub async fn run_cron(command: CronCommand) -> Result<()> {
    let config = load_config();

    match command {
        CronCommand::List { all } => {
            let jobs = open_service(&config)?.list_jobs(all).await?;
            if jobs.is_empty() {
                println!("No scheduled jobs.");
                return Ok(());
            }
            println!("{:<10} {:<24} {:<28} {:<10} NEXT RUN", "ID", "NAME", "SCHEDULE", "STATUS");
            for job in &jobs {
                println!("{}", format_job_row(job));
            }
        }
        CronCommand::Add(args) => {
            let (schedule, one_shot) = schedule_from_args(&args)?;
            let mut payload = JobPayload::agent_turn(&args.message);
            if args.deliver {
                if let (Some(channel), Some(to)) = (&args.channel, &args.to) {
                    payload = payload.deliver_to(channel, to);
                }
            }
            let job = open_service(&config)?
                .add_job(NewJob::new(&args.name, schedule, payload).delete_after_run(one_shot))
                .await?;
            println!("Added job '{}' ({})", job.name, job.id);
        }
        CronCommand::Remove { id } => {
            if open_service(&config)?.remove_job(&id).await? {
                println!("Removed job {id}");
            } else {
                bail!("job {id} not found");
            }
        }
        CronCommand::Enable { id, disable } => {
            match open_service(&config)?.enable_job(&id, !disable).await? {
                Some(job) => {
                    let state = if disable { "disabled" } else { "enabled" };
                    println!("Job '{}' {state}", job.name);
                }
                None => bail!("job {id} not found"),
            }
        }
        CronCommand::Run { id, force } => run_now(&config, &id, force).await?,
    }

    Ok(())
}

/// Fire one job through the agent and print what it would have replied.
async fn run_now(config: &TidebotConfig, id: &str, force: bool) -> Result<()> {
    let runtime = build_runtime(config)?;
    if !runtime.cron.run_job(id, force).await? {
        runtime.shutdown().await;
        bail!("job {id} not found or disabled (use --force)");
    }

    let cancel = runtime.shutdown_token();
    if let Some(msg) = runtime
        .bus
        .consume_inbound_timeout(Duration::from_secs(1))
        .await
    {
        let content = msg.content.clone();
        match runtime.agent.process_message(msg, &cancel).await {
            Some(reply) => println!("{}", reply.content),
            None => println!("Job ran: {content}"),
        }
    }
    runtime.shutdown().await;
    Ok(())
}

/// Run `tidebot status`.
pub async fn run_status() -> Result<()> {
    let config = load_config();
    let config_path = tidebot_config::config_file_path()?;

    println!("tidebot status");
    println!(
        "  config:    {} ({})",
        config_path.display(),
        if config_path.exists() { "found" } else { "missing, using defaults" }
    );
    println!("  workspace: {}", config.workspace_path()?.display());
    println!("  model:     {}", config.agent.model);
    println!(
        "  api key:   {}",
        if config.provider.resolved_api_key().is_some() { "set" } else { "not set" }
    );
    if let Some(base) = &config.provider.api_base {
        println!("  api base:  {base}");
    }
    if config.heartbeat.enabled {
        println!("  heartbeat: every {}s", config.heartbeat.interval_secs);
    } else {
        println!("  heartbeat: disabled");
    }

    let cron = open_service(&config)?;
    let status = cron.status().await?;
    let enabled = cron.list_jobs(false).await?.len();
    println!(
        "  cron:      {} jobs ({enabled} enabled), store {}",
        status.jobs,
        config.cron_store_path()?.display()
    );
    Ok(())
}

fn schedule_from_args(args: &AddArgs) -> Result<(Schedule, bool)> {
    if let Some(secs) = args.every {
        if secs <= 0 {
            bail!("--every must be positive");
        }
        return Ok((Schedule::every(secs.saturating_mul(1000)), false));
    }
    if let Some(expr) = &args.cron {
        if let Err(e) = validate_cron(expr, args.tz.as_deref()) {
            bail!("{e}");
        }
        return Ok((Schedule::cron(expr, args.tz.clone()), false));
    }
    if let Some(at) = &args.at {
        let at_ms = DateTime::parse_from_rfc3339(at)
            .map_err(|e| anyhow::anyhow!("invalid --at time '{at}': {e}"))?
            .timestamp_millis();
        return Ok((Schedule::at(at_ms), true));
    }
    bail!("one of --every, --cron or --at is required")
}

fn format_time(ms: Option<i64>) -> String {
    ms.and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_job_row(job: &ScheduledJob) -> String {
    let status = if !job.enabled {
        "disabled"
    } else {
        match job.state.last_status {
            Some(JobStatus::Error) => "error",
            Some(JobStatus::Skipped) => "skipped",
            Some(JobStatus::Ok) => "ok",
            None => "pending",
        }
    };
    format!(
        "{:<10} {:<24} {:<28} {:<10} {}",
        job.id,
        job.name,
        job.schedule.describe(),
        status,
        format_time(job.state.next_run_at_ms)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: CronCommand,
    }

    fn parse_add(args: &[&str]) -> Result<AddArgs, clap::Error> {
        let argv = ["tidebot", "add"].iter().chain(args).copied();
        match TestCli::try_parse_from(argv)?.command {
            CronCommand::Add(add) => Ok(add),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_add_requires_one_schedule() {
        assert!(parse_add(&["-n", "x", "-m", "y"]).is_err());
        assert!(parse_add(&["-n", "x", "-m", "y", "--every", "5", "--at", "2030-01-01T00:00:00Z"]).is_err());
        assert!(parse_add(&["-n", "x", "-m", "y", "--tz", "UTC", "--every", "5"]).is_err());
    }

    #[test]
    fn test_schedule_from_args() {
        let args = parse_add(&["-n", "x", "-m", "y", "--every", "60"]).unwrap();
        assert_eq!(schedule_from_args(&args).unwrap(), (Schedule::every(60_000), false));

        let args = parse_add(&["-n", "x", "-m", "y", "--cron", "0 9 * * *", "--tz", "UTC"]).unwrap();
        assert_eq!(
            schedule_from_args(&args).unwrap(),
            (Schedule::cron("0 9 * * *", Some("UTC".into())), false)
        );

        let args = parse_add(&["-n", "x", "-m", "y", "--at", "2030-01-01T00:00:00Z"]).unwrap();
        assert_eq!(
            schedule_from_args(&args).unwrap(),
            (Schedule::at(1_893_456_000_000), true)
        );

        let args = parse_add(&["-n", "x", "-m", "y", "--cron", "not a cron"]).unwrap();
        assert!(schedule_from_args(&args).is_err());

        let args = parse_add(&["-n", "x", "-m", "y", "--every", "0"]).unwrap();
        assert!(schedule_from_args(&args).is_err());
    }

    #[test]
    fn test_deliver_needs_target() {
        assert!(parse_add(&["-n", "x", "-m", "y", "--every", "5", "--deliver"]).is_err());
        let args = parse_add(&[
            "-n", "x", "-m", "y", "--every", "5", "--deliver", "--channel", "telegram", "--to", "42",
        ])
        .unwrap();
        assert!(args.deliver);
    }

    #[test]
    fn test_format_job_row() {
        let job = ScheduledJob {
            id: "abcd1234".into(),
            name: "water".into(),
            enabled: false,
            schedule: Schedule::every(60_000),
            payload: JobPayload::agent_turn("drink"),
            state: Default::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
            delete_after_run: false,
        };
        let row = format_job_row(&job);
        assert!(row.starts_with("abcd1234"));
        assert!(row.contains("every 60s"));
        assert!(row.contains("disabled"));
        assert!(row.trim_end().ends_with('-'));
    }
}
