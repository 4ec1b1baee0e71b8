//! The cron service: a background task that owns the job set.
//!
//! [`CronService`] is a cheap, cloneable handle. Every operation is a
//! command sent over an `mpsc` channel and answered on a `oneshot`, so the
//! job store is never shared. The task sleeps until the earliest pending
//! `nextRunAtMs` and recomputes that deadline after every command and tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::CronError;
use crate::heartbeat::{self, HEARTBEAT_FILE};
use crate::schedule::{compute_next_run, now_ms};
use crate::store::JobStoreFile;
use crate::types::{CronStatus, JobState, JobStatus, JobStore, NewJob, ScheduledJob};

/// Callback invoked when a job fires.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn on_job(&self, job: &ScheduledJob) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct CronServiceConfig {
    pub store_path: PathBuf,
    /// Directory holding `HEARTBEAT.md`.
    pub workspace: Option<PathBuf>,
    /// Heartbeat interval; `None` disables the heartbeat job.
    pub heartbeat_interval: Option<Duration>,
}

enum CronCommand {
    Start {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Add {
        job: NewJob,
        reply: oneshot::Sender<ScheduledJob>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Enable {
        id: String,
        enabled: bool,
        reply: oneshot::Sender<Option<ScheduledJob>>,
    },
    Run {
        id: String,
        force: bool,
        reply: oneshot::Sender<bool>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Option<ScheduledJob>>,
    },
    List {
        include_disabled: bool,
        reply: oneshot::Sender<Vec<ScheduledJob>>,
    },
    Status {
        reply: oneshot::Sender<CronStatus>,
    },
}

/// Handle to the cron service task.
#[derive(Clone)]
pub struct CronService {
    cmd_tx: mpsc::Sender<CronCommand>,
}

impl CronService {
    /// Load the job store and spawn the service task.
    ///
    /// Jobs are listed and edited immediately, but nothing fires until
    /// [`start`](Self::start). The task exits when `shutdown` is cancelled
    /// or every handle is dropped.
    pub fn spawn(
        config: CronServiceConfig,
        handler: Option<Arc<dyn JobHandler>>,
        shutdown: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let file = JobStoreFile::new(config.store_path);
        let store = file.load();
        info!(path = %file.path().display(), jobs = store.jobs.len(), "Loaded cron store");

        let scheduler = Scheduler {
            file,
            store,
            workspace: config.workspace,
            heartbeat_interval: config.heartbeat_interval,
            handler,
            running: false,
            cmd_rx,
            shutdown,
        };
        tokio::spawn(scheduler.run());

        Self { cmd_tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> CronCommand,
    ) -> Result<T, CronError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| CronError::ServiceStopped)?;
        rx.await.map_err(|_| CronError::ServiceStopped)
    }

    /// Install the heartbeat job, recompute every next run and arm the timer.
    pub async fn start(&self) -> Result<(), CronError> {
        self.request(|reply| CronCommand::Start { reply }).await
    }

    /// Disarm the timer. Jobs stay loaded and editable.
    pub async fn stop(&self) -> Result<(), CronError> {
        self.request(|reply| CronCommand::Stop { reply }).await
    }

    pub async fn add_job(&self, job: NewJob) -> Result<ScheduledJob, CronError> {
        self.request(|reply| CronCommand::Add { job, reply }).await
    }

    /// Remove a job. The heartbeat job cannot be removed.
    pub async fn remove_job(&self, id: &str) -> Result<bool, CronError> {
        let id = id.to_string();
        self.request(|reply| CronCommand::Remove { id, reply }).await
    }

    /// Enable or disable a job, returning its updated form.
    pub async fn enable_job(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<Option<ScheduledJob>, CronError> {
        let id = id.to_string();
        self.request(|reply| CronCommand::Enable { id, enabled, reply })
            .await
    }

    /// Execute a job now. Without `force`, disabled jobs are refused.
    pub async fn run_job(&self, id: &str, force: bool) -> Result<bool, CronError> {
        let id = id.to_string();
        self.request(|reply| CronCommand::Run { id, force, reply })
            .await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<ScheduledJob>, CronError> {
        let id = id.to_string();
        self.request(|reply| CronCommand::Get { id, reply }).await
    }

    /// Jobs ordered by next run, jobs that will not fire last. The heartbeat
    /// job is never listed.
    pub async fn list_jobs(&self, include_disabled: bool) -> Result<Vec<ScheduledJob>, CronError> {
        self.request(|reply| CronCommand::List {
            include_disabled,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<CronStatus, CronError> {
        self.request(|reply| CronCommand::Status { reply }).await
    }
}

struct Scheduler {
    file: JobStoreFile,
    store: JobStore,
    workspace: Option<PathBuf>,
    heartbeat_interval: Option<Duration>,
    handler: Option<Arc<dyn JobHandler>>,
    running: bool,
    cmd_rx: mpsc::Receiver<CronCommand>,
    shutdown: CancellationToken,
}

impl Scheduler {
    async fn run(mut self) {
        debug!("Cron service task started");

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("Cron service shutting down");
                    break;
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => {
                            debug!("All cron handles dropped");
                            break;
                        }
                    }
                }

                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.on_timer().await;
                }
            }
        }
    }

    async fn handle(&mut self, cmd: CronCommand) {
        match cmd {
            CronCommand::Start { reply } => {
                self.start();
                let _ = reply.send(());
            }
            CronCommand::Stop { reply } => {
                self.running = false;
                info!("Cron service stopped");
                let _ = reply.send(());
            }
            CronCommand::Add { job, reply } => {
                let _ = reply.send(self.add_job(job));
            }
            CronCommand::Remove { id, reply } => {
                let _ = reply.send(self.remove_job(&id));
            }
            CronCommand::Enable { id, enabled, reply } => {
                let _ = reply.send(self.enable_job(&id, enabled));
            }
            CronCommand::Run { id, force, reply } => {
                let ran = self.run_job(&id, force).await;
                let _ = reply.send(ran);
            }
            CronCommand::Get { id, reply } => {
                let job = self.store.jobs.iter().find(|j| j.id == id).cloned();
                let _ = reply.send(job);
            }
            CronCommand::List {
                include_disabled,
                reply,
            } => {
                let _ = reply.send(self.list_jobs(include_disabled));
            }
            CronCommand::Status { reply } => {
                let _ = reply.send(CronStatus {
                    running: self.running,
                    jobs: self.store.jobs.iter().filter(|j| !j.is_heartbeat()).count(),
                    next_wake_at_ms: self.next_wake_ms(),
                });
            }
        }
    }

    fn start(&mut self) {
        let now = now_ms();

        if let Some(interval) = self.heartbeat_interval {
            if !self.store.jobs.iter().any(ScheduledJob::is_heartbeat) {
                let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
                self.store.jobs.push(heartbeat::heartbeat_job(interval_ms, now));
                debug!(interval_ms, "Heartbeat job installed");
            }
        }

        for job in self.store.jobs.iter_mut().filter(|j| j.enabled) {
            job.state.next_run_at_ms = compute_next_run(&job.schedule, now);
        }

        self.running = true;
        self.persist();
        info!(
            jobs = self.store.jobs.len(),
            next_wake_at_ms = ?self.next_wake_ms(),
            "Cron service started"
        );
    }

    fn add_job(&mut self, new: NewJob) -> ScheduledJob {
        let now = now_ms();
        let id = self.fresh_id();
        let next_run_at_ms = compute_next_run(&new.schedule, now);
        if next_run_at_ms.is_none() {
            warn!(job_id = %id, schedule = %new.schedule.describe(), "Job schedule will never fire");
        }

        let job = ScheduledJob {
            id,
            name: new.name,
            enabled: true,
            schedule: new.schedule,
            payload: new.payload,
            state: JobState {
                next_run_at_ms,
                ..Default::default()
            },
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run: new.delete_after_run,
        };
        self.store.jobs.push(job.clone());
        self.persist();
        info!(job_id = %job.id, name = %job.name, "Cron job added");
        job
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !self.store.jobs.iter().any(|j| j.id == id) {
                return id;
            }
        }
    }

    fn remove_job(&mut self, id: &str) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        if self.store.jobs[idx].is_heartbeat() {
            warn!(job_id = %id, "Refusing to remove the heartbeat job");
            return false;
        }
        self.store.jobs.remove(idx);
        self.persist();
        info!(job_id = %id, "Cron job removed");
        true
    }

    fn enable_job(&mut self, id: &str, enabled: bool) -> Option<ScheduledJob> {
        let idx = self.position(id)?;
        let now = now_ms();
        let job = &mut self.store.jobs[idx];
        job.enabled = enabled;
        job.updated_at_ms = now;
        job.state.next_run_at_ms = if enabled {
            compute_next_run(&job.schedule, now)
        } else {
            None
        };
        let job = job.clone();
        self.persist();
        info!(job_id = %id, enabled, "Cron job updated");
        Some(job)
    }

    async fn run_job(&mut self, id: &str, force: bool) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        if !force && !self.store.jobs[idx].enabled {
            debug!(job_id = %id, "Not running disabled job without force");
            return false;
        }
        self.execute(id).await;
        self.persist();
        true
    }

    fn list_jobs(&self, include_disabled: bool) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .store
            .jobs
            .iter()
            .filter(|j| !j.is_heartbeat() && (include_disabled || j.enabled))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.state.next_run_at_ms.unwrap_or(i64::MAX));
        jobs
    }

    async fn on_timer(&mut self) {
        let now = now_ms();
        let due: Vec<String> = self
            .store
            .jobs
            .iter()
            .filter(|j| j.is_due(now))
            .map(|j| j.id.clone())
            .collect();
        if due.is_empty() {
            return;
        }

        debug!(count = due.len(), "Cron jobs due");
        for id in &due {
            self.execute(id).await;
        }
        self.persist();
    }

    /// Run one job and record the outcome.
    async fn execute(&mut self, id: &str) {
        let Some(job) = self.store.jobs.iter().find(|j| j.id == id).cloned() else {
            return;
        };

        let started = now_ms();
        let (status, error) = self.run_payload(&job).await;
        let finished = now_ms();

        // The handler may have taken a while, so look the job up again.
        let Some(idx) = self.position(id) else {
            return;
        };
        let delete = {
            let job = &mut self.store.jobs[idx];
            job.state.last_run_at_ms = Some(started);
            job.state.last_status = Some(status);
            job.state.last_error = error;
            job.updated_at_ms = finished;

            if job.schedule.is_one_shot() {
                if !job.delete_after_run {
                    job.enabled = false;
                    job.state.next_run_at_ms = None;
                }
                job.delete_after_run
            } else {
                job.state.next_run_at_ms = compute_next_run(&job.schedule, finished);
                false
            }
        };
        if delete {
            self.store.jobs.remove(idx);
            debug!(job_id = %id, "One-shot job deleted after run");
        }
    }

    async fn run_payload(&self, job: &ScheduledJob) -> (JobStatus, Option<String>) {
        if job.is_heartbeat() && !self.heartbeat_has_tasks() {
            debug!("Heartbeat file has no tasks, skipping");
            return (JobStatus::Skipped, None);
        }

        let Some(handler) = self.handler.clone() else {
            return (JobStatus::Ok, None);
        };

        info!(job_id = %job.id, name = %job.name, "Running cron job");
        let task_job = job.clone();
        let outcome = tokio::spawn(async move { handler.on_job(&task_job).await }).await;

        match outcome {
            Ok(Ok(())) => (JobStatus::Ok, None),
            Ok(Err(e)) => {
                let mut message = format!("{e:#}");
                if message.trim().is_empty() {
                    message = "job failed".to_string();
                }
                warn!(job_id = %job.id, error = %message, "Cron job failed");
                (JobStatus::Error, Some(message))
            }
            Err(e) => {
                let message = join_error_message(e);
                warn!(job_id = %job.id, error = %message, "Cron job handler crashed");
                (JobStatus::Error, Some(message))
            }
        }
    }

    fn heartbeat_has_tasks(&self) -> bool {
        self.workspace
            .as_ref()
            .is_some_and(|ws| heartbeat::has_pending_tasks(&ws.join(HEARTBEAT_FILE)))
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.store.jobs.iter().position(|j| j.id == id)
    }

    fn next_wake_ms(&self) -> Option<i64> {
        if !self.running {
            return None;
        }
        self.store
            .jobs
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.state.next_run_at_ms)
            .min()
    }

    fn next_deadline(&self) -> Option<Instant> {
        let next = self.next_wake_ms()?;
        let delay = u64::try_from(next.saturating_sub(now_ms())).unwrap_or(0);
        Some(Instant::now() + Duration::from_millis(delay))
    }

    fn persist(&self) {
        if let Err(e) = self.file.save(&self.store) {
            warn!(path = %self.file.path().display(), "Failed to save cron store: {e}");
        }
    }
}

fn join_error_message(e: tokio::task::JoinError) -> String {
    if e.is_cancelled() {
        return "job handler was cancelled".to_string();
    }
    let payload = e.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("job handler panicked: {detail}")
}
