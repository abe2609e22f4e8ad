//! Background jobs: three daily sweeps and per-user one-shot timers.
//!
//! Timers only enqueue a [`JobRequest`]; a single [`JobRunner`] holding the
//! shared state executes them. One-shot jobs are persisted so a restart
//! re-arms them, and an overdue job runs as soon as it is restored.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{SchedulerConfig, parse_daily_time};
use crate::db::Store;
use crate::domain::ScheduledJobKind;
use crate::domain::events::PanelEvent;
use crate::domain::time::{now_rfc3339, parse_timestamp};
use crate::state::SharedState;

pub const EXPIRATION_JOB: &str = "expiration_notification_job";
pub const REMOVAL_JOB: &str = "removal_job";
pub const CLEANUP_JOB: &str = "cleanup_job";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    EndTrial { job_id: String, username: String },
    EndSubscription { job_id: String, username: String },
    ExpirationSweep,
    RemovalSweep,
    PendingPaymentCleanup,
}

impl JobRequest {
    fn one_shot(kind: ScheduledJobKind, job_id: &str, username: &str) -> Self {
        let (job_id, username) = (job_id.to_string(), username.to_string());
        match kind {
            ScheduledJobKind::TrialEnd => Self::EndTrial { job_id, username },
            ScheduledJobKind::SubscriptionEnd => Self::EndSubscription { job_id, username },
        }
    }

    #[must_use]
    pub const fn job_name(&self) -> &'static str {
        match self {
            Self::EndTrial { .. } => "end_trial",
            Self::EndSubscription { .. } => "end_subscription",
            Self::ExpirationSweep => EXPIRATION_JOB,
            Self::RemovalSweep => REMOVAL_JOB,
            Self::PendingPaymentCleanup => CLEANUP_JOB,
        }
    }
}

/// `sec min hour` cron for a daily `HH:MM`.
pub fn daily_cron(time: &str) -> Result<String> {
    let (hour, minute) = parse_daily_time(time)?;
    Ok(format!("0 {minute} {hour} * * *"))
}

pub struct Scheduler {
    sched: JobScheduler,
    store: Store,
    requests: mpsc::UnboundedSender<JobRequest>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<JobRequest>>>,
    one_shots: Mutex<HashMap<String, Uuid>>,
    daily: Mutex<HashMap<&'static str, (String, Uuid)>>,
    running: AtomicBool,
}

impl Scheduler {
    pub async fn new(store: Store) -> Result<Self> {
        let sched = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        let (requests, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            sched,
            store,
            requests,
            receiver: Mutex::new(Some(receiver)),
            one_shots: Mutex::new(HashMap::new()),
            daily: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Starts the runner, registers the daily jobs and re-arms persisted timers.
    pub async fn start(&self, shared: Arc<SharedState>, config: &SchedulerConfig) -> Result<()> {
        let Some(receiver) = self.receiver.lock().await.take() else {
            warn!("Scheduler already started");
            return Ok(());
        };
        tokio::spawn(JobRunner::new(shared).run(receiver));

        self.configure_daily(config).await?;
        let restored = self.restore().await?;

        self.sched.start().await.context("Failed to start job scheduler")?;
        self.running.store(true, Ordering::Relaxed);
        info!(restored, "Scheduler started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut sched = self.sched.clone();
        if let Err(e) = sched.shutdown().await {
            warn!(error = %e, "Scheduler shutdown failed");
        }
        self.running.store(false, Ordering::Relaxed);
    }

    /// Registers the daily sweeps, replacing any whose time changed.
    pub async fn configure_daily(&self, config: &SchedulerConfig) -> Result<()> {
        let jobs = [
            (
                EXPIRATION_JOB,
                config.expiration_notification_time.as_str(),
                JobRequest::ExpirationSweep,
            ),
            (REMOVAL_JOB, config.block_removal_time.as_str(), JobRequest::RemovalSweep),
            (
                CLEANUP_JOB,
                config.cleanup_time.as_str(),
                JobRequest::PendingPaymentCleanup,
            ),
        ];

        let mut daily = self.daily.lock().await;
        for (name, time, request) in jobs {
            let cron = daily_cron(time)?;
            if let Some((current, uuid)) = daily.get(name) {
                if *current == cron {
                    continue;
                }
                self.sched.remove(uuid).await.ok();
            }

            let tx = self.requests.clone();
            let job = Job::new_async_tz(cron.as_str(), Local, move |_uuid, _lock| {
                let tx = tx.clone();
                let request = request.clone();
                Box::pin(async move {
                    let _ = tx.send(request);
                })
            })
            .with_context(|| format!("Invalid cron for {name}: {cron}"))?;
            let uuid = self.sched.add(job).await?;
            info!(job_name = name, %cron, "Daily job scheduled");
            daily.insert(name, (cron, uuid));
        }
        Ok(())
    }

    /// Persists and arms a one-shot job, replacing one with the same id.
    pub async fn schedule_once(
        &self,
        job_id: &str,
        kind: ScheduledJobKind,
        username: &str,
        run_at: DateTime<Local>,
    ) -> Result<()> {
        self.disarm(job_id).await;
        self.store
            .save_scheduled_job(job_id, kind, username, &run_at.to_rfc3339())
            .await?;
        self.arm(job_id, kind, username, run_at).await
    }

    async fn arm(
        &self,
        job_id: &str,
        kind: ScheduledJobKind,
        username: &str,
        run_at: DateTime<Local>,
    ) -> Result<()> {
        let request = JobRequest::one_shot(kind, job_id, username);
        let delay = (run_at - Local::now()).to_std().unwrap_or(Duration::ZERO);

        if delay.is_zero() {
            info!(job_id, "Job is overdue, running now");
            self.requests.send(request).context("Job runner is gone")?;
            return Ok(());
        }

        let tx = self.requests.clone();
        let job = Job::new_one_shot_async(delay, move |_uuid, _lock| {
            let tx = tx.clone();
            let request = request.clone();
            Box::pin(async move {
                let _ = tx.send(request);
            })
        })?;
        let uuid = self.sched.add(job).await?;
        self.one_shots.lock().await.insert(job_id.to_string(), uuid);
        debug!(job_id, run_at = %run_at.to_rfc3339(), "One-shot job armed");
        Ok(())
    }

    async fn disarm(&self, job_id: &str) {
        let uuid = self.one_shots.lock().await.remove(job_id);
        if let Some(uuid) = uuid {
            if let Err(e) = self.sched.remove(&uuid).await {
                warn!(job_id, error = %e, "Failed to remove timer");
            }
        }
    }

    /// Removes both the timer and the persisted row.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        self.disarm(job_id).await;
        if self.store.delete_scheduled_job(job_id).await? {
            info!(job_id, "Scheduled job cancelled");
        } else {
            debug!(job_id, "Scheduled job was already gone");
        }
        Ok(())
    }

    /// Forgets a job that has just run.
    async fn complete(&self, job_id: &str) {
        self.one_shots.lock().await.remove(job_id);
        if let Err(e) = self.store.delete_scheduled_job(job_id).await {
            warn!(job_id, error = %e, "Failed to delete finished job");
        }
    }

    async fn restore(&self) -> Result<usize> {
        let jobs = self.store.list_scheduled_jobs().await?;
        let mut restored = 0;
        for job in jobs {
            let (Ok(kind), Some(run_at)) = (
                job.kind.parse::<ScheduledJobKind>(),
                parse_timestamp(&job.run_at),
            ) else {
                warn!(job_id = %job.job_id, "Dropping unreadable scheduled job");
                self.store.delete_scheduled_job(&job.job_id).await?;
                continue;
            };
            self.arm(&job.job_id, kind, &job.username, run_at).await?;
            restored += 1;
        }
        Ok(restored)
    }

    pub async fn pending_jobs(&self) -> usize {
        self.one_shots.lock().await.len()
    }
}

/// Executes queued jobs against the shared state.
pub struct JobRunner {
    shared: Arc<SharedState>,
}

impl JobRunner {
    #[must_use]
    pub const fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<JobRequest>) {
        while let Some(request) = receiver.recv().await {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { execute(&shared, request).await });
        }
        info!("Job runner stopped");
    }
}

async fn execute(shared: &SharedState, request: JobRequest) {
    let job_name = request.job_name();
    let start = Instant::now();
    info!(event = "job_started", job_name, "Job started");

    let result = match &request {
        JobRequest::EndTrial { job_id, username } => {
            let result = shared
                .subscription_service
                .end_trial(username)
                .await
                .map_err(anyhow::Error::from);
            shared.scheduler.complete(job_id).await;
            result
        }
        JobRequest::EndSubscription { job_id, username } => {
            let result = shared
                .subscription_service
                .end_subscription(username)
                .await
                .map_err(anyhow::Error::from);
            shared.scheduler.complete(job_id).await;
            result
        }
        JobRequest::ExpirationSweep => run_expiration_sweep(shared).await,
        JobRequest::RemovalSweep => run_removal_sweep(shared).await,
        JobRequest::PendingPaymentCleanup => run_pending_payment_cleanup(shared).await,
    };

    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(()) => {
            metrics::counter!("jobs_run_total", "job" => job_name, "outcome" => "success")
                .increment(1);
            info!(event = "job_finished", job_name, duration_ms, "Job finished");
        }
        Err(e) => {
            metrics::counter!("jobs_run_total", "job" => job_name, "outcome" => "failure")
                .increment(1);
            error!(event = "job_failed", job_name, duration_ms, error = %e, "Job failed");
            let _ = shared.event_bus.send(PanelEvent::JobFailed {
                job_name: job_name.to_string(),
                message: e.to_string(),
            });
        }
    }
}

/// Sends the expiration notice to every user close to expiry.
pub async fn run_expiration_sweep(shared: &SharedState) -> Result<()> {
    let users = shared
        .plex_users
        .get_all_plex_users(false)
        .await
        .context("Plex user list unavailable, expiration sweep skipped")?;

    let expiring = shared.subscription_service.get_users_to_notify().await?;
    for entry in expiring {
        let Some(user) = users.iter().find(|u| u.username == entry.username) else {
            debug!(username = %entry.username, "Expiring user is no longer on Plex");
            continue;
        };
        info!(username = %entry.username, days_left = entry.days_left, "Sending expiration notice");

        let mut profile = shared.store.get_user_profile(&entry.username).await?;
        shared
            .notifier
            .send_expiration(user, &profile, entry.days_left)
            .await;
        profile.last_notification_sent = Some(now_rfc3339());
        shared.store.set_user_profile(profile).await?;
    }
    Ok(())
}

/// Removes users blocked for longer than the configured number of days.
pub async fn run_removal_sweep(shared: &SharedState) -> Result<()> {
    let users = shared
        .plex_users
        .get_all_plex_users(true)
        .await
        .context("Plex user list unavailable, removal sweep skipped")?;

    for username in shared.subscription_service.get_users_to_remove().await? {
        info!(%username, "Removing long-blocked user");
        match users.iter().find(|u| u.username == username) {
            Some(user) => {
                if let Err(e) = shared.plex_users.remove_user(&user.email).await {
                    error!(%username, error = %e, "Failed to remove blocked user");
                }
            }
            None => {
                shared.store.remove_blocked_user(&username).await?;
            }
        }
    }
    Ok(())
}

pub async fn run_pending_payment_cleanup(shared: &SharedState) -> Result<()> {
    let (enabled, days) = {
        let config = shared.config.read().await;
        (
            config.scheduler.cleanup_pending_payments_enabled,
            config.scheduler.cleanup_pending_payments_days,
        )
    };
    if !enabled {
        debug!("Pending payment cleanup disabled");
        return Ok(());
    }
    let removed = shared.store.delete_old_pending_payments(days).await?;
    info!(removed, days, "Old pending payments removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scheduler() -> Scheduler {
        let store = Store::new("sqlite::memory:").await.unwrap();
        Scheduler::new(store).await.unwrap()
    }

    #[test]
    fn daily_times_become_second_precision_crons() {
        assert_eq!(daily_cron("09:00").unwrap(), "0 0 9 * * *");
        assert_eq!(daily_cron("23:45").unwrap(), "0 45 23 * * *");
        assert!(daily_cron("25:00").is_err());
    }

    #[tokio::test]
    async fn one_shot_jobs_are_persisted_and_cancelled() {
        let scheduler = scheduler().await;
        let run_at = Local::now() + chrono::Duration::hours(2);
        scheduler
            .schedule_once("trial_end_ana", ScheduledJobKind::TrialEnd, "ana", run_at)
            .await
            .unwrap();

        assert_eq!(scheduler.pending_jobs().await, 1);
        assert_eq!(scheduler.store.list_scheduled_jobs().await.unwrap().len(), 1);

        scheduler.cancel("trial_end_ana").await.unwrap();
        assert_eq!(scheduler.pending_jobs().await, 0);
        assert!(scheduler.store.list_scheduled_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overdue_jobs_are_queued_immediately() {
        let scheduler = scheduler().await;
        let run_at = Local::now() - chrono::Duration::minutes(5);
        scheduler
            .schedule_once("sub_end_bia_00ff", ScheduledJobKind::SubscriptionEnd, "bia", run_at)
            .await
            .unwrap();

        let mut receiver = scheduler.receiver.lock().await.take().unwrap();
        assert_eq!(
            receiver.try_recv().unwrap(),
            JobRequest::EndSubscription {
                job_id: "sub_end_bia_00ff".to_string(),
                username: "bia".to_string()
            }
        );
    }

    #[tokio::test]
    async fn restart_rearms_future_jobs_and_runs_overdue_ones() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let future = (Local::now() + chrono::Duration::hours(3)).to_rfc3339();
        let overdue = (Local::now() - chrono::Duration::hours(1)).to_rfc3339();
        store
            .save_scheduled_job("trial_end_ana", ScheduledJobKind::TrialEnd, "ana", &future)
            .await
            .unwrap();
        store
            .save_scheduled_job(
                "sub_end_bia_0a1b2c3d",
                ScheduledJobKind::SubscriptionEnd,
                "bia",
                &overdue,
            )
            .await
            .unwrap();
        store
            .save_scheduled_job("broken", ScheduledJobKind::TrialEnd, "caio", "not a date")
            .await
            .unwrap();

        let scheduler = Scheduler::new(store.clone()).await.unwrap();
        assert_eq!(scheduler.restore().await.unwrap(), 2);

        let mut receiver = scheduler.receiver.lock().await.take().unwrap();
        assert_eq!(
            receiver.try_recv().unwrap(),
            JobRequest::EndSubscription {
                job_id: "sub_end_bia_0a1b2c3d".to_string(),
                username: "bia".to_string()
            }
        );
        assert!(receiver.try_recv().is_err());
        assert_eq!(scheduler.pending_jobs().await, 1);
        assert!(scheduler.one_shots.lock().await.contains_key("trial_end_ana"));

        let remaining = store.list_scheduled_jobs().await.unwrap();
        assert!(remaining.iter().all(|job| job.job_id != "broken"));
    }

    #[tokio::test]
    async fn daily_jobs_are_registered_once_per_time() {
        let scheduler = scheduler().await;
        let mut config = SchedulerConfig::default();
        scheduler.configure_daily(&config).await.unwrap();
        let first = scheduler.daily.lock().await[EXPIRATION_JOB].1;

        scheduler.configure_daily(&config).await.unwrap();
        assert_eq!(scheduler.daily.lock().await[EXPIRATION_JOB].1, first);

        config.expiration_notification_time = "10:30".to_string();
        scheduler.configure_daily(&config).await.unwrap();
        let daily = scheduler.daily.lock().await;
        assert_ne!(daily[EXPIRATION_JOB].1, first);
        assert_eq!(daily[EXPIRATION_JOB].0, "0 30 10 * * *");
    }
}
