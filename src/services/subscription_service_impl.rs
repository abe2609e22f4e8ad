//! `SeaORM` implementation of the `SubscriptionService` trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveTime};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use super::notifier::NotifierManager;
use super::notifier_handler::NotifierHandler;
use super::plex_users::PlexUserManager;
use super::scheduler::Scheduler;
use super::subscription_service::{
    ExpiringUser, RenewalRequest, SubscriptionError, SubscriptionService,
};
use crate::config::Config;
use crate::db::{Store, random_hex};
use crate::domain::events::PanelEvent;
use crate::domain::time::{add_months_clamped, days_until, local_from_naive, parse_timestamp};
use crate::domain::{BlockAction, BlockReason, RenewalBase, ScheduledJobKind};

/// New expiry for a renewal starting from `current` at instant `now`.
#[must_use]
pub fn next_expiration(
    current: Option<DateTime<Local>>,
    now: DateTime<Local>,
    request: &RenewalRequest,
) -> DateTime<Local> {
    let start = request
        .base_date
        .and_then(|date| local_from_naive(date.and_time(NaiveTime::MIN)))
        .or_else(|| current.filter(|at| *at > now))
        .unwrap_or(now);

    let end = match request.base {
        RenewalBase::ExpiryDate => add_months_clamped(start, request.months),
        RenewalBase::Today => start + Duration::days(30 * i64::from(request.months)),
    };

    request
        .expiration_time
        .and_then(|time| local_from_naive(end.date_naive().and_time(time)))
        .unwrap_or(end)
}

pub struct SeaOrmSubscriptionService {
    config: Arc<RwLock<Config>>,
    store: Store,
    scheduler: Arc<Scheduler>,
    notifier_handler: Arc<NotifierHandler>,
    notifier: Arc<NotifierManager>,
    plex_users: Arc<PlexUserManager>,
    event_bus: broadcast::Sender<PanelEvent>,
}

impl SeaOrmSubscriptionService {
    #[must_use]
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Store,
        scheduler: Arc<Scheduler>,
        notifier_handler: Arc<NotifierHandler>,
        notifier: Arc<NotifierManager>,
        plex_users: Arc<PlexUserManager>,
        event_bus: broadcast::Sender<PanelEvent>,
    ) -> Self {
        Self {
            config,
            store,
            scheduler,
            notifier_handler,
            notifier,
            plex_users,
            event_bus,
        }
    }

    async fn cancel_job(&self, job_id: Option<&str>) {
        if let Some(job_id) = job_id {
            if let Err(e) = self.scheduler.cancel(job_id).await {
                warn!(job_id, error = %e, "Could not cancel scheduled job");
            }
        }
    }

    async fn schedule_expiration(
        &self,
        username: &str,
        run_at: DateTime<Local>,
    ) -> Result<String, SubscriptionError> {
        let job_id = subscription_end_job_id(username);
        self.scheduler
            .schedule_once(&job_id, ScheduledJobKind::SubscriptionEnd, username, run_at)
            .await
            .map_err(|e| SubscriptionError::Scheduler(e.to_string()))?;
        Ok(job_id)
    }

    /// Lifts an existing block using the notifier that imposed it.
    async fn unblock_if_blocked(&self, username: &str) -> Result<(), SubscriptionError> {
        let Some(blocked) = self.store.get_blocked_user(username).await? else {
            return Ok(());
        };
        let Some(user) = self.plex_users.find_user(username).await else {
            warn!(username, "Blocked user not found on Plex, cannot unblock");
            return Ok(());
        };

        let notifier_id = {
            let tautulli = &self.config.read().await.tautulli;
            if blocked.block_reason == BlockReason::TrialExpired.as_str() {
                tautulli.trial_block_notifier_id
            } else {
                tautulli.blocking_notifier_id
            }
        };
        info!(username, reason = %blocked.block_reason, "Unblocking renewed user");
        self.notifier_handler
            .manage_block_unblock(
                &user.email,
                username,
                BlockAction::Remove,
                Some(notifier_id),
                None,
            )
            .await?;
        Ok(())
    }

    async fn block(
        &self,
        username: &str,
        notifier_id: i64,
        reason: BlockReason,
    ) -> Result<(), SubscriptionError> {
        let Some(user) = self.plex_users.find_user(username).await else {
            warn!(username, %reason, "User not found on Plex, block skipped");
            return Ok(());
        };
        self.notifier_handler
            .manage_block_unblock(
                &user.email,
                username,
                BlockAction::Add,
                Some(notifier_id),
                Some(reason),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionService for SeaOrmSubscriptionService {
    async fn renew_subscription(
        &self,
        username: &str,
        request: RenewalRequest,
    ) -> Result<DateTime<Local>, SubscriptionError> {
        if request.months == 0 {
            return Err(SubscriptionError::Validation(
                "O número de meses deve ser maior que zero.".to_string(),
            ));
        }

        let mut profile = self.store.get_user_profile(username).await?;
        self.cancel_job(profile.expiration_job_id.as_deref()).await;

        if profile.trial_end_date.is_some() {
            info!(username, "Renewing after a trial, clearing trial state");
            self.cancel_job(profile.trial_job_id.as_deref()).await;
            profile.trial_end_date = None;
            profile.trial_job_id = None;
        }

        let current = profile.expiration_date.as_deref().and_then(parse_timestamp);
        let expires_at = next_expiration(current, Local::now(), &request);

        let job_id = self.schedule_expiration(username, expires_at).await?;
        profile.expiration_date = Some(expires_at.to_rfc3339());
        profile.expiration_job_id = Some(job_id);
        self.store.set_user_profile(profile).await?;

        self.unblock_if_blocked(username).await?;

        info!(username, expires_at = %expires_at.to_rfc3339(), months = request.months, "Subscription renewed");
        let _ = self.event_bus.send(PanelEvent::SubscriptionRenewed {
            username: username.to_string(),
            expires_at: expires_at.to_rfc3339(),
        });
        Ok(expires_at)
    }

    async fn set_expiration(
        &self,
        username: &str,
        expires_at: Option<DateTime<Local>>,
    ) -> Result<(), SubscriptionError> {
        let mut profile = self.store.get_user_profile(username).await?;
        self.cancel_job(profile.expiration_job_id.as_deref()).await;

        let Some(expires_at) = expires_at else {
            profile.expiration_date = None;
            profile.expiration_job_id = None;
            self.store.set_user_profile(profile).await?;
            info!(username, "Expiration cleared");
            return Ok(());
        };

        profile.expiration_date = Some(expires_at.to_rfc3339());
        if expires_at > Local::now() {
            profile.expiration_job_id = Some(self.schedule_expiration(username, expires_at).await?);
            self.store.set_user_profile(profile).await?;
            self.unblock_if_blocked(username).await?;
        } else {
            profile.expiration_job_id = None;
            self.store.set_user_profile(profile).await?;
            if self.store.get_blocked_user(username).await?.is_none() {
                let notifier_id = self.config.read().await.tautulli.blocking_notifier_id;
                self.block(username, notifier_id, BlockReason::Expired).await?;
            }
        }
        info!(username, expires_at = %expires_at.to_rfc3339(), "Expiration updated");
        Ok(())
    }

    async fn end_trial(&self, username: &str) -> Result<(), SubscriptionError> {
        info!(username, "Ending trial");
        let mut profile = self.store.get_user_profile(username).await?;

        match self.plex_users.find_user(username).await {
            Some(user) => self.notifier.send_trial_end(&user, &profile).await,
            None => warn!(username, "Trial user not found on Plex"),
        }

        let notifier_id = self.config.read().await.tautulli.trial_block_notifier_id;
        self.block(username, notifier_id, BlockReason::TrialExpired)
            .await?;

        profile.trial_job_id = None;
        self.store.set_user_profile(profile).await?;

        let _ = self.event_bus.send(PanelEvent::TrialEnded {
            username: username.to_string(),
        });
        Ok(())
    }

    async fn end_subscription(&self, username: &str) -> Result<(), SubscriptionError> {
        info!(username, "Subscription ended");
        let notifier_id = self.config.read().await.tautulli.blocking_notifier_id;
        self.block(username, notifier_id, BlockReason::Expired).await?;

        let mut profile = self.store.get_user_profile(username).await?;
        profile.expiration_job_id = None;
        self.store.set_user_profile(profile).await?;
        Ok(())
    }

    async fn get_users_to_notify(&self) -> Result<Vec<ExpiringUser>, SubscriptionError> {
        let days_to_notify = self.config.read().await.scheduler.days_to_notify_expiration;
        if days_to_notify <= 0 {
            return Ok(Vec::new());
        }

        Ok(self
            .store
            .get_all_expirations()
            .await?
            .into_iter()
            .filter_map(|profile| {
                let expires_at = profile.expiration_date.as_deref().and_then(parse_timestamp)?;
                let days_left = days_until(&expires_at);
                (0..days_to_notify).contains(&days_left).then_some(ExpiringUser {
                    username: profile.username,
                    days_left,
                })
            })
            .collect())
    }

    async fn get_users_to_remove(&self) -> Result<Vec<String>, SubscriptionError> {
        let days_to_remove = self.config.read().await.scheduler.days_to_remove_blocked_user;
        if days_to_remove <= 0 {
            return Ok(Vec::new());
        }

        Ok(self
            .store
            .get_blocked_users()
            .await?
            .into_iter()
            .filter(|blocked| {
                parse_timestamp(&blocked.blocked_at)
                    .is_some_and(|at| -days_until(&at) >= days_to_remove)
            })
            .map(|blocked| blocked.username)
            .collect())
    }
}

/// `sub_end_<username>_<8 hex chars>`.
fn subscription_end_job_id(username: &str) -> String {
    format!("sub_end_{username}_{}", random_hex(4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate, Timelike};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
        local_from_naive(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn subscription_end_job_ids_carry_eight_hex_chars() {
        let id = subscription_end_job_id("ana");
        let suffix = id.strip_prefix("sub_end_ana_").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, subscription_end_job_id("ana"));
    }

    #[test]
    fn today_mode_adds_thirty_days_per_month_from_now() {
        let now = at(2025, 1, 10, 12);
        let end = next_expiration(None, now, &RenewalRequest::months(2, RenewalBase::Today));
        assert_eq!(end, now + Duration::days(60));
    }

    #[test]
    fn renewal_extends_a_future_expiry() {
        let now = at(2025, 1, 10, 12);
        let current = at(2025, 1, 31, 20);
        let end = next_expiration(
            Some(current),
            now,
            &RenewalRequest::months(1, RenewalBase::ExpiryDate),
        );
        assert_eq!((end.year(), end.month(), end.day()), (2025, 2, 28));
        assert_eq!(end.hour(), 20);
    }

    #[test]
    fn past_expiry_is_ignored() {
        let now = at(2025, 3, 10, 12);
        let end = next_expiration(
            Some(at(2025, 1, 1, 0)),
            now,
            &RenewalRequest::months(1, RenewalBase::ExpiryDate),
        );
        assert_eq!((end.month(), end.day()), (4, 10));
    }

    #[test]
    fn base_date_and_time_override_the_start() {
        let now = at(2025, 3, 10, 12);
        let request = RenewalRequest {
            months: 1,
            base: RenewalBase::ExpiryDate,
            base_date: NaiveDate::from_ymd_opt(2025, 5, 31),
            expiration_time: NaiveTime::from_hms_opt(23, 30, 0),
        };
        let end = next_expiration(Some(at(2025, 12, 1, 0)), now, &request);
        assert_eq!((end.month(), end.day()), (6, 30));
        assert_eq!((end.hour(), end.minute()), (23, 30));
    }
}
