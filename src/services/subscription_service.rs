//! Domain service for subscription lifecycle: renewals, expiry and trials.

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use serde::Serialize;
use thiserror::Error;

use super::notifier_handler::NotifierError;
use crate::domain::RenewalBase;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("{0}")]
    UserNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Notifier(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for SubscriptionError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for SubscriptionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<NotifierError> for SubscriptionError {
    fn from(err: NotifierError) -> Self {
        Self::Notifier(err.to_string())
    }
}

/// Parameters of one renewal.
#[derive(Debug, Clone)]
pub struct RenewalRequest {
    pub months: u32,
    pub base: RenewalBase,
    /// Counts from this day at local midnight instead of today or the current expiry.
    pub base_date: Option<NaiveDate>,
    /// Pins the new expiry to this time of day.
    pub expiration_time: Option<NaiveTime>,
}

impl RenewalRequest {
    #[must_use]
    pub const fn months(months: u32, base: RenewalBase) -> Self {
        Self {
            months,
            base,
            base_date: None,
            expiration_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiringUser {
    pub username: String,
    pub days_left: i64,
}

#[async_trait::async_trait]
pub trait SubscriptionService: Send + Sync {
    /// Extends a subscription and reschedules its end.
    ///
    /// Clears any running trial and lifts an expiry or trial block.
    async fn renew_subscription(
        &self,
        username: &str,
        request: RenewalRequest,
    ) -> Result<DateTime<Local>, SubscriptionError>;

    /// Sets or clears the expiry directly, blocking or unblocking to match it.
    async fn set_expiration(
        &self,
        username: &str,
        expires_at: Option<DateTime<Local>>,
    ) -> Result<(), SubscriptionError>;

    async fn end_trial(&self, username: &str) -> Result<(), SubscriptionError>;

    async fn end_subscription(&self, username: &str) -> Result<(), SubscriptionError>;

    /// Users whose expiry falls within the notification window.
    async fn get_users_to_notify(&self) -> Result<Vec<ExpiringUser>, SubscriptionError>;

    /// Users blocked for at least the configured removal delay.
    async fn get_users_to_remove(&self) -> Result<Vec<String>, SubscriptionError>;
}
