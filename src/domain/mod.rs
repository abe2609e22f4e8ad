//! Domain primitives shared by the store, services and API.
//!
//! String-backed enums mirror the values persisted in the database, so each
//! one round-trips through [`fmt::Display`] and [`std::str::FromStr`].

pub mod events;
pub mod time;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a user ended up in the blocked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Expired,
    TrialExpired,
    Manual,
}

impl BlockReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::TrialExpired => "trial_expired",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expired" => Ok(Self::Expired),
            "trial_expired" => Ok(Self::TrialExpired),
            "manual" => Ok(Self::Manual),
            other => Err(format!("Unknown block reason: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "ATIVA")]
    Pending,
    #[serde(rename = "CONCLUIDA")]
    Completed,
}

impl PaymentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "ATIVA",
            Self::Completed => "CONCLUIDA",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentProvider {
    #[serde(rename = "EFI", alias = "efi")]
    Efi,
    #[serde(rename = "MERCADOPAGO", alias = "mercadopago")]
    MercadoPago,
    #[serde(rename = "Manual")]
    Manual,
}

impl PaymentProvider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Efi => "EFI",
            Self::MercadoPago => "MERCADOPAGO",
            Self::Manual => "Manual",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EFI" => Ok(Self::Efi),
            "MERCADOPAGO" => Ok(Self::MercadoPago),
            "MANUAL" => Ok(Self::Manual),
            other => Err(format!("Unknown payment provider: {other}")),
        }
    }
}

/// Access level of an authenticated panel user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Where a renewal starts counting from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalBase {
    /// Adds 30 days per month, starting today or at the current expiry if later.
    #[default]
    Today,
    /// Adds calendar months, clamping the day of month.
    ExpiryDate,
}

/// The three Tautulli notifiers the panel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    ScreenLimit,
    Blocking,
    TrialBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockAction {
    Add,
    Remove,
}

/// Persisted one-shot job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobKind {
    TrialEnd,
    SubscriptionEnd,
}

impl ScheduledJobKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TrialEnd => "trial_end",
            Self::SubscriptionEnd => "subscription_end",
        }
    }
}

impl FromStr for ScheduledJobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial_end" => Ok(Self::TrialEnd),
            "subscription_end" => Ok(Self::SubscriptionEnd),
            other => Err(format!("Unknown job kind: {other}")),
        }
    }
}

/// Dashboard counters pushed to the admin UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub active_streams: u32,
    pub total_users: usize,
    pub active_users: usize,
    pub blocked_users: usize,
    pub monthly_revenue: f64,
    pub upcoming_renewals: usize,
    pub daily_revenue: std::collections::BTreeMap<u32, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_reason_round_trips_through_strings() {
        for reason in [BlockReason::Expired, BlockReason::TrialExpired, BlockReason::Manual] {
            assert_eq!(reason.as_str().parse::<BlockReason>().unwrap(), reason);
        }
        assert!("banned".parse::<BlockReason>().is_err());
    }

    #[test]
    fn provider_parsing_is_case_insensitive() {
        assert_eq!("efi".parse::<PaymentProvider>().unwrap(), PaymentProvider::Efi);
        assert_eq!(
            "MercadoPago".parse::<PaymentProvider>().unwrap(),
            PaymentProvider::MercadoPago
        );
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Completed).unwrap(),
            "\"CONCLUIDA\""
        );
    }
}
