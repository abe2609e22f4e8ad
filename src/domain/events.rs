//! Events published on the shared event bus.
//!
//! Every event is persisted to the activity log and streamed to connected
//! admin dashboards over SSE.

use serde::Serialize;

use super::{BlockReason, DashboardSummary};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum PanelEvent {
    InviteClaimed {
        code: String,
        username: String,
    },
    SubscriptionRenewed {
        username: String,
        expires_at: String,
    },
    TrialEnded {
        username: String,
    },
    UserBlocked {
        username: String,
        reason: BlockReason,
    },
    UserUnblocked {
        username: String,
    },
    UserRemoved {
        username: String,
    },
    ScreenLimitChanged {
        username: String,
        screens: i32,
    },
    PaymentConfirmed {
        txid: String,
        username: String,
        value: f64,
    },
    SettingsUpdated,
    JobFailed {
        job_name: String,
        message: String,
    },
    Dashboard {
        summary: DashboardSummary,
    },
    Info {
        message: String,
    },
    Error {
        message: String,
    },
}

impl PanelEvent {
    /// Variant name used as the activity log `event_type`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InviteClaimed { .. } => "InviteClaimed",
            Self::SubscriptionRenewed { .. } => "SubscriptionRenewed",
            Self::TrialEnded { .. } => "TrialEnded",
            Self::UserBlocked { .. } => "UserBlocked",
            Self::UserUnblocked { .. } => "UserUnblocked",
            Self::UserRemoved { .. } => "UserRemoved",
            Self::ScreenLimitChanged { .. } => "ScreenLimitChanged",
            Self::PaymentConfirmed { .. } => "PaymentConfirmed",
            Self::SettingsUpdated => "SettingsUpdated",
            Self::JobFailed { .. } => "JobFailed",
            Self::Dashboard { .. } => "Dashboard",
            Self::Info { .. } => "Info",
            Self::Error { .. } => "Error",
        }
    }
}
