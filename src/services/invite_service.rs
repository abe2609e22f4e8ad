//! Domain service for invitation codes and their claim flow.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::notifier_handler::NotifierError;
use super::plex_connection::PlexError;
use crate::db::Invitation;

#[derive(Debug, Error)]
pub enum InviteError {
    #[error("{0}")]
    NotFound(String),

    /// Expired, used up, or otherwise not claimable.
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Token do Plex inválido ou expirado.")]
    InvalidToken,

    #[error("{0}")]
    Plex(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for InviteError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for InviteError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<PlexError> for InviteError {
    fn from(err: PlexError) -> Self {
        Self::Plex(err.to_string())
    }
}

impl From<NotifierError> for InviteError {
    fn from(err: NotifierError) -> Self {
        Self::Plex(err.to_string())
    }
}

const fn default_max_uses() -> i32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateInvitationRequest {
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub screens: i32,
    #[serde(default)]
    pub allow_downloads: bool,
    pub expires_in_minutes: Option<i64>,
    #[serde(default)]
    pub trial_duration_minutes: i32,
    #[serde(default)]
    pub overseerr_access: bool,
    #[serde(default = "default_max_uses")]
    pub max_uses: i32,
    pub custom_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedInvitation {
    pub code: String,
    pub invite_url: String,
}

/// What a prospective user sees before claiming.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationDetails {
    pub code: String,
    pub libraries: Vec<String>,
    pub screen_limit: i32,
    pub allow_downloads: bool,
    pub trial_duration_minutes: i32,
    pub overseerr_access: bool,
    pub expires_at: Option<String>,
}

impl From<&Invitation> for InvitationDetails {
    fn from(inv: &Invitation) -> Self {
        Self {
            code: inv.code.clone(),
            libraries: inv.library_titles(),
            screen_limit: inv.screen_limit,
            allow_downloads: inv.allow_downloads,
            trial_duration_minutes: inv.trial_duration_minutes,
            overseerr_access: inv.overseerr_access,
            expires_at: inv.expires_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimResult {
    pub username: String,
    pub message: String,
}

#[async_trait::async_trait]
pub trait InviteService: Send + Sync {
    async fn create_invitation(
        &self,
        request: CreateInvitationRequest,
    ) -> Result<CreatedInvitation, InviteError>;

    /// Returns a claimable invitation or the reason it cannot be claimed.
    async fn get_invitation_by_code(&self, code: &str) -> Result<Invitation, InviteError>;

    /// Grants Plex access to the account behind `plex_token`.
    async fn claim_invitation(&self, code: &str, plex_token: &str)
    -> Result<ClaimResult, InviteError>;

    async fn list_invitations(&self) -> Result<Vec<Invitation>, InviteError>;

    async fn delete_invitation(&self, code: &str) -> Result<(), InviteError>;
}
