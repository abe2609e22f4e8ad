//! `SeaORM` implementation of the `InviteService` trait.

use async_trait::async_trait;
use chrono::{Duration, Local};
use regex::Regex;
use reqwest::Client;
use std::sync::{Arc, OnceLock};
use tokio::sync::{RwLock, broadcast};
use tracing::{error, info, warn};

use super::invite_service::{
    ClaimResult, CreateInvitationRequest, CreatedInvitation, InviteError, InviteService,
};
use super::link_shortener::random_code;
use super::notifier_handler::NotifierHandler;
use super::plex_connection::{PlexConnection, PlexLink};
use super::plex_users::PlexUserManager;
use super::scheduler::Scheduler;
use crate::clients::overseerr::OverseerrClient;
use crate::clients::plex_tv::{InviteOutcome, PlexAccount};
use crate::config::Config;
use crate::db::{Invitation, Store};
use crate::domain::ScheduledJobKind;
use crate::domain::events::PanelEvent;
use crate::domain::time::now_rfc3339;

const INVITE_CODE_LENGTH: usize = 22;
const ACCEPT_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

fn custom_code_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{4,32}$").expect("Invalid regex"))
}

/// Rejects codes that are used up or past their expiry.
pub fn check_claimable(invitation: &Invitation) -> Result<(), InviteError> {
    if invitation.is_fully_used() {
        let claimed = invitation.claimed_by();
        return Err(InviteError::Invalid(match (invitation.max_uses, claimed.last()) {
            (1, Some(username)) => format!("Este convite já foi resgatado por {username}."),
            _ => "Este convite atingiu o limite de utilizações.".to_string(),
        }));
    }
    if invitation.is_expired() {
        return Err(InviteError::Invalid("Este convite expirou.".to_string()));
    }
    Ok(())
}

pub struct SeaOrmInviteService {
    config: Arc<RwLock<Config>>,
    store: Store,
    http: Client,
    connection: Arc<PlexConnection>,
    plex_users: Arc<PlexUserManager>,
    notifier_handler: Arc<NotifierHandler>,
    scheduler: Arc<Scheduler>,
    event_bus: broadcast::Sender<PanelEvent>,
}

impl SeaOrmInviteService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Store,
        http: Client,
        connection: Arc<PlexConnection>,
        plex_users: Arc<PlexUserManager>,
        notifier_handler: Arc<NotifierHandler>,
        scheduler: Arc<Scheduler>,
        event_bus: broadcast::Sender<PanelEvent>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            connection,
            plex_users,
            notifier_handler,
            scheduler,
            event_bus,
        }
    }

    async fn pick_code(&self, custom: Option<&str>) -> Result<String, InviteError> {
        let Some(custom) = custom.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(random_code(INVITE_CODE_LENGTH));
        };
        if !custom_code_pattern().is_match(custom) {
            return Err(InviteError::Validation(
                "O código deve ter entre 4 e 32 caracteres (letras, números, _ ou -).".to_string(),
            ));
        }
        if self.store.get_invitation(custom).await?.is_some() {
            return Err(InviteError::Conflict(
                "Este código de convite já está em uso.".to_string(),
            ));
        }
        Ok(custom.to_string())
    }

    /// Shares the invitation's libraries with `account` and accepts the
    /// pending invite on their behalf.
    async fn share_libraries(
        &self,
        link: &PlexLink,
        invitation: &Invitation,
        account: &PlexAccount,
        plex_token: &str,
    ) -> Result<(), InviteError> {
        let plex_tv = self.connection.plex_tv();
        let username = account.username.as_str();
        let titles = invitation.library_titles();
        let section_ids: Vec<u64> = plex_tv
            .server_sections(&link.token, &link.machine_identifier)
            .await
            .map_err(|e| InviteError::Plex(e.to_string()))?
            .into_iter()
            .filter(|s| titles.contains(&s.title))
            .map(|s| s.id)
            .collect();
        if section_ids.is_empty() {
            return Err(InviteError::Validation(
                "Nenhuma biblioteca válida encontrada para partilhar.".to_string(),
            ));
        }

        let outcome = plex_tv
            .invite_friend(
                &link.token,
                &link.machine_identifier,
                &account.email,
                &section_ids,
                invitation.allow_downloads,
            )
            .await
            .map_err(|e| InviteError::Plex(e.to_string()))?;
        if outcome == InviteOutcome::AlreadyShared {
            return Err(InviteError::Invalid(
                "Você já tem acesso a este servidor.".to_string(),
            ));
        }

        info!(username, "Plex invite sent, checking access");
        tokio::time::sleep(ACCEPT_DELAY).await;

        if let Err(e) = plex_tv
            .accept_pending_invite(plex_token, &link.owner.username)
            .await
        {
            let present = self
                .plex_users
                .get_all_plex_users(true)
                .await
                .is_some_and(|users| users.iter().any(|u| u.username == username));
            if !present {
                error!(username, error = %e, "Invite acceptance failed");
                return Err(InviteError::Plex(e.to_string()));
            }
            warn!(username, error = %e, "Formal acceptance failed but access is confirmed");
        }

        Ok(())
    }
}

#[async_trait]
impl InviteService for SeaOrmInviteService {
    async fn create_invitation(
        &self,
        request: CreateInvitationRequest,
    ) -> Result<CreatedInvitation, InviteError> {
        if request.libraries.is_empty() {
            return Err(InviteError::Validation(
                "Pelo menos uma biblioteca deve ser selecionada para o convite.".to_string(),
            ));
        }
        if !(0..=4).contains(&request.screens) {
            return Err(InviteError::Validation(
                "O limite de telas deve estar entre 0 e 4.".to_string(),
            ));
        }
        if request.max_uses < 1 {
            return Err(InviteError::Validation(
                "O número máximo de utilizações deve ser pelo menos 1.".to_string(),
            ));
        }
        if request.trial_duration_minutes < 0 {
            return Err(InviteError::Validation(
                "A duração do teste não pode ser negativa.".to_string(),
            ));
        }

        let code = self.pick_code(request.custom_code.as_deref()).await?;
        let expires_at = request
            .expires_in_minutes
            .filter(|m| *m > 0)
            .map(|m| (Local::now() + Duration::minutes(m)).to_rfc3339());

        let invitation = Invitation {
            code: code.clone(),
            libraries: serde_json::to_string(&request.libraries).map_err(anyhow::Error::from)?,
            screen_limit: request.screens,
            allow_downloads: request.allow_downloads,
            created_at: now_rfc3339(),
            expires_at,
            claimed_by_users: "[]".to_string(),
            last_claimed_at: None,
            trial_duration_minutes: request.trial_duration_minutes,
            overseerr_access: request.overseerr_access,
            max_uses: request.max_uses,
            use_count: 0,
        };
        self.store.add_invitation(invitation).await?;

        let base_url = self.config.read().await.app.base_url().to_string();
        info!(code, max_uses = request.max_uses, "Invitation created");
        Ok(CreatedInvitation {
            invite_url: format!("{base_url}/invite/{code}"),
            code,
        })
    }

    async fn get_invitation_by_code(&self, code: &str) -> Result<Invitation, InviteError> {
        let invitation = self
            .store
            .get_invitation(code)
            .await?
            .ok_or_else(|| InviteError::NotFound("Convite não encontrado.".to_string()))?;
        check_claimable(&invitation)?;
        Ok(invitation)
    }

    async fn claim_invitation(
        &self,
        code: &str,
        plex_token: &str,
    ) -> Result<ClaimResult, InviteError> {
        let plex_tv = self.connection.plex_tv();
        let account = plex_tv.account(plex_token).await.map_err(|e| {
            warn!(error = %e, "Invite claim with an unusable Plex token");
            InviteError::InvalidToken
        })?;
        let invitation = self.get_invitation_by_code(code).await?;
        let link = self.connection.require().await?;
        let username = account.username.clone();

        if let Some(users) = self.plex_users.get_all_plex_users(false).await {
            if users
                .iter()
                .any(|u| u.matches(&account.username) || u.matches(&account.email))
            {
                return Err(InviteError::Invalid(
                    "Você já tem acesso a este servidor.".to_string(),
                ));
            }
        }

        // The use is taken before touching Plex and handed back if sharing fails.
        if !self.store.reserve_invitation_use(code).await? {
            self.get_invitation_by_code(code).await?;
            return Err(InviteError::Invalid(
                "Este convite atingiu o limite de utilizações.".to_string(),
            ));
        }
        if let Err(e) = self
            .share_libraries(&link, &invitation, &account, plex_token)
            .await
        {
            if let Err(release) = self.store.release_invitation_use(code).await {
                warn!(code, error = %release, "Could not release invitation use");
            }
            return Err(e);
        }

        if invitation.screen_limit > 0 {
            if let Err(e) = self
                .notifier_handler
                .update_screen_limit(&account.email, &username, invitation.screen_limit)
                .await
            {
                warn!(username, error = %e, "Could not apply invite screen limit");
            }
        }

        self.store
            .record_invitation_claim(code, &username, &now_rfc3339())
            .await?;
        self.plex_users.invalidate_user_cache().await;
        self.store
            .create_notification(
                &format!("'{username}' resgatou um convite."),
                "success",
                Some("/users".to_string()),
            )
            .await?;

        let mut profile = self.store.get_user_profile(&username).await?;
        profile.screen_limit = invitation.screen_limit;
        profile.allow_downloads = invitation.allow_downloads;
        profile.libraries = Some(invitation.libraries.clone());

        if invitation.trial_duration_minutes > 0 {
            let trial_end = Local::now() + Duration::minutes(i64::from(invitation.trial_duration_minutes));
            let job_id = format!("trial_end_{username}");
            self.scheduler
                .schedule_once(&job_id, ScheduledJobKind::TrialEnd, &username, trial_end)
                .await?;
            profile.trial_end_date = Some(trial_end.to_rfc3339());
            profile.trial_job_id = Some(job_id);
        }

        if invitation.overseerr_access {
            let config = self.config.read().await.clone();
            if config.overseerr.enabled && !config.overseerr.url.is_empty() {
                let overseerr = OverseerrClient::new(
                    self.http.clone(),
                    &config.overseerr.url,
                    &config.overseerr.api_key,
                );
                match overseerr.import_from_plex(account.id).await {
                    Ok(()) => profile.overseerr_access = true,
                    Err(e) => warn!(username, error = %e, "Overseerr import failed"),
                }
            } else {
                warn!(username, "Invite grants Overseerr but Overseerr is not configured");
            }
        }

        self.store.set_user_profile(profile).await?;

        info!(username, code, "Invitation claimed");
        let _ = self.event_bus.send(PanelEvent::InviteClaimed {
            code: code.to_string(),
            username: username.clone(),
        });
        Ok(ClaimResult {
            message: format!("Convite resgatado e acesso concedido! Bem-vindo, {username}."),
            username,
        })
    }

    async fn list_invitations(&self) -> Result<Vec<Invitation>, InviteError> {
        Ok(self.store.get_all_pending_invitations().await?)
    }

    async fn delete_invitation(&self, code: &str) -> Result<(), InviteError> {
        if !self.store.delete_invitation(code).await? {
            return Err(InviteError::NotFound("Convite não encontrado.".to_string()));
        }
        info!(code, "Invitation deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(max_uses: i32, claimed: &[&str], expires_at: Option<String>) -> Invitation {
        Invitation {
            code: "abcd".to_string(),
            libraries: r#"["Filmes"]"#.to_string(),
            screen_limit: 0,
            allow_downloads: false,
            created_at: now_rfc3339(),
            expires_at,
            claimed_by_users: serde_json::to_string(claimed).unwrap(),
            last_claimed_at: None,
            trial_duration_minutes: 0,
            overseerr_access: false,
            max_uses,
            use_count: i32::try_from(claimed.len()).unwrap(),
        }
    }

    #[test]
    fn custom_codes_follow_the_allowed_alphabet() {
        assert!(custom_code_pattern().is_match("natal-2025_A"));
        assert!(!custom_code_pattern().is_match("abc"));
        assert!(!custom_code_pattern().is_match("com espaço"));
        assert!(!custom_code_pattern().is_match(&"x".repeat(33)));
    }

    #[test]
    fn single_use_invites_name_the_claimant() {
        let err = check_claimable(&invitation(1, &["ana"], None)).unwrap_err();
        assert_eq!(err.to_string(), "Este convite já foi resgatado por ana.");
    }

    #[test]
    fn multi_use_invites_stay_open_until_the_cap() {
        assert!(check_claimable(&invitation(3, &["ana", "bia"], None)).is_ok());
        let err = check_claimable(&invitation(2, &["ana", "bia"], None)).unwrap_err();
        assert!(matches!(err, InviteError::Invalid(_)));
    }

    #[test]
    fn expired_invites_are_rejected() {
        let past = (Local::now() - Duration::minutes(5)).to_rfc3339();
        let err = check_claimable(&invitation(1, &[], Some(past))).unwrap_err();
        assert_eq!(err.to_string(), "Este convite expirou.");
    }
}
