//! Plex friends with access to this server, cached for five minutes.

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use super::notifier_handler::NotifierHandler;
use super::plex_connection::{PlexConnection, PlexError, PlexLink};
use super::scheduler::Scheduler;
use crate::clients::overseerr::OverseerrClient;
use crate::clients::plex_tv::PlexFriend;
use crate::config::Config;
use crate::db::{Store, json_list};
use crate::domain::BlockAction;
use crate::domain::events::PanelEvent;

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize)]
pub struct PlexUser {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub thumb: String,
    /// Id of this server's share for the user, needed to edit it.
    #[serde(skip)]
    pub shared_server_id: u64,
}

impl PlexUser {
    fn from_friend(friend: PlexFriend, machine_identifier: &str) -> Option<Self> {
        let server = friend
            .servers
            .iter()
            .find(|s| s.machine_identifier == machine_identifier)?;
        Some(Self {
            id: friend.id,
            shared_server_id: server.id,
            username: friend.username,
            email: friend.email,
            thumb: friend.thumb,
        })
    }

    #[must_use]
    pub fn matches(&self, identifier: &str) -> bool {
        self.username == identifier || self.email.eq_ignore_ascii_case(identifier)
    }
}

pub struct PlexUserManager {
    connection: Arc<PlexConnection>,
    config: Arc<RwLock<Config>>,
    store: Store,
    http: Client,
    notifier_handler: Arc<NotifierHandler>,
    scheduler: Arc<Scheduler>,
    event_bus: broadcast::Sender<PanelEvent>,
    cache: RwLock<Option<(Instant, Vec<PlexUser>)>>,
}

impl PlexUserManager {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection: Arc<PlexConnection>,
        config: Arc<RwLock<Config>>,
        store: Store,
        http: Client,
        notifier_handler: Arc<NotifierHandler>,
        scheduler: Arc<Scheduler>,
        event_bus: broadcast::Sender<PanelEvent>,
    ) -> Self {
        Self {
            connection,
            config,
            store,
            http,
            notifier_handler,
            scheduler,
            event_bus,
            cache: RwLock::new(None),
        }
    }

    pub async fn invalidate_user_cache(&self) {
        *self.cache.write().await = None;
        info!("Plex user cache invalidated");
    }

    /// Users sharing this server, `None` when Plex is unreachable.
    pub async fn get_all_plex_users(&self, force_refresh: bool) -> Option<Vec<PlexUser>> {
        let link = self.connection.current().await?;

        if !force_refresh {
            if let Some((fetched_at, users)) = self.cache.read().await.as_ref() {
                if fetched_at.elapsed() < CACHE_TTL {
                    debug!("Serving Plex users from cache");
                    return Some(users.clone());
                }
            }
        }

        info!(force_refresh, "Fetching Plex users");
        match self.connection.plex_tv().users(&link.token).await {
            Ok(friends) => {
                let total = friends.len();
                let users: Vec<PlexUser> = friends
                    .into_iter()
                    .filter_map(|f| PlexUser::from_friend(f, &link.machine_identifier))
                    .collect();
                debug!(friends = total, with_access = users.len(), "Plex users fetched");
                *self.cache.write().await = Some((Instant::now(), users.clone()));
                Some(users)
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch Plex users");
                self.invalidate_user_cache().await;
                None
            }
        }
    }

    /// Looks a user up by username or email.
    pub async fn find_user(&self, identifier: &str) -> Option<PlexUser> {
        self.get_all_plex_users(false)
            .await?
            .into_iter()
            .find(|u| u.matches(identifier))
    }

    async fn require_user(&self, email: &str) -> Result<(Arc<PlexLink>, PlexUser), PlexError> {
        let link = self.connection.require().await?;
        let user = self.find_user(email).await.ok_or_else(|| {
            PlexError::UserNotFound(format!(
                "Utilizador com o email {email} não encontrado na sua conta Plex."
            ))
        })?;
        Ok((link, user))
    }

    fn overseerr(&self, config: &Config) -> Option<OverseerrClient> {
        let overseerr = &config.overseerr;
        (overseerr.enabled && !overseerr.url.is_empty()).then(|| {
            OverseerrClient::new(self.http.clone(), &overseerr.url, &overseerr.api_key)
        })
    }

    pub async fn get_user_libraries(&self, email: &str) -> Result<Vec<String>, PlexError> {
        let (link, user) = self.require_user(email).await?;
        let mut profile = self.store.get_user_profile(&user.username).await?;

        if let Some(raw) = profile.libraries.as_deref() {
            if serde_json::from_str::<Vec<String>>(raw).is_ok() {
                return Ok(json_list(raw));
            }
            warn!(username = %user.username, "Cached libraries are not valid JSON, refetching");
        }

        let titles = self
            .connection
            .plex_tv()
            .shared_sections(&link.token, &link.machine_identifier, user.shared_server_id)
            .await
            .map_err(|e| PlexError::Upstream(e.to_string()))?;

        profile.libraries = Some(serde_json::to_string(&titles).map_err(anyhow::Error::from)?);
        self.store.set_user_profile(profile).await?;
        Ok(titles)
    }

    pub async fn update_user_libraries(
        &self,
        email: &str,
        titles: &[String],
    ) -> Result<String, PlexError> {
        let (link, user) = self.require_user(email).await?;
        let plex_tv = self.connection.plex_tv();

        let section_ids: Vec<u64> = plex_tv
            .server_sections(&link.token, &link.machine_identifier)
            .await
            .map_err(|e| PlexError::Upstream(e.to_string()))?
            .into_iter()
            .filter(|s| titles.contains(&s.title))
            .map(|s| s.id)
            .collect();

        plex_tv
            .update_friend(
                &link.token,
                &link.machine_identifier,
                user.shared_server_id,
                &section_ids,
            )
            .await
            .map_err(|e| PlexError::Upstream(e.to_string()))?;

        let mut profile = self.store.get_user_profile(&user.username).await?;
        profile.libraries = Some(serde_json::to_string(titles).map_err(anyhow::Error::from)?);
        self.store.set_user_profile(profile).await?;

        Ok(format!(
            "Bibliotecas de {} atualizadas com sucesso.",
            user.username
        ))
    }

    /// Removes a user from Plex, Tautulli, Overseerr and the local database.
    pub async fn remove_user(&self, email: &str) -> Result<String, PlexError> {
        let (link, user) = self.require_user(email).await?;
        let username = user.username.as_str();
        let profile = self.store.get_user_profile(username).await?;
        let config = self.config.read().await.clone();

        for job_id in [&profile.trial_job_id, &profile.expiration_job_id]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self.scheduler.cancel(job_id).await {
                warn!(job_id, error = %e, "Could not cancel scheduled job");
            }
        }

        if let Err(e) = self
            .notifier_handler
            .update_screen_limit(&user.email, username, 0)
            .await
        {
            warn!(username, error = %e, "Could not clear screen limit");
        }
        if let Err(e) = self
            .notifier_handler
            .manage_block_unblock(
                &user.email,
                username,
                BlockAction::Remove,
                Some(config.tautulli.blocking_notifier_id),
                None,
            )
            .await
        {
            warn!(username, error = %e, "Could not unblock on blocking notifier");
        }
        if profile.trial_end_date.is_some() {
            if let Err(e) = self
                .notifier_handler
                .manage_block_unblock(
                    &user.email,
                    username,
                    BlockAction::Remove,
                    Some(config.tautulli.trial_block_notifier_id),
                    None,
                )
                .await
            {
                warn!(username, error = %e, "Could not unblock on trial notifier");
            }
        }

        self.connection
            .plex_tv()
            .remove_friend(&link.token, user.id)
            .await
            .map_err(|e| PlexError::Upstream(e.to_string()))?;

        if profile.overseerr_access {
            if let Some(overseerr) = self.overseerr(&config) {
                if let Err(e) = overseerr.remove_user(&user.email).await {
                    warn!(username, error = %e, "Could not remove user from Overseerr");
                }
            }
        }

        self.invalidate_user_cache().await;
        self.store.remove_blocked_user(username).await?;
        self.store.delete_user_profile(username).await?;

        info!(username, "User removed");
        let _ = self.event_bus.send(PanelEvent::UserRemoved {
            username: username.to_string(),
        });
        Ok(format!("Utilizador {username} removido."))
    }

    pub async fn toggle_overseerr_access(
        &self,
        email: &str,
        username: &str,
        access: bool,
    ) -> Result<String, PlexError> {
        let config = self.config.read().await.clone();
        let overseerr = self.overseerr(&config).ok_or_else(|| {
            PlexError::Validation("O Overseerr não está configurado.".to_string())
        })?;

        if access {
            let user = self
                .find_user(username)
                .await
                .ok_or_else(|| PlexError::UserNotFound("Utilizador não encontrado no Plex.".to_string()))?;
            overseerr
                .import_from_plex(user.id)
                .await
                .map_err(|e| PlexError::Upstream(e.to_string()))?;
        } else {
            overseerr
                .remove_user(email)
                .await
                .map_err(|e| PlexError::Upstream(e.to_string()))?;
        }

        let mut profile = self.store.get_user_profile(username).await?;
        profile.overseerr_access = access;
        self.store.set_user_profile(profile).await?;

        Ok(if access {
            "Acesso ao Overseerr concedido."
        } else {
            "Acesso ao Overseerr removido."
        }
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::plex_tv::FriendServer;

    fn friend(servers: &[(&str, u64)]) -> PlexFriend {
        PlexFriend {
            id: 42,
            username: "ana".to_string(),
            email: "Ana@Example.com".to_string(),
            thumb: String::new(),
            servers: servers
                .iter()
                .map(|(mid, id)| FriendServer {
                    id: *id,
                    machine_identifier: (*mid).to_string(),
                    name: "Casa".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn only_friends_of_this_server_are_kept() {
        assert!(PlexUser::from_friend(friend(&[("other", 1)]), "mine").is_none());

        let user = PlexUser::from_friend(friend(&[("other", 1), ("mine", 7)]), "mine").unwrap();
        assert_eq!(user.shared_server_id, 7);
        assert_eq!(user.id, 42);
    }

    #[test]
    fn users_match_by_username_or_email() {
        let user = PlexUser::from_friend(friend(&[("mine", 7)]), "mine").unwrap();
        assert!(user.matches("ana"));
        assert!(user.matches("ana@example.com"));
        assert!(!user.matches("bia"));
    }
}
