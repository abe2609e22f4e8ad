//! Live connection to the configured Plex Media Server and its owner account.

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clients::plex::{Library, PlexServerClient};
use crate::clients::plex_tv::{PlexAccount, PlexTvClient};
use crate::config::PlexConfig;

#[derive(Debug, Error)]
pub enum PlexError {
    #[error("O Plex não está configurado.")]
    NotConfigured,

    #[error("{0}")]
    UserNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Plex: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for PlexError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for PlexError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A verified server connection.
#[derive(Debug, Clone)]
pub struct PlexLink {
    pub server: PlexServerClient,
    pub token: String,
    pub machine_identifier: String,
    pub owner: PlexAccount,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSessions {
    pub success: bool,
    pub stream_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    pub message: String,
}

impl ServiceStatus {
    #[must_use]
    pub fn online(message: impl Into<String>) -> Self {
        Self {
            status: "ONLINE",
            message: message.into(),
        }
    }

    #[must_use]
    pub fn offline(message: impl Into<String>) -> Self {
        Self {
            status: "OFFLINE",
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == "ONLINE"
    }
}

pub struct PlexConnection {
    http: Client,
    plex_tv: PlexTvClient,
    link: RwLock<Option<Arc<PlexLink>>>,
}

impl PlexConnection {
    #[must_use]
    pub fn new(http: Client, plex_tv: PlexTvClient) -> Self {
        Self {
            http,
            plex_tv,
            link: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn plex_tv(&self) -> &PlexTvClient {
        &self.plex_tv
    }

    /// Reconnects with the given settings, replacing the current link.
    pub async fn reload(&self, config: &PlexConfig) -> (bool, String) {
        info!("Reloading Plex connection");

        if config.url.trim().is_empty() || config.token.trim().is_empty() {
            *self.link.write().await = None;
            return (
                false,
                "Configurações do Plex (URL e Token) não encontradas ou estão vazias.".to_string(),
            );
        }

        match self.connect(config).await {
            Ok(link) => {
                info!(
                    machine_identifier = %link.machine_identifier,
                    owner = %link.owner.username,
                    "Plex connection established"
                );
                *self.link.write().await = Some(Arc::new(link));
                (
                    true,
                    "Configurações aplicadas e conexões testadas com sucesso.".to_string(),
                )
            }
            Err(e) => {
                *self.link.write().await = None;
                let timed_out = e
                    .downcast_ref::<reqwest::Error>()
                    .is_some_and(|err| err.is_timeout() || err.is_connect());
                let message = if timed_out {
                    format!(
                        "Não foi possível conectar ao servidor Plex em '{}'. Verifique se o servidor está online e se a URL e a porta estão corretas.",
                        config.url
                    )
                } else {
                    format!("Falha ao aplicar novas configurações: {e}")
                };
                warn!(error = %e, "Could not connect to Plex");
                (false, message)
            }
        }
    }

    async fn connect(&self, config: &PlexConfig) -> anyhow::Result<PlexLink> {
        let server = PlexServerClient::new(self.http.clone(), &config.url, &config.token);
        let machine_identifier = server.identity().await?;
        let owner = self.plex_tv.account(&config.token).await?;
        Ok(PlexLink {
            server,
            token: config.token.clone(),
            machine_identifier,
            owner,
        })
    }

    pub async fn current(&self) -> Option<Arc<PlexLink>> {
        self.link.read().await.clone()
    }

    pub async fn require(&self) -> Result<Arc<PlexLink>, PlexError> {
        self.current().await.ok_or(PlexError::NotConfigured)
    }

    pub async fn is_connected(&self) -> bool {
        self.link.read().await.is_some()
    }

    pub async fn get_active_sessions(&self) -> ActiveSessions {
        let Some(link) = self.current().await else {
            warn!("Cannot read active sessions, Plex is not connected");
            return ActiveSessions {
                success: false,
                stream_count: 0,
            };
        };

        match link.server.active_session_count().await {
            Ok(stream_count) => ActiveSessions {
                success: true,
                stream_count,
            },
            Err(e) => {
                warn!(error = %e, "Failed to read Plex sessions");
                ActiveSessions {
                    success: false,
                    stream_count: 0,
                }
            }
        }
    }

    pub async fn get_libraries(&self) -> Vec<Library> {
        let Some(link) = self.current().await else {
            return Vec::new();
        };
        link.server.libraries().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list Plex libraries");
            Vec::new()
        })
    }

    pub async fn check_status(&self) -> ServiceStatus {
        let Some(link) = self.current().await else {
            return ServiceStatus::offline("Não configurado.");
        };
        match link.server.identity().await {
            Ok(_) => ServiceStatus::online("Conectado com sucesso."),
            Err(e) => ServiceStatus::offline(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> PlexConnection {
        let http = Client::new();
        PlexConnection::new(http.clone(), PlexTvClient::new(http, "Painel"))
    }

    #[tokio::test]
    async fn reload_without_credentials_leaves_panel_disconnected() {
        let conn = connection();
        let (ok, message) = conn.reload(&PlexConfig::default()).await;
        assert!(!ok);
        assert!(message.contains("URL e Token"));
        assert!(!conn.is_connected().await);
    }

    #[tokio::test]
    async fn disconnected_panel_reports_empty_state() {
        let conn = connection();
        assert_eq!(conn.get_active_sessions().await.stream_count, 0);
        assert!(conn.get_libraries().await.is_empty());
        assert!(!conn.check_status().await.is_online());
        assert!(matches!(conn.require().await, Err(PlexError::NotConfigured)));
    }
}
