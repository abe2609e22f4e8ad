//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::services::auth_service::{AuthError, AuthService, LoginResult, UserInfo};

const MIN_PASSWORD_LEN: usize = 8;

pub struct SeaOrmAuthService {
    store: Store,
    config: Arc<RwLock<Config>>,
}

impl SeaOrmAuthService {
    #[must_use]
    pub const fn new(store: Store, config: Arc<RwLock<Config>>) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResult, AuthError> {
        if !self.store.verify_user_password(username, password).await? {
            warn!(username, "Failed panel login");
            return Err(AuthError::InvalidCredentials);
        }

        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(LoginResult {
            username: user.username,
            api_key: user.api_key,
            must_change_password: user.must_change_password,
        })
    }

    async fn verify_api_key(&self, api_key: &str) -> Result<Option<String>, AuthError> {
        let user = self.store.verify_api_key(api_key).await?;
        Ok(user.map(|u| u.username))
    }

    async fn get_user_info(&self, username: &str) -> Result<UserInfo, AuthError> {
        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(UserInfo {
            username: user.username,
            must_change_password: user.must_change_password,
            created_at: user.created_at,
            updated_at: user.updated_at,
        })
    }

    async fn change_password(
        &self,
        username: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "A nova senha deve ter pelo menos {MIN_PASSWORD_LEN} caracteres."
            )));
        }
        if current_password == new_password {
            return Err(AuthError::Validation(
                "A nova senha deve ser diferente da atual.".to_string(),
            ));
        }
        if !self
            .store
            .verify_user_password(username, current_password)
            .await?
        {
            return Err(AuthError::Validation("A senha atual está incorreta.".to_string()));
        }

        let security = self.config.read().await.security.clone();
        self.store
            .update_user_password(username, new_password, &security)
            .await?;
        info!(username, "Panel password changed");
        Ok(())
    }

    async fn get_api_key(&self, username: &str) -> Result<String, AuthError> {
        self.store
            .get_user_api_key(username)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn regenerate_api_key(&self, username: &str) -> Result<String, AuthError> {
        let key = self.store.regenerate_user_api_key(username).await?;
        info!(username, "API key regenerated");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> SeaOrmAuthService {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let config = Config::default();
        store
            .update_user_password("admin", "password", &config.security)
            .await
            .unwrap();
        SeaOrmAuthService::new(store, Arc::new(RwLock::new(config)))
    }

    #[tokio::test]
    async fn admin_can_log_in() {
        let auth = service().await;
        let login = auth.login("admin", "password").await.unwrap();
        assert!(!login.must_change_password);

        let owner = auth.verify_api_key(&login.api_key).await.unwrap();
        assert_eq!(owner.as_deref(), Some("admin"));
        assert!(matches!(
            auth.login("admin", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn password_change_is_validated() {
        let auth = service().await;
        assert!(matches!(
            auth.change_password("admin", "password", "short").await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            auth.change_password("admin", "nope", "long-enough-1").await,
            Err(AuthError::Validation(_))
        ));

        auth.change_password("admin", "password", "long-enough-1")
            .await
            .unwrap();
        assert!(auth.login("admin", "long-enough-1").await.is_ok());
        assert!(!auth.get_user_info("admin").await.unwrap().must_change_password);
    }
}
