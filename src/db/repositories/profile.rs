use crate::entities::{prelude::*, user_profiles};
use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder,
};

pub type UserProfile = user_profiles::Model;

pub struct ProfileRepository {
    conn: DatabaseConnection,
}

impl ProfileRepository {
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn find(&self, username: &str) -> Result<Option<UserProfile>> {
        UserProfiles::find_by_id(username.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query user profile")
    }

    /// Missing profiles come back empty, keyed by `username`.
    pub async fn get(&self, username: &str) -> Result<UserProfile> {
        Ok(self.find(username).await?.unwrap_or_else(|| UserProfile {
            username: username.to_string(),
            ..Default::default()
        }))
    }

    pub async fn list(&self) -> Result<Vec<UserProfile>> {
        Ok(UserProfiles::find()
            .order_by_asc(user_profiles::Column::Username)
            .all(&self.conn)
            .await?)
    }

    /// Inserts or fully overwrites the row.
    pub async fn upsert(&self, profile: UserProfile) -> Result<()> {
        let exists = self.find(&profile.username).await?.is_some();
        let mut active = profile.into_active_model();
        active = active.reset_all();

        if exists {
            active.update(&self.conn).await?;
        } else {
            active.insert(&self.conn).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, username: &str) -> Result<bool> {
        let result = UserProfiles::delete_by_id(username.to_string())
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn with_expiration(&self) -> Result<Vec<UserProfile>> {
        Ok(UserProfiles::find()
            .filter(user_profiles::Column::ExpirationDate.is_not_null())
            .filter(user_profiles::Column::ExpirationDate.ne(""))
            .all(&self.conn)
            .await?)
    }

    pub async fn on_trial(&self) -> Result<Vec<UserProfile>> {
        Ok(UserProfiles::find()
            .filter(user_profiles::Column::TrialEndDate.is_not_null())
            .filter(user_profiles::Column::TrialEndDate.ne(""))
            .all(&self.conn)
            .await?)
    }

    pub async fn find_by_payment_token(&self, token: &str) -> Result<Option<UserProfile>> {
        Ok(UserProfiles::find()
            .filter(user_profiles::Column::PaymentToken.eq(token))
            .one(&self.conn)
            .await?)
    }

    /// Returns the profile's payment token, creating one on first use.
    pub async fn ensure_payment_token(&self, username: &str) -> Result<String> {
        let mut profile = self.get(username).await?;
        if let Some(token) = profile.payment_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        profile.payment_token = Some(token.clone());
        self.upsert(profile).await?;
        Ok(token)
    }
}
