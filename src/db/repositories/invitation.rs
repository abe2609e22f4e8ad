use crate::domain::time::parse_timestamp;
use crate::entities::{invitations, prelude::*};
use anyhow::{Context, Result};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};

pub type Invitation = invitations::Model;

/// Decodes one of the JSON list columns, treating garbage as empty.
#[must_use]
pub fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl invitations::Model {
    #[must_use]
    pub fn library_titles(&self) -> Vec<String> {
        json_list(&self.libraries)
    }

    #[must_use]
    pub fn claimed_by(&self) -> Vec<String> {
        json_list(&self.claimed_by_users)
    }

    #[must_use]
    pub const fn is_fully_used(&self) -> bool {
        self.use_count >= self.max_uses
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .as_deref()
            .and_then(parse_timestamp)
            .is_some_and(|at| at < chrono::Local::now())
    }
}

pub struct InvitationRepository {
    conn: DatabaseConnection,
}

impl InvitationRepository {
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn add(&self, invitation: Invitation) -> Result<()> {
        Invitations::insert(invitation.into_active_model())
            .exec(&self.conn)
            .await
            .context("Failed to insert invitation")?;
        Ok(())
    }

    pub async fn get(&self, code: &str) -> Result<Option<Invitation>> {
        Invitations::find_by_id(code.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query invitation")
    }

    /// Invitations with uses left that have not expired, newest first.
    pub async fn pending(&self) -> Result<Vec<Invitation>> {
        let all = Invitations::find()
            .order_by_desc(invitations::Column::CreatedAt)
            .all(&self.conn)
            .await?;

        Ok(all
            .into_iter()
            .filter(|inv| !inv.is_fully_used() && !inv.is_expired())
            .collect())
    }

    /// Takes one use of `code` if any are left. Returns `false` when the
    /// invitation is missing or already used up.
    pub async fn reserve_use(&self, code: &str) -> Result<bool> {
        let result = Invitations::update_many()
            .col_expr(
                invitations::Column::UseCount,
                Expr::col(invitations::Column::UseCount).add(1),
            )
            .filter(invitations::Column::Code.eq(code))
            .filter(Expr::col(invitations::Column::UseCount).lt(Expr::col(invitations::Column::MaxUses)))
            .exec(&self.conn)
            .await
            .with_context(|| format!("Failed to reserve invitation {code}"))?;
        Ok(result.rows_affected == 1)
    }

    /// Gives back a use taken by `reserve_use` for a claim that failed.
    pub async fn release_use(&self, code: &str) -> Result<()> {
        Invitations::update_many()
            .col_expr(
                invitations::Column::UseCount,
                Expr::col(invitations::Column::UseCount).sub(1),
            )
            .filter(invitations::Column::Code.eq(code))
            .filter(invitations::Column::UseCount.gt(0))
            .exec(&self.conn)
            .await
            .with_context(|| format!("Failed to release invitation {code}"))?;
        Ok(())
    }

    /// Appends `username` to the claimers. The use itself is taken by
    /// `reserve_use` beforehand.
    pub async fn record_claim(&self, code: &str, username: &str, claimed_at: &str) -> Result<()> {
        let invitation = self
            .get(code)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Invitation not found: {code}"))?;

        let mut claimed = invitation.claimed_by();
        claimed.push(username.to_string());

        let mut active: invitations::ActiveModel = invitation.into();
        active.claimed_by_users = Set(serde_json::to_string(&claimed)?);
        active.last_claimed_at = Set(Some(claimed_at.to_string()));
        active.update(&self.conn).await?;
        Ok(())
    }

    pub async fn delete(&self, code: &str) -> Result<bool> {
        let result = Invitations::delete_by_id(code.to_string())
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// When `username` joined through an invitation, if they did.
    pub async fn claim_date(&self, username: &str) -> Result<Option<String>> {
        let candidates = Invitations::find()
            .filter(invitations::Column::ClaimedByUsers.contains(username))
            .order_by_asc(invitations::Column::CreatedAt)
            .all(&self.conn)
            .await?;

        Ok(candidates
            .into_iter()
            .find(|inv| inv.claimed_by().iter().any(|u| u == username))
            .and_then(|inv| inv.last_claimed_at))
    }
}
