use crate::domain::{BlockReason, time::now_rfc3339};
use crate::entities::{blocked_users, prelude::*};
use anyhow::{Context, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, Set};

pub type BlockedUser = blocked_users::Model;

pub struct BlockedRepository {
    conn: DatabaseConnection,
}

impl BlockedRepository {
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn list(&self) -> Result<Vec<BlockedUser>> {
        Ok(BlockedUsers::find()
            .order_by_desc(blocked_users::Column::BlockedAt)
            .all(&self.conn)
            .await?)
    }

    pub async fn get(&self, username: &str) -> Result<Option<BlockedUser>> {
        BlockedUsers::find_by_id(username.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query blocked user")
    }

    /// Blocking an already blocked user refreshes the date and reason.
    pub async fn add(&self, username: &str, reason: BlockReason) -> Result<()> {
        let model = blocked_users::ActiveModel {
            username: Set(username.to_string()),
            blocked_at: Set(now_rfc3339()),
            block_reason: Set(reason.as_str().to_string()),
        };

        BlockedUsers::insert(model)
            .on_conflict(
                OnConflict::column(blocked_users::Column::Username)
                    .update_columns([
                        blocked_users::Column::BlockedAt,
                        blocked_users::Column::BlockReason,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await
            .context("Failed to save blocked user")?;
        Ok(())
    }

    pub async fn remove(&self, username: &str) -> Result<bool> {
        let result = BlockedUsers::delete_by_id(username.to_string())
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
