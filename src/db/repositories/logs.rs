use crate::domain::time::now_rfc3339;
use crate::entities::{prelude::*, system_logs};
use anyhow::Result;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set};

pub struct LogRepository {
    conn: DatabaseConnection,
}

impl LogRepository {
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn add(
        &self,
        event_type: &str,
        level: &str,
        message: &str,
        details: Option<String>,
    ) -> Result<()> {
        let active_model = system_logs::ActiveModel {
            event_type: Set(event_type.to_string()),
            level: Set(level.to_string()),
            message: Set(message.to_string()),
            details: Set(details),
            created_at: Set(now_rfc3339()),
            ..Default::default()
        };

        SystemLogs::insert(active_model).exec(&self.conn).await?;
        Ok(())
    }

    /// Newest first.
    pub async fn get_recent(&self, limit: u64) -> Result<Vec<system_logs::Model>> {
        let items = SystemLogs::find()
            .order_by_desc(system_logs::Column::Id)
            .limit(limit)
            .all(&self.conn)
            .await?;
        Ok(items)
    }

    pub async fn clear(&self) -> Result<u64> {
        let result = SystemLogs::delete_many().exec(&self.conn).await?;
        Ok(result.rows_affected)
    }

    pub async fn prune(&self, older_than_days: i64) -> Result<u64> {
        let cutoff = (chrono::Local::now() - chrono::Duration::days(older_than_days)).to_rfc3339();

        let result = SystemLogs::delete_many()
            .filter(system_logs::Column::CreatedAt.lt(cutoff))
            .exec(&self.conn)
            .await?;

        Ok(result.rows_affected)
    }
}
