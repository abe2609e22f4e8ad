use crate::domain::time::now_rfc3339;
use crate::entities::{notifications, prelude::*};
use anyhow::{Context, Result};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

pub struct NotificationRepository {
    conn: DatabaseConnection,
}

impl NotificationRepository {
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, message: &str, category: &str, link: Option<String>) -> Result<()> {
        let model = notifications::ActiveModel {
            message: Set(message.to_string()),
            category: Set(category.to_string()),
            timestamp: Set(now_rfc3339()),
            is_read: Set(false),
            link: Set(link),
            ..Default::default()
        };

        Notifications::insert(model)
            .exec(&self.conn)
            .await
            .context("Failed to insert notification")?;
        Ok(())
    }

    /// Newest first.
    pub async fn list(&self, limit: u64, include_read: bool) -> Result<Vec<notifications::Model>> {
        let mut query = Notifications::find()
            .order_by_desc(notifications::Column::Timestamp)
            .order_by_desc(notifications::Column::Id);

        if !include_read {
            query = query.filter(notifications::Column::IsRead.eq(false));
        }

        Ok(query.limit(limit).all(&self.conn).await?)
    }

    pub async fn unread_count(&self) -> Result<u64> {
        Ok(Notifications::find()
            .filter(notifications::Column::IsRead.eq(false))
            .count(&self.conn)
            .await?)
    }

    pub async fn mark_all_read(&self) -> Result<u64> {
        let result = Notifications::update_many()
            .col_expr(notifications::Column::IsRead, Expr::value(true))
            .filter(notifications::Column::IsRead.eq(false))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn delete_all(&self) -> Result<u64> {
        let result = Notifications::delete_many().exec(&self.conn).await?;
        Ok(result.rows_affected)
    }
}
