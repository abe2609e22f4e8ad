use crate::domain::time::now_rfc3339;
use crate::entities::{prelude::*, short_links};
use anyhow::{Context, Result};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

pub struct ShortLinkRepository {
    conn: DatabaseConnection,
}

impl ShortLinkRepository {
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, short_code: &str, original_url: &str) -> Result<()> {
        let model = short_links::ActiveModel {
            short_code: Set(short_code.to_string()),
            original_url: Set(original_url.to_string()),
            created_at: Set(now_rfc3339()),
            ..Default::default()
        };

        ShortLinks::insert(model)
            .exec(&self.conn)
            .await
            .context("Failed to insert short link")?;
        Ok(())
    }

    /// Target URL for `short_code`.
    pub async fn resolve(&self, short_code: &str) -> Result<Option<String>> {
        let link = ShortLinks::find()
            .filter(short_links::Column::ShortCode.eq(short_code))
            .one(&self.conn)
            .await?;
        Ok(link.map(|l| l.original_url))
    }
}
