use crate::domain::{ScheduledJobKind, time::now_rfc3339};
use crate::entities::{prelude::*, scheduled_jobs};
use anyhow::{Context, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, Set};

pub type ScheduledJob = scheduled_jobs::Model;

pub struct ScheduledJobRepository {
    conn: DatabaseConnection,
}

impl ScheduledJobRepository {
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn save(
        &self,
        job_id: &str,
        kind: ScheduledJobKind,
        username: &str,
        run_at: &str,
    ) -> Result<()> {
        let model = scheduled_jobs::ActiveModel {
            job_id: Set(job_id.to_string()),
            kind: Set(kind.as_str().to_string()),
            username: Set(username.to_string()),
            run_at: Set(run_at.to_string()),
            created_at: Set(now_rfc3339()),
        };

        ScheduledJobs::insert(model)
            .on_conflict(
                OnConflict::column(scheduled_jobs::Column::JobId)
                    .update_columns([
                        scheduled_jobs::Column::Kind,
                        scheduled_jobs::Column::Username,
                        scheduled_jobs::Column::RunAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await
            .context("Failed to persist scheduled job")?;
        Ok(())
    }

    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let result = ScheduledJobs::delete_by_id(job_id.to_string())
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn list(&self) -> Result<Vec<ScheduledJob>> {
        Ok(ScheduledJobs::find()
            .order_by_asc(scheduled_jobs::Column::RunAt)
            .all(&self.conn)
            .await?)
    }
}
