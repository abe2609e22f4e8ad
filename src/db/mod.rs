use crate::domain::{BlockReason, PaymentProvider, PaymentStatus, ScheduledJobKind};
use anyhow::Result;
use chrono::{DateTime, Local};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use crate::entities::notifications::Model as Notification;
pub use crate::entities::system_logs::Model as SystemLog;
pub use repositories::blocked::BlockedUser;
pub use repositories::invitation::{Invitation, json_list};
pub use repositories::payment::{FinancialSummary, PixPayment, UpcomingExpiration};
pub use repositories::profile::UserProfile;
pub use repositories::scheduled_job::ScheduledJob;
pub use repositories::user::{User, random_hex};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        let in_memory = db_url.contains(":memory:");

        if !in_memory {
            let path_str = db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        // Every connection to `:memory:` opens its own empty database.
        let (max_connections, min_connections) = if in_memory {
            (1, 1)
        } else {
            (max_connections, min_connections)
        };

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        if in_memory {
            let forever = Duration::from_secs(10 * 365 * 24 * 3600);
            opt.idle_timeout(forever).max_lifetime(forever);
        }

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn logs_repo(&self) -> repositories::logs::LogRepository {
        repositories::logs::LogRepository::new(self.conn.clone())
    }

    fn notification_repo(&self) -> repositories::notification::NotificationRepository {
        repositories::notification::NotificationRepository::new(self.conn.clone())
    }

    fn profile_repo(&self) -> repositories::profile::ProfileRepository {
        repositories::profile::ProfileRepository::new(self.conn.clone())
    }

    fn payment_repo(&self) -> repositories::payment::PaymentRepository {
        repositories::payment::PaymentRepository::new(self.conn.clone())
    }

    fn invitation_repo(&self) -> repositories::invitation::InvitationRepository {
        repositories::invitation::InvitationRepository::new(self.conn.clone())
    }

    fn blocked_repo(&self) -> repositories::blocked::BlockedRepository {
        repositories::blocked::BlockedRepository::new(self.conn.clone())
    }

    fn short_link_repo(&self) -> repositories::short_link::ShortLinkRepository {
        repositories::short_link::ShortLinkRepository::new(self.conn.clone())
    }

    fn scheduled_job_repo(&self) -> repositories::scheduled_job::ScheduledJobRepository {
        repositories::scheduled_job::ScheduledJobRepository::new(self.conn.clone())
    }

    // ========== Notifications ==========

    pub async fn create_notification(
        &self,
        message: &str,
        category: &str,
        link: Option<String>,
    ) -> Result<()> {
        self.notification_repo().create(message, category, link).await
    }

    pub async fn get_notifications(
        &self,
        limit: u64,
        include_read: bool,
    ) -> Result<Vec<Notification>> {
        self.notification_repo().list(limit, include_read).await
    }

    pub async fn unread_notification_count(&self) -> Result<u64> {
        self.notification_repo().unread_count().await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<u64> {
        self.notification_repo().mark_all_read().await
    }

    pub async fn delete_all_notifications(&self) -> Result<u64> {
        self.notification_repo().delete_all().await
    }

    // ========== Profiles ==========

    pub async fn get_user_profile(&self, username: &str) -> Result<UserProfile> {
        self.profile_repo().get(username).await
    }

    pub async fn find_user_profile(&self, username: &str) -> Result<Option<UserProfile>> {
        self.profile_repo().find(username).await
    }

    pub async fn get_all_user_profiles(&self) -> Result<Vec<UserProfile>> {
        self.profile_repo().list().await
    }

    pub async fn set_user_profile(&self, profile: UserProfile) -> Result<()> {
        self.profile_repo().upsert(profile).await
    }

    pub async fn delete_user_profile(&self, username: &str) -> Result<bool> {
        self.profile_repo().delete(username).await
    }

    pub async fn get_all_expirations(&self) -> Result<Vec<UserProfile>> {
        self.profile_repo().with_expiration().await
    }

    pub async fn get_trial_users(&self) -> Result<Vec<UserProfile>> {
        self.profile_repo().on_trial().await
    }

    pub async fn find_profile_by_payment_token(&self, token: &str) -> Result<Option<UserProfile>> {
        self.profile_repo().find_by_payment_token(token).await
    }

    pub async fn ensure_payment_token(&self, username: &str) -> Result<String> {
        self.profile_repo().ensure_payment_token(username).await
    }

    // ========== Payments ==========

    pub async fn create_pix_payment(
        &self,
        txid: &str,
        username: &str,
        value: f64,
        provider: PaymentProvider,
        screens: i32,
        external_reference: Option<String>,
    ) -> Result<()> {
        self.payment_repo()
            .create(txid, username, value, provider, screens, external_reference)
            .await
    }

    pub async fn get_pix_payment(&self, txid: &str) -> Result<Option<PixPayment>> {
        self.payment_repo().get(txid).await
    }

    pub async fn update_pix_payment_status(&self, txid: &str, status: PaymentStatus) -> Result<bool> {
        self.payment_repo().update_status(txid, status).await
    }

    pub async fn add_manual_payment(
        &self,
        username: &str,
        value: f64,
        description: &str,
        date: DateTime<Local>,
    ) -> Result<String> {
        self.payment_repo()
            .add_manual(username, value, description, date)
            .await
    }

    pub async fn get_payments_by_user(&self, username: &str) -> Result<Vec<PixPayment>> {
        self.payment_repo().by_user(username).await
    }

    pub async fn delete_old_pending_payments(&self, days: i64) -> Result<u64> {
        self.payment_repo().delete_old_pending(days).await
    }

    pub async fn get_financial_summary(
        &self,
        year: i32,
        month: u32,
        renewal_days: i64,
    ) -> Result<FinancialSummary> {
        let completed = self.payment_repo().completed_in_month(year, month).await?;
        let profiles = self.profile_repo().with_expiration().await?;
        let blocked: HashSet<String> = self
            .blocked_repo()
            .list()
            .await?
            .into_iter()
            .map(|b| b.username)
            .collect();

        Ok(repositories::payment::summarize(
            completed,
            &profiles,
            &blocked,
            year,
            month,
            renewal_days,
            Local::now().date_naive(),
        ))
    }

    // ========== Invitations ==========

    pub async fn add_invitation(&self, invitation: Invitation) -> Result<()> {
        self.invitation_repo().add(invitation).await
    }

    pub async fn get_invitation(&self, code: &str) -> Result<Option<Invitation>> {
        self.invitation_repo().get(code).await
    }

    pub async fn get_all_pending_invitations(&self) -> Result<Vec<Invitation>> {
        self.invitation_repo().pending().await
    }

    pub async fn reserve_invitation_use(&self, code: &str) -> Result<bool> {
        self.invitation_repo().reserve_use(code).await
    }

    pub async fn release_invitation_use(&self, code: &str) -> Result<()> {
        self.invitation_repo().release_use(code).await
    }

    pub async fn record_invitation_claim(
        &self,
        code: &str,
        username: &str,
        claimed_at: &str,
    ) -> Result<()> {
        self.invitation_repo()
            .record_claim(code, username, claimed_at)
            .await
    }

    pub async fn delete_invitation(&self, code: &str) -> Result<bool> {
        self.invitation_repo().delete(code).await
    }

    pub async fn get_user_claim_date(&self, username: &str) -> Result<Option<String>> {
        self.invitation_repo().claim_date(username).await
    }

    // ========== Blocked users ==========

    pub async fn get_blocked_users(&self) -> Result<Vec<BlockedUser>> {
        self.blocked_repo().list().await
    }

    pub async fn get_blocked_user(&self, username: &str) -> Result<Option<BlockedUser>> {
        self.blocked_repo().get(username).await
    }

    pub async fn add_blocked_user(&self, username: &str, reason: BlockReason) -> Result<()> {
        self.blocked_repo().add(username, reason).await
    }

    pub async fn remove_blocked_user(&self, username: &str) -> Result<bool> {
        self.blocked_repo().remove(username).await
    }

    // ========== Short links ==========

    pub async fn create_short_link(&self, short_code: &str, original_url: &str) -> Result<()> {
        self.short_link_repo().create(short_code, original_url).await
    }

    pub async fn get_short_link(&self, short_code: &str) -> Result<Option<String>> {
        self.short_link_repo().resolve(short_code).await
    }

    // ========== Scheduled jobs ==========

    pub async fn save_scheduled_job(
        &self,
        job_id: &str,
        kind: ScheduledJobKind,
        username: &str,
        run_at: &str,
    ) -> Result<()> {
        self.scheduled_job_repo()
            .save(job_id, kind, username, run_at)
            .await
    }

    pub async fn delete_scheduled_job(&self, job_id: &str) -> Result<bool> {
        self.scheduled_job_repo().delete(job_id).await
    }

    pub async fn list_scheduled_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.scheduled_job_repo().list().await
    }

    // ========== Activity log ==========

    pub async fn add_log(
        &self,
        event_type: &str,
        level: &str,
        message: &str,
        details: Option<String>,
    ) -> Result<()> {
        self.logs_repo()
            .add(event_type, level, message, details)
            .await
    }

    pub async fn get_recent_logs(&self, limit: u64) -> Result<Vec<SystemLog>> {
        self.logs_repo().get_recent(limit).await
    }

    pub async fn clear_logs(&self) -> Result<u64> {
        self.logs_repo().clear().await
    }

    pub async fn prune_logs(&self, older_than_days: i64) -> Result<u64> {
        self.logs_repo().prune(older_than_days).await
    }

    // ========== Panel account ==========

    #[must_use]
    pub fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.user_repo().get_by_username(username).await
    }

    pub async fn verify_user_password(&self, username: &str, password: &str) -> Result<bool> {
        self.user_repo().verify_password(username, password).await
    }

    pub async fn update_user_password(
        &self,
        username: &str,
        new_password: &str,
        config: &crate::config::SecurityConfig,
    ) -> Result<()> {
        self.user_repo()
            .update_password(username, new_password, config)
            .await
    }

    pub async fn verify_api_key(&self, api_key: &str) -> Result<Option<User>> {
        self.user_repo().verify_api_key(api_key).await
    }

    pub async fn get_user_api_key(&self, username: &str) -> Result<Option<String>> {
        self.user_repo().get_api_key(username).await
    }

    pub async fn regenerate_user_api_key(&self, username: &str) -> Result<String> {
        self.user_repo().regenerate_api_key(username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time::now_rfc3339;

    async fn store() -> Store {
        Store::new("sqlite::memory:").await.unwrap()
    }

    fn invitation(code: &str, max_uses: i32) -> Invitation {
        Invitation {
            code: code.to_string(),
            libraries: r#"["Filmes"]"#.to_string(),
            screen_limit: 2,
            allow_downloads: false,
            created_at: now_rfc3339(),
            expires_at: None,
            claimed_by_users: "[]".to_string(),
            last_claimed_at: None,
            trial_duration_minutes: 0,
            overseerr_access: false,
            max_uses,
            use_count: 0,
        }
    }

    #[tokio::test]
    async fn seeded_admin_gets_random_credentials() {
        let store = store().await;
        let user = store.get_user_by_username("admin").await.unwrap().unwrap();
        assert!(user.must_change_password);
        assert_eq!(user.api_key.len(), 64);
        assert_eq!(
            store.verify_api_key(&user.api_key).await.unwrap().unwrap().username,
            "admin"
        );

        assert!(
            store
                .verify_api_key("plexpanel_default_api_key_please_regenerate")
                .await
                .unwrap()
                .is_none()
        );
        assert!(!store.verify_user_password("admin", "password").await.unwrap());

        let other = Store::new("sqlite::memory:").await.unwrap();
        let other_key = other.get_user_api_key("admin").await.unwrap().unwrap();
        assert_ne!(other_key, user.api_key);
    }

    #[tokio::test]
    async fn missing_profile_reads_as_empty_and_upserts() {
        let store = store().await;
        let mut profile = store.get_user_profile("ana").await.unwrap();
        assert_eq!(profile.username, "ana");
        assert!(profile.expiration_date.is_none());

        profile.screen_limit = 2;
        store.set_user_profile(profile.clone()).await.unwrap();
        profile.name = Some("Ana".to_string());
        store.set_user_profile(profile).await.unwrap();

        let saved = store.find_user_profile("ana").await.unwrap().unwrap();
        assert_eq!(saved.screen_limit, 2);
        assert_eq!(saved.name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn payment_token_is_stable() {
        let store = store().await;
        let token = store.ensure_payment_token("bia").await.unwrap();
        assert_eq!(store.ensure_payment_token("bia").await.unwrap(), token);
        let profile = store
            .find_profile_by_payment_token(&token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.username, "bia");
    }

    #[tokio::test]
    async fn claims_consume_invitation_uses() {
        let store = store().await;
        store.add_invitation(invitation("ABCD", 2)).await.unwrap();

        assert!(store.reserve_invitation_use("ABCD").await.unwrap());
        store
            .record_invitation_claim("ABCD", "ana", "2025-01-01T10:00:00-03:00")
            .await
            .unwrap();
        assert_eq!(store.get_all_pending_invitations().await.unwrap().len(), 1);

        assert!(store.reserve_invitation_use("ABCD").await.unwrap());
        store
            .record_invitation_claim("ABCD", "bia", "2025-01-02T10:00:00-03:00")
            .await
            .unwrap();
        assert!(store.get_all_pending_invitations().await.unwrap().is_empty());
        assert!(!store.reserve_invitation_use("ABCD").await.unwrap());

        let inv = store.get_invitation("ABCD").await.unwrap().unwrap();
        assert_eq!(inv.use_count, 2);
        assert_eq!(inv.claimed_by(), ["ana", "bia"]);
        assert_eq!(
            store.get_user_claim_date("bia").await.unwrap().as_deref(),
            Some("2025-01-02T10:00:00-03:00")
        );
        assert!(store.get_user_claim_date("carla").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_cannot_exceed_max_uses() {
        let store = store().await;
        store.add_invitation(invitation("SOLO", 1)).await.unwrap();

        let (first, second) = tokio::join!(
            store.reserve_invitation_use("SOLO"),
            store.reserve_invitation_use("SOLO"),
        );
        assert!(first.unwrap() ^ second.unwrap());
        assert_eq!(
            store.get_invitation("SOLO").await.unwrap().unwrap().use_count,
            1
        );

        store.release_invitation_use("SOLO").await.unwrap();
        assert!(store.reserve_invitation_use("SOLO").await.unwrap());
        assert!(!store.reserve_invitation_use("missing").await.unwrap());
    }

    #[tokio::test]
    async fn blocking_twice_keeps_one_row() {
        let store = store().await;
        store.add_blocked_user("ana", BlockReason::Manual).await.unwrap();
        store.add_blocked_user("ana", BlockReason::Expired).await.unwrap();

        let blocked = store.get_blocked_users().await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].block_reason, "expired");
        assert!(store.remove_blocked_user("ana").await.unwrap());
        assert!(!store.remove_blocked_user("ana").await.unwrap());
    }

    #[tokio::test]
    async fn old_pending_payments_are_cleaned() {
        let store = store().await;
        store
            .create_pix_payment("fresh", "ana", 10.0, PaymentProvider::Efi, 1, None)
            .await
            .unwrap();
        store
            .add_manual_payment("ana", 10.0, "Pix", Local::now() - chrono::Duration::days(40))
            .await
            .unwrap();

        // Fresh pending rows and completed rows survive.
        assert_eq!(store.delete_old_pending_payments(3).await.unwrap(), 0);
        assert_eq!(store.get_payments_by_user("ana").await.unwrap().len(), 2);

        assert!(
            store
                .update_pix_payment_status("fresh", PaymentStatus::Completed)
                .await
                .unwrap()
        );
        let payment = store.get_pix_payment("fresh").await.unwrap().unwrap();
        assert_eq!(payment.status, "CONCLUIDA");
    }

    #[tokio::test]
    async fn financial_summary_only_counts_the_requested_month() {
        use chrono::TimeZone;

        let store = store().await;
        let at = |y, m, d, h| Local.with_ymd_and_hms(y, m, d, h, 30, 0).single().unwrap();
        for (date, value) in [
            (at(2025, 1, 31, 23), 1.0),
            (at(2025, 2, 1, 0), 10.0),
            (at(2025, 2, 28, 22), 20.0),
            (at(2025, 3, 1, 8), 100.0),
            (at(2024, 2, 10, 12), 1000.0),
        ] {
            store
                .add_manual_payment("ana", value, "Pix", date)
                .await
                .unwrap();
        }

        let summary = store.get_financial_summary(2025, 2, 7).await.unwrap();
        assert_eq!(summary.sales_count, 2);
        assert!((summary.total_revenue - 30.0).abs() < f64::EPSILON);
        assert_eq!(summary.daily_revenue.keys().copied().collect::<Vec<_>>(), [1, 28]);
    }

    #[tokio::test]
    async fn payment_completion_has_a_single_winner() {
        let store = store().await;
        store
            .create_pix_payment("tx1", "ana", 18.0, PaymentProvider::Efi, 2, None)
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            store.update_pix_payment_status("tx1", PaymentStatus::Completed),
            store.update_pix_payment_status("tx1", PaymentStatus::Completed),
        );
        assert!(first.unwrap() ^ second.unwrap());

        assert!(
            !store
                .update_pix_payment_status("tx1", PaymentStatus::Completed)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_pix_payment_status("missing", PaymentStatus::Completed)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn notifications_track_read_state() {
        let store = store().await;
        store.create_notification("um", "info", None).await.unwrap();
        store.create_notification("dois", "info", None).await.unwrap();

        assert_eq!(store.unread_notification_count().await.unwrap(), 2);
        assert_eq!(store.mark_all_notifications_read().await.unwrap(), 2);
        assert!(store.get_notifications(15, false).await.unwrap().is_empty());
        assert_eq!(store.get_notifications(15, true).await.unwrap().len(), 2);
        assert_eq!(store.delete_all_notifications().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn scheduled_jobs_persist() {
        let store = store().await;
        store
            .save_scheduled_job("trial_end_ana", ScheduledJobKind::TrialEnd, "ana", "2030-01-01T00:00:00Z")
            .await
            .unwrap();
        let jobs = store.list_scheduled_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, "trial_end");
        assert!(store.delete_scheduled_job("trial_end_ana").await.unwrap());
    }
}
