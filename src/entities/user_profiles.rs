use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Default, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,

    pub name: Option<String>,

    pub telegram_user: Option<String>,

    pub phone_number: Option<String>,

    pub discord_user_id: Option<String>,

    pub expiration_date: Option<String>,

    pub last_notification_sent: Option<String>,

    pub trial_end_date: Option<String>,

    pub trial_job_id: Option<String>,

    pub expiration_job_id: Option<String>,

    pub overseerr_access: bool,

    /// Concurrent streams allowed, 0 means unlimited.
    pub screen_limit: i32,

    pub allow_downloads: bool,

    pub hide_from_leaderboard: bool,

    /// JSON array of library titles, cached from Plex.
    pub libraries: Option<String>,

    #[sea_orm(unique)]
    pub payment_token: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
