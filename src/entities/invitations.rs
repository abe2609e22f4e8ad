use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "invitations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String,

    /// JSON array of library titles shared on claim.
    pub libraries: String,

    pub screen_limit: i32,

    pub allow_downloads: bool,

    pub created_at: String,

    pub expires_at: Option<String>,

    /// JSON array of the usernames that claimed this code.
    pub claimed_by_users: String,

    pub last_claimed_at: Option<String>,

    pub trial_duration_minutes: i32,

    pub overseerr_access: bool,

    pub max_uses: i32,

    pub use_count: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
