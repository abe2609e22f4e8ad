use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "pix_payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub txid: String,

    pub username: String,

    pub value: f64,

    /// `ATIVA` until confirmed, then `CONCLUIDA`.
    pub status: String,

    /// `EFI`, `MERCADOPAGO` or `Manual`
    pub provider: String,

    pub created_at: String,

    pub screens: i32,

    #[sea_orm(unique)]
    pub external_reference: Option<String>,

    pub description: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
