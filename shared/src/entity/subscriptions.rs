//! `SeaORM` Entity, @generated manually

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub strategy_key: String,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
    pub credential_id: i64,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub capital: Decimal,
    #[sea_orm(column_type = "Json", nullable)]
    pub custom_params: Option<Json>,
    pub is_active: bool,
    pub expires_at: DateTimeUtc,
    pub run_state: String, // see shared::run_state::RunState
    #[sea_orm(column_type = "Text", nullable)]
    pub status_message: Option<String>,
    pub task_handle: Option<String>, // uuid of the live task, if any
    pub created_at: Option<DateTimeUtc>,
    pub updated_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::api_credentials::Entity",
        from = "Column::CredentialId",
        to = "super::api_credentials::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    ApiCredentials,
    #[sea_orm(has_many = "super::positions::Entity")]
    Positions,
    #[sea_orm(has_many = "super::orders::Entity")]
    Orders,
}

impl Related<super::api_credentials::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApiCredentials.def()
    }
}

impl Related<super::positions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Positions.def()
    }
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
