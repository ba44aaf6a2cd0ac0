//! `SeaORM` Entity, @generated manually

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "backtest_runs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: u64,
    pub user_id: i64,
    pub strategy_key: String,
    pub symbol: String,
    pub timeframe: String,
    pub start_date: DateTimeUtc,
    pub end_date: DateTimeUtc,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub capital: Decimal,
    #[sea_orm(column_type = "Json", nullable)]
    pub params: Option<Json>,
    pub status: String, // "queued", "running", "completed", "failed", "no_data"
    #[sea_orm(column_type = "Decimal(Some((20, 8)))", nullable)]
    pub pnl: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((10, 4)))", nullable)]
    pub pnl_pct: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((10, 4)))", nullable)]
    pub sharpe: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((10, 4)))", nullable)]
    pub max_drawdown_pct: Option<Decimal>,
    pub total_trades: Option<i32>,
    pub winning_trades: Option<i32>,
    pub losing_trades: Option<i32>,
    #[sea_orm(column_type = "Json", nullable)]
    pub trades_json: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub equity_json: Option<Json>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    pub created_at: Option<DateTimeUtc>,
    pub finished_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
