use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BacktestRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(BacktestRuns::Id).big_unsigned().auto_increment().primary_key())
                    .col(ColumnDef::new(BacktestRuns::UserId).big_integer().not_null())
                    .col(ColumnDef::new(BacktestRuns::StrategyKey).string().not_null())
                    .col(ColumnDef::new(BacktestRuns::Symbol).string().not_null())
                    .col(ColumnDef::new(BacktestRuns::Timeframe).string().not_null())
                    .col(ColumnDef::new(BacktestRuns::StartDate).timestamp().not_null())
                    .col(ColumnDef::new(BacktestRuns::EndDate).timestamp().not_null())
                    .col(ColumnDef::new(BacktestRuns::Capital).decimal_len(20, 8).not_null())
                    .col(ColumnDef::new(BacktestRuns::Params).json().null())
                    .col(ColumnDef::new(BacktestRuns::Status).string().not_null().default("queued")) // "queued", "running", "completed", "failed", "no_data"
                    .col(ColumnDef::new(BacktestRuns::Pnl).decimal_len(20, 8).null())
                    .col(ColumnDef::new(BacktestRuns::PnlPct).decimal_len(10, 4).null())
                    .col(ColumnDef::new(BacktestRuns::Sharpe).decimal_len(10, 4).null())
                    .col(ColumnDef::new(BacktestRuns::MaxDrawdownPct).decimal_len(10, 4).null())
                    .col(ColumnDef::new(BacktestRuns::TotalTrades).integer().null())
                    .col(ColumnDef::new(BacktestRuns::WinningTrades).integer().null())
                    .col(ColumnDef::new(BacktestRuns::LosingTrades).integer().null())
                    .col(ColumnDef::new(BacktestRuns::TradesJson).json().null())
                    .col(ColumnDef::new(BacktestRuns::EquityJson).json().null())
                    .col(ColumnDef::new(BacktestRuns::Error).text().null())
                    .col(ColumnDef::new(BacktestRuns::CreatedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .col(ColumnDef::new(BacktestRuns::FinishedAt).timestamp().null())
                    .index(
                        Index::create()
                            .name("idx_backtests_user_status")
                            .table(BacktestRuns::Table)
                            .col(BacktestRuns::UserId)
                            .col(BacktestRuns::Status)
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BacktestRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BacktestRuns {
    Table,
    Id,
    UserId,
    StrategyKey,
    Symbol,
    Timeframe,
    StartDate,
    EndDate,
    Capital,
    Params,
    Status,
    Pnl,
    PnlPct,
    Sharpe,
    MaxDrawdownPct,
    TotalTrades,
    WinningTrades,
    LosingTrades,
    TradesJson,
    EquityJson,
    Error,
    CreatedAt,
    FinishedAt,
}
