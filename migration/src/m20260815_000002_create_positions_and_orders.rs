use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Positions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Positions::Id).big_unsigned().auto_increment().primary_key())
                    .col(ColumnDef::new(Positions::SubscriptionId).big_integer().not_null())
                    .col(ColumnDef::new(Positions::Symbol).string().not_null())
                    .col(ColumnDef::new(Positions::Side).string().not_null()) // "long" or "short"
                    .col(ColumnDef::new(Positions::EntryPrice).decimal_len(20, 8).not_null()) // average entry across fills
                    .col(ColumnDef::new(Positions::Size).decimal_len(20, 8).not_null())
                    .col(ColumnDef::new(Positions::StopLossPrice).decimal_len(20, 8).null())
                    .col(ColumnDef::new(Positions::TakeProfitPrice).decimal_len(20, 8).null())
                    .col(ColumnDef::new(Positions::Status).string().not_null().default("open")) // "open", "closed"
                    .col(ColumnDef::new(Positions::RealizedPnl).decimal_len(20, 8).null())
                    .col(ColumnDef::new(Positions::CloseReason).string().null()) // "SL", "TP", "TSL", "Signal", ...
                    .col(ColumnDef::new(Positions::StateJson).json().null()) // tagged strategy state blob
                    .col(ColumnDef::new(Positions::OpenedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .col(ColumnDef::new(Positions::ClosedAt).timestamp().null())
                    .col(ColumnDef::new(Positions::CreatedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .col(ColumnDef::new(Positions::UpdatedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP")))
                    .index(
                        Index::create()
                            .name("idx_positions_sub_status")
                            .table(Positions::Table)
                            .col(Positions::SubscriptionId)
                            .col(Positions::Status)
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_positions_subscription")
                            .from(Positions::Table, Positions::SubscriptionId)
                            .to(Subscriptions::Table, Subscriptions::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).big_unsigned().auto_increment().primary_key())
                    .col(ColumnDef::new(Orders::SubscriptionId).big_integer().not_null())
                    .col(ColumnDef::new(Orders::PositionId).big_unsigned().null())
                    .col(ColumnDef::new(Orders::ExchangeOrderId).string().not_null())
                    .col(ColumnDef::new(Orders::Role).string().not_null()) // "entry", "exit", "stop_loss", "take_profit", "safety"
                    .col(ColumnDef::new(Orders::OrderType).string().not_null()) // "market", "limit", "stop_market"
                    .col(ColumnDef::new(Orders::Side).string().not_null()) // "buy" or "sell"
                    .col(ColumnDef::new(Orders::Amount).decimal_len(20, 8).not_null())
                    .col(ColumnDef::new(Orders::Price).decimal_len(20, 8).null())
                    .col(ColumnDef::new(Orders::StopPrice).decimal_len(20, 8).null())
                    .col(ColumnDef::new(Orders::Filled).decimal_len(20, 8).not_null().default(0.0))
                    .col(ColumnDef::new(Orders::Status).string().not_null().default("open")) // "open", "filled", "canceled", "rejected"
                    .col(ColumnDef::new(Orders::CreatedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .col(ColumnDef::new(Orders::UpdatedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP")))
                    .index(
                        Index::create()
                            .name("idx_orders_subscription")
                            .table(Orders::Table)
                            .col(Orders::SubscriptionId)
                    )
                    .index(
                        Index::create()
                            .name("idx_orders_exchange_id")
                            .table(Orders::Table)
                            .col(Orders::ExchangeOrderId)
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_orders_subscription")
                            .from(Orders::Table, Orders::SubscriptionId)
                            .to(Subscriptions::Table, Subscriptions::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_orders_position")
                            .from(Orders::Table, Orders::PositionId)
                            .to(Positions::Table, Positions::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Positions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Positions {
    Table,
    Id,
    SubscriptionId,
    Symbol,
    Side,
    EntryPrice,
    Size,
    StopLossPrice,
    TakeProfitPrice,
    Status,
    RealizedPnl,
    CloseReason,
    StateJson,
    OpenedAt,
    ClosedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    SubscriptionId,
    PositionId,
    ExchangeOrderId,
    Role,
    OrderType,
    Side,
    Amount,
    Price,
    StopPrice,
    Filled,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
}
