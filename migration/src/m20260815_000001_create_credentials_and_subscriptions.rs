use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiCredentials::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ApiCredentials::Id).big_integer().auto_increment().primary_key())
                    .col(ColumnDef::new(ApiCredentials::UserId).big_integer().not_null())
                    .col(ColumnDef::new(ApiCredentials::Exchange).string().not_null()) // "binance", "okx"
                    .col(ColumnDef::new(ApiCredentials::Label).string().null())
                    .col(ColumnDef::new(ApiCredentials::EncryptedPayload).text().not_null()) // AES-GCM sealed key/secret blob
                    .col(ColumnDef::new(ApiCredentials::CreatedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .index(
                        Index::create()
                            .name("idx_credentials_user")
                            .table(ApiCredentials::Table)
                            .col(ApiCredentials::UserId)
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Subscriptions::Id).big_integer().auto_increment().primary_key())
                    .col(ColumnDef::new(Subscriptions::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Subscriptions::StrategyKey).string().not_null()) // registry key, e.g. "ema_cross"
                    .col(ColumnDef::new(Subscriptions::Exchange).string().not_null())
                    .col(ColumnDef::new(Subscriptions::Symbol).string().not_null()) // "BTCUSDT"
                    .col(ColumnDef::new(Subscriptions::Timeframe).string().not_null()) // "1m", "5m", "1h", etc.
                    .col(ColumnDef::new(Subscriptions::CredentialId).big_integer().not_null())
                    .col(ColumnDef::new(Subscriptions::Capital).decimal_len(20, 8).not_null())
                    .col(ColumnDef::new(Subscriptions::CustomParams).json().null())
                    .col(ColumnDef::new(Subscriptions::IsActive).boolean().not_null().default(true))
                    .col(ColumnDef::new(Subscriptions::ExpiresAt).timestamp().not_null())
                    .col(ColumnDef::new(Subscriptions::RunState).string().not_null().default("none")) // "none", "queued", "running", "stopped", "expired", "error"
                    .col(ColumnDef::new(Subscriptions::StatusMessage).text().null())
                    .col(ColumnDef::new(Subscriptions::TaskHandle).string().null()) // UUID of the owning runtime task
                    .col(ColumnDef::new(Subscriptions::CreatedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP")))
                    .col(ColumnDef::new(Subscriptions::UpdatedAt).timestamp().default(Expr::cust("CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP")))
                    .index(
                        Index::create()
                            .name("idx_subscriptions_user_active")
                            .table(Subscriptions::Table)
                            .col(Subscriptions::UserId)
                            .col(Subscriptions::IsActive)
                    )
                    .index(
                        Index::create()
                            .name("idx_subscriptions_run_state")
                            .table(Subscriptions::Table)
                            .col(Subscriptions::RunState)
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_credential")
                            .from(Subscriptions::Table, Subscriptions::CredentialId)
                            .to(ApiCredentials::Table, ApiCredentials::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ApiCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ApiCredentials {
    Table,
    Id,
    UserId,
    Exchange,
    Label,
    EncryptedPayload,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    UserId,
    StrategyKey,
    Exchange,
    Symbol,
    Timeframe,
    CredentialId,
    Capital,
    CustomParams,
    IsActive,
    ExpiresAt,
    RunState,
    StatusMessage,
    TaskHandle,
    CreatedAt,
    UpdatedAt,
}
