pub use sea_orm_migration::prelude::*;

mod m20260815_000001_create_credentials_and_subscriptions;
mod m20260815_000002_create_positions_and_orders;
mod m20260815_000003_create_backtest_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260815_000001_create_credentials_and_subscriptions::Migration),
            Box::new(m20260815_000002_create_positions_and_orders::Migration),
            Box::new(m20260815_000003_create_backtest_runs::Migration),
        ]
    }
}
