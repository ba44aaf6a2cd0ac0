//! Strategy execution daemon
//!
//! Boots the database, restores live subscriptions that were queued or
//! running when the process last stopped, starts the expiry sweeper and
//! waits for ctrl-c. Deploys, stops and backtest requests go through
//! [`service::EngineService`].

use std::sync::Arc;

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use tracing::info;

use engine::strategy::StrategyRegistry;
use shared::{get_db_connection, Config, CredentialCipher};

mod backtest;
mod gateway;
mod ledger;
mod live;
mod retry;
mod scheduler;
mod service;

use service::{AppContext, EngineService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let git_branch = option_env!("GIT_BRANCH").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    info!(git_hash, git_branch, build_time, "starting strategy runner");

    let config = Config::from_env()?;
    let db = get_db_connection(&config.database_url).await?;
    Migrator::up(&db, None).await?;
    info!("database ready");

    let cipher = CredentialCipher::new(&config.credential_master_key);
    let context = Arc::new(AppContext {
        db,
        registry: StrategyRegistry::builtin(),
        cipher,
        config,
    });
    let service = EngineService::new(context);

    let scheduler = service.scheduler();
    let restored = scheduler.restore().await?;
    info!(restored, "live subscriptions restored");

    tokio::spawn(scheduler.clone().run_expiry_sweeper());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping live loops");
    scheduler.shutdown().await;
    info!("runner stopped");

    Ok(())
}
