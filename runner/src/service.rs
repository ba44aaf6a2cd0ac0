//! Engine facade
//!
//! One `EngineService` is built at startup and shared behind `Arc`. Callers
//! (the daemon today, an API layer later) go through it instead of touching
//! the scheduler, ledger or backtest worker directly.

use std::sync::Arc;

use anyhow::Result;
use sea_orm::DatabaseConnection;

use engine::strategy::StrategyRegistry;
use shared::entity::backtest_runs;
use shared::{Config, CredentialCipher, RunState};

use crate::backtest::{self, BacktestRequest};
use crate::ledger;
use crate::scheduler::TaskScheduler;

/// Shared handles every task in the runner needs.
pub struct AppContext {
    pub db: DatabaseConnection,
    pub registry: StrategyRegistry,
    pub cipher: CredentialCipher,
    pub config: Config,
}

/// Run state and operator-facing message of one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionStatus {
    pub run_state: RunState,
    pub status_message: Option<String>,
}

pub struct EngineService {
    context: Arc<AppContext>,
    scheduler: Arc<TaskScheduler>,
}

impl EngineService {
    pub fn new(context: Arc<AppContext>) -> Self {
        let scheduler = Arc::new(TaskScheduler::new(context.clone()));
        Self { context, scheduler }
    }

    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        self.scheduler.clone()
    }

    /// Start the live loop for a subscription.
    pub async fn deploy(&self, subscription_id: i64) -> Result<()> {
        self.scheduler.deploy(subscription_id).await
    }

    /// Cancel the live loop and deactivate the subscription.
    pub async fn stop(&self, subscription_id: i64) -> Result<()> {
        self.scheduler.stop(subscription_id).await
    }

    /// Current run state and status message, straight from the ledger.
    pub async fn status(&self, subscription_id: i64) -> Result<SubscriptionStatus> {
        let subscription = ledger::load_subscription(&self.context.db, subscription_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("subscription {} not found", subscription_id))?;
        let run_state = subscription
            .run_state
            .parse()
            .unwrap_or(RunState::None);
        Ok(SubscriptionStatus {
            run_state,
            status_message: subscription.status_message,
        })
    }

    /// Queue a backtest and return its run id.
    pub async fn request_backtest(&self, request: BacktestRequest) -> Result<u64> {
        backtest::request_backtest(self.context.clone(), request).await
    }

    /// Fetch a backtest row, metrics included once the run is terminal.
    pub async fn backtest_result(&self, run_id: u64) -> Result<Option<backtest_runs::Model>> {
        backtest::backtest_result(&self.context.db, run_id).await
    }
}
