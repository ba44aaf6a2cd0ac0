//! Subscription task scheduler
//!
//! One tokio task per live subscription, tracked in an in-memory table
//! keyed by subscription id. The table is the authority on liveness; the
//! `task_handle` column in the database is a mirror for operators and may
//! be stale after a crash, in which case deploy simply replaces it. Stops
//! are cooperative: the scheduler flips a watch flag and the loop exits at
//! its next checkpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared::entity::subscriptions;
use shared::RunState;

use crate::ledger;
use crate::live;
use crate::service::AppContext;

const MSG_QUEUED: &str = "Queued for execution.";
const MSG_STOPPED_BY_USER: &str = "Stopped by user.";
const MSG_EXPIRED: &str = "Stopped: Subscription expired.";

/// Why a deploy was refused.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeployError {
    #[error("subscription {0} not found")]
    NotFound(i64),

    #[error("subscription {0} is not active")]
    Inactive(i64),

    #[error("subscription {0} has already expired")]
    Expired(i64),

    #[error("subscription {0} already has a live task")]
    AlreadyRunning(i64),
}

/// Pre-flight checks for deploying a subscription.
///
/// `has_live_handle` comes from the in-memory task table. A stale
/// `task_handle` column with no table entry is a crash leftover and does
/// not block deployment.
pub fn ensure_deployable(
    subscription_id: i64,
    subscription: Option<&subscriptions::Model>,
    has_live_handle: bool,
    now: DateTime<Utc>,
) -> Result<(), DeployError> {
    let Some(subscription) = subscription else {
        return Err(DeployError::NotFound(subscription_id));
    };
    if !subscription.is_active {
        return Err(DeployError::Inactive(subscription_id));
    }
    if subscription.expires_at <= now {
        return Err(DeployError::Expired(subscription_id));
    }
    if has_live_handle {
        return Err(DeployError::AlreadyRunning(subscription_id));
    }
    Ok(())
}

/// One live subscription task: its uuid, the cancellation flag and the
/// join handle.
pub struct TaskHandle {
    pub task_id: String,
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// A finished task still parked in the table is a leftover, not a
    /// live run.
    fn is_live(&self) -> bool {
        !self.join.is_finished()
    }
}

pub struct TaskScheduler {
    context: Arc<AppContext>,
    tasks: Arc<RwLock<HashMap<i64, TaskHandle>>>,
}

impl TaskScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn the live loop for a subscription.
    ///
    /// The whole deploy runs under the table's write lock so two
    /// concurrent deploys cannot both pass the pre-flight and spawn.
    pub async fn deploy(&self, subscription_id: i64) -> Result<()> {
        let mut tasks = self.tasks.write().await;

        let has_live_handle = tasks
            .get(&subscription_id)
            .map(TaskHandle::is_live)
            .unwrap_or(false);
        let subscription = ledger::load_subscription(&self.context.db, subscription_id).await?;
        ensure_deployable(subscription_id, subscription.as_ref(), has_live_handle, Utc::now())?;

        let task_id = Uuid::new_v4().to_string();
        ledger::mark_queued(&self.context.db, subscription_id, &task_id, MSG_QUEUED).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(live::run_subscription(
            self.context.clone(),
            subscription_id,
            cancel_rx,
        ));
        let replaced = tasks.insert(
            subscription_id,
            TaskHandle {
                task_id: task_id.clone(),
                cancel: cancel_tx,
                join,
            },
        );
        if let Some(stale) = replaced {
            // Finished long ago, but make sure it can never wake up again
            let _ = stale.cancel.send(true);
        }
        info!(subscription_id, task_id = %task_id, "live task deployed");
        Ok(())
    }

    /// Stop a subscription's live task and put it into the `stopped`
    /// terminal state. Succeeds whether or not a task was running.
    pub async fn stop(&self, subscription_id: i64) -> Result<()> {
        let handle = self.tasks.write().await.remove(&subscription_id);
        if let Some(handle) = handle {
            let _ = handle.cancel.send(true);
            info!(subscription_id, task_id = %handle.task_id, "cancellation sent to live task");
        }
        ledger::deactivate_subscription(
            &self.context.db,
            subscription_id,
            RunState::Stopped,
            MSG_STOPPED_BY_USER,
        )
        .await?;
        Ok(())
    }

    /// Stop every active subscription whose `expires_at` has passed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let expired = subscriptions::Entity::find()
            .filter(subscriptions::Column::IsActive.eq(true))
            .filter(subscriptions::Column::ExpiresAt.lte(Utc::now()))
            .all(&self.context.db)
            .await?;

        let mut swept = 0usize;
        for subscription in expired {
            if let Some(handle) = self.tasks.write().await.remove(&subscription.id) {
                let _ = handle.cancel.send(true);
            }
            ledger::deactivate_subscription(
                &self.context.db,
                subscription.id,
                RunState::Expired,
                MSG_EXPIRED,
            )
            .await?;
            info!(subscription_id = subscription.id, "subscription expired, task stopped");
            swept += 1;
        }
        Ok(swept)
    }

    /// Periodic expiry sweep, spawned once from main.
    pub async fn run_expiry_sweeper(self: Arc<Self>) {
        let period = Duration::from_secs(self.context.config.sweep_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep_expired().await {
                Ok(0) => {}
                Ok(swept) => info!(swept, "expiry sweep stopped expired subscriptions"),
                Err(err) => warn!(%err, "expiry sweep failed"),
            }
        }
    }

    /// Re-deploy the loops a previous process left live. Expired leftovers
    /// are refused by the pre-flight and picked up by the sweep instead.
    pub async fn restore(&self) -> Result<usize> {
        let candidates = subscriptions::Entity::find()
            .filter(subscriptions::Column::IsActive.eq(true))
            .filter(subscriptions::Column::RunState.is_in([
                RunState::Queued.as_str(),
                RunState::Running.as_str(),
            ]))
            .all(&self.context.db)
            .await?;

        let mut restored = 0usize;
        for subscription in candidates {
            match self.deploy(subscription.id).await {
                Ok(()) => restored += 1,
                Err(err) => {
                    warn!(subscription_id = subscription.id, %err, "could not restore live task")
                }
            }
        }
        Ok(restored)
    }

    /// Cancel every live task without touching subscription state, so the
    /// next boot restores them.
    pub async fn shutdown(&self) {
        let handles: Vec<(i64, TaskHandle)> = self.tasks.write().await.drain().collect();
        if handles.is_empty() {
            return;
        }
        for (subscription_id, handle) in &handles {
            let _ = handle.cancel.send(true);
            debug!(subscription_id, "cancellation sent");
        }
        let joins: Vec<JoinHandle<()>> = handles.into_iter().map(|(_, handle)| handle.join).collect();
        let _ = futures::future::join_all(joins).await;
        info!("all live tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;

    fn subscription(is_active: bool, expires_in_hours: i64) -> subscriptions::Model {
        subscriptions::Model {
            id: 11,
            user_id: 1,
            strategy_key: "ema_cross".to_string(),
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            credential_id: 5,
            capital: Decimal::new(1000, 0),
            custom_params: None,
            is_active,
            expires_at: Utc::now() + ChronoDuration::hours(expires_in_hours),
            run_state: "none".to_string(),
            status_message: None,
            task_handle: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn missing_subscription_is_rejected() {
        let err = ensure_deployable(11, None, false, Utc::now()).unwrap_err();
        assert_eq!(err, DeployError::NotFound(11));
    }

    #[test]
    fn inactive_subscription_is_rejected() {
        let sub = subscription(false, 24);
        let err = ensure_deployable(11, Some(&sub), false, Utc::now()).unwrap_err();
        assert_eq!(err, DeployError::Inactive(11));
    }

    #[test]
    fn expired_subscription_is_rejected() {
        let sub = subscription(true, -1);
        let err = ensure_deployable(11, Some(&sub), false, Utc::now()).unwrap_err();
        assert_eq!(err, DeployError::Expired(11));
    }

    #[test]
    fn second_deploy_is_rejected_while_task_lives() {
        let sub = subscription(true, 24);
        let err = ensure_deployable(11, Some(&sub), true, Utc::now()).unwrap_err();
        assert_eq!(err, DeployError::AlreadyRunning(11));
    }

    #[test]
    fn healthy_subscription_deploys() {
        let sub = subscription(true, 24);
        assert!(ensure_deployable(11, Some(&sub), false, Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn finished_join_handle_is_not_live() {
        let (cancel, _rx) = watch::channel(false);
        let mut join = tokio::spawn(async {});
        (&mut join).await.unwrap();
        let handle = TaskHandle {
            task_id: "t".to_string(),
            cancel,
            join,
        };
        assert!(!handle.is_live());
    }
}
