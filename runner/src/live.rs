//! Per-subscription runtime loop
//!
//! One of these runs as its own tokio task per deployed subscription. Each
//! tick it re-reads the subscription row, reconciles exchange-side
//! protective fills, pulls fresh closed candles and hands them to the
//! shared decision kernel, then persists whatever happened and stamps a
//! heartbeat. Cancellation is a watch flag the scheduler flips, checked at
//! the top of the tick and while sleeping. Anything unrecoverable ends the
//! subscription in a terminal state with a readable message.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::EntityTrait;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use engine::data::{trim_forming, Timeframe};
use engine::gateway::ExchangeGateway;
use engine::live::{evaluate_tick, ExecutionConfig, MarketSnapshot};
use engine::strategy::{Params, StrategyError, StrategySettings};
use shared::entity::api_credentials;
use shared::RunState;

use crate::gateway::RestGateway;
use crate::ledger;
use crate::retry::{with_retry, RetryPolicy};
use crate::service::AppContext;

const MSG_EXPIRED_OR_DEACTIVATED: &str = "Stopped: Subscription expired or deactivated.";
const MSG_STRATEGY_NOT_FOUND: &str = "Error: Strategy not found.";
const MSG_CREDENTIALS_NOT_FOUND: &str = "Error: API credentials not found.";
const MSG_DECRYPT_FAILED: &str = "Error: Failed to decrypt API credentials.";

/// Seconds to sleep between ticks.
///
/// Slightly less than the timeframe so the tick lands shortly after the
/// next candle closes, with a floor per unit so tight timeframes still
/// leave the loop room to work.
pub fn tick_sleep_secs(timeframe: Timeframe) -> u64 {
    let secs = timeframe.secs();
    let (lead, floor) = if secs < 3_600 {
        (15, 45)
    } else if secs < 86_400 {
        (300, 3_300)
    } else {
        (3_600, 82_800)
    };
    (secs - lead).max(floor) as u64
}

/// How the loop ended, for logging; the terminal bookkeeping has already
/// been written by whoever ended it.
enum LoopEnd {
    /// The scheduler canceled the task and owns the terminal state.
    Canceled,
    /// The loop wrote its own terminal state and exited.
    Terminal,
}

/// Task body for one live subscription, spawned by the scheduler.
///
/// Never panics its way out: every failure path lands in a terminal
/// run state with a status message before the task finishes.
pub async fn run_subscription(
    context: Arc<AppContext>,
    subscription_id: i64,
    mut cancel: watch::Receiver<bool>,
) {
    info!(subscription_id, "live loop starting");
    match drive(&context, subscription_id, &mut cancel).await {
        Ok(LoopEnd::Canceled) => debug!(subscription_id, "live loop canceled"),
        Ok(LoopEnd::Terminal) => debug!(subscription_id, "live loop reached terminal state"),
        Err(err) => {
            let message = format!("Error: {err:#}");
            error!(subscription_id, message = message.as_str(), "live loop failed");
            if let Err(db_err) = ledger::deactivate_subscription(
                &context.db,
                subscription_id,
                RunState::Error,
                &message,
            )
            .await
            {
                error!(subscription_id, %db_err, "failed to record loop error");
            }
        }
    }
}

async fn drive(
    context: &AppContext,
    subscription_id: i64,
    cancel: &mut watch::Receiver<bool>,
) -> Result<LoopEnd> {
    let db = &context.db;

    let Some(subscription) = ledger::load_subscription(db, subscription_id).await? else {
        warn!(subscription_id, "subscription row vanished before the loop started");
        return Ok(LoopEnd::Terminal);
    };
    if !subscription.is_active || subscription.expires_at <= Utc::now() {
        ledger::deactivate_subscription(
            db,
            subscription_id,
            RunState::Expired,
            MSG_EXPIRED_OR_DEACTIVATED,
        )
        .await?;
        return Ok(LoopEnd::Terminal);
    }

    let timeframe: Timeframe = subscription
        .timeframe
        .parse()
        .with_context(|| format!("subscription {} timeframe", subscription_id))?;
    let capital = ledger::to_f64(&subscription.capital);
    let settings = StrategySettings::new(&subscription.symbol, timeframe, capital);
    let overrides: Params = match &subscription.custom_params {
        Some(json) => json.as_object().cloned().unwrap_or_default(),
        None => Params::new(),
    };

    // A dropped registry key or bad params are permanent; stop here
    // instead of erroring every tick.
    let mut strategy = match context
        .registry
        .create(&subscription.strategy_key, settings, &overrides)
    {
        Ok(strategy) => strategy,
        Err(StrategyError::UnknownStrategy(key)) => {
            warn!(subscription_id, key = key.as_str(), "strategy key not in registry");
            ledger::deactivate_subscription(
                db,
                subscription_id,
                RunState::Error,
                MSG_STRATEGY_NOT_FOUND,
            )
            .await?;
            return Ok(LoopEnd::Terminal);
        }
        Err(err @ StrategyError::InvalidParam { .. }) => {
            let message = format!("Error: {err}");
            ledger::deactivate_subscription(db, subscription_id, RunState::Error, &message)
                .await?;
            return Ok(LoopEnd::Terminal);
        }
    };

    let credential = api_credentials::Entity::find_by_id(subscription.credential_id)
        .one(db)
        .await?;
    let Some(credential) = credential else {
        ledger::deactivate_subscription(
            db,
            subscription_id,
            RunState::Error,
            MSG_CREDENTIALS_NOT_FOUND,
        )
        .await?;
        return Ok(LoopEnd::Terminal);
    };
    let credentials = match context.cipher.open(&credential.encrypted_payload) {
        Ok(credentials) => credentials,
        Err(err) => {
            warn!(subscription_id, %err, "credential payload failed to decrypt");
            ledger::deactivate_subscription(
                db,
                subscription_id,
                RunState::Error,
                MSG_DECRYPT_FAILED,
            )
            .await?;
            return Ok(LoopEnd::Terminal);
        }
    };
    let gateway = RestGateway::with_credentials(&context.config.exchange_api_url, credentials);

    ledger::mark_running(db, subscription_id).await?;
    info!(
        subscription_id,
        strategy = subscription.strategy_key.as_str(),
        symbol = subscription.symbol.as_str(),
        timeframe = %timeframe,
        "live loop running"
    );

    let execution = ExecutionConfig::default();
    let retry = RetryPolicy::default();
    let candle_limit = context.config.candle_fetch_limit;
    let sleep_secs = tick_sleep_secs(timeframe);
    let symbol = subscription.symbol.clone();

    loop {
        if *cancel.borrow() {
            return Ok(LoopEnd::Canceled);
        }

        // Re-read the row every tick; stops, edits and expiry from
        // outside the loop land here.
        let Some(current) = ledger::load_subscription(db, subscription_id).await? else {
            warn!(subscription_id, "subscription row deleted, exiting loop");
            return Ok(LoopEnd::Terminal);
        };
        if !current.is_active || current.expires_at <= Utc::now() {
            if *cancel.borrow() {
                // stop() deactivated the row and wrote its own message
                return Ok(LoopEnd::Canceled);
            }
            let state = if current.expires_at <= Utc::now() {
                RunState::Expired
            } else {
                RunState::Stopped
            };
            ledger::deactivate_subscription(db, subscription_id, state, MSG_EXPIRED_OR_DEACTIVATED)
                .await?;
            return Ok(LoopEnd::Terminal);
        }

        // Protective orders may have filled while we slept
        let mut open_position = ledger::find_open_position(db, subscription_id).await?;
        if let Some(position) = &open_position {
            let open_orders = with_retry(retry, "open order fetch", || {
                gateway.fetch_open_orders(&symbol)
            })
            .await?;
            let exchange_open_ids: HashSet<String> =
                open_orders.into_iter().map(|order| order.id).collect();
            if let Some(reason) =
                ledger::reconcile(db, &gateway, position, &exchange_open_ids).await?
            {
                info!(subscription_id, reason = reason.as_str(), "position closed by reconciliation");
                open_position = None;
            }
        }

        let snapshot = fetch_snapshot(
            &gateway,
            &symbol,
            timeframe,
            strategy.aux_timeframe(),
            candle_limit,
            retry,
        )
        .await?;

        let view = match &open_position {
            Some(model) => Some(ledger::position_view(model)?),
            None => None,
        };
        let events =
            evaluate_tick(strategy.as_mut(), &snapshot, view.as_ref(), &gateway, &execution)
                .await?;
        if !events.is_empty() {
            ledger::persist_events(
                db,
                subscription_id,
                open_position.as_ref().map(|position| position.id),
                &events,
            )
            .await?;
        }

        ledger::heartbeat(db, subscription_id).await?;

        // Interruptible sleep: stop() flips the flag and we wake at once
        tokio::select! {
            _ = sleep(Duration::from_secs(sleep_secs)) => {}
            _ = cancel.changed() => {}
        }
    }
}

/// Closed base-timeframe candles plus the closed aux series when the
/// strategy wants one, both fetched with bounded retry and trimmed of the
/// still-forming bar.
async fn fetch_snapshot(
    gateway: &RestGateway,
    symbol: &str,
    timeframe: Timeframe,
    aux_timeframe: Option<Timeframe>,
    limit: usize,
    retry: RetryPolicy,
) -> Result<MarketSnapshot> {
    let now = Utc::now();
    let candles = with_retry(retry, "candle fetch", || {
        gateway.fetch_candles(symbol, timeframe, None, limit)
    })
    .await?;
    let candles = trim_forming(&candles, timeframe, now).to_vec();

    let snapshot = match aux_timeframe {
        Some(aux) => {
            let aux_candles = with_retry(retry, "aux candle fetch", || {
                gateway.fetch_candles(symbol, aux, None, limit)
            })
            .await?;
            let aux_candles = trim_forming(&aux_candles, aux, now).to_vec();
            MarketSnapshot::with_aux(candles, aux_candles)
        }
        None => MarketSnapshot::new(candles),
    };
    Ok(snapshot)
}
