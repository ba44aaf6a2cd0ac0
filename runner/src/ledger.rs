//! Persistent position and order ledger
//!
//! Every trade the live loop makes lands here as sea-orm writes: position
//! rows (at most one open per subscription) and an append-only order audit
//! trail, plus the subscription state columns the scheduler and runtime
//! loop share. Engine math stays in `f64`; conversion to `Decimal` happens
//! at this boundary. Reconciliation folds exchange-side protective fills
//! (stop or target orders that vanished from the open set) back into
//! ledger closes at the level the order was resting at.

use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{debug, info, warn};

use engine::gateway::{ExchangeGateway, ExchangeOrder, GatewayError, OrderType};
use engine::live::{realized_pnl, PositionEvent};
use engine::strategy::{PositionView, StrategyState, TradeSide};
use shared::entity::{orders, positions, subscriptions};
use shared::RunState;

pub const ROLE_ENTRY: &str = "entry";
pub const ROLE_EXIT: &str = "exit";
pub const ROLE_STOP_LOSS: &str = "stop_loss";
pub const ROLE_TAKE_PROFIT: &str = "take_profit";
pub const ROLE_SAFETY: &str = "safety";

const POSITION_OPEN: &str = "open";
const POSITION_CLOSED: &str = "closed";
const ORDER_OPEN: &str = "open";
const ORDER_FILLED: &str = "filled";
const ORDER_CANCELED: &str = "canceled";

/// Close reason recorded when a resting stop order is assumed filled.
pub const CLOSE_STOP_LOSS_HIT: &str = "Stop Loss Hit";
/// Close reason recorded when a resting take-profit order is assumed filled.
pub const CLOSE_TAKE_PROFIT_HIT: &str = "Take Profit Hit";

/// `f64` to the decimal(20,8) column type, via the string form so binary
/// float noise never reaches the database.
pub(crate) fn to_decimal(value: f64) -> Decimal {
    Decimal::from_str(&value.to_string()).unwrap_or_else(|_| Decimal::ZERO)
}

pub(crate) fn to_f64(value: &Decimal) -> f64 {
    f64::from_str(&value.to_string()).unwrap_or(0.0)
}

fn opt_decimal(value: Option<f64>) -> Option<Decimal> {
    value.map(to_decimal)
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

pub async fn load_subscription(
    db: &DatabaseConnection,
    subscription_id: i64,
) -> Result<Option<subscriptions::Model>> {
    let subscription = subscriptions::Entity::find_by_id(subscription_id)
        .one(db)
        .await?;
    Ok(subscription)
}

/// Bind a freshly spawned task to the subscription: `queued` state, the
/// task uuid in `task_handle`, and the queued status message.
pub async fn mark_queued(
    db: &DatabaseConnection,
    subscription_id: i64,
    task_id: &str,
    message: &str,
) -> Result<()> {
    let subscription = subscriptions::Entity::find_by_id(subscription_id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("subscription {} not found", subscription_id))?;

    let mut update: subscriptions::ActiveModel = subscription.into();
    update.run_state = ActiveValue::Set(RunState::Queued.as_str().to_string());
    update.status_message = ActiveValue::Set(Some(message.to_string()));
    update.task_handle = ActiveValue::Set(Some(task_id.to_string()));
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    subscriptions::Entity::update(update).exec(db).await?;
    Ok(())
}

/// First thing the live loop does once it is actually running.
pub async fn mark_running(db: &DatabaseConnection, subscription_id: i64) -> Result<()> {
    let subscription = subscriptions::Entity::find_by_id(subscription_id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("subscription {} not found", subscription_id))?;

    let mut update: subscriptions::ActiveModel = subscription.into();
    update.run_state = ActiveValue::Set(RunState::Running.as_str().to_string());
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    subscriptions::Entity::update(update).exec(db).await?;
    Ok(())
}

/// Per-tick liveness stamp on the status message column.
pub async fn heartbeat(db: &DatabaseConnection, subscription_id: i64) -> Result<()> {
    let subscription = subscriptions::Entity::find_by_id(subscription_id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("subscription {} not found", subscription_id))?;

    let message = format!("Running - Last cycle check: {}", Utc::now().to_rfc3339());
    let mut update: subscriptions::ActiveModel = subscription.into();
    update.status_message = ActiveValue::Set(Some(message));
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    subscriptions::Entity::update(update).exec(db).await?;
    Ok(())
}

/// Put the subscription into a terminal state: deactivated, handle
/// cleared, run state and human-readable message set. Used by user stops,
/// the expiry sweep and the loop's own error exits alike.
pub async fn deactivate_subscription(
    db: &DatabaseConnection,
    subscription_id: i64,
    state: RunState,
    message: &str,
) -> Result<()> {
    let subscription = subscriptions::Entity::find_by_id(subscription_id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("subscription {} not found", subscription_id))?;

    let mut update: subscriptions::ActiveModel = subscription.into();
    update.is_active = ActiveValue::Set(false);
    update.run_state = ActiveValue::Set(state.as_str().to_string());
    update.status_message = ActiveValue::Set(Some(message.to_string()));
    update.task_handle = ActiveValue::Set(None);
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    subscriptions::Entity::update(update).exec(db).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

pub async fn find_open_position(
    db: &DatabaseConnection,
    subscription_id: i64,
) -> Result<Option<positions::Model>> {
    let position = positions::Entity::find()
        .filter(positions::Column::SubscriptionId.eq(subscription_id))
        .filter(positions::Column::Status.eq(POSITION_OPEN))
        .one(db)
        .await?;
    Ok(position)
}

/// Decode a position row into the engine's view of it.
///
/// A state blob that no longer deserializes is dropped with a warning
/// rather than failing the subscription; the stop/target columns still
/// carry the hard risk limits.
pub fn position_view(model: &positions::Model) -> Result<PositionView> {
    let side: TradeSide = model
        .side
        .parse()
        .with_context(|| format!("position {} has a bad side column", model.id))?;
    let state: Option<StrategyState> = match &model.state_json {
        Some(json) => match serde_json::from_value(json.clone()) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(position_id = model.id, %err, "dropping undecodable strategy state");
                None
            }
        },
        None => None,
    };
    Ok(PositionView {
        side,
        entry_price: to_f64(&model.entry_price),
        size: to_f64(&model.size),
        stop_loss: model.stop_loss_price.as_ref().map(to_f64),
        take_profit: model.take_profit_price.as_ref().map(to_f64),
        opened_at: model.opened_at.unwrap_or_else(Utc::now),
        state,
    })
}

pub async fn open_position(
    db: &DatabaseConnection,
    subscription_id: i64,
    symbol: &str,
    view: &PositionView,
) -> Result<u64> {
    let state_json = match &view.state {
        Some(state) => Some(serde_json::to_value(state)?),
        None => None,
    };
    let position = positions::ActiveModel {
        subscription_id: ActiveValue::Set(subscription_id),
        symbol: ActiveValue::Set(symbol.to_string()),
        side: ActiveValue::Set(view.side.as_str().to_string()),
        entry_price: ActiveValue::Set(to_decimal(view.entry_price)),
        size: ActiveValue::Set(to_decimal(view.size)),
        stop_loss_price: ActiveValue::Set(opt_decimal(view.stop_loss)),
        take_profit_price: ActiveValue::Set(opt_decimal(view.take_profit)),
        status: ActiveValue::Set(POSITION_OPEN.to_string()),
        realized_pnl: ActiveValue::Set(None),
        close_reason: ActiveValue::Set(None),
        state_json: ActiveValue::Set(state_json),
        opened_at: ActiveValue::Set(Some(view.opened_at)),
        closed_at: ActiveValue::Set(None),
        created_at: ActiveValue::Set(Some(Utc::now())),
        updated_at: ActiveValue::Set(Some(Utc::now())),
        ..Default::default()
    };
    let result = positions::Entity::insert(position).exec(db).await?;
    Ok(result.last_insert_id)
}

/// Re-average the open position after a safety fill. Stop, target and
/// state only change when the event carries a new value.
pub async fn amend_position(
    db: &DatabaseConnection,
    position_id: u64,
    entry_price: f64,
    size: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    state: Option<&StrategyState>,
) -> Result<()> {
    let position = open_position_row(db, position_id).await?;

    let mut update: positions::ActiveModel = position.into();
    update.entry_price = ActiveValue::Set(to_decimal(entry_price));
    update.size = ActiveValue::Set(to_decimal(size));
    if let Some(stop) = stop_loss {
        update.stop_loss_price = ActiveValue::Set(Some(to_decimal(stop)));
    }
    if let Some(target) = take_profit {
        update.take_profit_price = ActiveValue::Set(Some(to_decimal(target)));
    }
    if let Some(state) = state {
        update.state_json = ActiveValue::Set(Some(serde_json::to_value(state)?));
    }
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    positions::Entity::update(update).exec(db).await?;
    Ok(())
}

/// Move the stop or replace the persisted state blob without trading.
pub async fn update_position_state(
    db: &DatabaseConnection,
    position_id: u64,
    stop_loss: Option<f64>,
    state: Option<&StrategyState>,
) -> Result<()> {
    let position = open_position_row(db, position_id).await?;

    let mut update: positions::ActiveModel = position.into();
    if let Some(stop) = stop_loss {
        update.stop_loss_price = ActiveValue::Set(Some(to_decimal(stop)));
    }
    if let Some(state) = state {
        update.state_json = ActiveValue::Set(Some(serde_json::to_value(state)?));
    }
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    positions::Entity::update(update).exec(db).await?;
    Ok(())
}

/// Book a partial close: shrink the size, accumulate realized pnl, ratchet
/// the stop when the event carries one. The row stays open.
pub async fn reduce_position(
    db: &DatabaseConnection,
    position_id: u64,
    remaining_size: f64,
    pnl_delta: f64,
    stop_loss: Option<f64>,
    state: Option<&StrategyState>,
) -> Result<()> {
    let position = open_position_row(db, position_id).await?;
    let realized = position.realized_pnl.unwrap_or(Decimal::ZERO) + to_decimal(pnl_delta);

    let mut update: positions::ActiveModel = position.into();
    update.size = ActiveValue::Set(to_decimal(remaining_size));
    update.realized_pnl = ActiveValue::Set(Some(realized));
    if let Some(stop) = stop_loss {
        update.stop_loss_price = ActiveValue::Set(Some(to_decimal(stop)));
    }
    if let Some(state) = state {
        update.state_json = ActiveValue::Set(Some(serde_json::to_value(state)?));
    }
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    positions::Entity::update(update).exec(db).await?;
    Ok(())
}

/// Close the position: terminal status, exit bookkeeping, pnl accumulated
/// on top of whatever partial closes already booked.
pub async fn close_position(
    db: &DatabaseConnection,
    position_id: u64,
    exit_price: f64,
    pnl: f64,
    reason: &str,
) -> Result<()> {
    let position = open_position_row(db, position_id).await?;
    let realized = position.realized_pnl.unwrap_or(Decimal::ZERO) + to_decimal(pnl);
    debug!(position_id, exit_price, pnl, reason, "closing position row");

    let mut update: positions::ActiveModel = position.into();
    update.status = ActiveValue::Set(POSITION_CLOSED.to_string());
    update.realized_pnl = ActiveValue::Set(Some(realized));
    update.close_reason = ActiveValue::Set(Some(reason.to_string()));
    update.closed_at = ActiveValue::Set(Some(Utc::now()));
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    positions::Entity::update(update).exec(db).await?;
    Ok(())
}

async fn open_position_row(
    db: &DatabaseConnection,
    position_id: u64,
) -> Result<positions::Model> {
    positions::Entity::find_by_id(position_id)
        .filter(positions::Column::Status.eq(POSITION_OPEN))
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("position {} not found or already closed", position_id))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Append one exchange order to the audit trail.
pub async fn record_order(
    db: &DatabaseConnection,
    subscription_id: i64,
    position_id: Option<u64>,
    role: &str,
    order: &ExchangeOrder,
) -> Result<u64> {
    let row = orders::ActiveModel {
        subscription_id: ActiveValue::Set(subscription_id),
        position_id: ActiveValue::Set(position_id),
        exchange_order_id: ActiveValue::Set(order.id.clone()),
        role: ActiveValue::Set(role.to_string()),
        order_type: ActiveValue::Set(order.order_type.as_str().to_string()),
        side: ActiveValue::Set(order.side.as_str().to_string()),
        amount: ActiveValue::Set(to_decimal(order.amount)),
        price: ActiveValue::Set(opt_decimal(order.price)),
        stop_price: ActiveValue::Set(opt_decimal(order.stop_price)),
        filled: ActiveValue::Set(to_decimal(order.filled)),
        status: ActiveValue::Set(order.status.as_str().to_string()),
        created_at: ActiveValue::Set(Some(Utc::now())),
        updated_at: ActiveValue::Set(Some(Utc::now())),
        ..Default::default()
    };
    let result = orders::Entity::insert(row).exec(db).await?;
    Ok(result.last_insert_id)
}

/// Protective orders the ledger still believes are resting on the
/// exchange for this position.
pub async fn open_protective_orders(
    db: &DatabaseConnection,
    position_id: u64,
) -> Result<Vec<orders::Model>> {
    let rows = orders::Entity::find()
        .filter(orders::Column::PositionId.eq(position_id))
        .filter(orders::Column::Status.eq(ORDER_OPEN))
        .filter(orders::Column::Role.is_in([ROLE_STOP_LOSS, ROLE_TAKE_PROFIT]))
        .all(db)
        .await?;
    Ok(rows)
}

pub async fn mark_order_filled(db: &DatabaseConnection, order_id: u64) -> Result<()> {
    let order = orders::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("order {} not found", order_id))?;
    let amount = order.amount;

    let mut update: orders::ActiveModel = order.into();
    update.status = ActiveValue::Set(ORDER_FILLED.to_string());
    update.filled = ActiveValue::Set(amount);
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    orders::Entity::update(update).exec(db).await?;
    Ok(())
}

pub async fn mark_order_canceled(db: &DatabaseConnection, order_id: u64) -> Result<()> {
    let order = orders::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("order {} not found", order_id))?;

    let mut update: orders::ActiveModel = order.into();
    update.status = ActiveValue::Set(ORDER_CANCELED.to_string());
    update.updated_at = ActiveValue::Set(Some(Utc::now()));
    orders::Entity::update(update).exec(db).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// A protective order reduced to what the reconciliation diff needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectiveOrder {
    /// Ledger row id
    pub order_id: u64,
    pub exchange_order_id: String,
    pub role: String,
    /// Stop price for stop orders, limit price for take-profits
    pub level: Option<f64>,
}

/// Verdict of the set-diff: the missing order assumed filled, plus the
/// sibling protective orders that should be canceled.
#[derive(Debug, Clone, PartialEq)]
pub struct AssumedFill {
    pub filled: ProtectiveOrder,
    pub siblings: Vec<ProtectiveOrder>,
}

/// Diff the ledger's open protective orders against the exchange's open
/// set. An order the ledger believes open but the exchange no longer
/// lists is assumed filled. When both the stop and the target vanished in
/// the same gap the stop wins, matching the hard-exit priority.
pub fn classify_missing(
    ledger_open: &[ProtectiveOrder],
    exchange_open_ids: &HashSet<String>,
) -> Option<AssumedFill> {
    let missing: Vec<&ProtectiveOrder> = ledger_open
        .iter()
        .filter(|order| !exchange_open_ids.contains(&order.exchange_order_id))
        .collect();
    let first = *missing.first()?;
    let filled = missing
        .iter()
        .find(|order| order.role == ROLE_STOP_LOSS)
        .copied()
        .unwrap_or(first)
        .clone();
    let siblings = ledger_open
        .iter()
        .filter(|order| order.order_id != filled.order_id)
        .cloned()
        .collect();
    Some(AssumedFill { filled, siblings })
}

/// Close reason for a protective order that filled while we were not
/// looking.
pub fn close_reason_for_role(role: &str) -> &'static str {
    if role == ROLE_STOP_LOSS {
        CLOSE_STOP_LOSS_HIT
    } else {
        CLOSE_TAKE_PROFIT_HIT
    }
}

fn protective_view(row: &orders::Model) -> ProtectiveOrder {
    let level = if row.role == ROLE_STOP_LOSS {
        row.stop_price.as_ref().map(to_f64)
    } else {
        row.price.as_ref().map(to_f64)
    };
    ProtectiveOrder {
        order_id: row.id,
        exchange_order_id: row.exchange_order_id.clone(),
        role: row.role.clone(),
        level,
    }
}

/// Bring the ledger back in line with the exchange before a tick is
/// evaluated.
///
/// The caller supplies the exchange's current open order ids for the
/// symbol. A protective order missing from that set is marked filled, its
/// siblings are canceled best effort, and the position is closed at the
/// level the missing order was resting at. Returns the close reason when
/// the position was closed.
pub async fn reconcile(
    db: &DatabaseConnection,
    gateway: &dyn ExchangeGateway,
    position: &positions::Model,
    exchange_open_ids: &HashSet<String>,
) -> Result<Option<String>> {
    let ledger_open = open_protective_orders(db, position.id).await?;
    if ledger_open.is_empty() {
        return Ok(None);
    }
    let snapshot: Vec<ProtectiveOrder> = ledger_open.iter().map(protective_view).collect();
    let Some(assumed) = classify_missing(&snapshot, exchange_open_ids) else {
        debug!(position_id = position.id, "protective orders all accounted for");
        return Ok(None);
    };

    let side: TradeSide = position
        .side
        .parse()
        .with_context(|| format!("position {} has a bad side column", position.id))?;
    let entry = to_f64(&position.entry_price);
    let size = to_f64(&position.size);
    let level = match assumed.filled.level {
        Some(level) => level,
        None => {
            warn!(
                order_id = assumed.filled.order_id,
                "protective order has no level, booking exit at entry"
            );
            entry
        }
    };
    let reason = close_reason_for_role(&assumed.filled.role);
    let pnl = realized_pnl(side, entry, level, size);

    mark_order_filled(db, assumed.filled.order_id).await?;
    for sibling in &assumed.siblings {
        match gateway
            .cancel_order(&sibling.exchange_order_id, &position.symbol)
            .await
        {
            Ok(()) => {}
            // Already gone from the exchange, nothing to cancel
            Err(GatewayError::NotFound(_)) => {}
            Err(err) => warn!(
                order_id = sibling.order_id,
                %err,
                "failed to cancel sibling protective order"
            ),
        }
        mark_order_canceled(db, sibling.order_id).await?;
    }
    close_position(db, position.id, level, pnl, reason).await?;

    info!(
        position_id = position.id,
        exit_price = level,
        pnl,
        reason,
        "position closed by protective order fill"
    );
    Ok(Some(reason.to_string()))
}

// ---------------------------------------------------------------------------
// Event persistence
// ---------------------------------------------------------------------------

fn protective_role(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::StopMarket => ROLE_STOP_LOSS,
        _ => ROLE_TAKE_PROFIT,
    }
}

/// Write everything one `evaluate_tick` call reported.
///
/// `open_position_id` is the row that was open when the tick started,
/// `None` when the subscription was flat. Events arrive in emission order,
/// so an `Opened` fill re-targets the following events at the new row.
pub async fn persist_events(
    db: &DatabaseConnection,
    subscription_id: i64,
    open_position_id: Option<u64>,
    events: &[PositionEvent],
) -> Result<()> {
    let mut position_id = open_position_id;
    for event in events {
        match event {
            PositionEvent::Opened {
                position,
                entry_order,
                protective_orders,
                reason,
            } => {
                let id = open_position(db, subscription_id, &entry_order.symbol, position).await?;
                record_order(db, subscription_id, Some(id), ROLE_ENTRY, entry_order).await?;
                for order in protective_orders {
                    let role = protective_role(order.order_type);
                    record_order(db, subscription_id, Some(id), role, order).await?;
                }
                info!(
                    subscription_id,
                    position_id = id,
                    side = position.side.as_str(),
                    entry_price = position.entry_price,
                    size = position.size,
                    %reason,
                    "position opened"
                );
                position_id = Some(id);
            }
            PositionEvent::Amended {
                order,
                entry_price,
                size,
                stop_loss,
                take_profit,
                state,
                reason,
            } => {
                let Some(id) = position_id else {
                    warn!(subscription_id, "amend event with no open position row");
                    continue;
                };
                record_order(db, subscription_id, Some(id), ROLE_SAFETY, order).await?;
                amend_position(db, id, *entry_price, *size, *stop_loss, *take_profit, state.as_ref())
                    .await?;
                info!(
                    subscription_id,
                    position_id = id,
                    entry_price,
                    size,
                    %reason,
                    "position amended"
                );
            }
            PositionEvent::StateChanged { stop_loss, state } => {
                let Some(id) = position_id else {
                    warn!(subscription_id, "state event with no open position row");
                    continue;
                };
                update_position_state(db, id, *stop_loss, state.as_ref()).await?;
                debug!(subscription_id, position_id = id, ?stop_loss, "position state updated");
            }
            PositionEvent::Reduced {
                order,
                closed_size,
                exit_price,
                pnl,
                size,
                stop_loss,
                state,
                reason,
            } => {
                let Some(id) = position_id else {
                    warn!(subscription_id, "reduce event with no open position row");
                    continue;
                };
                record_order(db, subscription_id, Some(id), ROLE_EXIT, order).await?;
                reduce_position(db, id, *size, *pnl, *stop_loss, state.as_ref()).await?;
                info!(
                    subscription_id,
                    position_id = id,
                    closed_size,
                    exit_price,
                    pnl,
                    %reason,
                    "position reduced"
                );
            }
            PositionEvent::Closed {
                order,
                exit_price,
                pnl,
                reason,
            } => {
                let Some(id) = position_id else {
                    warn!(subscription_id, "close event with no open position row");
                    continue;
                };
                record_order(db, subscription_id, Some(id), ROLE_EXIT, order).await?;
                close_position(db, id, *exit_price, *pnl, reason).await?;
                info!(
                    subscription_id,
                    position_id = id,
                    exit_price,
                    pnl,
                    %reason,
                    "position closed"
                );
                position_id = None;
            }
        }
    }
    Ok(())
}
