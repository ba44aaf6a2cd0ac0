//! Live tick evaluation
//!
//! One call per closed candle: hard stop/target checks first, then a single
//! strategy decision, turned into real exchange orders through the gateway.
//! The function itself is stateless; everything it learns about fills comes
//! back as [`PositionEvent`]s for the caller to persist. Mirrors the
//! backtest loop so a strategy behaves the same way in both.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::data::Candle;
use crate::gateway::{ExchangeGateway, ExchangeOrder, GatewayError, OrderRequest};
use crate::sizing::{position_size, stop_fraction};
use crate::strategy::{
    check_hard_exit, Action, EntryOrder, PositionView, Strategy, StrategySettings, StrategyState,
    Tick, TradeSide,
};
use crate::Result;

/// Order execution knobs, per exchange/symbol.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// How often to re-fetch an order while waiting for its fill
    pub fill_poll_interval: Duration,
    /// Give up and cancel after waiting this long for a fill
    pub fill_timeout: Duration,
    /// Decimal places the exchange accepts for order amounts
    pub amount_precision: u32,
    /// Decimal places the exchange accepts for prices
    pub price_precision: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fill_poll_interval: Duration::from_secs(3),
            fill_timeout: Duration::from_secs(60),
            amount_precision: 8,
            price_precision: 8,
        }
    }
}

/// Market data for one evaluation: closed base-timeframe candles, oldest
/// first, plus the closed higher-timeframe series when the strategy uses one.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub candles: Vec<Candle>,
    pub aux_candles: Option<Vec<Candle>>,
}

impl MarketSnapshot {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles,
            aux_candles: None,
        }
    }

    pub fn with_aux(candles: Vec<Candle>, aux_candles: Vec<Candle>) -> Self {
        Self {
            candles,
            aux_candles: Some(aux_candles),
        }
    }
}

/// What happened on this tick. The caller owns persistence; every exchange
/// order that was placed rides along so the ledger can record it.
#[derive(Debug, Clone)]
pub enum PositionEvent {
    /// A new position was opened from an entry fill.
    Opened {
        position: PositionView,
        entry_order: ExchangeOrder,
        /// Resting stop/take-profit orders placed after the entry, if the
        /// strategy asked for them
        protective_orders: Vec<ExchangeOrder>,
        reason: String,
    },
    /// The position grew; entry price re-averaged from the actual fill.
    Amended {
        order: ExchangeOrder,
        entry_price: f64,
        size: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        state: Option<StrategyState>,
        reason: String,
    },
    /// Stop level or persisted state changed without trading.
    StateChanged {
        stop_loss: Option<f64>,
        state: Option<StrategyState>,
    },
    /// Part of the position was closed.
    Reduced {
        order: ExchangeOrder,
        closed_size: f64,
        exit_price: f64,
        pnl: f64,
        /// Size remaining open after the partial close
        size: f64,
        stop_loss: Option<f64>,
        state: Option<StrategyState>,
        reason: String,
    },
    /// The position was fully closed.
    Closed {
        order: ExchangeOrder,
        exit_price: f64,
        pnl: f64,
        reason: String,
    },
}

/// Evaluate one closed candle for a live subscription.
///
/// Hard stop/target breaches close at market and consume the tick; otherwise
/// the strategy decides once and the decision is executed. Entry signals
/// while a position is open, and exit signals while flat, are ignored, so
/// replaying the same candle is safe. Rejected orders and insufficient
/// balance drop the signal with a warning instead of failing the cycle.
pub async fn evaluate_tick(
    strategy: &mut dyn Strategy,
    snapshot: &MarketSnapshot,
    position: Option<&PositionView>,
    gateway: &dyn ExchangeGateway,
    config: &ExecutionConfig,
) -> Result<Vec<PositionEvent>> {
    let settings = strategy.settings().clone();
    let Some(candle) = snapshot.candles.last() else {
        warn!("empty candle snapshot for {}, skipping tick", settings.symbol);
        return Ok(Vec::new());
    };
    let close = candle.close;

    if let Some(pos) = position {
        if let Some((_, reason)) = check_hard_exit(pos, close) {
            debug!("{} close {:.4} breached {} level", settings.symbol, close, reason);
            return close_full(gateway, &settings, pos, close, reason.to_string(), config).await;
        }
    }

    if position.is_none() && snapshot.candles.len() < strategy.warmup() {
        debug!(
            "{} candles on hand, {} needed for warmup",
            snapshot.candles.len(),
            strategy.warmup()
        );
        return Ok(Vec::new());
    }

    let tick = Tick::new(&snapshot.candles, snapshot.aux_candles.as_deref(), position);
    let action = strategy.decide(&tick)?;

    match action {
        Action::Hold => Ok(Vec::new()),
        Action::Enter(order) => {
            if position.is_some() {
                debug!("entry signal with a position already open, ignoring");
                return Ok(Vec::new());
            }
            enter(gateway, &settings, order, close, config).await
        }
        Action::Amend(amendment) => {
            let Some(pos) = position else {
                debug!("amendment with no open position, ignoring");
                return Ok(Vec::new());
            };
            let amount = round_amount(
                position_size(amendment.add_size, settings.capital, close, None),
                config.amount_precision,
            );
            if amount <= 0.0 {
                return Ok(Vec::new());
            }
            let request =
                OrderRequest::market(&settings.symbol, pos.side.entry_order_side(), amount);
            let Some(filled) = place_and_await(gateway, &request, config).await? else {
                return Ok(Vec::new());
            };
            let fill_price = filled.effective_price().unwrap_or(close);
            let fill_size = if filled.filled > 0.0 { filled.filled } else { amount };
            let size = pos.size + fill_size;
            let entry_price = (pos.entry_price * pos.size + fill_price * fill_size) / size;
            debug!(
                "{}: averaged in at {:.4}, entry now {:.4} for {:.8}",
                settings.symbol, fill_price, entry_price, size
            );
            Ok(vec![PositionEvent::Amended {
                order: filled,
                entry_price,
                size,
                stop_loss: amendment.stop_loss,
                take_profit: amendment.take_profit,
                state: amendment.state,
                reason: amendment.reason,
            }])
        }
        Action::UpdateState(update) => {
            if position.is_none() {
                return Ok(Vec::new());
            }
            Ok(vec![PositionEvent::StateChanged {
                stop_loss: update.stop_loss,
                state: update.state,
            }])
        }
        Action::Reduce(reduction) => {
            let Some(pos) = position else {
                debug!("reduction with no open position, ignoring");
                return Ok(Vec::new());
            };
            let fraction = reduction.fraction.clamp(0.0, 1.0);
            if fraction >= 1.0 {
                return close_full(gateway, &settings, pos, close, reduction.reason, config).await;
            }
            let Some((order, exit_price)) =
                close_at_market(gateway, &settings.symbol, pos, pos.size * fraction, close, config)
                    .await?
            else {
                return Ok(Vec::new());
            };
            let closed_size = if order.filled > 0.0 {
                order.filled
            } else {
                pos.size * fraction
            };
            let pnl = realized_pnl(pos.side, pos.entry_price, exit_price, closed_size);
            Ok(vec![PositionEvent::Reduced {
                order,
                closed_size,
                exit_price,
                pnl,
                size: (pos.size - closed_size).max(0.0),
                stop_loss: reduction.stop_loss,
                state: reduction.state,
                reason: reduction.reason,
            }])
        }
        Action::Exit { reason } => {
            let Some(pos) = position else {
                debug!("exit signal with no open position, ignoring");
                return Ok(Vec::new());
            };
            close_full(gateway, &settings, pos, close, reason, config).await
        }
    }
}

async fn enter(
    gateway: &dyn ExchangeGateway,
    settings: &StrategySettings,
    order: EntryOrder,
    close: f64,
    config: &ExecutionConfig,
) -> Result<Vec<PositionEvent>> {
    let fraction = stop_fraction(close, order.stop_loss);
    let amount = round_amount(
        position_size(order.sizing, settings.capital, close, fraction),
        config.amount_precision,
    );
    if amount <= 0.0 {
        warn!("{}: entry amount rounds to zero, skipping signal", settings.symbol);
        return Ok(Vec::new());
    }

    let request = OrderRequest::market(&settings.symbol, order.side.entry_order_side(), amount);
    let Some(filled) = place_and_await(gateway, &request, config).await? else {
        return Ok(Vec::new());
    };
    let entry_price = filled.effective_price().unwrap_or(close);
    let size = if filled.filled > 0.0 { filled.filled } else { amount };

    // A failed protective order must not lose the fill we already have, so
    // the event is emitted either way and the failure is only logged.
    let mut protective = Vec::new();
    if order.protective_orders {
        let exit_side = order.side.exit_order_side();
        if let Some(stop) = order.stop_loss {
            let stop = round_price(stop, config.price_precision);
            let request =
                OrderRequest::stop_market(&settings.symbol, exit_side, size, stop).reduce_only();
            match gateway.place_order(&request).await {
                Ok(placed) => protective.push(placed),
                Err(err) => warn!("{}: stop order failed: {err}", settings.symbol),
            }
        }
        if let Some(target) = order.take_profit {
            let target = round_price(target, config.price_precision);
            let request =
                OrderRequest::limit(&settings.symbol, exit_side, size, target).reduce_only();
            match gateway.place_order(&request).await {
                Ok(placed) => protective.push(placed),
                Err(err) => warn!("{}: take-profit order failed: {err}", settings.symbol),
            }
        }
    }

    debug!(
        "{}: opened {} {:.8} at {:.4} ({})",
        settings.symbol,
        order.side.as_str(),
        size,
        entry_price,
        order.reason
    );
    Ok(vec![PositionEvent::Opened {
        position: PositionView {
            side: order.side,
            entry_price,
            size,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            opened_at: Utc::now(),
            state: order.state,
        },
        entry_order: filled,
        protective_orders: protective,
        reason: order.reason,
    }])
}

async fn close_full(
    gateway: &dyn ExchangeGateway,
    settings: &StrategySettings,
    pos: &PositionView,
    close: f64,
    reason: String,
    config: &ExecutionConfig,
) -> Result<Vec<PositionEvent>> {
    let Some((order, exit_price)) =
        close_at_market(gateway, &settings.symbol, pos, pos.size, close, config).await?
    else {
        return Ok(Vec::new());
    };
    let pnl = realized_pnl(pos.side, pos.entry_price, exit_price, pos.size);
    debug!(
        "{}: closed {:.8} at {:.4} ({}): pnl {:.4}",
        settings.symbol, pos.size, exit_price, reason, pnl
    );
    Ok(vec![PositionEvent::Closed {
        order,
        exit_price,
        pnl,
        reason,
    }])
}

/// Market-close `amount` of the position, reduce-only. `None` means nothing
/// was closed and the position is untouched; the next cycle retries.
async fn close_at_market(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    pos: &PositionView,
    amount: f64,
    fallback_price: f64,
    config: &ExecutionConfig,
) -> Result<Option<(ExchangeOrder, f64)>> {
    let amount = round_amount(amount, config.amount_precision);
    if amount <= 0.0 {
        return Ok(None);
    }
    let request =
        OrderRequest::market(symbol, pos.side.exit_order_side(), amount).reduce_only();
    let Some(filled) = place_and_await(gateway, &request, config).await? else {
        return Ok(None);
    };
    let exit_price = filled.effective_price().unwrap_or(fallback_price);
    Ok(Some((filled, exit_price)))
}

/// Place an order and wait until it fills. Rejections and balance shortfalls
/// drop the order with a warning; a fill timeout cancels it. Both come back
/// as `None`.
async fn place_and_await(
    gateway: &dyn ExchangeGateway,
    request: &OrderRequest,
    config: &ExecutionConfig,
) -> Result<Option<ExchangeOrder>> {
    let order = match gateway.place_order(request).await {
        Ok(order) => order,
        Err(GatewayError::Rejected(msg)) => {
            warn!("{} order rejected, skipping signal: {msg}", request.symbol);
            return Ok(None);
        }
        Err(GatewayError::InsufficientFunds(msg)) => {
            warn!("{}: insufficient funds, skipping signal: {msg}", request.symbol);
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    if order.is_filled() {
        return Ok(Some(order));
    }
    await_fill(gateway, order, config).await
}

async fn await_fill(
    gateway: &dyn ExchangeGateway,
    order: ExchangeOrder,
    config: &ExecutionConfig,
) -> Result<Option<ExchangeOrder>> {
    let deadline = Instant::now() + config.fill_timeout;
    loop {
        sleep(config.fill_poll_interval).await;
        let current = gateway.fetch_order(&order.id, &order.symbol).await?;
        if current.is_filled() {
            return Ok(Some(current));
        }
        if !current.is_open() {
            warn!("order {} ended {:?} without filling", current.id, current.status);
            return Ok(None);
        }
        if Instant::now() >= deadline {
            warn!(
                "order {} unfilled after {:?}, canceling",
                order.id, config.fill_timeout
            );
            match gateway.cancel_order(&order.id, &order.symbol).await {
                Ok(()) => {}
                // Unknown id here usually means it just filled; look again
                Err(GatewayError::NotFound(_)) => {
                    let current = gateway.fetch_order(&order.id, &order.symbol).await?;
                    if current.is_filled() {
                        return Ok(Some(current));
                    }
                }
                Err(err) => return Err(err.into()),
            }
            return Ok(None);
        }
    }
}

/// Signed PnL for closing `size` units opened at `entry` and exited at
/// `exit`.
pub fn realized_pnl(side: TradeSide, entry: f64, exit: f64, size: f64) -> f64 {
    match side {
        TradeSide::Long => (exit - entry) * size,
        TradeSide::Short => (entry - exit) * size,
    }
}

/// Floor to the exchange's amount precision; never rounds an amount up past
/// what the capital allows.
pub fn round_amount(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).floor() / factor
}

/// Round to the exchange's price precision.
pub fn round_price(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_rounding_floors() {
        assert_eq!(round_amount(0.123456789, 5), 0.12345);
        assert_eq!(round_amount(0.999999, 0), 0.0);
        assert_eq!(round_amount(1.5, 0), 1.0);
    }

    #[test]
    fn price_rounding_is_nearest() {
        assert_eq!(round_price(100.456, 2), 100.46);
        assert_eq!(round_price(100.454, 2), 100.45);
    }

    #[test]
    fn pnl_signs_by_side() {
        assert_eq!(realized_pnl(TradeSide::Long, 100.0, 110.0, 2.0), 20.0);
        assert_eq!(realized_pnl(TradeSide::Short, 100.0, 110.0, 2.0), -20.0);
    }

    #[test]
    fn default_execution_config() {
        let config = ExecutionConfig::default();
        assert_eq!(config.fill_poll_interval, Duration::from_secs(3));
        assert_eq!(config.fill_timeout, Duration::from_secs(60));
    }
}
