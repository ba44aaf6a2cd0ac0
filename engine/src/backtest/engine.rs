//! Simulation loop
//!
//! Replays closed candles through a strategy exactly the way the live loop
//! does: hard stop/target checks first, then one strategy decision per bar.
//! Fills are booked at the deciding bar's close (market orders) or at the
//! stop/target level (hard exits). The loop is pure; identical input yields
//! an identical trade log.

use tracing::debug;

use crate::data::{resample, Candle};
use crate::sizing::{position_size, stop_fraction};
use crate::strategy::{
    check_hard_exit, Action, PositionView, Strategy, Tick, TradeSide, EXIT_END_OF_DATA,
};
use crate::Result;

use super::report::{BacktestReport, EquityPoint, TradeRecord};

/// Run one strategy over a closed-candle series.
///
/// Capital comes from the strategy's settings. An open position left at the
/// end of the series is force-closed at the last close with reason
/// "end of data" so the trade log accounts for every entry.
pub fn run(strategy: &mut dyn Strategy, candles: &[Candle]) -> Result<BacktestReport> {
    let capital = strategy.settings().capital;
    let base_tf = strategy.settings().timeframe;
    let warmup = strategy.warmup();

    // The aux series is resampled once; per bar we expose only the aux bars
    // fully closed by the current base bar's close, so there is no lookahead.
    let aux_full = strategy
        .aux_timeframe()
        .map(|tf| (tf, resample(candles, base_tf, tf)));

    let mut trades: Vec<TradeRecord> = Vec::new();
    let mut equity: Vec<EquityPoint> = Vec::with_capacity(candles.len());
    let mut realized = 0.0f64;
    let mut position: Option<PositionView> = None;

    for i in 0..candles.len() {
        let window = &candles[..=i];
        let candle = &candles[i];
        let close = candle.close;

        // Hard risk limits consume the tick when they fire
        let mut hard_exited = false;
        if let Some(pos) = &position {
            if let Some((price, reason)) = check_hard_exit(pos, close) {
                realized += book_close(&mut trades, pos, pos.size, price, reason, candle);
                position = None;
                hard_exited = true;
            }
        }

        if !hard_exited && (position.is_some() || window.len() >= warmup) {
            let aux_slice = aux_full.as_ref().map(|(tf, aux)| {
                let cutoff = candle.timestamp + base_tf.duration();
                let end = aux.partition_point(|a| a.timestamp + tf.duration() <= cutoff);
                &aux[..end]
            });
            let tick = Tick::new(window, aux_slice, position.as_ref());
            let action = strategy.decide(&tick)?;
            apply_action(action, &mut position, &mut trades, &mut realized, capital, candle);
        }

        equity.push(EquityPoint {
            timestamp: candle.timestamp,
            equity: capital + realized,
        });
    }

    // Whatever is still open goes out at the last close
    if let (Some(pos), Some(last)) = (&position, candles.last()) {
        realized += book_close(&mut trades, pos, pos.size, last.close, EXIT_END_OF_DATA, last);
        if let Some(point) = equity.last_mut() {
            point.equity = capital + realized;
        }
    }

    Ok(BacktestReport::from_trades(capital, trades, equity))
}

fn apply_action(
    action: Action,
    position: &mut Option<PositionView>,
    trades: &mut Vec<TradeRecord>,
    realized: &mut f64,
    capital: f64,
    candle: &Candle,
) {
    let close = candle.close;
    match action {
        Action::Hold => {}
        Action::Enter(order) => {
            if position.is_some() {
                return;
            }
            let fraction = stop_fraction(close, order.stop_loss);
            let size = position_size(order.sizing, capital, close, fraction);
            if size <= 0.0 {
                return;
            }
            debug!("entering {} at {:.4}: {}", order.side.as_str(), close, order.reason);
            *position = Some(PositionView {
                side: order.side,
                entry_price: close,
                size,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                opened_at: candle.timestamp,
                state: order.state,
            });
        }
        Action::Amend(amendment) => {
            let Some(pos) = position.as_mut() else { return };
            let add = position_size(amendment.add_size, capital, close, None);
            if add <= 0.0 {
                return;
            }
            let new_size = pos.size + add;
            pos.entry_price = (pos.entry_price * pos.size + close * add) / new_size;
            pos.size = new_size;
            if amendment.stop_loss.is_some() {
                pos.stop_loss = amendment.stop_loss;
            }
            if amendment.take_profit.is_some() {
                pos.take_profit = amendment.take_profit;
            }
            if amendment.state.is_some() {
                pos.state = amendment.state;
            }
        }
        Action::UpdateState(update) => {
            let Some(pos) = position.as_mut() else { return };
            if update.stop_loss.is_some() {
                pos.stop_loss = update.stop_loss;
            }
            if update.state.is_some() {
                pos.state = update.state;
            }
        }
        Action::Reduce(reduction) => {
            let Some(pos) = position.as_mut() else { return };
            let fraction = reduction.fraction.clamp(0.0, 1.0);
            let before = pos.size;
            let chunk = before * fraction;
            if chunk <= 0.0 {
                return;
            }
            *realized += book_close(trades, pos, chunk, close, &reduction.reason, candle);
            pos.size -= chunk;
            if reduction.stop_loss.is_some() {
                pos.stop_loss = reduction.stop_loss;
            }
            if reduction.state.is_some() {
                pos.state = reduction.state;
            }
            // Rounding dust from a full reduction still counts as closed
            if pos.size <= before * 1e-9 {
                *position = None;
            }
        }
        Action::Exit { reason } => {
            let Some(pos) = position.as_ref() else { return };
            *realized += book_close(trades, pos, pos.size, close, &reason, candle);
            *position = None;
        }
    }
}

/// Record one closed chunk and return its PnL.
fn book_close(
    trades: &mut Vec<TradeRecord>,
    position: &PositionView,
    size: f64,
    exit_price: f64,
    reason: &str,
    candle: &Candle,
) -> f64 {
    let pnl = match position.side {
        TradeSide::Long => (exit_price - position.entry_price) * size,
        TradeSide::Short => (position.entry_price - exit_price) * size,
    };
    debug!(
        "closing {:.8} {} at {:.4} ({}): pnl {:.4}",
        size,
        position.side.as_str(),
        exit_price,
        reason,
        pnl
    );
    trades.push(TradeRecord {
        entry_time: position.opened_at,
        exit_time: candle.timestamp,
        side: position.side,
        entry_price: position.entry_price,
        exit_price,
        size,
        pnl,
        reason: reason.to_string(),
    });
    pnl
}
