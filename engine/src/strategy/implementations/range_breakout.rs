//! Opening range breakout strategy
//!
//! The first bars of each UTC day define the session range. One long entry
//! per session when price closes above the range high plus a buffer; the
//! stop sits under the range low, clamped to the configured stop percent,
//! and anything still open at the day rollover is closed flat.

use chrono::NaiveDate;

use crate::data::Candle;
use crate::sizing::Sizing;
use crate::strategy::params::{ParamSpec, Params};
use crate::strategy::{Action, EntryOrder, Strategy, StrategySettings, Tick, TradeSide};
use crate::Result;

#[derive(Debug)]
pub struct RangeBreakout {
    settings: StrategySettings,
    opening_range_bars: usize,
    buffer_pct: f64,
    risk_per_trade_pct: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    // One entry per session, remembered across ticks
    session: Option<NaiveDate>,
    traded_this_session: bool,
}

impl RangeBreakout {
    pub const KEY: &'static str = "range_breakout";

    pub fn param_specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("opening_range_bars", "Opening range bars", 6, 1, 48),
            ParamSpec::float("buffer_pct", "Breakout buffer %", 0.1, 0.0, 5.0),
            ParamSpec::float("risk_per_trade_pct", "Risk per trade %", 1.0, 0.1, 10.0),
            ParamSpec::float("stop_loss_pct", "Stop loss %", 0.5, 0.1, 10.0),
            ParamSpec::float("take_profit_pct", "Take profit %", 1.0, 0.1, 20.0),
        ]
    }

    pub fn from_params(settings: StrategySettings, params: &Params) -> Self {
        Self {
            settings,
            opening_range_bars: params.get("opening_range_bars").and_then(|v| v.as_i64()).unwrap_or(6) as usize,
            buffer_pct: params.get("buffer_pct").and_then(|v| v.as_f64()).unwrap_or(0.1),
            risk_per_trade_pct: params.get("risk_per_trade_pct").and_then(|v| v.as_f64()).unwrap_or(1.0),
            stop_loss_pct: params.get("stop_loss_pct").and_then(|v| v.as_f64()).unwrap_or(0.5),
            take_profit_pct: params.get("take_profit_pct").and_then(|v| v.as_f64()).unwrap_or(1.0),
            session: None,
            traded_this_session: false,
        }
    }

    /// High and low of the first `opening_range_bars` bars of `day`, `None`
    /// until the range has fully formed.
    fn session_range(&self, candles: &[Candle], day: NaiveDate) -> Option<(f64, f64)> {
        let todays: Vec<&Candle> = candles
            .iter()
            .filter(|c| c.timestamp.date_naive() == day)
            .collect();
        if todays.len() <= self.opening_range_bars {
            return None;
        }
        let range = &todays[..self.opening_range_bars];
        let high = range.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = range.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        Some((high, low))
    }
}

impl Strategy for RangeBreakout {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn warmup(&self) -> usize {
        self.opening_range_bars + 1
    }

    fn decide(&mut self, tick: &Tick) -> Result<Action> {
        let Some(last) = tick.last_candle() else {
            return Ok(Action::Hold);
        };
        let today = last.timestamp.date_naive();
        if self.session != Some(today) {
            self.session = Some(today);
            self.traded_this_session = false;
        }

        if let Some(position) = tick.position {
            // Day rollover flattens whatever survived the session
            if position.opened_at.date_naive() != today {
                return Ok(Action::Exit {
                    reason: "Session Close".to_string(),
                });
            }
            return Ok(Action::Hold);
        }

        if self.traded_this_session {
            return Ok(Action::Hold);
        }
        let Some((range_high, range_low)) = self.session_range(tick.candles, today) else {
            return Ok(Action::Hold);
        };

        let trigger = range_high * (1.0 + self.buffer_pct / 100.0);
        if last.close > trigger {
            let close = last.close;
            // Stop under the range low, but never wider than stop_loss_pct
            let stop = range_low.max(close * (1.0 - self.stop_loss_pct / 100.0));
            self.traded_this_session = true;
            return Ok(Action::Enter(EntryOrder {
                side: TradeSide::Long,
                sizing: Sizing::RiskFraction(self.risk_per_trade_pct / 100.0),
                stop_loss: Some(stop),
                take_profit: Some(close * (1.0 + self.take_profit_pct / 100.0)),
                protective_orders: true,
                state: None,
                reason: format!("close {:.4} broke session high {:.4}", close, range_high),
            }));
        }

        Ok(Action::Hold)
    }
}
