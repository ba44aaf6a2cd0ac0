//! Bollinger band mean-reversion strategy
//!
//! Buys a dip through the lower band when the larger trend is still up and
//! volatility is expanding, targets the middle band, and arms a trailing
//! stop once the trade has moved far enough in favor. The trailing level
//! lives in the persisted position state so a restarted loop picks it up
//! where it left off.

use crate::indicators::{calculate_bollinger, calculate_ema, calculate_sma, calculate_stdev};
use crate::sizing::Sizing;
use crate::strategy::params::{ParamSpec, Params};
use crate::strategy::{
    Action, EntryOrder, StateUpdate, Strategy, StrategySettings, StrategyState, Tick, TradeSide,
    EXIT_TRAILING_STOP,
};
use crate::Result;

#[derive(Debug)]
pub struct BandReversion {
    settings: StrategySettings,
    bb_period: usize,
    bb_std: f64,
    trend_ema_period: usize,
    vol_window: usize,
    vol_ma_window: usize,
    risk_per_trade_pct: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    trail_activation_pct: f64,
    trail_offset_pct: f64,
}

impl BandReversion {
    pub const KEY: &'static str = "band_reversion";

    pub fn param_specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("bb_period", "Bollinger period", 14, 5, 50),
            ParamSpec::float("bb_std", "Bollinger std devs", 2.1, 0.5, 4.0),
            ParamSpec::int("trend_ema_period", "Trend EMA period", 90, 10, 300),
            ParamSpec::int("vol_window", "Volatility window", 15, 5, 50),
            ParamSpec::int("vol_ma_window", "Volatility MA window", 28, 5, 100),
            ParamSpec::float("risk_per_trade_pct", "Risk per trade %", 1.0, 0.1, 10.0),
            ParamSpec::float("stop_loss_pct", "Stop loss %", 2.0, 0.1, 20.0),
            ParamSpec::float("take_profit_pct", "Take profit %", 9.0, 0.1, 50.0),
            ParamSpec::float("trail_activation_pct", "Trailing activation %", 0.5, 0.1, 10.0),
            ParamSpec::float("trail_offset_pct", "Trailing offset %", 0.5, 0.1, 10.0),
        ]
    }

    pub fn from_params(settings: StrategySettings, params: &Params) -> Self {
        Self {
            settings,
            bb_period: params.get("bb_period").and_then(|v| v.as_i64()).unwrap_or(14) as usize,
            bb_std: params.get("bb_std").and_then(|v| v.as_f64()).unwrap_or(2.1),
            trend_ema_period: params.get("trend_ema_period").and_then(|v| v.as_i64()).unwrap_or(90) as usize,
            vol_window: params.get("vol_window").and_then(|v| v.as_i64()).unwrap_or(15) as usize,
            vol_ma_window: params.get("vol_ma_window").and_then(|v| v.as_i64()).unwrap_or(28) as usize,
            risk_per_trade_pct: params.get("risk_per_trade_pct").and_then(|v| v.as_f64()).unwrap_or(1.0),
            stop_loss_pct: params.get("stop_loss_pct").and_then(|v| v.as_f64()).unwrap_or(2.0),
            take_profit_pct: params.get("take_profit_pct").and_then(|v| v.as_f64()).unwrap_or(9.0),
            trail_activation_pct: params.get("trail_activation_pct").and_then(|v| v.as_f64()).unwrap_or(0.5),
            trail_offset_pct: params.get("trail_offset_pct").and_then(|v| v.as_f64()).unwrap_or(0.5),
        }
    }

    /// Volatility regime filter: the rolling deviation must sit above its
    /// own moving average, i.e. volatility is expanding.
    fn volatility_expanding(&self, closes: &[f64]) -> bool {
        let stdev: Vec<f64> = calculate_stdev(closes, self.vol_window)
            .into_iter()
            .flatten()
            .collect();
        let stdev_ma = calculate_sma(&stdev, self.vol_ma_window);
        match (stdev.last(), stdev_ma.last().copied().flatten()) {
            (Some(&sd), Some(ma)) => sd > ma,
            _ => false,
        }
    }
}

impl Strategy for BandReversion {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn warmup(&self) -> usize {
        self.trend_ema_period
            .max(self.bb_period)
            .max(self.vol_window + self.vol_ma_window)
            + 2
    }

    fn decide(&mut self, tick: &Tick) -> Result<Action> {
        let closes = tick.series().closes();
        if closes.len() < self.warmup() {
            return Ok(Action::Hold);
        }
        let close = closes[closes.len() - 1];
        let bands = calculate_bollinger(&closes, self.bb_period, self.bb_std);
        let Some(band) = bands.last().copied().flatten() else {
            return Ok(Action::Hold);
        };

        if let Some(position) = tick.position {
            let trail = match position.state {
                Some(StrategyState::TrailingStop { activated, stop_price, .. }) => {
                    Some((activated, stop_price))
                }
                _ => None,
            };

            // Armed trailing stop beats the band target
            if let Some((true, stop_price)) = trail {
                if close <= stop_price {
                    return Ok(Action::Exit {
                        reason: EXIT_TRAILING_STOP.to_string(),
                    });
                }
            }

            if close >= band.middle {
                return Ok(Action::Exit {
                    reason: "Band Target".to_string(),
                });
            }

            let offset_stop = close * (1.0 - self.trail_offset_pct / 100.0);
            match trail {
                Some((false, _)) | None => {
                    // Arm once price has moved the activation distance in favor
                    if close >= position.entry_price * (1.0 + self.trail_activation_pct / 100.0) {
                        return Ok(Action::UpdateState(StateUpdate {
                            stop_loss: None,
                            state: Some(StrategyState::trailing_stop(true, offset_stop)),
                        }));
                    }
                }
                Some((true, stop_price)) => {
                    // Ratchet only ever tightens
                    if offset_stop > stop_price {
                        return Ok(Action::UpdateState(StateUpdate {
                            stop_loss: None,
                            state: Some(StrategyState::trailing_stop(true, offset_stop)),
                        }));
                    }
                }
            }

            return Ok(Action::Hold);
        }

        let trend = calculate_ema(&closes, self.trend_ema_period);
        let Some(trend_ema) = trend.last().copied().flatten() else {
            return Ok(Action::Hold);
        };

        let dipped = close < band.lower;
        let uptrend = close > trend_ema;
        if dipped && uptrend && self.volatility_expanding(&closes) {
            return Ok(Action::Enter(EntryOrder {
                side: TradeSide::Long,
                sizing: Sizing::RiskFraction(self.risk_per_trade_pct / 100.0),
                stop_loss: Some(close * (1.0 - self.stop_loss_pct / 100.0)),
                take_profit: Some(close * (1.0 + self.take_profit_pct / 100.0)),
                protective_orders: true,
                state: Some(StrategyState::trailing_stop(
                    false,
                    close * (1.0 - self.stop_loss_pct / 100.0),
                )),
                reason: format!("close {:.4} under lower band {:.4} in uptrend", close, band.lower),
            }));
        }

        Ok(Action::Hold)
    }
}
