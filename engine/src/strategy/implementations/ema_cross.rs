//! EMA crossover trend strategy
//!
//! Long on a golden cross of the short EMA over the long EMA, out on the
//! death cross. Percent stop-loss and take-profit from the entry close.

use crate::indicators::{calculate_ema, crossed_above, crossed_below};
use crate::sizing::Sizing;
use crate::strategy::params::{ParamSpec, Params};
use crate::strategy::{Action, EntryOrder, Strategy, StrategySettings, Tick, TradeSide};
use crate::Result;

#[derive(Debug)]
pub struct EmaCross {
    settings: StrategySettings,
    short_period: usize,
    long_period: usize,
    risk_per_trade_pct: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
}

impl EmaCross {
    pub const KEY: &'static str = "ema_cross";

    pub fn param_specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("short_period", "Short EMA period", 10, 2, 100),
            ParamSpec::int("long_period", "Long EMA period", 20, 5, 200),
            ParamSpec::float("risk_per_trade_pct", "Risk per trade %", 1.0, 0.1, 10.0),
            ParamSpec::float("stop_loss_pct", "Stop loss %", 2.0, 0.1, 20.0),
            ParamSpec::float("take_profit_pct", "Take profit %", 4.0, 0.1, 50.0),
        ]
    }

    pub fn from_params(settings: StrategySettings, params: &Params) -> Self {
        Self {
            settings,
            short_period: params.get("short_period").and_then(|v| v.as_i64()).unwrap_or(10) as usize,
            long_period: params.get("long_period").and_then(|v| v.as_i64()).unwrap_or(20) as usize,
            risk_per_trade_pct: params.get("risk_per_trade_pct").and_then(|v| v.as_f64()).unwrap_or(1.0),
            stop_loss_pct: params.get("stop_loss_pct").and_then(|v| v.as_f64()).unwrap_or(2.0),
            take_profit_pct: params.get("take_profit_pct").and_then(|v| v.as_f64()).unwrap_or(4.0),
        }
    }
}

impl Strategy for EmaCross {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn warmup(&self) -> usize {
        // One extra bar so a cross on the latest bar has a predecessor
        self.long_period + 2
    }

    fn decide(&mut self, tick: &Tick) -> Result<Action> {
        let closes = tick.series().closes();
        if closes.len() < self.warmup() {
            return Ok(Action::Hold);
        }
        let fast = calculate_ema(&closes, self.short_period);
        let slow = calculate_ema(&closes, self.long_period);

        if tick.position.is_some() {
            if crossed_below(&fast, &slow) {
                return Ok(Action::Exit {
                    reason: "Crossover Exit".to_string(),
                });
            }
            return Ok(Action::Hold);
        }

        if crossed_above(&fast, &slow) {
            let close = closes[closes.len() - 1];
            return Ok(Action::Enter(EntryOrder {
                side: TradeSide::Long,
                sizing: Sizing::RiskFraction(self.risk_per_trade_pct / 100.0),
                stop_loss: Some(close * (1.0 - self.stop_loss_pct / 100.0)),
                take_profit: Some(close * (1.0 + self.take_profit_pct / 100.0)),
                protective_orders: true,
                state: None,
                reason: format!("EMA {} crossed above EMA {}", self.short_period, self.long_period),
            }));
        }

        Ok(Action::Hold)
    }
}
