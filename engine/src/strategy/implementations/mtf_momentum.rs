//! Multi-timeframe momentum strategy
//!
//! A higher-timeframe EMA gates the trade direction; entries fire on a
//! base-timeframe MACD cross while RSI is below a ceiling, exits on the
//! opposite cross. The aux series is requested through `aux_timeframe` and
//! resampled or fetched by the caller.

use crate::data::Timeframe;
use crate::indicators::{calculate_ema, calculate_macd, calculate_rsi, crossed_above, crossed_below};
use crate::sizing::Sizing;
use crate::strategy::params::{ParamSpec, Params};
use crate::strategy::{Action, EntryOrder, Strategy, StrategySettings, Tick, TradeSide};
use crate::Result;

#[derive(Debug)]
pub struct MtfMomentum {
    settings: StrategySettings,
    htf: Timeframe,
    trend_ema_period: usize,
    macd_fast: usize,
    macd_slow: usize,
    macd_signal: usize,
    rsi_period: usize,
    rsi_ceiling: f64,
    risk_per_trade_pct: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
}

impl MtfMomentum {
    pub const KEY: &'static str = "mtf_momentum";

    pub fn param_specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::choice("htf", "Trend timeframe", "4h", &["1h", "4h", "1d"]),
            ParamSpec::int("trend_ema_period", "Trend EMA period", 50, 10, 200),
            ParamSpec::int("macd_fast", "MACD fast period", 12, 2, 50),
            ParamSpec::int("macd_slow", "MACD slow period", 26, 5, 100),
            ParamSpec::int("macd_signal", "MACD signal period", 9, 2, 50),
            ParamSpec::int("rsi_period", "RSI period", 14, 2, 50),
            ParamSpec::float("rsi_ceiling", "RSI entry ceiling", 70.0, 50.0, 95.0),
            ParamSpec::float("risk_per_trade_pct", "Risk per trade %", 1.0, 0.1, 10.0),
            ParamSpec::float("stop_loss_pct", "Stop loss %", 2.0, 0.1, 20.0),
            ParamSpec::float("take_profit_pct", "Take profit %", 6.0, 0.1, 50.0),
        ]
    }

    pub fn from_params(settings: StrategySettings, params: &Params) -> Self {
        let htf = params
            .get("htf")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(Timeframe::H4);
        Self {
            settings,
            htf,
            trend_ema_period: params.get("trend_ema_period").and_then(|v| v.as_i64()).unwrap_or(50) as usize,
            macd_fast: params.get("macd_fast").and_then(|v| v.as_i64()).unwrap_or(12) as usize,
            macd_slow: params.get("macd_slow").and_then(|v| v.as_i64()).unwrap_or(26) as usize,
            macd_signal: params.get("macd_signal").and_then(|v| v.as_i64()).unwrap_or(9) as usize,
            rsi_period: params.get("rsi_period").and_then(|v| v.as_i64()).unwrap_or(14) as usize,
            rsi_ceiling: params.get("rsi_ceiling").and_then(|v| v.as_f64()).unwrap_or(70.0),
            risk_per_trade_pct: params.get("risk_per_trade_pct").and_then(|v| v.as_f64()).unwrap_or(1.0),
            stop_loss_pct: params.get("stop_loss_pct").and_then(|v| v.as_f64()).unwrap_or(2.0),
            take_profit_pct: params.get("take_profit_pct").and_then(|v| v.as_f64()).unwrap_or(6.0),
        }
    }

    /// Higher-timeframe close above its trend EMA
    fn trend_is_up(&self, aux_closes: &[f64]) -> bool {
        if aux_closes.len() < self.trend_ema_period {
            return false;
        }
        let trend = calculate_ema(aux_closes, self.trend_ema_period);
        match (aux_closes.last(), trend.last().copied().flatten()) {
            (Some(&close), Some(ema)) => close > ema,
            _ => false,
        }
    }
}

impl Strategy for MtfMomentum {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn warmup(&self) -> usize {
        self.macd_slow + self.macd_signal + 2
    }

    fn aux_timeframe(&self) -> Option<Timeframe> {
        Some(self.htf)
    }

    fn decide(&mut self, tick: &Tick) -> Result<Action> {
        let closes = tick.series().closes();
        if closes.len() < self.warmup() {
            return Ok(Action::Hold);
        }
        let macd = calculate_macd(&closes, self.macd_fast, self.macd_slow, self.macd_signal);
        let macd_line: Vec<Option<f64>> = macd.iter().map(|p| p.map(|p| p.macd)).collect();
        let signal_line: Vec<Option<f64>> = macd.iter().map(|p| p.map(|p| p.signal)).collect();

        if tick.position.is_some() {
            if crossed_below(&macd_line, &signal_line) {
                return Ok(Action::Exit {
                    reason: "Momentum Fade".to_string(),
                });
            }
            return Ok(Action::Hold);
        }

        // No aux series, no trend gate, no trade
        let Some(aux) = tick.aux_series() else {
            return Ok(Action::Hold);
        };
        if !self.trend_is_up(&aux.closes()) {
            return Ok(Action::Hold);
        }

        let rsi = calculate_rsi(&closes, self.rsi_period);
        let rsi_ok = rsi
            .last()
            .copied()
            .flatten()
            .map_or(false, |v| v < self.rsi_ceiling);

        if rsi_ok && crossed_above(&macd_line, &signal_line) {
            let close = closes[closes.len() - 1];
            return Ok(Action::Enter(EntryOrder {
                side: TradeSide::Long,
                sizing: Sizing::RiskFraction(self.risk_per_trade_pct / 100.0),
                stop_loss: Some(close * (1.0 - self.stop_loss_pct / 100.0)),
                take_profit: Some(close * (1.0 + self.take_profit_pct / 100.0)),
                protective_orders: true,
                state: None,
                reason: format!("MACD cross up with {} trend up", self.htf),
            }));
        }

        Ok(Action::Hold)
    }
}
