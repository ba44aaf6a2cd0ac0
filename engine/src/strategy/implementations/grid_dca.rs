//! DCA grid strategy
//!
//! Opens a base position immediately, then averages down with safety orders
//! each time price drops another rung below the base fill. Exits climb a
//! three-rung take-profit ladder measured from the average entry, with the
//! stop ratcheting to break-even after TP1 and to the TP1 price after TP2.
//! All exits are engine-driven market orders; no resting grid is kept on
//! the exchange. Grid bookkeeping persists in the position state blob.

use crate::sizing::Sizing;
use crate::strategy::params::{ParamSpec, Params};
use crate::strategy::{
    Action, Amendment, EntryOrder, Reduction, StateUpdate, Strategy, StrategySettings,
    StrategyState, Tick, TradeSide,
};
use crate::Result;

const STOP_SYNC_EPSILON: f64 = 1e-9;

#[derive(Debug)]
pub struct GridDca {
    settings: StrategySettings,
    base_order_quote: f64,
    safety_order_quote: f64,
    max_safety_orders: u32,
    price_deviation_pct: f64,
    volume_scale: f64,
    tp1_pct: f64,
    tp2_pct: f64,
    tp3_pct: f64,
    tp1_fraction: f64,
    tp2_fraction: f64,
    stop_loss_pct: f64,
}

impl GridDca {
    pub const KEY: &'static str = "grid_dca";

    pub fn param_specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::float("base_order_quote", "Base order size (quote)", 10.0, 1.0, 100_000.0),
            ParamSpec::float("safety_order_quote", "Safety order size (quote)", 10.0, 1.0, 100_000.0),
            ParamSpec::int("max_safety_orders", "Max safety orders", 5, 0, 10),
            ParamSpec::float("price_deviation_pct", "Safety order step %", 1.0, 0.1, 20.0),
            ParamSpec::float("volume_scale", "Safety order volume scale", 1.0, 0.1, 5.0),
            ParamSpec::float("tp1_pct", "Take profit 1 %", 1.0, 0.1, 50.0),
            ParamSpec::float("tp2_pct", "Take profit 2 %", 3.0, 0.1, 50.0),
            ParamSpec::float("tp3_pct", "Take profit 3 %", 20.0, 0.1, 100.0),
            ParamSpec::float("tp1_fraction", "TP1 close fraction", 0.4, 0.05, 1.0),
            ParamSpec::float("tp2_fraction", "TP2 close fraction", 0.4, 0.05, 1.0),
            ParamSpec::float("stop_loss_pct", "Stop loss %", 5.0, 0.5, 50.0),
        ]
    }

    pub fn from_params(settings: StrategySettings, params: &Params) -> Self {
        Self {
            settings,
            base_order_quote: params.get("base_order_quote").and_then(|v| v.as_f64()).unwrap_or(10.0),
            safety_order_quote: params.get("safety_order_quote").and_then(|v| v.as_f64()).unwrap_or(10.0),
            max_safety_orders: params.get("max_safety_orders").and_then(|v| v.as_i64()).unwrap_or(5) as u32,
            price_deviation_pct: params.get("price_deviation_pct").and_then(|v| v.as_f64()).unwrap_or(1.0),
            volume_scale: params.get("volume_scale").and_then(|v| v.as_f64()).unwrap_or(1.0),
            tp1_pct: params.get("tp1_pct").and_then(|v| v.as_f64()).unwrap_or(1.0),
            tp2_pct: params.get("tp2_pct").and_then(|v| v.as_f64()).unwrap_or(3.0),
            tp3_pct: params.get("tp3_pct").and_then(|v| v.as_f64()).unwrap_or(20.0),
            tp1_fraction: params.get("tp1_fraction").and_then(|v| v.as_f64()).unwrap_or(0.4),
            tp2_fraction: params.get("tp2_fraction").and_then(|v| v.as_f64()).unwrap_or(0.4),
            stop_loss_pct: params.get("stop_loss_pct").and_then(|v| v.as_f64()).unwrap_or(5.0),
        }
    }

    /// Price of safety-order rung `i` (0-based), stepped down from the base
    /// fill, not from the running average.
    fn safety_level(&self, base_entry: f64, i: u32) -> f64 {
        base_entry * (1.0 - self.price_deviation_pct * (i + 1) as f64 / 100.0)
    }

    /// Quote amount for safety-order rung `i` (0-based).
    fn safety_quote(&self, i: u32) -> f64 {
        self.safety_order_quote * self.volume_scale.powi(i as i32)
    }

    /// Stop the position should carry given the rungs already hit.
    fn desired_stop(&self, avg_entry: f64, tp_hit: &[bool; 3]) -> f64 {
        if tp_hit[1] {
            avg_entry * (1.0 + self.tp1_pct / 100.0)
        } else if tp_hit[0] {
            avg_entry
        } else {
            avg_entry * (1.0 - self.stop_loss_pct / 100.0)
        }
    }
}

impl Strategy for GridDca {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn warmup(&self) -> usize {
        1
    }

    fn decide(&mut self, tick: &Tick) -> Result<Action> {
        let Some(close) = tick.last_close() else {
            return Ok(Action::Hold);
        };

        let Some(position) = tick.position else {
            // The base order goes in on the first closed bar
            return Ok(Action::Enter(EntryOrder {
                side: TradeSide::Long,
                sizing: Sizing::Quote(self.base_order_quote),
                stop_loss: Some(close * (1.0 - self.stop_loss_pct / 100.0)),
                take_profit: None,
                protective_orders: false,
                state: Some(StrategyState::dca_grid(close, 0, [false; 3])),
                reason: "DCA base order".to_string(),
            }));
        };

        let (base_entry, safety_fills, tp_hit) = match position.state {
            Some(StrategyState::DcaGrid { base_entry, safety_fills, tp_hit, .. }) => {
                (base_entry, safety_fills, tp_hit)
            }
            // State lost somewhere upstream: rebuild around the average entry
            _ => (position.entry_price, 0, [false; 3]),
        };
        let avg_entry = position.entry_price;

        // Take-profit ladder, lowest unhit rung first, one per tick
        let rungs = [
            (self.tp1_pct, self.tp1_fraction),
            (self.tp2_pct, self.tp2_fraction),
            (self.tp3_pct, 1.0),
        ];
        for (i, (pct, fraction)) in rungs.iter().enumerate() {
            if tp_hit[i] {
                continue;
            }
            if close < avg_entry * (1.0 + pct / 100.0) {
                break;
            }
            if i == 2 {
                return Ok(Action::Exit {
                    reason: "TP3".to_string(),
                });
            }
            let mut hit = tp_hit;
            hit[i] = true;
            let new_stop = self.desired_stop(avg_entry, &hit);
            return Ok(Action::Reduce(Reduction {
                fraction: *fraction,
                reason: format!("TP{}", i + 1),
                stop_loss: Some(new_stop),
                state: Some(StrategyState::dca_grid(base_entry, safety_fills, hit)),
            }));
        }

        // Next safety order when price reaches the next rung down
        if safety_fills < self.max_safety_orders && close <= self.safety_level(base_entry, safety_fills) {
            return Ok(Action::Amend(Amendment {
                add_size: Sizing::Quote(self.safety_quote(safety_fills)),
                stop_loss: None,
                take_profit: None,
                state: Some(StrategyState::dca_grid(base_entry, safety_fills + 1, tp_hit)),
                reason: format!("DCA safety order {}", safety_fills + 1),
            }));
        }

        // Keep the stop in sync with the (possibly re-averaged) entry
        let desired = self.desired_stop(avg_entry, &tp_hit);
        let current = position.stop_loss.unwrap_or(f64::NAN);
        if !current.is_finite() || (desired - current).abs() > STOP_SYNC_EPSILON * avg_entry.max(1.0) {
            return Ok(Action::UpdateState(StateUpdate {
                stop_loss: Some(desired),
                state: None,
            }));
        }

        Ok(Action::Hold)
    }
}
