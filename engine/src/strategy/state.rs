//! Persisted strategy-private position state
//!
//! Stored on the position row as JSON so a live loop restart (or a crash)
//! resumes with the same trailing level or grid bookkeeping it had. The
//! union is tagged by `kind` and carries an explicit schema version per
//! variant so old rows keep deserializing after the shape evolves.

use serde::{Deserialize, Serialize};

/// Current schema version written for every variant.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyState {
    /// Trailing-stop bookkeeping: armed flag plus the ratcheted level.
    TrailingStop {
        v: u32,
        activated: bool,
        stop_price: f64,
    },
    /// DCA grid bookkeeping: the base fill anchoring the ladder, how many
    /// safety orders have filled, and which take-profit rungs already hit.
    DcaGrid {
        v: u32,
        base_entry: f64,
        safety_fills: u32,
        tp_hit: [bool; 3],
    },
}

impl StrategyState {
    pub fn trailing_stop(activated: bool, stop_price: f64) -> Self {
        StrategyState::TrailingStop {
            v: STATE_VERSION,
            activated,
            stop_price,
        }
    }

    pub fn dca_grid(base_entry: f64, safety_fills: u32, tp_hit: [bool; 3]) -> Self {
        StrategyState::DcaGrid {
            v: STATE_VERSION,
            base_entry,
            safety_fills,
            tp_hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trailing_stop_round_trips() {
        let state = StrategyState::trailing_stop(true, 101.5);
        let encoded = serde_json::to_value(&state).unwrap();
        assert_eq!(encoded["kind"], json!("trailing_stop"));
        assert_eq!(encoded["v"], json!(1));
        let decoded: StrategyState = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn dca_grid_round_trips() {
        let state = StrategyState::dca_grid(25_000.0, 2, [true, false, false]);
        let decoded: StrategyState =
            serde_json::from_value(serde_json::to_value(&state).unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn decodes_from_raw_column_json() {
        let raw = json!({"kind": "trailing_stop", "v": 1, "activated": false, "stop_price": 99.0});
        let state: StrategyState = serde_json::from_value(raw).unwrap();
        assert_eq!(state, StrategyState::trailing_stop(false, 99.0));
    }
}
