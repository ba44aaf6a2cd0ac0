//! Strategy contract
//!
//! A strategy is a pure decision kernel: given the closed candles and the
//! current position (if any) it returns one [`Action`]. The backtest engine
//! and the live tick executor drive the same kernel, which is what keeps the
//! two modes honest with each other.

pub mod implementations;
pub mod params;
pub mod registry;
pub mod state;

pub use implementations::*;
pub use params::{validate_params, ParamKind, ParamSpec, Params, StrategyError};
pub use registry::{StrategyDefinition, StrategyFactory, StrategyRegistry};
pub use state::StrategyState;

use chrono::{DateTime, Utc};

use crate::data::{Candle, CandleSeries, Timeframe};
use crate::sizing::Sizing;
use crate::Result;

/// Exit reason for a stop-loss hit
pub const EXIT_STOP_LOSS: &str = "SL";
/// Exit reason for a take-profit hit
pub const EXIT_TAKE_PROFIT: &str = "TP";
/// Exit reason for a trailing-stop hit
pub const EXIT_TRAILING_STOP: &str = "TSL";
/// Exit reason for positions force-closed at the end of a backtest series
pub const EXIT_END_OF_DATA: &str = "end of data";

/// Which way a position points
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Long => "long",
            TradeSide::Short => "short",
        }
    }

    /// Order side that opens or grows a position on this side
    pub fn entry_order_side(&self) -> crate::gateway::OrderSide {
        match self {
            TradeSide::Long => crate::gateway::OrderSide::Buy,
            TradeSide::Short => crate::gateway::OrderSide::Sell,
        }
    }

    /// Order side that shrinks or closes a position on this side
    pub fn exit_order_side(&self) -> crate::gateway::OrderSide {
        self.entry_order_side().opposite()
    }
}

impl std::str::FromStr for TradeSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "long" => Ok(TradeSide::Long),
            "short" => Ok(TradeSide::Short),
            other => anyhow::bail!("unknown trade side: {}", other),
        }
    }
}

/// Static context a strategy is constructed with.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Quote-currency capital allocated to this subscription or run
    pub capital: f64,
}

impl StrategySettings {
    pub fn new(symbol: &str, timeframe: Timeframe, capital: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            capital,
        }
    }
}

/// The engine's view of the open position, fed back to the strategy.
#[derive(Debug, Clone)]
pub struct PositionView {
    pub side: TradeSide,
    /// Average entry across all fills
    pub entry_price: f64,
    pub size: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub opened_at: DateTime<Utc>,
    /// Strategy-private persisted state
    pub state: Option<StrategyState>,
}

/// Everything a strategy sees for one decision. Candles are closed bars
/// only, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct Tick<'a> {
    pub candles: &'a [Candle],
    /// Higher-timeframe series, present when the strategy asked for one
    pub aux_candles: Option<&'a [Candle]>,
    pub position: Option<&'a PositionView>,
}

impl<'a> Tick<'a> {
    pub fn new(candles: &'a [Candle], aux_candles: Option<&'a [Candle]>, position: Option<&'a PositionView>) -> Self {
        Self {
            candles,
            aux_candles,
            position,
        }
    }

    pub fn series(&self) -> CandleSeries<'a> {
        CandleSeries::new(self.candles)
    }

    pub fn aux_series(&self) -> Option<CandleSeries<'a>> {
        self.aux_candles.map(CandleSeries::new)
    }

    pub fn last_candle(&self) -> Option<&'a Candle> {
        self.candles.last()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }
}

/// Open a new position.
#[derive(Debug, Clone)]
pub struct EntryOrder {
    pub side: TradeSide,
    pub sizing: Sizing,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Whether resting stop/take-profit orders should be placed on the
    /// exchange after the entry fill. DCA strategies manage exits
    /// themselves and leave this off.
    pub protective_orders: bool,
    pub state: Option<StrategyState>,
    pub reason: String,
}

/// Grow the open position (DCA safety order). Entry price re-averages from
/// the actual fill.
#[derive(Debug, Clone)]
pub struct Amendment {
    pub add_size: Sizing,
    /// New stop level, `None` leaves the stop alone
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub state: Option<StrategyState>,
    pub reason: String,
}

/// Adjust the stop or the persisted state without trading.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub stop_loss: Option<f64>,
    pub state: Option<StrategyState>,
}

/// Close part of the position (ladder take-profit).
#[derive(Debug, Clone)]
pub struct Reduction {
    /// Fraction of the current size to close, in (0, 1]
    pub fraction: f64,
    pub reason: String,
    /// Ratcheted stop to apply together with the partial close
    pub stop_loss: Option<f64>,
    pub state: Option<StrategyState>,
}

/// One decision per tick.
#[derive(Debug, Clone)]
pub enum Action {
    Hold,
    Enter(EntryOrder),
    Amend(Amendment),
    UpdateState(StateUpdate),
    Reduce(Reduction),
    Exit { reason: String },
}

/// The decision kernel every concrete strategy implements.
///
/// Instances are stateful (indicator memory, session bookkeeping) and must
/// never be shared between runs or subscriptions; the registry builds a
/// fresh instance per use.
pub trait Strategy: Send + std::fmt::Debug {
    /// Registry key, e.g. "ema_cross"
    fn key(&self) -> &'static str;

    /// Symbol, timeframe and allocated capital this instance trades
    fn settings(&self) -> &StrategySettings;

    /// Minimum closed candles required before decisions fire
    fn warmup(&self) -> usize;

    /// Higher timeframe the strategy wants alongside the base series
    fn aux_timeframe(&self) -> Option<Timeframe> {
        None
    }

    /// Evaluate one closed bar. Implementations must be deterministic for
    /// identical tick input.
    fn decide(&mut self, tick: &Tick) -> Result<Action>;
}

/// Hard stop-loss / take-profit check shared by backtest and live.
///
/// Triggered by the bar close crossing the level; the exit books at the
/// level price, not the close. The stop-loss wins when one bar crosses
/// both levels.
pub fn check_hard_exit(position: &PositionView, close: f64) -> Option<(f64, &'static str)> {
    match position.side {
        TradeSide::Long => {
            if let Some(sl) = position.stop_loss {
                if close <= sl {
                    return Some((sl, EXIT_STOP_LOSS));
                }
            }
            if let Some(tp) = position.take_profit {
                if close >= tp {
                    return Some((tp, EXIT_TAKE_PROFIT));
                }
            }
        }
        TradeSide::Short => {
            if let Some(sl) = position.stop_loss {
                if close >= sl {
                    return Some((sl, EXIT_STOP_LOSS));
                }
            }
            if let Some(tp) = position.take_profit {
                if close <= tp {
                    return Some((tp, EXIT_TAKE_PROFIT));
                }
            }
        }
    }
    None
}
