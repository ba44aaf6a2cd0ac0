//! TradePulse strategy engine
//!
//! Pure strategy and simulation library: no database access, no HTTP client
//! construction. The `runner` crate wires these pieces to an exchange and to
//! persistent storage.
//!
//! - **Data**: OHLCV candles, timeframe math, series resampling
//! - **Indicators**: thin wrappers over the `ta` crate
//! - **Strategy**: the decision contract, parameter schemas, the registry
//!   and the built-in strategy implementations
//! - **Gateway**: the exchange trait and its error taxonomy
//! - **Backtest**: deterministic historical simulation with metrics
//! - **Live**: one tick of strategy evaluation against a real gateway
//!
//! # Example
//!
//! ```no_run
//! use engine::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let registry = StrategyRegistry::builtin();
//!     let settings = StrategySettings::new("BTCUSDT", Timeframe::H1, 1000.0);
//!     let mut strategy = registry.create("ema_cross", settings, &Default::default())?;
//!     let candles: Vec<Candle> = Vec::new();
//!     let report = backtest::run(strategy.as_mut(), &candles)?;
//!     println!("pnl: {:.2}", report.pnl);
//!     Ok(())
//! }
//! ```

pub mod backtest;
pub mod data;
pub mod gateway;
pub mod indicators;
pub mod live;
pub mod sizing;
pub mod strategy;

// Re-export commonly used types
pub mod prelude {
    pub use crate::backtest::{self, BacktestReport, EquityPoint, TradeRecord};
    pub use crate::data::{Candle, CandleSeries, Timeframe};
    pub use crate::gateway::{
        Balance, ExchangeGateway, ExchangeOrder, GatewayError, OrderRequest, OrderSide,
        OrderStatus, OrderType, Ticker,
    };
    pub use crate::live::{
        evaluate_tick, realized_pnl, ExecutionConfig, MarketSnapshot, PositionEvent,
    };
    pub use crate::sizing::Sizing;
    pub use crate::strategy::{
        Action, ParamKind, ParamSpec, Params, PositionView, StrategyRegistry, StrategySettings,
        StrategyState, Strategy, Tick, TradeSide,
    };

    pub use anyhow::{Context, Result};
}

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
