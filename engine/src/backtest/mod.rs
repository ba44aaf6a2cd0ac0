//! Deterministic historical simulation

pub mod engine;
pub mod report;

pub use engine::run;
pub use report::{BacktestReport, EquityPoint, TradeRecord};
