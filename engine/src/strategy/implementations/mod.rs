//! Built-in strategy implementations

pub mod band_reversion;
pub mod ema_cross;
pub mod grid_dca;
pub mod mtf_momentum;
pub mod range_breakout;

pub use band_reversion::BandReversion;
pub use ema_cross::EmaCross;
pub use grid_dca::GridDca;
pub use mtf_momentum::MtfMomentum;
pub use range_breakout::RangeBreakout;
