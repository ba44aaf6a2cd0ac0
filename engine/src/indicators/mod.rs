//! Technical indicators
//!
//! Thin wrappers over the `ta` crate. Each indicator exposes a stateful
//! struct for streaming updates and a `calculate_*` helper that maps a whole
//! price series to per-bar values, `None` until the warmup period is filled.

pub mod bb;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stdev;

pub use bb::*;
pub use ema::*;
pub use macd::*;
pub use rsi::*;
pub use sma::*;
pub use stdev::*;

/// Streaming indicator over a single input series
pub trait Indicator {
    /// Feed the next value
    fn update(&mut self, value: f64);

    /// Current value, `None` until warm
    fn value(&self) -> Option<f64>;

    /// Whether the warmup period has been filled
    fn is_ready(&self) -> bool;
}

/// True when `fast` closed above `slow` on the last bar after being at or
/// below it on the bar before.
pub fn crossed_above(fast: &[Option<f64>], slow: &[Option<f64>]) -> bool {
    cross_state(fast, slow).map_or(false, |(prev, curr)| prev <= 0.0 && curr > 0.0)
}

/// True when `fast` closed below `slow` on the last bar after being at or
/// above it on the bar before.
pub fn crossed_below(fast: &[Option<f64>], slow: &[Option<f64>]) -> bool {
    cross_state(fast, slow).map_or(false, |(prev, curr)| prev >= 0.0 && curr < 0.0)
}

/// (previous difference, current difference) of the two series' last bars,
/// `None` unless both series have two trailing values.
fn cross_state(fast: &[Option<f64>], slow: &[Option<f64>]) -> Option<(f64, f64)> {
    let n = fast.len().min(slow.len());
    if n < 2 {
        return None;
    }
    let curr = fast[n - 1].zip(slow[n - 1]).map(|(f, s)| f - s)?;
    let prev = fast[n - 2].zip(slow[n - 2]).map(|(f, s)| f - s)?;
    Some((prev, curr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cross_above() {
        let fast = vec![Some(1.0), Some(3.0)];
        let slow = vec![Some(2.0), Some(2.0)];
        assert!(crossed_above(&fast, &slow));
        assert!(!crossed_below(&fast, &slow));
    }

    #[test]
    fn detects_cross_below() {
        let fast = vec![Some(2.5), Some(1.5)];
        let slow = vec![Some(2.0), Some(2.0)];
        assert!(crossed_below(&fast, &slow));
        assert!(!crossed_above(&fast, &slow));
    }

    #[test]
    fn no_cross_without_warm_values() {
        let fast = vec![None, Some(3.0)];
        let slow = vec![Some(2.0), Some(2.0)];
        assert!(!crossed_above(&fast, &slow));

        let short: Vec<Option<f64>> = vec![Some(3.0)];
        assert!(!crossed_above(&short, &[Some(2.0)]));
    }

    #[test]
    fn touching_then_rising_counts_as_cross() {
        let fast = vec![Some(2.0), Some(2.1)];
        let slow = vec![Some(2.0), Some(2.0)];
        assert!(crossed_above(&fast, &slow));
    }
}
