//! RSI (Relative Strength Index)

use ta::indicators::RelativeStrengthIndex;
use ta::Next;

use crate::indicators::Indicator;

/// Streaming RSI, output in [0, 100]
#[derive(Debug)]
pub struct Rsi {
    inner: RelativeStrengthIndex,
    period: usize,
    seen: usize,
    last: Option<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            inner: RelativeStrengthIndex::new(period).unwrap(),
            period,
            seen: 0,
            last: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Rsi {
    fn update(&mut self, value: f64) {
        let next = self.inner.next(value);
        self.seen += 1;
        if self.seen >= self.period {
            self.last = Some(next);
        }
    }

    fn value(&self) -> Option<f64> {
        self.last
    }

    fn is_ready(&self) -> bool {
        self.seen >= self.period
    }
}

/// RSI over a whole series, `None` for the warmup bars
pub fn calculate_rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rsi = Rsi::new(period);
    values
        .iter()
        .map(|&v| {
            rsi.update(v);
            rsi.value()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_bounds() {
        let values: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        for v in calculate_rsi(&values, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn rising_series_reads_high() {
        let values: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = calculate_rsi(&values, 14);
        assert!(out[39].unwrap() > 70.0);
    }
}
