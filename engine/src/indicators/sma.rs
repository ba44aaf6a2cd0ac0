//! SMA (Simple Moving Average)

use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::indicators::Indicator;

/// Streaming SMA
#[derive(Debug)]
pub struct Sma {
    inner: SimpleMovingAverage,
    period: usize,
    seen: usize,
    last: Option<f64>,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            inner: SimpleMovingAverage::new(period).unwrap(),
            period,
            seen: 0,
            last: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
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

/// SMA over a whole series, `None` for the warmup bars
pub fn calculate_sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut sma = Sma::new(period);
    values
        .iter()
        .map(|&v| {
            sma.update(v);
            sma.value()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_the_window() {
        let out = calculate_sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert!(out[1].is_none());
        assert!((out[2].unwrap() - 2.0).abs() < 1e-12);
        assert!((out[4].unwrap() - 4.0).abs() < 1e-12);
    }
}
