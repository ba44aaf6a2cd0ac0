//! Rolling standard deviation

use ta::indicators::StandardDeviation;
use ta::Next;

use crate::indicators::Indicator;

/// Streaming rolling standard deviation
#[derive(Debug)]
pub struct StdDev {
    inner: StandardDeviation,
    period: usize,
    seen: usize,
    last: Option<f64>,
}

impl StdDev {
    pub fn new(period: usize) -> Self {
        Self {
            inner: StandardDeviation::new(period).unwrap(),
            period,
            seen: 0,
            last: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for StdDev {
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

/// Rolling standard deviation over a whole series, `None` for the warmup bars
pub fn calculate_stdev(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut stdev = StdDev::new(period);
    values
        .iter()
        .map(|&v| {
            stdev.update(v);
            stdev.value()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_series_has_zero_deviation() {
        let out = calculate_stdev(&[7.0; 10], 5);
        assert!(out[9].unwrap().abs() < 1e-12);
    }

    #[test]
    fn wider_swings_raise_deviation() {
        let calm: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64).sin() * 0.5).collect();
        let wild: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64).sin() * 5.0).collect();
        let calm_sd = calculate_stdev(&calm, 15)[29].unwrap();
        let wild_sd = calculate_stdev(&wild, 15)[29].unwrap();
        assert!(wild_sd > calm_sd);
    }
}
