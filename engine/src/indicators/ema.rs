//! EMA (Exponential Moving Average)

use ta::indicators::ExponentialMovingAverage;
use ta::Next;

use crate::indicators::Indicator;

/// Streaming EMA
#[derive(Debug)]
pub struct Ema {
    inner: ExponentialMovingAverage,
    period: usize,
    seen: usize,
    last: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            inner: ExponentialMovingAverage::new(period).unwrap(),
            period,
            seen: 0,
            last: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Ema {
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

/// EMA over a whole series, `None` for the warmup bars
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut ema = Ema::new(period);
    values
        .iter()
        .map(|&v| {
            ema.update(v);
            ema.value()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warms_up_after_period() {
        let values: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let out = calculate_ema(&values, 5);
        assert_eq!(out.len(), 10);
        assert!(out[3].is_none());
        assert!(out[4].is_some());
        // Rising input keeps the EMA below the latest value
        assert!(out[9].unwrap() < values[9]);
    }

    #[test]
    fn constant_series_converges_to_constant() {
        let out = calculate_ema(&[42.0; 20], 5);
        assert!((out[19].unwrap() - 42.0).abs() < 1e-9);
    }
}
