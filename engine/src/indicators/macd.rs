//! MACD (Moving Average Convergence Divergence)

use ta::indicators::MovingAverageConvergenceDivergence;
use ta::Next;

/// One MACD reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Streaming MACD
#[derive(Debug)]
pub struct Macd {
    inner: MovingAverageConvergenceDivergence,
    warmup: usize,
    seen: usize,
    last: Option<MacdPoint>,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            inner: MovingAverageConvergenceDivergence::new(fast, slow, signal).unwrap(),
            // The signal line has no meaning before the slow EMA and the
            // signal EMA have both filled
            warmup: slow + signal,
            seen: 0,
            last: None,
        }
    }

    pub fn update(&mut self, value: f64) {
        let out = self.inner.next(value);
        self.seen += 1;
        if self.seen >= self.warmup {
            self.last = Some(MacdPoint {
                macd: out.macd,
                signal: out.signal,
                histogram: out.histogram,
            });
        }
    }

    pub fn value(&self) -> Option<MacdPoint> {
        self.last
    }

    pub fn is_ready(&self) -> bool {
        self.seen >= self.warmup
    }
}

/// MACD over a whole series, `None` for the warmup bars
pub fn calculate_macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<Option<MacdPoint>> {
    let mut macd = Macd::new(fast, slow, signal);
    values
        .iter()
        .map(|&v| {
            macd.update(v);
            macd.value()
        })
        .collect()
}
