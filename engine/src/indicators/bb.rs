//! Bollinger Bands

use ta::indicators::BollingerBands;
use ta::Next;

/// One Bollinger Bands reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandsPoint {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Streaming Bollinger Bands
#[derive(Debug)]
pub struct Bands {
    inner: BollingerBands,
    period: usize,
    seen: usize,
    last: Option<BandsPoint>,
}

impl Bands {
    pub fn new(period: usize, std_dev: f64) -> Self {
        Self {
            inner: BollingerBands::new(period, std_dev).unwrap(),
            period,
            seen: 0,
            last: None,
        }
    }

    pub fn update(&mut self, value: f64) {
        let out = self.inner.next(value);
        self.seen += 1;
        if self.seen >= self.period {
            self.last = Some(BandsPoint {
                upper: out.upper,
                middle: out.average,
                lower: out.lower,
            });
        }
    }

    pub fn value(&self) -> Option<BandsPoint> {
        self.last
    }

    pub fn is_ready(&self) -> bool {
        self.seen >= self.period
    }
}

/// Bollinger Bands over a whole series, `None` for the warmup bars
pub fn calculate_bollinger(values: &[f64], period: usize, std_dev: f64) -> Vec<Option<BandsPoint>> {
    let mut bands = Bands::new(period, std_dev);
    values
        .iter()
        .map(|&v| {
            bands.update(v);
            bands.value()
        })
        .collect()
}
