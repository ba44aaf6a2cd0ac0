//! OHLCV candle data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Timeframe;

/// One OHLCV candle. The timestamp is the bar's open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time (UTC)
    pub timestamp: DateTime<Utc>,
    /// Opening price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Volume
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Typical price (HLC/3)
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Check if candle is bullish
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Total range (high - low)
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Borrowed view over a candle slice with column accessors.
///
/// Strategies receive candles as slices; this wrapper pulls out the price
/// columns the indicator helpers want.
#[derive(Debug, Clone, Copy)]
pub struct CandleSeries<'a> {
    candles: &'a [Candle],
}

impl<'a> CandleSeries<'a> {
    pub fn new(candles: &'a [Candle]) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Last (most recent closed) candle
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn candles(&self) -> &[Candle] {
        self.candles
    }

    /// Close prices as a vector
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// High prices as a vector
    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    /// Low prices as a vector
    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    /// Volumes as a vector
    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}

/// Aggregate base-timeframe candles into a higher timeframe.
///
/// Buckets are aligned to the target interval. Buckets that do not contain a
/// full set of base candles (a partial bucket at either end of the series, or
/// a gap in the feed) are dropped, so the output only ever holds fully closed
/// higher-timeframe bars.
pub fn resample(candles: &[Candle], base: Timeframe, target: Timeframe) -> Vec<Candle> {
    let ratio = target.secs() / base.secs();
    if ratio <= 1 || target.secs() % base.secs() != 0 {
        return candles.to_vec();
    }

    let mut out = Vec::with_capacity(candles.len() / ratio as usize + 1);
    let mut bucket: Vec<&Candle> = Vec::with_capacity(ratio as usize);
    let mut bucket_start: Option<i64> = None;

    for candle in candles {
        let start = candle.timestamp.timestamp() / target.secs() * target.secs();
        if bucket_start != Some(start) {
            flush_bucket(&mut out, &bucket, bucket_start, ratio);
            bucket.clear();
            bucket_start = Some(start);
        }
        bucket.push(candle);
    }
    flush_bucket(&mut out, &bucket, bucket_start, ratio);

    out
}

fn flush_bucket(out: &mut Vec<Candle>, bucket: &[&Candle], start: Option<i64>, ratio: i64) {
    let Some(start) = start else { return };
    // Partial buckets are not closed higher-timeframe bars
    if bucket.len() as i64 != ratio {
        return;
    }
    let timestamp = DateTime::<Utc>::from_timestamp(start, 0).unwrap_or(bucket[0].timestamp);
    out.push(Candle {
        timestamp,
        open: bucket[0].open,
        high: bucket.iter().map(|c| c.high).fold(f64::MIN, f64::max),
        low: bucket.iter().map(|c| c.low).fold(f64::MAX, f64::min),
        close: bucket[bucket.len() - 1].close,
        volume: bucket.iter().map(|c| c.volume).sum(),
    });
}

/// Drop the still-forming bar at the end of an exchange kline response.
///
/// Exchanges return the current, not yet closed bar as the last element.
/// Decisions are made on closed bars only, in live and backtest alike.
pub fn trim_forming(candles: &[Candle], timeframe: Timeframe, now: DateTime<Utc>) -> &[Candle] {
    match candles.last() {
        Some(last) if last.timestamp + timeframe.duration() > now => {
            &candles[..candles.len() - 1]
        }
        _ => candles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle_at(secs: i64, close: f64) -> Candle {
        Candle::new(
            Utc.timestamp_opt(secs, 0).unwrap(),
            close - 1.0,
            close + 2.0,
            close - 2.0,
            close,
            10.0,
        )
    }

    #[test]
    fn resample_aggregates_full_buckets() {
        // Twelve 1m candles starting on the hour: two full 5m buckets plus
        // a partial third that must be dropped.
        let base = 1_700_000_400; // divisible by 300
        let candles: Vec<Candle> = (0..12).map(|i| candle_at(base + i * 60, 100.0 + i as f64)).collect();

        let out = resample(&candles, Timeframe::M1, Timeframe::M5);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp.timestamp(), base);
        assert_eq!(out[0].open, candles[0].open);
        assert_eq!(out[0].close, candles[4].close);
        assert_eq!(out[0].high, candles[4].high);
        assert_eq!(out[0].volume, 50.0);
        assert_eq!(out[1].close, candles[9].close);
    }

    #[test]
    fn resample_drops_unaligned_head() {
        // Series starts mid-bucket: the first partial bucket is dropped.
        let base = 1_700_000_400 + 120;
        let candles: Vec<Candle> = (0..8).map(|i| candle_at(base + i * 60, 50.0)).collect();

        let out = resample(&candles, Timeframe::M1, Timeframe::M5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp.timestamp() % 300, 0);
    }

    #[test]
    fn trim_forming_drops_open_bar() {
        let base = 1_700_003_600;
        let candles: Vec<Candle> = (0..3).map(|i| candle_at(base + i * 3600, 10.0)).collect();

        // Now is inside the last bar, so it is still forming.
        let now = Utc.timestamp_opt(base + 2 * 3600 + 10, 0).unwrap();
        assert_eq!(trim_forming(&candles, Timeframe::H1, now).len(), 2);

        // Now is past the last bar's close, nothing trimmed.
        let now = Utc.timestamp_opt(base + 3 * 3600, 0).unwrap();
        assert_eq!(trim_forming(&candles, Timeframe::H1, now).len(), 3);
    }

    #[test]
    fn candle_helpers() {
        let c = candle_at(0, 100.0);
        assert!(c.is_bullish());
        assert_eq!(c.range(), 4.0);
        assert!((c.typical_price() - (102.0 + 98.0 + 100.0) / 3.0).abs() < 1e-12);
    }
}
