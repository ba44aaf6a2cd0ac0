//! Backtest results and performance metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::TradeSide;

/// One closed trade (or closed chunk of a ladder exit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub side: TradeSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    pub reason: String,
}

/// Equity at one candle timestamp: capital plus realized PnL booked so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Full simulation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Starting capital
    pub capital: f64,
    /// Total realized PnL, quote currency
    pub pnl: f64,
    /// Total realized PnL as a percentage of starting capital
    pub pnl_pct: f64,
    /// Mean over standard deviation of per-trade returns
    pub sharpe: f64,
    /// Deepest peak-to-trough equity drop, percent
    pub max_drawdown_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub trades: Vec<TradeRecord>,
    /// One point per input candle
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestReport {
    /// Assemble the report and derive every metric from the trade log and
    /// the bar-aligned equity curve.
    pub fn from_trades(capital: f64, trades: Vec<TradeRecord>, equity_curve: Vec<EquityPoint>) -> Self {
        let pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let pnl_pct = if capital > 0.0 { pnl / capital * 100.0 } else { 0.0 };
        let winning_trades = trades.iter().filter(|t| t.pnl > 0.0).count();
        let losing_trades = trades.iter().filter(|t| t.pnl < 0.0).count();

        let returns: Vec<f64> = if capital > 0.0 {
            trades.iter().map(|t| t.pnl / capital).collect()
        } else {
            Vec::new()
        };

        Self {
            capital,
            pnl,
            pnl_pct,
            sharpe: sharpe_ratio(&returns),
            max_drawdown_pct: max_drawdown_pct(&equity_curve),
            total_trades: trades.len(),
            winning_trades,
            losing_trades,
            trades,
            equity_curve,
        }
    }
}

/// Mean over standard deviation of the given returns, 0 when undefined.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

/// Deepest peak-to-trough drop across the equity curve, as a percentage of
/// the peak.
pub fn max_drawdown_pct(equity: &[EquityPoint]) -> f64 {
    let mut max_dd = 0.0f64;
    let mut peak = f64::MIN;
    for point in equity {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(secs: i64, equity: f64) -> EquityPoint {
        EquityPoint {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            equity,
        }
    }

    fn trade(pnl: f64) -> TradeRecord {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        TradeRecord {
            entry_time: t,
            exit_time: t + chrono::Duration::hours(1),
            side: TradeSide::Long,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            size: 1.0,
            pnl,
            reason: "TP".to_string(),
        }
    }

    #[test]
    fn drawdown_finds_the_deepest_trough() {
        let curve = vec![
            point(0, 1000.0),
            point(1, 1100.0),
            point(2, 990.0),
            point(3, 1050.0),
            point(4, 880.0),
            point(5, 1200.0),
        ];
        // Deepest: 1100 -> 880
        let expected = (1100.0 - 880.0) / 1100.0 * 100.0;
        assert!((max_drawdown_pct(&curve) - expected).abs() < 1e-9);
    }

    #[test]
    fn drawdown_is_zero_for_rising_equity() {
        let curve = vec![point(0, 1000.0), point(1, 1001.0), point(2, 1500.0)];
        assert_eq!(max_drawdown_pct(&curve), 0.0);
    }

    #[test]
    fn sharpe_zero_when_flat_or_single() {
        assert_eq!(sharpe_ratio(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[0.01]), 0.0);
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01]), 0.0);
    }

    #[test]
    fn sharpe_sign_follows_mean_return() {
        assert!(sharpe_ratio(&[0.02, -0.01, 0.03]) > 0.0);
        assert!(sharpe_ratio(&[-0.02, 0.01, -0.03]) < 0.0);
    }

    #[test]
    fn report_counts_and_totals() {
        let trades = vec![trade(10.0), trade(-4.0), trade(6.0), trade(0.0)];
        let curve = vec![point(0, 1000.0), point(1, 1012.0)];
        let report = BacktestReport::from_trades(1000.0, trades, curve);
        assert_eq!(report.total_trades, 4);
        assert_eq!(report.winning_trades, 2);
        assert_eq!(report.losing_trades, 1);
        assert!((report.pnl - 12.0).abs() < 1e-9);
        assert!((report.pnl_pct - 1.2).abs() < 1e-9);
    }
}
