//! End-to-end backtest runs over crafted candle series

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use engine::backtest;
    use engine::data::{Candle, Timeframe};
    use engine::strategy::{
        Params, StrategyRegistry, StrategySettings, EXIT_END_OF_DATA, EXIT_STOP_LOSS,
    };
    use serde_json::json;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = 1_700_000_400;
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                Candle::new(
                    Utc.timestamp_opt(start + i as i64 * 3600, 0).unwrap(),
                    close,
                    close + 0.5,
                    close - 0.5,
                    close,
                    100.0,
                )
            })
            .collect()
    }

    fn settings() -> StrategySettings {
        StrategySettings::new("BTCUSDT", Timeframe::H1, 1000.0)
    }

    // Short periods keep the crafted series small
    fn fast_ema_params() -> Params {
        let mut params = Params::new();
        params.insert("short_period".to_string(), json!(2));
        params.insert("long_period".to_string(), json!(5));
        params
    }

    #[test]
    fn test_stop_loss_books_at_stop_level() {
        // Downtrend, golden cross at 100, then a close through the 2% stop.
        let closes = [100.0, 99.0, 98.0, 97.0, 96.0, 95.0, 94.0, 100.0, 97.0];
        let candles = candles_from_closes(&closes);
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("ema_cross", settings(), &fast_ema_params())
            .unwrap();

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.reason, EXIT_STOP_LOSS);
        assert_eq!(trade.entry_price, 100.0);
        assert_eq!(trade.entry_time, candles[7].timestamp);
        assert_eq!(trade.exit_time, candles[8].timestamp);
        // Booked at the stop level, not at the breaching close
        assert!((trade.exit_price - 98.0).abs() < 1e-9);
        // 1% of 1000 at risk over a 2% stop: 5 units, stop hit loses 10
        assert!((trade.size - 5.0).abs() < 1e-6);
        assert!((trade.pnl + 10.0).abs() < 1e-6);
        assert_eq!(report.losing_trades, 1);
        assert_eq!(report.winning_trades, 0);
    }

    #[test]
    fn test_open_position_force_closed_at_end_of_data() {
        // Series ends on the entry bar, so the trade goes out flat.
        let closes = [100.0, 99.0, 98.0, 97.0, 96.0, 95.0, 94.0, 100.0];
        let candles = candles_from_closes(&closes);
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("ema_cross", settings(), &fast_ema_params())
            .unwrap();

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.reason, EXIT_END_OF_DATA);
        assert_eq!(trade.exit_price, 100.0);
        assert_eq!(trade.exit_time, candles[7].timestamp);
        assert!(trade.pnl.abs() < 1e-9);
        // The force close lands in the final equity point
        let last = report.equity_curve.last().unwrap();
        assert!((last.equity - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_equity_curve_has_one_point_per_candle() {
        let closes = [100.0, 99.0, 98.0, 97.0, 96.0, 95.0, 94.0, 100.0, 97.0];
        let candles = candles_from_closes(&closes);
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("ema_cross", settings(), &fast_ema_params())
            .unwrap();

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.equity_curve.len(), candles.len());
        for (point, candle) in report.equity_curve.iter().zip(&candles) {
            assert_eq!(point.timestamp, candle.timestamp);
        }
        assert_eq!(report.equity_curve[0].equity, 1000.0);
    }

    #[test]
    fn test_no_trades_before_warmup() {
        let closes = [100.0, 101.0, 102.0, 103.0, 104.0];
        let candles = candles_from_closes(&closes);
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("ema_cross", settings(), &fast_ema_params())
            .unwrap();

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 0);
        assert!(report.equity_curve.iter().all(|p| p.equity == 1000.0));
    }

    #[test]
    fn test_identical_runs_produce_identical_reports() {
        // A wiggly series long enough for several round trips.
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + 6.0 * ((i as f64) * 0.37).sin() + 0.05 * i as f64)
            .collect();
        let candles = candles_from_closes(&closes);
        let registry = StrategyRegistry::builtin();

        let mut first = registry
            .create("ema_cross", settings(), &fast_ema_params())
            .unwrap();
        let mut second = registry
            .create("ema_cross", settings(), &fast_ema_params())
            .unwrap();

        let a = backtest::run(first.as_mut(), &candles).unwrap();
        let b = backtest::run(second.as_mut(), &candles).unwrap();

        assert!(a.total_trades > 0);
        assert_eq!(
            serde_json::to_value(&a.trades).unwrap(),
            serde_json::to_value(&b.trades).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&a.equity_curve).unwrap(),
            serde_json::to_value(&b.equity_curve).unwrap()
        );
        assert_eq!(a.pnl, b.pnl);
        assert_eq!(a.sharpe, b.sharpe);
        assert_eq!(a.max_drawdown_pct, b.max_drawdown_pct);
    }

    #[test]
    fn test_take_profit_books_at_target_level() {
        // Same cross at 100, then a close through the 4% target.
        let closes = [100.0, 99.0, 98.0, 97.0, 96.0, 95.0, 94.0, 100.0, 105.0];
        let candles = candles_from_closes(&closes);
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("ema_cross", settings(), &fast_ema_params())
            .unwrap();

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.reason, "TP");
        assert!((trade.exit_price - 104.0).abs() < 1e-9);
        assert!(trade.pnl > 0.0);
        assert_eq!(report.winning_trades, 1);
    }
}
