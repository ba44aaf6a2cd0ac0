//! Decision-level tests for the built-in strategies

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use engine::backtest;
    use engine::data::{Candle, Timeframe};
    use engine::strategy::{
        Action, Params, PositionView, StrategyRegistry, StrategySettings, StrategyState, Tick,
        TradeSide, EXIT_END_OF_DATA, EXIT_STOP_LOSS, EXIT_TRAILING_STOP,
    };
    use serde_json::json;

    const MIDNIGHT: i64 = 1_700_006_400; // 2023-11-15 00:00:00 UTC

    fn hourly_candles(start: i64, closes: &[f64]) -> Vec<Candle> {
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

    fn long_position(entry: f64, state: Option<StrategyState>) -> PositionView {
        PositionView {
            side: TradeSide::Long,
            entry_price: entry,
            size: 1.0,
            stop_loss: Some(entry * 0.90),
            take_profit: None,
            opened_at: Utc.timestamp_opt(MIDNIGHT, 0).unwrap(),
            state,
        }
    }

    // ---- EMA crossover ----

    #[test]
    fn test_ema_cross_exits_on_death_cross() {
        let mut params = Params::new();
        params.insert("short_period".to_string(), json!(2));
        params.insert("long_period".to_string(), json!(5));
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry.create("ema_cross", settings(), &params).unwrap();

        // Uptrend, then a collapse that flips the fast EMA under the slow.
        let closes = [100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0, 100.0];
        let candles = hourly_candles(MIDNIGHT, &closes);
        let position = long_position(103.0, None);

        let tick = Tick::new(&candles, None, Some(&position));
        match strategy.decide(&tick).unwrap() {
            Action::Exit { reason } => assert_eq!(reason, "Crossover Exit"),
            other => panic!("expected exit, got {:?}", other),
        }
    }

    // ---- Bollinger band reversion ----

    fn band_params() -> Params {
        let mut params = Params::new();
        params.insert("trend_ema_period".to_string(), json!(10));
        params.insert("vol_window".to_string(), json!(5));
        params.insert("vol_ma_window".to_string(), json!(5));
        params
    }

    /// Long plateau at 100, a dip to 95, then one test-controlled close.
    fn plateau_dip_series(last_close: f64) -> Vec<Candle> {
        let mut closes = vec![100.0; 28];
        closes.push(95.0);
        closes.push(last_close);
        hourly_candles(MIDNIGHT, &closes)
    }

    #[test]
    fn test_band_reversion_enters_on_dip_in_uptrend() {
        let registry = StrategyRegistry::builtin();
        // Default parameters: the trend EMA trails a long ramp far enough
        // that a dip through the band stays above it.
        let mut strategy = registry
            .create("band_reversion", settings(), &Params::new())
            .unwrap();

        let mut closes: Vec<f64> = (0..110).map(|i| 50.0 + 0.25 * i as f64).collect();
        closes.push(71.5); // sharp dip under the lower band
        let candles = hourly_candles(MIDNIGHT, &closes);

        let tick = Tick::new(&candles, None, None);
        match strategy.decide(&tick).unwrap() {
            Action::Enter(order) => {
                assert_eq!(order.side, TradeSide::Long);
                assert!(order.protective_orders);
                assert!((order.stop_loss.unwrap() - 71.5 * 0.98).abs() < 1e-9);
                match order.state {
                    Some(StrategyState::TrailingStop { activated, .. }) => assert!(!activated),
                    other => panic!("expected trailing state, got {:?}", other),
                }
            }
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_band_reversion_arms_trailing_after_activation_move() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("band_reversion", settings(), &band_params())
            .unwrap();

        // Up 1.58% from the 95 entry, still below the middle band.
        let candles = plateau_dip_series(96.5);
        let position = long_position(95.0, Some(StrategyState::trailing_stop(false, 93.1)));

        let tick = Tick::new(&candles, None, Some(&position));
        match strategy.decide(&tick).unwrap() {
            Action::UpdateState(update) => {
                assert!(update.stop_loss.is_none());
                match update.state {
                    Some(StrategyState::TrailingStop { activated, stop_price, .. }) => {
                        assert!(activated);
                        assert!((stop_price - 96.5 * 0.995).abs() < 1e-9);
                    }
                    other => panic!("expected trailing state, got {:?}", other),
                }
            }
            other => panic!("expected state update, got {:?}", other),
        }
    }

    #[test]
    fn test_band_reversion_ratchets_armed_stop_upward() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("band_reversion", settings(), &band_params())
            .unwrap();

        let candles = plateau_dip_series(97.0);
        let position = long_position(95.0, Some(StrategyState::trailing_stop(true, 96.0)));

        let tick = Tick::new(&candles, None, Some(&position));
        match strategy.decide(&tick).unwrap() {
            Action::UpdateState(update) => match update.state {
                Some(StrategyState::TrailingStop { activated, stop_price, .. }) => {
                    assert!(activated);
                    assert!((stop_price - 97.0 * 0.995).abs() < 1e-9);
                }
                other => panic!("expected trailing state, got {:?}", other),
            },
            other => panic!("expected state update, got {:?}", other),
        }
    }

    #[test]
    fn test_band_reversion_never_loosens_armed_stop() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("band_reversion", settings(), &band_params())
            .unwrap();

        // Offset stop from 97.0 would be 96.515, below the current 96.9.
        let candles = plateau_dip_series(97.0);
        let position = long_position(95.0, Some(StrategyState::trailing_stop(true, 96.9)));

        let tick = Tick::new(&candles, None, Some(&position));
        assert!(matches!(strategy.decide(&tick).unwrap(), Action::Hold));
    }

    #[test]
    fn test_band_reversion_armed_stop_exit_wins() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("band_reversion", settings(), &band_params())
            .unwrap();

        let candles = plateau_dip_series(96.5);
        let position = long_position(95.0, Some(StrategyState::trailing_stop(true, 96.6)));

        let tick = Tick::new(&candles, None, Some(&position));
        match strategy.decide(&tick).unwrap() {
            Action::Exit { reason } => assert_eq!(reason, EXIT_TRAILING_STOP),
            other => panic!("expected trailing exit, got {:?}", other),
        }
    }

    #[test]
    fn test_band_reversion_exits_at_middle_band() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("band_reversion", settings(), &band_params())
            .unwrap();

        // Middle band sits at (12 * 100 + 95 + 99.7) / 14 = 99.62
        let candles = plateau_dip_series(99.7);
        let position = long_position(95.0, Some(StrategyState::trailing_stop(false, 93.1)));

        let tick = Tick::new(&candles, None, Some(&position));
        match strategy.decide(&tick).unwrap() {
            Action::Exit { reason } => assert_eq!(reason, "Band Target"),
            other => panic!("expected band target exit, got {:?}", other),
        }
    }

    // ---- Opening range breakout ----

    fn breakout_params() -> Params {
        let mut params = Params::new();
        params.insert("opening_range_bars".to_string(), json!(3));
        params
    }

    #[test]
    fn test_range_breakout_closes_position_at_day_rollover() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("range_breakout", settings(), &breakout_params())
            .unwrap();

        // Day one: range 98.5-101.5 over the first three bars, breakout at
        // 102.2, held through the close. Day two opens with the exit.
        let closes = [
            100.0, 101.0, 99.0, 102.2, 103.0, 102.5, // day 1 (6 of 24 bars)
        ];
        let mut candles = hourly_candles(MIDNIGHT, &closes);
        let day2 = [102.0, 101.5, 101.0, 100.5];
        candles.extend(hourly_candles(MIDNIGHT + 24 * 3600, &day2));

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.reason, "Session Close");
        assert_eq!(trade.entry_price, 102.2);
        assert_eq!(trade.exit_price, 102.0);
        assert_eq!(trade.exit_time, candles[6].timestamp);
    }

    #[test]
    fn test_range_breakout_trades_once_per_session() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("range_breakout", settings(), &breakout_params())
            .unwrap();

        // Breakout at bar 3, take-profit hit at bar 4; bar 5 closes above
        // the trigger again but the session already traded.
        let closes = [100.0, 101.0, 99.0, 102.2, 103.5, 103.0];
        let candles = hourly_candles(MIDNIGHT, &closes);

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.reason, "TP");
        assert!((trade.exit_price - 102.2 * 1.01).abs() < 1e-9);
    }

    // ---- DCA grid ----

    #[test]
    fn test_grid_dca_climbs_the_take_profit_ladder() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("grid_dca", settings(), &Params::new())
            .unwrap();

        // Base fill at 100, one safety fill at 99, then rungs at +1%, +3%
        // and +20% of the 99.497 average entry.
        let closes = [100.0, 99.0, 99.0, 101.0, 101.0, 103.0, 103.0, 120.0];
        let candles = hourly_candles(MIDNIGHT, &closes);

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 3);
        let reasons: Vec<&str> = report.trades.iter().map(|t| t.reason.as_str()).collect();
        assert_eq!(reasons, ["TP1", "TP2", "TP3"]);

        let avg = 20.0 / (0.1 + 10.0 / 99.0);
        for trade in &report.trades {
            assert!((trade.entry_price - avg).abs() < 1e-6);
            assert!(trade.pnl > 0.0);
        }
        // TP1 closes 40% of the averaged-in size
        assert!((report.trades[0].size - (0.1 + 10.0 / 99.0) * 0.4).abs() < 1e-9);
        assert_eq!(report.trades[2].exit_price, 120.0);
        assert_eq!(report.winning_trades, 3);
    }

    #[test]
    fn test_grid_dca_stop_ratchets_to_break_even_after_tp1() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("grid_dca", settings(), &Params::new())
            .unwrap();

        // After TP1 the stop moves to the average entry; the drop to 98.5
        // then stops out the remainder at break-even.
        let closes = [100.0, 99.0, 99.0, 101.0, 101.0, 98.5];
        let candles = hourly_candles(MIDNIGHT, &closes);

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 2);
        assert_eq!(report.trades[0].reason, "TP1");
        let stop_out = &report.trades[1];
        assert_eq!(stop_out.reason, EXIT_STOP_LOSS);
        assert!((stop_out.exit_price - stop_out.entry_price).abs() < 1e-6);
        assert!(stop_out.pnl.abs() < 1e-6);
    }

    #[test]
    fn test_grid_dca_ladders_down_from_the_base_fill() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("grid_dca", settings(), &Params::new())
            .unwrap();

        // Rungs at 99, 98 and 97 are one percent steps from the 100 base
        // fill, not from the running average.
        let closes = [100.0, 99.0, 98.0, 97.0];
        let candles = hourly_candles(MIDNIGHT, &closes);

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.reason, EXIT_END_OF_DATA);
        let expected_size = 0.1 + 10.0 / 99.0 + 10.0 / 98.0 + 10.0 / 97.0;
        assert!((trade.size - expected_size).abs() < 1e-9);
        assert!(trade.pnl < 0.0);
    }

    #[test]
    fn test_grid_dca_respects_max_safety_orders() {
        let mut params = Params::new();
        params.insert("max_safety_orders".to_string(), json!(1));
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry.create("grid_dca", settings(), &params).unwrap();

        let closes = [100.0, 99.0, 98.0, 97.0];
        let candles = hourly_candles(MIDNIGHT, &closes);

        let report = backtest::run(strategy.as_mut(), &candles).unwrap();

        assert_eq!(report.total_trades, 1);
        // Only the base fill and the single allowed safety fill
        let expected_size = 0.1 + 10.0 / 99.0;
        assert!((report.trades[0].size - expected_size).abs() < 1e-9);
    }

    // ---- Multi-timeframe momentum ----

    fn momentum_params() -> Params {
        let mut params = Params::new();
        params.insert("macd_fast".to_string(), json!(3));
        params.insert("macd_slow".to_string(), json!(6));
        params.insert("macd_signal".to_string(), json!(3));
        params.insert("trend_ema_period".to_string(), json!(10));
        params.insert("rsi_period".to_string(), json!(5));
        params.insert("rsi_ceiling".to_string(), json!(95.0));
        params
    }

    /// Twenty bars straight down, a choppy fourteen-bar recovery, then a
    /// fresh slide. The MACD crosses up during the recovery and back down
    /// on the slide.
    fn v_reversal_series() -> Vec<Candle> {
        let mut closes: Vec<f64> = (0..20).map(|i| 110.0 - i as f64).collect();
        let mut price = 91.0;
        for i in 0..14 {
            price += if i % 2 == 0 { 2.0 } else { -0.5 };
            closes.push(price);
        }
        for i in 1..=8 {
            closes.push(price - 2.0 * i as f64);
        }
        hourly_candles(MIDNIGHT, &closes)
    }

    fn rising_aux_series() -> Vec<Candle> {
        let closes: Vec<f64> = (0..20).map(|i| 90.0 + 2.0 * i as f64).collect();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                Candle::new(
                    Utc.timestamp_opt(MIDNIGHT + i as i64 * 4 * 3600, 0).unwrap(),
                    close,
                    close + 0.5,
                    close - 0.5,
                    close,
                    400.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_mtf_momentum_never_enters_without_aux_series() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("mtf_momentum", settings(), &momentum_params())
            .unwrap();

        let candles = v_reversal_series();
        for i in 11..=candles.len() {
            let tick = Tick::new(&candles[..i], None, None);
            let action = strategy.decide(&tick).unwrap();
            assert!(
                matches!(action, Action::Hold),
                "tick {} produced {:?} without a trend series",
                i,
                action
            );
        }
    }

    #[test]
    fn test_mtf_momentum_full_cycle_with_uptrend_gate() {
        let registry = StrategyRegistry::builtin();
        let mut strategy = registry
            .create("mtf_momentum", settings(), &momentum_params())
            .unwrap();

        let candles = v_reversal_series();
        let aux = rising_aux_series();

        let mut position: Option<PositionView> = None;
        let mut entered_at = None;
        let mut exited_at = None;
        for i in 11..=candles.len() {
            let tick = Tick::new(&candles[..i], Some(aux.as_slice()), position.as_ref());
            match strategy.decide(&tick).unwrap() {
                Action::Enter(order) if position.is_none() => {
                    if entered_at.is_none() {
                        entered_at = Some(i);
                    }
                    position = Some(PositionView {
                        side: order.side,
                        entry_price: candles[i - 1].close,
                        size: 1.0,
                        stop_loss: None,
                        take_profit: None,
                        opened_at: candles[i - 1].timestamp,
                        state: order.state,
                    });
                }
                Action::Exit { reason } if position.is_some() => {
                    assert_eq!(reason, "Momentum Fade");
                    if exited_at.is_none() {
                        exited_at = Some(i);
                    }
                    position = None;
                }
                _ => {}
            }
        }

        let entered_at = entered_at.expect("no entry fired during the recovery");
        let exited_at = exited_at.expect("no exit fired after the entry");
        assert!(exited_at > entered_at);
    }
}
