//! Backtest requests and the worker that runs them
//!
//! A request is validated up front (range, timeframe, strategy key and
//! parameters), queued as a `backtest_runs` row and handed to a spawned
//! worker. The worker pages historical candles from the public market-data
//! API, runs the same decision kernel the live loop uses and persists the
//! report. Every run ends in a terminal status: `completed`, `failed` or
//! `no_data`.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveValue, DatabaseConnection, EntityTrait};
use tracing::{error, info, warn};

use engine::backtest::BacktestReport;
use engine::data::{Candle, Timeframe};
use engine::gateway::{ExchangeGateway, GatewayError};
use engine::strategy::{Params, StrategyError, StrategyRegistry, StrategySettings};
use shared::entity::backtest_runs;

use crate::gateway::RestGateway;
use crate::ledger::to_decimal;
use crate::retry::{with_retry, RetryPolicy};
use crate::service::AppContext;

/// Longest allowed backtest range, leap years included.
pub const MAX_BACKTEST_DAYS: i64 = 366;
/// Candles per page of the historical fetch.
pub const PAGE_LIMIT: usize = 500;

const MSG_NO_DATA: &str = "No historical data found for the requested range.";

const STATUS_RUNNING: &str = "running";
const STATUS_QUEUED: &str = "queued";
const STATUS_COMPLETED: &str = "completed";
const STATUS_FAILED: &str = "failed";
const STATUS_NO_DATA: &str = "no_data";

/// Everything needed to queue one run.
#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub user_id: i64,
    pub strategy_key: String,
    pub symbol: String,
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub capital: f64,
    pub params: Params,
}

/// Rejections raised before a run is queued.
#[derive(Debug, thiserror::Error)]
pub enum BacktestError {
    #[error("start date must be before end date")]
    EmptyRange,

    #[error("date range exceeds {MAX_BACKTEST_DAYS} days")]
    RangeTooLong,

    #[error("unsupported timeframe: {0}")]
    BadTimeframe(String),

    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

/// Check a request before anything is written or fetched. Returns the
/// parsed timeframe and the schema-validated parameter set.
pub fn validate_request(
    registry: &StrategyRegistry,
    request: &BacktestRequest,
) -> Result<(Timeframe, Params), BacktestError> {
    if request.start >= request.end {
        return Err(BacktestError::EmptyRange);
    }
    if request.end - request.start > Duration::days(MAX_BACKTEST_DAYS) {
        return Err(BacktestError::RangeTooLong);
    }
    let timeframe: Timeframe = request
        .timeframe
        .parse()
        .map_err(|_| BacktestError::BadTimeframe(request.timeframe.clone()))?;
    let params = registry.validate(&request.strategy_key, &request.params)?;
    Ok((timeframe, params))
}

/// Validate, queue and spawn one run. Returns the run id right away; the
/// simulation happens on its own task.
pub async fn request_backtest(context: Arc<AppContext>, request: BacktestRequest) -> Result<u64> {
    let (timeframe, params) = validate_request(&context.registry, &request)?;

    let row = backtest_runs::ActiveModel {
        user_id: ActiveValue::Set(request.user_id),
        strategy_key: ActiveValue::Set(request.strategy_key.clone()),
        symbol: ActiveValue::Set(request.symbol.clone()),
        timeframe: ActiveValue::Set(timeframe.as_str().to_string()),
        start_date: ActiveValue::Set(request.start),
        end_date: ActiveValue::Set(request.end),
        capital: ActiveValue::Set(to_decimal(request.capital)),
        params: ActiveValue::Set(Some(serde_json::Value::Object(params.clone()))),
        status: ActiveValue::Set(STATUS_QUEUED.to_string()),
        created_at: ActiveValue::Set(Some(Utc::now())),
        ..Default::default()
    };
    let run_id = backtest_runs::Entity::insert(row)
        .exec(&context.db)
        .await?
        .last_insert_id;
    info!(
        run_id,
        strategy = request.strategy_key.as_str(),
        symbol = request.symbol.as_str(),
        "backtest queued"
    );

    tokio::spawn(run_backtest(context, run_id, request, timeframe, params));
    Ok(run_id)
}

pub async fn backtest_result(
    db: &DatabaseConnection,
    run_id: u64,
) -> Result<Option<backtest_runs::Model>> {
    let run = backtest_runs::Entity::find_by_id(run_id).one(db).await?;
    Ok(run)
}

/// Worker task for one queued run. Whatever happens, the row ends in a
/// terminal status.
async fn run_backtest(
    context: Arc<AppContext>,
    run_id: u64,
    request: BacktestRequest,
    timeframe: Timeframe,
    params: Params,
) {
    if let Err(err) = set_status(&context.db, run_id, STATUS_RUNNING).await {
        error!(run_id, %err, "failed to mark backtest running");
    }

    let outcome = match simulate(&context, &request, timeframe, &params).await {
        Ok(Some(report)) => {
            info!(
                run_id,
                pnl = report.pnl,
                trades = report.total_trades,
                "backtest completed"
            );
            finish_completed(&context.db, run_id, &report).await
        }
        Ok(None) => {
            info!(run_id, "backtest found no data in range");
            finish_with_message(&context.db, run_id, STATUS_NO_DATA, MSG_NO_DATA).await
        }
        Err(err) => {
            let message = format!("{err:#}");
            warn!(run_id, message = message.as_str(), "backtest failed");
            finish_with_message(&context.db, run_id, STATUS_FAILED, &message).await
        }
    };
    if let Err(err) = outcome {
        error!(run_id, %err, "failed to finalize backtest run");
    }
}

/// Fetch the range and run the simulation. `None` means the exchange had
/// no candles for the requested window.
async fn simulate(
    context: &AppContext,
    request: &BacktestRequest,
    timeframe: Timeframe,
    params: &Params,
) -> Result<Option<BacktestReport>> {
    let gateway = RestGateway::public(&context.config.exchange_api_url);
    let candles =
        fetch_range(&gateway, &request.symbol, timeframe, request.start, request.end).await?;
    if candles.is_empty() {
        return Ok(None);
    }

    let settings = StrategySettings::new(&request.symbol, timeframe, request.capital);
    let mut strategy = context
        .registry
        .create(&request.strategy_key, settings, params)?;
    let report = engine::backtest::run(strategy.as_mut(), &candles)?;
    Ok(Some(report))
}

/// Page through history with a since-cursor until the range is covered.
/// Only bars opening inside `[start, end)` are kept.
async fn fetch_range(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Candle>, GatewayError> {
    let retry = RetryPolicy::default();
    let mut candles: Vec<Candle> = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let page = with_retry(retry, "historical candle fetch", || {
            gateway.fetch_candles(symbol, timeframe, Some(cursor), PAGE_LIMIT)
        })
        .await?;
        let Some(last) = page.last() else {
            break;
        };
        let next = last.timestamp + timeframe.duration();
        candles.extend(
            page.iter()
                .filter(|candle| candle.timestamp >= start && candle.timestamp < end)
                .cloned(),
        );
        // A page that does not move the cursor forward would spin forever
        if next <= cursor {
            break;
        }
        cursor = next;
    }
    Ok(candles)
}

async fn run_row(db: &DatabaseConnection, run_id: u64) -> Result<backtest_runs::Model> {
    backtest_runs::Entity::find_by_id(run_id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("backtest run {} not found", run_id))
}

async fn set_status(db: &DatabaseConnection, run_id: u64, status: &str) -> Result<()> {
    let run = run_row(db, run_id).await?;
    let mut update: backtest_runs::ActiveModel = run.into();
    update.status = ActiveValue::Set(status.to_string());
    backtest_runs::Entity::update(update).exec(db).await?;
    Ok(())
}

async fn finish_completed(
    db: &DatabaseConnection,
    run_id: u64,
    report: &BacktestReport,
) -> Result<()> {
    let run = run_row(db, run_id).await?;
    let mut update: backtest_runs::ActiveModel = run.into();
    update.status = ActiveValue::Set(STATUS_COMPLETED.to_string());
    update.pnl = ActiveValue::Set(Some(to_decimal(report.pnl).round_dp(8)));
    update.pnl_pct = ActiveValue::Set(Some(to_decimal(report.pnl_pct).round_dp(4)));
    update.sharpe = ActiveValue::Set(Some(to_decimal(report.sharpe).round_dp(4)));
    update.max_drawdown_pct =
        ActiveValue::Set(Some(to_decimal(report.max_drawdown_pct).round_dp(4)));
    update.total_trades = ActiveValue::Set(Some(report.total_trades as i32));
    update.winning_trades = ActiveValue::Set(Some(report.winning_trades as i32));
    update.losing_trades = ActiveValue::Set(Some(report.losing_trades as i32));
    update.trades_json = ActiveValue::Set(Some(serde_json::to_value(&report.trades)?));
    update.equity_json = ActiveValue::Set(Some(serde_json::to_value(&report.equity_curve)?));
    update.finished_at = ActiveValue::Set(Some(Utc::now()));
    backtest_runs::Entity::update(update).exec(db).await?;
    Ok(())
}

async fn finish_with_message(
    db: &DatabaseConnection,
    run_id: u64,
    status: &str,
    message: &str,
) -> Result<()> {
    let run = run_row(db, run_id).await?;
    let mut update: backtest_runs::ActiveModel = run.into();
    update.status = ActiveValue::Set(status.to_string());
    update.error = ActiveValue::Set(Some(message.to_string()));
    update.finished_at = ActiveValue::Set(Some(Utc::now()));
    backtest_runs::Entity::update(update).exec(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use engine::gateway::{Balance, ExchangeOrder, OrderRequest, Ticker};
    use serde_json::json;

    fn request(start_secs: i64, end_secs: i64) -> BacktestRequest {
        BacktestRequest {
            user_id: 1,
            strategy_key: "ema_cross".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            start: Utc.timestamp_opt(start_secs, 0).unwrap(),
            end: Utc.timestamp_opt(end_secs, 0).unwrap(),
            capital: 1000.0,
            params: Params::new(),
        }
    }

    #[test]
    fn reversed_range_is_rejected() {
        let registry = StrategyRegistry::builtin();
        let req = request(2_000_000, 1_000_000);
        assert!(matches!(
            validate_request(&registry, &req),
            Err(BacktestError::EmptyRange)
        ));
    }

    #[test]
    fn oversized_range_is_rejected() {
        let registry = StrategyRegistry::builtin();
        let req = request(0, (MAX_BACKTEST_DAYS + 1) * 86_400);
        assert!(matches!(
            validate_request(&registry, &req),
            Err(BacktestError::RangeTooLong)
        ));
    }

    #[test]
    fn maximum_range_is_allowed() {
        let registry = StrategyRegistry::builtin();
        let req = request(0, MAX_BACKTEST_DAYS * 86_400);
        assert!(validate_request(&registry, &req).is_ok());
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let registry = StrategyRegistry::builtin();
        let mut req = request(0, 86_400);
        req.strategy_key = "momentum9000".to_string();
        assert!(matches!(
            validate_request(&registry, &req),
            Err(BacktestError::Strategy(StrategyError::UnknownStrategy(_)))
        ));
    }

    #[test]
    fn bad_timeframe_is_rejected() {
        let registry = StrategyRegistry::builtin();
        let mut req = request(0, 86_400);
        req.timeframe = "7m".to_string();
        assert!(matches!(
            validate_request(&registry, &req),
            Err(BacktestError::BadTimeframe(_))
        ));
    }

    #[test]
    fn out_of_range_params_are_rejected() {
        let registry = StrategyRegistry::builtin();
        let mut req = request(0, 86_400);
        req.params = json!({"short_period": 0}).as_object().unwrap().clone();
        assert!(matches!(
            validate_request(&registry, &req),
            Err(BacktestError::Strategy(StrategyError::InvalidParam { .. }))
        ));
    }

    #[test]
    fn validation_fills_parameter_defaults() {
        let registry = StrategyRegistry::builtin();
        let req = request(0, 86_400);
        let (timeframe, params) = validate_request(&registry, &req).unwrap();
        assert_eq!(timeframe, Timeframe::H1);
        assert!(params.contains_key("short_period"));
        assert!(params.contains_key("long_period"));
    }

    /// Serves an hourly series out of memory, honoring `since` and `limit`
    /// like an exchange kline endpoint.
    struct PagedGateway {
        candles: Vec<Candle>,
        calls: AtomicUsize,
    }

    impl PagedGateway {
        fn hourly(count: usize) -> Self {
            let candles = (0..count)
                .map(|i| {
                    Candle::new(
                        Utc.timestamp_opt(i as i64 * 3_600, 0).unwrap(),
                        100.0,
                        101.0,
                        99.0,
                        100.5,
                        10.0,
                    )
                })
                .collect();
            Self {
                candles,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExchangeGateway for PagedGateway {
        async fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            since: Option<DateTime<Utc>>,
            limit: usize,
        ) -> Result<Vec<Candle>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let since = since.unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
            Ok(self
                .candles
                .iter()
                .filter(|candle| candle.timestamp >= since)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker, GatewayError> {
            Err(GatewayError::NotFound("unused".to_string()))
        }

        async fn place_order(
            &self,
            _request: &OrderRequest,
        ) -> Result<ExchangeOrder, GatewayError> {
            Err(GatewayError::Rejected("market data only".to_string()))
        }

        async fn cancel_order(&self, _id: &str, _symbol: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn fetch_order(
            &self,
            _id: &str,
            _symbol: &str,
        ) -> Result<ExchangeOrder, GatewayError> {
            Err(GatewayError::NotFound("unused".to_string()))
        }

        async fn fetch_open_orders(
            &self,
            _symbol: &str,
        ) -> Result<Vec<ExchangeOrder>, GatewayError> {
            Ok(Vec::new())
        }

        async fn fetch_balance(&self) -> Result<Vec<Balance>, GatewayError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn fetch_range_stitches_pages_in_order() {
        let gateway = PagedGateway::hourly(1_200);
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let end = Utc.timestamp_opt(1_000 * 3_600, 0).unwrap();

        let candles = fetch_range(&gateway, "BTCUSDT", Timeframe::H1, start, end)
            .await
            .unwrap();

        assert_eq!(candles.len(), 1_000);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(candles[0].timestamp, start);
        assert_eq!(
            candles.last().unwrap().timestamp,
            Utc.timestamp_opt(999 * 3_600, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn fetch_range_past_available_history_is_empty() {
        let gateway = PagedGateway::hourly(100);
        let start = Utc.timestamp_opt(200 * 3_600, 0).unwrap();
        let end = Utc.timestamp_opt(300 * 3_600, 0).unwrap();

        let candles = fetch_range(&gateway, "BTCUSDT", Timeframe::H1, start, end)
            .await
            .unwrap();

        assert!(candles.is_empty());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }
}
