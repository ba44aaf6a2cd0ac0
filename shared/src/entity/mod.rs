pub mod api_credentials;
pub mod backtest_runs;
pub mod orders;
pub mod positions;
pub mod subscriptions;
