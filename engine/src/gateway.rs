//! Exchange gateway contract
//!
//! The engine only ever talks to an exchange through this trait; the live
//! implementation lives in the runner, tests use scripted fakes. The gateway
//! is a dumb pipe: it performs exactly one exchange call per method and never
//! retries. Retry policy belongs to the caller, keyed off `is_transient`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::data::{Candle, Timeframe};

/// Failure taxonomy for every gateway call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Bad or expired credentials. Fatal for the subscription.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Timeouts, connection resets, 5xx, rate limiting. Worth retrying.
    #[error("network error: {0}")]
    Network(String),

    /// The exchange refused the order (precision, market closed, filters).
    /// Retrying the same request would fail the same way.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Not enough balance for the requested amount. The signal is skipped.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The order id is unknown to the exchange, usually because it already
    /// filled or was canceled. The caller reconciles from position state.
    #[error("not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// Only network failures are safe to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Network(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::StopMarket => "stop_market",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Rejected => "rejected",
        }
    }
}

/// Everything needed to place one order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: f64,
    /// Limit price, required for limit orders
    pub price: Option<f64>,
    /// Trigger price, required for stop-market orders
    pub stop_price: Option<f64>,
    /// Only ever shrink an existing position, never open or grow one
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, amount: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_type: OrderType::Market,
            side,
            amount,
            price: None,
            stop_price: None,
            reduce_only: false,
        }
    }

    pub fn limit(symbol: &str, side: OrderSide, amount: f64, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_type: OrderType::Limit,
            side,
            amount,
            price: Some(price),
            stop_price: None,
            reduce_only: false,
        }
    }

    pub fn stop_market(symbol: &str, side: OrderSide, amount: f64, stop_price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_type: OrderType::StopMarket,
            side,
            amount,
            price: None,
            stop_price: Some(stop_price),
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// One order as the exchange reports it.
#[derive(Debug, Clone)]
pub struct ExchangeOrder {
    /// Exchange-assigned order id
    pub id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    /// Quantity filled so far
    pub filled: f64,
    /// Volume-weighted fill price once anything has filled
    pub average_fill_price: Option<f64>,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

impl ExchangeOrder {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    /// Best known execution price: average fill, else limit/stop level.
    pub fn effective_price(&self) -> Option<f64> {
        self.average_fill_price.or(self.price).or(self.stop_price)
    }
}

/// Last traded price for a symbol.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub timestamp: DateTime<Utc>,
}

/// Free and locked balance of one asset.
#[derive(Debug, Clone)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

/// Dyn-safe exchange client used by the live executor and the backtest
/// data fetch.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Ordered (oldest first) OHLCV candles. The last element may be the
    /// still-forming bar; callers trim it before deciding.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeOrder, GatewayError>;

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<(), GatewayError>;

    async fn fetch_order(&self, id: &str, symbol: &str) -> Result<ExchangeOrder, GatewayError>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<ExchangeOrder>, GatewayError>;

    async fn fetch_balance(&self) -> Result<Vec<Balance>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_transient() {
        assert!(GatewayError::Network("timeout".into()).is_transient());
        assert!(!GatewayError::Auth("bad key".into()).is_transient());
        assert!(!GatewayError::Rejected("LOT_SIZE".into()).is_transient());
        assert!(!GatewayError::InsufficientFunds("balance".into()).is_transient());
        assert!(!GatewayError::NotFound("gone".into()).is_transient());
    }

    #[test]
    fn order_request_builders() {
        let req = OrderRequest::stop_market("BTCUSDT", OrderSide::Sell, 0.5, 98.0).reduce_only();
        assert_eq!(req.order_type, OrderType::StopMarket);
        assert_eq!(req.stop_price, Some(98.0));
        assert!(req.reduce_only);
        assert_eq!(req.side.opposite(), OrderSide::Buy);
    }
}
