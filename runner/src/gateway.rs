//! Signed REST implementation of the exchange gateway.
//!
//! Targets a Binance-compatible spot API: public market data endpoints are
//! plain GETs, account endpoints carry an HMAC-SHA256 signature over the
//! query string plus an `X-MBX-APIKEY` header. One exchange call per trait
//! method, no retries here; the caller decides what is worth retrying via
//! [`GatewayError::is_transient`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

use engine::data::{Candle, Timeframe};
use engine::gateway::{
    Balance, ExchangeGateway, ExchangeOrder, GatewayError, OrderRequest, OrderSide, OrderStatus,
    OrderType, Ticker,
};
use shared::crypto::ApiCredentials;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_RECV_WINDOW: u64 = 5_000;

/// REST gateway over a Binance-style exchange API.
///
/// Construct with [`RestGateway::public`] for market data only (backtest
/// candle fetch) or [`RestGateway::with_credentials`] for a live
/// subscription.
pub struct RestGateway {
    http: Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
    recv_window: u64,
}

impl RestGateway {
    pub fn new(base_url: &str, credentials: Option<ApiCredentials>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("http client initialization failed");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window: DEFAULT_RECV_WINDOW,
        }
    }

    /// Market-data-only gateway; account endpoints fail with `Auth`.
    pub fn public(base_url: &str) -> Self {
        Self::new(base_url, None)
    }

    pub fn with_credentials(base_url: &str, credentials: ApiCredentials) -> Self {
        Self::new(base_url, Some(credentials))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn creds(&self) -> Result<&ApiCredentials, GatewayError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| GatewayError::Auth("gateway has no API credentials".to_string()))
    }

    async fn public_get<T>(&self, path: &str, params: &[(String, String)]) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let url = if params.is_empty() {
            self.url(path)
        } else {
            format!("{}?{}", self.url(path), encode_query(params))
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(response).await
    }

    async fn signed_request<T>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let creds = self.creds()?;
        params.push(("recvWindow".to_string(), self.recv_window.to_string()));
        params.push((
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        ));
        let query = encode_query(&params);
        let signature = sign(&creds.api_secret, &query);
        let url = format!("{}?{}&signature={}", self.url(path), query, signature);

        let response = self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(response).await
    }
}

#[async_trait]
impl ExchangeGateway for RestGateway {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), timeframe.as_str().to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(since) = since {
            params.push((
                "startTime".to_string(),
                since.timestamp_millis().to_string(),
            ));
        }
        let rows: Vec<Vec<Value>> = self.public_get("/api/v3/klines", &params).await?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            match parse_kline_row(row) {
                Some(candle) => candles.push(candle),
                None => warn!(symbol, "skipping malformed kline row"),
            }
        }
        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let response: TickerResponse = self.public_get("/api/v3/ticker/price", &params).await?;
        let last = parse_f64(&response.price).ok_or_else(|| {
            GatewayError::Network(format!("unparseable ticker price: {}", response.price))
        })?;
        Ok(Ticker {
            symbol: response.symbol,
            last,
            timestamp: Utc::now(),
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeOrder, GatewayError> {
        let client_order_id = format!("tp-{}", Uuid::new_v4().simple());
        let mut params = vec![
            ("symbol".to_string(), request.symbol.clone()),
            ("side".to_string(), wire_side(request.side).to_string()),
            ("type".to_string(), wire_order_type(request.order_type).to_string()),
            ("quantity".to_string(), format!("{}", request.amount)),
            ("newClientOrderId".to_string(), client_order_id),
            ("newOrderRespType".to_string(), "RESULT".to_string()),
        ];
        if let Some(price) = request.price {
            params.push(("price".to_string(), format!("{}", price)));
            params.push(("timeInForce".to_string(), "GTC".to_string()));
        }
        if let Some(stop_price) = request.stop_price {
            params.push(("stopPrice".to_string(), format!("{}", stop_price)));
        }
        if request.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }
        let response: OrderResponse = self
            .signed_request(Method::POST, "/api/v3/order", params)
            .await?;
        Ok(to_exchange_order(response))
    }

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<(), GatewayError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), id.to_string()),
        ];
        self.signed_request::<Value>(Method::DELETE, "/api/v3/order", params)
            .await?;
        Ok(())
    }

    async fn fetch_order(&self, id: &str, symbol: &str) -> Result<ExchangeOrder, GatewayError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), id.to_string()),
        ];
        let response: OrderResponse = self
            .signed_request(Method::GET, "/api/v3/order", params)
            .await?;
        Ok(to_exchange_order(response))
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<ExchangeOrder>, GatewayError> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let response: Vec<OrderResponse> = self
            .signed_request(Method::GET, "/api/v3/openOrders", params)
            .await?;
        Ok(response.into_iter().map(to_exchange_order).collect())
    }

    async fn fetch_balance(&self) -> Result<Vec<Balance>, GatewayError> {
        let response: AccountResponse = self
            .signed_request(Method::GET, "/api/v3/account", Vec::new())
            .await?;
        let balances = response
            .balances
            .into_iter()
            .filter_map(|entry| {
                let free = parse_f64(&entry.free)?;
                let locked = parse_f64(&entry.locked)?;
                Some(Balance {
                    asset: entry.asset,
                    free,
                    locked,
                })
            })
            .collect();
        Ok(balances)
    }
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    status: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    orig_qty: String,
    executed_qty: String,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    stop_price: Option<String>,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
    #[serde(default)]
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Query values here are symbols, integers and decimal numbers, so plain
/// `key=value` joining is sufficient; nothing needs percent-encoding.
fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn sign(secret: &str, query: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Network(err.to_string())
}

async fn decode_response<T>(response: reqwest::Response) -> Result<T, GatewayError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|err| GatewayError::Network(format!("unexpected response body: {}", err)))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(classify_http(status, &body))
    }
}

/// Map an HTTP failure to the gateway error taxonomy. Pure so the mapping
/// table stays unit-testable without a server.
fn classify_http(status: StatusCode, body: &str) -> GatewayError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| format!("{} (code {})", e.msg, e.code))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.to_string()
            } else {
                trimmed.to_string()
            }
        });

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return GatewayError::Auth(message);
    }
    // 418 is the exchange's IP-ban escalation of 429.
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::IM_A_TEAPOT
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return GatewayError::Network(message);
    }

    match parsed {
        Some(err) => match err.code {
            -2011 | -2013 => GatewayError::NotFound(message),
            // Timestamp outside recvWindow; the next request signs a fresh one.
            -1021 => GatewayError::Network(message),
            -2010 if err.msg.to_lowercase().contains("insufficient balance") => {
                GatewayError::InsufficientFunds(message)
            }
            _ => GatewayError::Rejected(message),
        },
        None => GatewayError::Rejected(message),
    }
}

/// One kline row: `[openTime, open, high, low, close, volume, closeTime, ...]`
/// with prices and volume as strings.
fn parse_kline_row(row: &[Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    let open_time_ms = row[0].as_i64()?;
    let timestamp = Utc.timestamp_millis_opt(open_time_ms).single()?;
    let open = parse_f64(row[1].as_str()?)?;
    let high = parse_f64(row[2].as_str()?)?;
    let low = parse_f64(row[3].as_str()?)?;
    let close = parse_f64(row[4].as_str()?)?;
    let volume = parse_f64(row[5].as_str()?)?;
    Some(Candle::new(timestamp, open, high, low, close, volume))
}

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

fn wire_side(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

fn wire_order_type(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::StopMarket => "STOP_MARKET",
    }
}

fn parse_side(s: &str) -> OrderSide {
    match s {
        "SELL" => OrderSide::Sell,
        "BUY" => OrderSide::Buy,
        other => {
            warn!(side = other, "unhandled order side, assuming buy");
            OrderSide::Buy
        }
    }
}

fn parse_order_type(s: &str) -> OrderType {
    match s {
        "LIMIT" => OrderType::Limit,
        "STOP_MARKET" | "STOP_LOSS" | "STOP_LOSS_LIMIT" => OrderType::StopMarket,
        "MARKET" => OrderType::Market,
        other => {
            warn!(order_type = other, "unhandled order type, assuming market");
            OrderType::Market
        }
    }
}

fn map_order_status(status: &str) -> OrderStatus {
    match status {
        "NEW" | "PARTIALLY_FILLED" | "PENDING_NEW" => OrderStatus::Open,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "PENDING_CANCEL" | "EXPIRED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        other => {
            warn!(status = other, "unhandled order status, treating as open");
            OrderStatus::Open
        }
    }
}

fn to_exchange_order(response: OrderResponse) -> ExchangeOrder {
    let amount = parse_f64(&response.orig_qty).unwrap_or(0.0);
    let filled = parse_f64(&response.executed_qty).unwrap_or(0.0);
    let average_fill_price = if filled > 0.0 {
        response
            .cummulative_quote_qty
            .as_deref()
            .and_then(parse_f64)
            .filter(|quote| *quote > 0.0)
            .map(|quote| quote / filled)
    } else {
        None
    };
    // Market orders report price "0.00000000"; treat that as absent.
    let price = response
        .price
        .as_deref()
        .and_then(parse_f64)
        .filter(|p| *p > 0.0);
    let stop_price = response
        .stop_price
        .as_deref()
        .and_then(parse_f64)
        .filter(|p| *p > 0.0);
    let timestamp_ms = response
        .transact_time
        .or(response.update_time)
        .or(response.time);
    let timestamp = timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    ExchangeOrder {
        id: response.order_id.to_string(),
        symbol: response.symbol,
        order_type: parse_order_type(&response.order_type),
        side: parse_side(&response.side),
        amount,
        price,
        stop_price,
        filled,
        average_fill_price,
        status: map_order_status(&response.status),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_matches_reference_vector() {
        // Keys and expected digest from the exchange API documentation.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, query),
            "c8db1bf51bccf5c1ecb15a4f7c9c34a06af28da25ee9e8d85115a04f95aba6e8"
        );
    }

    #[test]
    fn query_encoding_preserves_order() {
        let params = vec![
            ("symbol".to_string(), "BTCUSDT".to_string()),
            ("side".to_string(), "BUY".to_string()),
            ("quantity".to_string(), "0.5".to_string()),
        ];
        assert_eq!(encode_query(&params), "symbol=BTCUSDT&side=BUY&quantity=0.5");
    }

    #[test]
    fn http_failures_map_to_error_taxonomy() {
        let auth = classify_http(StatusCode::UNAUTHORIZED, "");
        assert!(matches!(auth, GatewayError::Auth(_)));

        let throttled = classify_http(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(throttled.is_transient());

        let outage = classify_http(StatusCode::SERVICE_UNAVAILABLE, "upstream down");
        assert!(outage.is_transient());

        let broke = classify_http(
            StatusCode::BAD_REQUEST,
            r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#,
        );
        assert!(matches!(broke, GatewayError::InsufficientFunds(_)));

        let gone = classify_http(
            StatusCode::BAD_REQUEST,
            r#"{"code":-2013,"msg":"Order does not exist."}"#,
        );
        assert!(matches!(gone, GatewayError::NotFound(_)));

        let filtered = classify_http(
            StatusCode::BAD_REQUEST,
            r#"{"code":-1013,"msg":"Filter failure: LOT_SIZE"}"#,
        );
        assert!(matches!(filtered, GatewayError::Rejected(_)));
        assert!(!filtered.is_transient());
    }

    #[test]
    fn kline_row_parses_to_candle() {
        let row = json!([
            1699920000000i64,
            "36500.10",
            "36750.00",
            "36420.00",
            "36701.50",
            "1234.567",
            1699923599999i64,
            "45000000.0",
            98765,
            "600.0",
            "22000000.0",
            "0"
        ]);
        let candle = parse_kline_row(row.as_array().unwrap()).unwrap();
        assert_eq!(candle.timestamp.timestamp(), 1_699_920_000);
        assert!((candle.open - 36500.10).abs() < 1e-9);
        assert!((candle.close - 36701.50).abs() < 1e-9);
        assert!((candle.volume - 1234.567).abs() < 1e-9);

        let short = json!([1699920000000i64, "1.0"]);
        assert!(parse_kline_row(short.as_array().unwrap()).is_none());
    }

    #[test]
    fn filled_order_reports_average_fill_price() {
        let response: OrderResponse = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "orderId": 28,
            "status": "FILLED",
            "type": "MARKET",
            "side": "BUY",
            "origQty": "2.00000000",
            "executedQty": "2.00000000",
            "cummulativeQuoteQty": "73000.00000000",
            "price": "0.00000000",
            "transactTime": 1699920000123i64
        }))
        .unwrap();
        let order = to_exchange_order(response);
        assert_eq!(order.id, "28");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.price, None);
        assert!((order.average_fill_price.unwrap() - 36500.0).abs() < 1e-9);
        assert!((order.effective_price().unwrap() - 36500.0).abs() < 1e-9);
    }

    #[test]
    fn open_order_has_no_average_price() {
        let response: OrderResponse = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "orderId": 29,
            "status": "NEW",
            "type": "STOP_MARKET",
            "side": "SELL",
            "origQty": "1.00000000",
            "executedQty": "0.00000000",
            "stopPrice": "34000.00000000",
            "time": 1699920000123i64
        }))
        .unwrap();
        let order = to_exchange_order(response);
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.average_fill_price, None);
        assert_eq!(order.stop_price, Some(34000.0));
        assert_eq!(order.order_type, OrderType::StopMarket);
        assert!(order.is_open());
    }
}
