//! Binance USDⓈ-M futures client
//!
//! Public market data needs no credentials. Account and order endpoints are
//! signed with HMAC-SHA256 over the query string. Every request goes through
//! the circuit breaker and the rate limiter and is retried with exponential
//! backoff while the failure is retryable. New orders are the exception: a
//! failed submission may still have reached the book, so it is looked up by
//! client order id before anything is sent again.
//!
//! # Example
//! ```no_run
//! use fib_short_trader::config::ExchangeConfig;
//! use fib_short_trader::exchange::{BinanceFuturesClient, MarketData};
//! use fib_short_trader::Symbol;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BinanceFuturesClient::new(&ExchangeConfig::default())?;
//!     let candles = client.get_candles(&Symbol::new("ETHUSDT"), "4h", 500).await?;
//!     println!("Fetched {} candles", candles.len());
//!     Ok(())
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{
    CircuitBreaker, CircuitBreakerConfig, ExchangeError, ExchangePosition, ExchangeResult,
    GatewayOrder, MarketData, OrderAck, OrderGateway, RateLimiter,
};
use crate::config::ExchangeConfig;
use crate::instrument::Instrument;
use crate::{Candle, OrderKind, Side, Symbol};

type HmacSha256 = Hmac<Sha256>;

/// Binance caps klines per request
const MAX_KLINES_PER_REQUEST: u32 = 1500;

const ORDER_PATH: &str = "/fapi/v1/order";

/// `newClientOrderId` already used by an order on this account
const DUPLICATE_CLIENT_ORDER_ID: i64 = -4116;
/// Queried order is unknown
const ORDER_DOES_NOT_EXIST: i64 = -2013;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub max_retries: u32,
    pub timeout: Duration,
    /// Requests per second
    pub rate_limit: usize,
    pub circuit_breaker: CircuitBreakerConfig,
    pub recv_window_ms: u64,
    /// Leverage set once per symbol before its first opening order
    pub leverage: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_exchange(&ExchangeConfig::default())
    }
}

impl ClientConfig {
    pub fn from_exchange(config: &ExchangeConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            rate_limit: config.rate_limit,
            circuit_breaker: CircuitBreakerConfig::default(),
            recv_window_ms: config.recv_window_ms,
            leverage: None,
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

#[derive(Clone)]
struct Credentials {
    api_key: String,
    api_secret: String,
}

#[derive(Clone)]
pub struct BinanceFuturesClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    rate_limiter: RateLimiter,
    max_retries: u32,
    recv_window_ms: u64,
    leverage: Option<u32>,
    leverage_set: Arc<Mutex<HashSet<Symbol>>>,
    instruments: Arc<RwLock<HashMap<Symbol, Instrument>>>,
}

impl BinanceFuturesClient {
    /// Client from the exchange section; credentials are optional
    pub fn new(config: &ExchangeConfig) -> ExchangeResult<Self> {
        let mut client = Self::with_config(ClientConfig::from_exchange(config))?;
        if let (Some(key), Some(secret)) = (&config.api_key, &config.api_secret) {
            client = client.with_credentials(key, secret);
        }
        Ok(client)
    }

    pub fn with_config(config: ClientConfig) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ExchangeError::RequestFailed {
                endpoint: "client".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url,
            credentials: None,
            circuit_breaker: Arc::new(Mutex::new(CircuitBreaker::new(config.circuit_breaker))),
            rate_limiter: RateLimiter::per_second(config.rate_limit),
            max_retries: config.max_retries,
            recv_window_ms: config.recv_window_ms,
            leverage: config.leverage,
            leverage_set: Arc::new(Mutex::new(HashSet::new())),
            instruments: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn with_credentials(mut self, api_key: &str, api_secret: &str) -> Self {
        self.credentials = Some(Credentials {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        });
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Execute a request with circuit breaker, rate limiting and retries
    async fn execute_with_retry<F, Fut, T>(
        &self,
        max_retries: u32,
        operation: F,
    ) -> ExchangeResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ExchangeResult<T>>,
    {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.can_attempt() {
                return Err(ExchangeError::CircuitOpen);
            }
        }

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = backoff(attempt);
                debug!("Retrying after {}ms", delay.as_millis());
                sleep(delay).await;
            }
            self.rate_limiter.acquire().await;

            match operation().await {
                Ok(result) => {
                    self.circuit_breaker.lock().await.record_success();
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        self.circuit_breaker.lock().await.record_failure();
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &'static str,
        params: Vec<(&'static str, String)>,
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        self.execute_with_retry(self.max_retries, || {
            let request = self.http.get(&url).query(&params);
            async move { send_and_decode(request, path).await }
        })
        .await
    }

    /// Signed request; timestamp and signature are recomputed per attempt
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &'static str,
        params: Vec<(&'static str, String)>,
    ) -> ExchangeResult<T> {
        self.signed_with_retries(method, path, params, self.max_retries).await
    }

    async fn signed_with_retries<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &'static str,
        params: Vec<(&'static str, String)>,
        max_retries: u32,
    ) -> ExchangeResult<T> {
        let credentials = self
            .credentials
            .clone()
            .ok_or(ExchangeError::MissingCredentials)?;
        let url = format!("{}{}", self.base_url, path);

        self.execute_with_retry(max_retries, || {
            let mut query = encode_query(&params);
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                self.recv_window_ms,
                Utc::now().timestamp_millis()
            ));
            let signature = sign(&query, &credentials.api_secret);

            let request = self
                .http
                .request(method.clone(), format!("{}?{}&signature={}", url, query, signature))
                .header("X-MBX-APIKEY", &credentials.api_key);
            async move { send_and_decode(request, path).await }
        })
        .await
    }

    async fn load_instruments(&self) -> ExchangeResult<()> {
        let info: ExchangeInfo = self.public_get("/fapi/v1/exchangeInfo", vec![]).await?;
        let mut instruments = self.instruments.write().await;
        for symbol in info.symbols {
            instruments.insert(
                Symbol::new(&symbol.symbol),
                instrument_from_filters(&symbol.filters),
            );
        }
        info!("Loaded precision for {} futures symbols", instruments.len());
        Ok(())
    }

    async fn ensure_leverage(&self, symbol: &Symbol) -> ExchangeResult<()> {
        let Some(leverage) = self.leverage else {
            return Ok(());
        };
        if self.leverage_set.lock().await.contains(symbol) {
            return Ok(());
        }
        let _: serde_json::Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                vec![
                    ("symbol", symbol.to_string()),
                    ("leverage", leverage.to_string()),
                ],
            )
            .await?;
        self.leverage_set.lock().await.insert(symbol.clone());
        debug!("Leverage for {} set to {}x", symbol, leverage);
        Ok(())
    }

    /// Submit a new order once per attempt. Without a client order id a
    /// failed submission is not repeated. With one, each retry first asks
    /// the exchange whether the earlier attempt landed, and a duplicate-id
    /// rejection resolves to the order already on the book.
    async fn submit_order(
        &self,
        symbol: &Symbol,
        params: Vec<(&'static str, String)>,
        client_order_id: Option<&str>,
    ) -> ExchangeResult<OrderResponse> {
        let Some(client_order_id) = client_order_id else {
            return self
                .signed_with_retries(Method::POST, ORDER_PATH, params, 0)
                .await;
        };

        let mut attempt = 0;
        loop {
            let error = match self
                .signed_with_retries(Method::POST, ORDER_PATH, params.clone(), 0)
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if api_code(&error) == Some(DUPLICATE_CLIENT_ORDER_ID) {
                return match self.query_order(symbol, client_order_id).await? {
                    Some(existing) => {
                        info!("Order {} already on the book", client_order_id);
                        Ok(existing)
                    }
                    None => Err(error),
                };
            }
            if !error.is_retryable() || attempt >= self.max_retries {
                return Err(error);
            }

            attempt += 1;
            warn!(
                "Order {} submission failed (attempt {}/{}): {}",
                client_order_id,
                attempt,
                self.max_retries + 1,
                error
            );
            sleep(backoff(attempt)).await;
            if let Some(existing) = self.query_order(symbol, client_order_id).await? {
                info!(
                    "Order {} was accepted before the failure, not resending",
                    client_order_id
                );
                return Ok(existing);
            }
        }
    }

    /// Order by client id, `None` when the exchange does not know it
    async fn query_order(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> ExchangeResult<Option<OrderResponse>> {
        let result = self
            .signed(
                Method::GET,
                ORDER_PATH,
                vec![
                    ("symbol", symbol.to_string()),
                    ("origClientOrderId", client_order_id.to_string()),
                ],
            )
            .await;
        match result {
            Ok(order) => Ok(Some(order)),
            Err(e) if api_code(&e) == Some(ORDER_DOES_NOT_EXIST) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl MarketData for BinanceFuturesClient {
    async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        debug!("Fetching klines: symbol={}, interval={}, limit={}", symbol, interval, limit);

        let rows: Vec<Vec<serde_json::Value>> = self
            .public_get(
                "/fapi/v1/klines",
                vec![
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let candles: Vec<Candle> = rows.iter().filter_map(|row| parse_kline(row)).collect();
        if candles.len() < rows.len() {
            warn!(
                "{}: dropped {} malformed klines",
                symbol,
                rows.len() - candles.len()
            );
        }
        Ok(candles)
    }

    async fn get_current_price(&self, symbol: &Symbol) -> ExchangeResult<f64> {
        let ticker: TickerPrice = self
            .public_get("/fapi/v1/ticker/price", vec![("symbol", symbol.to_string())])
            .await?;
        parse_f64(&ticker.price, "ticker price")
    }

    async fn top_symbols(&self, limit: usize) -> ExchangeResult<Vec<Symbol>> {
        let tickers: Vec<Ticker24h> = self.public_get("/fapi/v1/ticker/24hr", vec![]).await?;
        let mut ranked: Vec<(String, f64)> = tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with("USDT") && !t.symbol.contains('_'))
            .map(|t| {
                let volume = t.quote_volume.parse().unwrap_or(0.0);
                (t.symbol, volume)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(symbol, _)| Symbol::new(symbol))
            .collect())
    }

    async fn instrument(&self, symbol: &Symbol) -> ExchangeResult<Instrument> {
        if let Some(instrument) = self.instruments.read().await.get(symbol) {
            return Ok(*instrument);
        }
        self.load_instruments().await?;
        self.instruments
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::decode("exchangeInfo", format!("unknown symbol {}", symbol)))
    }
}

impl OrderGateway for BinanceFuturesClient {
    async fn place_order(&self, order: &GatewayOrder) -> ExchangeResult<OrderAck> {
        let instrument = self.instrument(&order.symbol).await?;
        if !order.reduce_only {
            self.ensure_leverage(&order.symbol).await?;
        }

        let side = if order.reduce_only {
            order.side.closing_order_side()
        } else {
            order.side.opening_order_side()
        };
        let mut params = vec![
            ("symbol", order.symbol.to_string()),
            ("side", side.to_string()),
            ("type", order.kind.to_string()),
            (
                "quantity",
                format!("{:.*}", instrument.qty_precision() as usize, order.quantity),
            ),
        ];
        if order.kind == OrderKind::Limit {
            params.push((
                "price",
                format!("{:.*}", instrument.price_precision() as usize, order.price),
            ));
            params.push(("timeInForce", "GTC".to_string()));
        }
        if order.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        if let Some(id) = &order.client_order_id {
            params.push(("newClientOrderId", id.clone()));
        }

        let response = self
            .submit_order(&order.symbol, params, order.client_order_id.as_deref())
            .await?;
        info!(
            "Exchange order {} {} {} {} -> {} ({})",
            order.kind, side, order.symbol, order.quantity, response.order_id, response.status
        );
        Ok(OrderAck {
            exchange_order_id: response.order_id.to_string(),
            status: response.status,
        })
    }

    async fn cancel_order(&self, symbol: &Symbol, exchange_order_id: &str) -> ExchangeResult<()> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                ORDER_PATH,
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", exchange_order_id.to_string()),
                ],
            )
            .await?;
        info!("Exchange order {} on {} cancelled", exchange_order_id, symbol);
        Ok(())
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        let rows: Vec<PositionRisk> = self
            .signed(Method::GET, "/fapi/v2/positionRisk", vec![])
            .await?;
        let mut positions = Vec::new();
        for row in rows {
            let amount = parse_f64(&row.position_amt, "positionAmt")?;
            if amount == 0.0 {
                continue;
            }
            positions.push(ExchangePosition {
                symbol: Symbol::new(&row.symbol),
                side: if amount > 0.0 { Side::Long } else { Side::Short },
                quantity: amount.abs(),
                entry_price: parse_f64(&row.entry_price, "entryPrice")?,
                unrealized_pnl: parse_f64(&row.un_realized_profit, "unRealizedProfit")?,
            });
        }
        Ok(positions)
    }

    async fn get_balance(&self) -> ExchangeResult<f64> {
        let assets: Vec<AssetBalance> = self
            .signed(Method::GET, "/fapi/v2/balance", vec![])
            .await?;
        match assets.iter().find(|a| a.asset == "USDT") {
            Some(usdt) => parse_f64(&usdt.balance, "balance"),
            None => Ok(0.0),
        }
    }

    fn is_live(&self) -> bool {
        true
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: String,
    entry_price: String,
    un_realized_profit: String,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    balance: String,
}

async fn send_and_decode<T: DeserializeOwned>(
    request: RequestBuilder,
    endpoint: &str,
) -> ExchangeResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| ExchangeError::RequestFailed {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ExchangeError::RequestFailed {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    if !status.is_success() {
        let message = match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) => format!("{} (code {})", body.msg, body.code),
            Err(_) => text,
        };
        return Err(ExchangeError::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&text).map_err(|e| ExchangeError::decode(endpoint, e))
}

/// 1s, 2s, 4s... for the retry after `attempt` failures
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt.saturating_sub(1).min(6)))
}

/// Binance error code carried in an API rejection
fn api_code(error: &ExchangeError) -> Option<i64> {
    match error {
        ExchangeError::Api { message, .. } => message
            .rsplit_once("(code ")?
            .1
            .trim_end_matches(')')
            .parse()
            .ok(),
        _ => None,
    }
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 of the query string
fn sign(query: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn parse_f64(value: &str, what: &str) -> ExchangeResult<f64> {
    value.parse().map_err(|e| ExchangeError::decode(what, e))
}

/// `[open_time, open, high, low, close, volume, ...]` with prices as strings
fn parse_kline(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    let field = |i: usize| -> Option<f64> { row[i].as_str()?.parse().ok() };
    let time = DateTime::<Utc>::from_timestamp_millis(row[0].as_i64()?)?;
    Candle::new(time, field(1)?, field(2)?, field(3)?, field(4)?, field(5)?).ok()
}

fn instrument_from_filters(filters: &[serde_json::Value]) -> Instrument {
    let mut instrument = Instrument::default();
    for filter in filters {
        let decimal = |key: &str| -> Option<Decimal> {
            filter.get(key)?.as_str().and_then(|s| Decimal::from_str(s).ok())
        };
        match filter.get("filterType").and_then(|t| t.as_str()) {
            Some("PRICE_FILTER") => {
                if let Some(tick) = decimal("tickSize") {
                    instrument.tick_size = tick.normalize();
                }
            }
            Some("LOT_SIZE") => {
                if let Some(step) = decimal("stepSize") {
                    instrument.qty_step = step.normalize();
                }
            }
            Some("MIN_NOTIONAL") => {
                if let Some(notional) = decimal("notional") {
                    instrument.min_notional = notional;
                }
            }
            _ => {}
        }
    }
    instrument
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_signature_matches_reference_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(query, secret),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_parse_kline() {
        let row = vec![
            json!(1_700_000_000_000i64),
            json!("100.5"),
            json!("110.0"),
            json!("99.0"),
            json!("105.25"),
            json!("1234.5"),
            json!(1_700_014_399_999i64),
        ];
        let candle = parse_kline(&row).unwrap();
        assert_eq!(candle.time.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(candle.high, 110.0);
        assert_eq!(candle.close, 105.25);

        let broken = vec![json!(1), json!("x"), json!("1"), json!("1"), json!("1"), json!("1")];
        assert!(parse_kline(&broken).is_none());
    }

    #[test]
    fn test_instrument_from_filters() {
        let filters = vec![
            json!({"filterType": "PRICE_FILTER", "tickSize": "0.01000000", "minPrice": "0.01"}),
            json!({"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"}),
            json!({"filterType": "MIN_NOTIONAL", "notional": "5"}),
        ];
        let instrument = instrument_from_filters(&filters);
        assert_eq!(instrument.tick_size, dec!(0.01));
        assert_eq!(instrument.qty_step, dec!(0.001));
        assert_eq!(instrument.min_notional, dec!(5));
        assert_eq!(instrument.price_precision(), 2);
    }

    #[test]
    fn test_encode_query() {
        let params = vec![("symbol", "ETHUSDT".to_string()), ("limit", "5".to_string())];
        assert_eq!(encode_query(&params), "symbol=ETHUSDT&limit=5");
    }

    #[tokio::test]
    async fn test_signed_requests_need_credentials() {
        let client = BinanceFuturesClient::with_config(ClientConfig::default()).unwrap();
        assert!(!client.has_credentials());
        assert!(matches!(
            client.get_balance().await,
            Err(ExchangeError::MissingCredentials)
        ));
    }

    #[test]
    fn test_api_code_from_rejection() {
        let duplicate = ExchangeError::Api {
            status: 400,
            message: "ClientOrderId is duplicated (code -4116)".to_string(),
        };
        assert_eq!(api_code(&duplicate), Some(DUPLICATE_CLIENT_ORDER_ID));

        let missing = ExchangeError::Api {
            status: 400,
            message: "Order does not exist. (code -2013)".to_string(),
        };
        assert_eq!(api_code(&missing), Some(ORDER_DOES_NOT_EXIST));

        let plain = ExchangeError::Api {
            status: 502,
            message: "Bad Gateway".to_string(),
        };
        assert_eq!(api_code(&plain), None);
        assert_eq!(api_code(&ExchangeError::CircuitOpen), None);
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
    }
}
