//! Exchange collaborators
//!
//! The pipeline and the evaluator depend only on the two traits here:
//! [`MarketData`] for candles, prices and instrument metadata, and
//! [`OrderGateway`] for order routing. [`BinanceFuturesClient`] implements
//! both against USDⓈ-M futures; [`PaperGateway`] acknowledges orders locally.

pub mod binance;
pub mod circuit_breaker;
pub mod paper;
pub mod rate_limiter;

pub use binance::{BinanceFuturesClient, ClientConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use paper::PaperGateway;
pub use rate_limiter::RateLimiter;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instrument::Instrument;
use crate::{Candle, OrderKind, Side, Symbol};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("request to {endpoint} failed: {message}")]
    RequestFailed { endpoint: String, message: String },

    #[error("exchange rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("circuit breaker is open, rejecting request")]
    CircuitOpen,

    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("API credentials are not configured")]
    MissingCredentials,
}

impl ExchangeError {
    /// Transport failures, throttling and server errors are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::RequestFailed { .. } => true,
            ExchangeError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn decode(what: impl Into<String>, message: impl ToString) -> Self {
        ExchangeError::Decode {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Order as sent to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    /// Ignored for market orders
    pub price: f64,
    /// Closes exposure only; used when a position exits
    pub reduce_only: bool,
    /// Caller-chosen id that makes a resubmission recognizable on the
    /// exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

impl GatewayOrder {
    /// Market order that flattens a position of `side`
    pub fn close(symbol: Symbol, side: Side, quantity: f64) -> Self {
        GatewayOrder {
            symbol,
            side,
            kind: OrderKind::Market,
            quantity,
            price: 0.0,
            reduce_only: true,
            client_order_id: None,
        }
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub status: String,
}

/// Position as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

pub trait MarketData: Send + Sync {
    fn get_candles(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> impl Future<Output = ExchangeResult<Vec<Candle>>> + Send;

    fn get_current_price(&self, symbol: &Symbol) -> impl Future<Output = ExchangeResult<f64>> + Send;

    /// USDT perpetuals ranked by 24h quote volume
    fn top_symbols(&self, limit: usize) -> impl Future<Output = ExchangeResult<Vec<Symbol>>> + Send;

    fn instrument(&self, symbol: &Symbol) -> impl Future<Output = ExchangeResult<Instrument>> + Send;
}

pub trait OrderGateway: Send + Sync {
    fn place_order(
        &self,
        order: &GatewayOrder,
    ) -> impl Future<Output = ExchangeResult<OrderAck>> + Send;

    fn cancel_order(
        &self,
        symbol: &Symbol,
        exchange_order_id: &str,
    ) -> impl Future<Output = ExchangeResult<()>> + Send;

    fn get_positions(&self) -> impl Future<Output = ExchangeResult<Vec<ExchangePosition>>> + Send;

    /// Wallet balance in the quote asset
    fn get_balance(&self) -> impl Future<Output = ExchangeResult<f64>> + Send;

    /// False for gateways that only acknowledge locally
    fn is_live(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let transport = ExchangeError::RequestFailed {
            endpoint: "/fapi/v1/klines".into(),
            message: "timeout".into(),
        };
        assert!(transport.is_retryable());
        assert!(ExchangeError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(ExchangeError::Api {
            status: 429,
            message: String::new()
        }
        .is_retryable());
        assert!(!ExchangeError::Api {
            status: 400,
            message: "bad precision".into()
        }
        .is_retryable());
        assert!(!ExchangeError::CircuitOpen.is_retryable());
    }

    #[test]
    fn test_close_order_is_reduce_only_market() {
        let order = GatewayOrder::close(Symbol::new("ETHUSDT"), Side::Short, 1.5);
        assert_eq!(order.kind, OrderKind::Market);
        assert!(order.reduce_only);
        assert!(order.client_order_id.is_none());
    }

    #[test]
    fn test_with_client_order_id() {
        let order = GatewayOrder::close(Symbol::new("ETHUSDT"), Side::Short, 1.5)
            .with_client_order_id("ORD-1700000000000-3-X");
        assert_eq!(
            order.client_order_id.as_deref(),
            Some("ORD-1700000000000-3-X")
        );
        assert!(order.reduce_only);
    }
}
