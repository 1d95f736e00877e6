//! Local order gateway for paper trading
//!
//! Acknowledges every order with a local id and keeps a log of what would
//! have been sent. Fills and exits are simulated by the ledger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use super::{ExchangePosition, ExchangeResult, GatewayOrder, OrderAck, OrderGateway};
use crate::Symbol;

#[derive(Debug, Default)]
pub struct PaperGateway {
    next_id: AtomicU64,
    balance: f64,
    sent: Mutex<Vec<GatewayOrder>>,
    cancelled: Mutex<Vec<String>>,
}

impl PaperGateway {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    pub fn sent_orders(&self) -> Vec<GatewayOrder> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl OrderGateway for PaperGateway {
    async fn place_order(&self, order: &GatewayOrder) -> ExchangeResult<OrderAck> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "Paper {} {} {} qty={} @ {}",
            order.kind,
            order.side.opening_order_side(),
            order.symbol,
            order.quantity,
            order.price
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(order.clone());
        }
        Ok(OrderAck {
            exchange_order_id: format!("PAPER-{}", id),
            status: "NEW".to_string(),
        })
    }

    async fn cancel_order(&self, symbol: &Symbol, exchange_order_id: &str) -> ExchangeResult<()> {
        debug!("Paper cancel {} {}", symbol, exchange_order_id);
        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.push(exchange_order_id.to_string());
        }
        Ok(())
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        Ok(Vec::new())
    }

    async fn get_balance(&self) -> ExchangeResult<f64> {
        Ok(self.balance)
    }

    fn is_live(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OrderKind, Side};

    #[tokio::test]
    async fn test_acknowledges_with_local_ids() {
        let gateway = PaperGateway::new(30.0);
        let order = GatewayOrder {
            symbol: Symbol::new("ETHUSDT"),
            side: Side::Short,
            kind: OrderKind::Limit,
            quantity: 1.0,
            price: 68.0,
            reduce_only: false,
            client_order_id: None,
        };
        let a = gateway.place_order(&order).await.unwrap();
        let b = gateway.place_order(&order).await.unwrap();
        assert_eq!(a.exchange_order_id, "PAPER-1");
        assert_eq!(b.exchange_order_id, "PAPER-2");
        assert_eq!(gateway.sent_orders().len(), 2);
        assert_eq!(gateway.get_balance().await.unwrap(), 30.0);
        assert!(!gateway.is_live());
    }
}
