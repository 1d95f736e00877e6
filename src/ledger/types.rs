//! Ledger records
//!
//! Field names follow the persisted `trades.json` document so external
//! dashboards can read the snapshot directly.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::OrderPlan;
use crate::{Case, OrderKind, Side, Symbol};

/// Opaque order id, `ORD-{unix_millis}-{sequence}`
///
/// A position keeps the id of the order that opened it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn generate(now: DateTime<Utc>, sequence: u64) -> Self {
        OrderId(format!("ORD-{}-{}", now.timestamp_millis(), sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        OrderId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

/// Everything needed to place one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub margin: f64,
    /// Limit price, or the current price for a market order
    pub price: f64,
    pub take_profit: f64,
    pub stop_loss: Option<f64>,
    pub strategy_case: Case,
    pub swing_high: f64,
    pub swing_low: f64,
    /// Id assigned by the exchange when the order was mirrored there first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_order_id: Option<String>,
}

impl OrderRequest {
    pub fn from_plan(symbol: Symbol, plan: &OrderPlan, margin: f64) -> Self {
        OrderRequest {
            symbol,
            side: plan.side,
            margin,
            price: plan.price,
            take_profit: plan.take_profit,
            stop_loss: Some(plan.stop_loss),
            strategy_case: plan.case,
            swing_high: plan.swing_high,
            swing_low: plan.swing_low,
            exchange_order_id: None,
        }
    }

    pub fn with_exchange_order_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }
}

/// Resting order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub price: f64,
    pub margin: f64,
    pub leverage: f64,
    pub take_profit: f64,
    pub stop_loss: Option<f64>,
    pub status: OrderStatus,
    pub strategy_case: Case,
    pub swing_high: f64,
    pub swing_low: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One fill contributing to a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub price: f64,
    pub quantity: f64,
    pub kind: OrderKind,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub margin: f64,
    pub leverage: f64,
    pub take_profit: f64,
    pub stop_loss: Option<f64>,
    pub unrealized_pnl: f64,
    /// Worst unrealized P&L seen while open
    pub min_pnl: f64,
    pub max_pnl: f64,
    pub strategy_case: Case,
    pub swing_high: f64,
    pub swing_low: f64,
    pub entry_kind: OrderKind,
    pub entry_commission: f64,
    pub executions: Vec<Execution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_order_id: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn pnl_at(&self, price: f64) -> f64 {
        self.side.pnl(self.entry_price, price, self.quantity)
    }

    /// Refresh unrealized P&L and its running extremes
    pub fn mark(&mut self, price: f64) -> f64 {
        let pnl = self.pnl_at(price);
        self.unrealized_pnl = pnl;
        self.min_pnl = self.min_pnl.min(pnl);
        self.max_pnl = self.max_pnl.max(pnl);
        pnl
    }

    pub fn take_profit_hit(&self, price: f64) -> bool {
        match self.side {
            Side::Short => price <= self.take_profit,
            Side::Long => price >= self.take_profit,
        }
    }

    pub fn stop_loss_hit(&self, stop_loss: f64, price: f64) -> bool {
        match self.side {
            Side::Short => price >= stop_loss,
            Side::Long => price <= stop_loss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::TakeProfit => f.write_str("TP"),
            CloseReason::StopLoss => f.write_str("SL"),
            CloseReason::Manual => f.write_str("MANUAL"),
        }
    }
}

/// Why a pending order left the book without filling
#[derive(Debug, Clone, PartialEq)]
pub enum CancelReason {
    /// Price crossed the case's invalidation fraction of the swing range
    ZoneInvalidated { case: Case, fraction: f64 },
    Manual(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::ZoneInvalidated { case, fraction } => {
                write!(f, "price touched {:.1}% ({} invalidated)", fraction * 100.0, case)
            }
            CancelReason::Manual(reason) => f.write_str(reason),
        }
    }
}

/// Immutable record of a closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub close_price: f64,
    pub quantity: f64,
    pub margin: f64,
    /// Gross P&L before commissions
    pub pnl: f64,
    /// Entry plus exit commission
    pub commission: f64,
    pub net_pnl: f64,
    pub min_pnl: f64,
    pub max_pnl: f64,
    pub strategy_case: Case,
    pub reason: CloseReason,
    pub swing_high: f64,
    pub swing_low: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: f64,
    pub executions: Vec<Execution>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }

    /// Net P&L as a fraction of the margin committed
    pub fn return_on_margin(&self) -> f64 {
        if self.margin <= 0.0 {
            return 0.0;
        }
        self.net_pnl / self.margin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRecord {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
    pub strategy_case: Case,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub balance: f64,
    pub unrealized_pnl: f64,
    pub equity: f64,
    pub active_operations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub cancelled_orders: usize,
    pub max_simultaneous: usize,
    pub total_commission: f64,
}

/// Records keyed by order id with explicit insert/remove transitions
///
/// Callers collect ids first and transition afterwards, so nothing is removed
/// while it is being iterated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Book<T>(BTreeMap<OrderId, T>);

impl<T> Default for Book<T> {
    fn default() -> Self {
        Book(BTreeMap::new())
    }
}

impl<T> Book<T> {
    pub fn insert(&mut self, id: OrderId, record: T) {
        self.0.insert(id, record);
    }

    pub fn remove(&mut self, id: &OrderId) -> Option<T> {
        self.0.remove(id)
    }

    pub fn get(&self, id: &OrderId) -> Option<&T> {
        self.0.get(id)
    }

    pub fn get_mut(&mut self, id: &OrderId) -> Option<&mut T> {
        self.0.get_mut(id)
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.0.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OrderId, &T)> {
        self.0.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &OrderId> {
        self.0.keys()
    }

    /// Ids of records matching `pred`, detached from the book
    pub fn ids_where(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<OrderId> {
        self.0
            .iter()
            .filter(|(_, record)| pred(record))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_order_id_format() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(OrderId::generate(now, 7).as_str(), "ORD-1700000000123-7");
    }

    #[test]
    fn test_close_reason_serializes_short_codes() {
        assert_eq!(serde_json::to_string(&CloseReason::TakeProfit).unwrap(), "\"TP\"");
        assert_eq!(serde_json::to_string(&CloseReason::StopLoss).unwrap(), "\"SL\"");
    }

    #[test]
    fn test_cancel_reason_text() {
        let reason = CancelReason::ZoneInvalidated {
            case: Case::One,
            fraction: 0.382,
        };
        assert_eq!(reason.to_string(), "price touched 38.2% (C1 invalidated)");
    }

    #[test]
    fn test_book_ids_where_detaches() {
        let mut book = Book::default();
        book.insert(OrderId::from("a"), 1);
        book.insert(OrderId::from("b"), 2);
        book.insert(OrderId::from("c"), 3);

        for id in book.ids_where(|v| v % 2 == 1) {
            book.remove(&id);
        }
        assert_eq!(book.len(), 1);
        assert!(book.contains(&OrderId::from("b")));
    }
}
