//! Tick evaluator
//!
//! The control loop's state: it owns the ledger exclusively, feeds every
//! price tick into it and, on the slower scan cadence, turns scan results
//! into orders. Orders go to the gateway first and are recorded locally only
//! once acknowledged. Ledger cancellations and closes are mirrored to a live
//! gateway after the fact.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::exchange::{ExchangeError, GatewayOrder, MarketData, OrderGateway};
use crate::ledger::{
    EquityPoint, Ledger, LedgerError, Order, OrderId, OrderRequest, Position, TradeRecord,
};
use crate::scanner::{ScanResult, Scanner};
use crate::{OrderKind, Symbol};

/// One observed price
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: Symbol,
    pub price: f64,
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn new(symbol: Symbol, price: f64, time: DateTime<Utc>) -> Self {
        Tick {
            symbol,
            price,
            time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub margin_per_trade: f64,
    /// Scan cycles stop placing once available margin is below this
    pub min_available_margin: f64,
    /// Open positions plus pending orders
    pub max_simultaneous: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            margin_per_trade: 3.0,
            min_available_margin: 3.0,
            max_simultaneous: 10,
        }
    }
}

impl EvaluatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            margin_per_trade: config.trading.margin_per_trade,
            min_available_margin: config.trading.min_available_margin,
            max_simultaneous: config.trading.max_simultaneous,
        }
    }

    pub fn with_margin_per_trade(mut self, margin: f64) -> Self {
        self.margin_per_trade = margin;
        self
    }

    pub fn with_max_simultaneous(mut self, max: usize) -> Self {
        self.max_simultaneous = max;
        self
    }
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Ledger transitions caused by one tick
#[derive(Debug, Default, Clone)]
pub struct TickOutcome {
    pub closed: Vec<TradeRecord>,
    pub filled: Vec<Position>,
    pub cancelled: Vec<Order>,
}

impl TickOutcome {
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.filled.is_empty() && self.cancelled.is_empty()
    }

    fn absorb(&mut self, other: TickOutcome) {
        self.closed.extend(other.closed);
        self.filled.extend(other.filled);
        self.cancelled.extend(other.cancelled);
    }
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub candidates: usize,
    pub placed: Vec<OrderId>,
    pub rejected: Vec<(Symbol, String)>,
    /// Margin floor or operation cap reached before every candidate was tried
    pub capacity_reached: bool,
}

pub struct TickEvaluator<M, G> {
    market: M,
    gateway: G,
    scanner: Scanner,
    ledger: Ledger,
    config: EvaluatorConfig,
    prices: HashMap<Symbol, f64>,
}

impl<M: MarketData, G: OrderGateway> TickEvaluator<M, G> {
    pub fn new(
        market: M,
        gateway: G,
        scanner: Scanner,
        ledger: Ledger,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            market,
            gateway,
            scanner,
            ledger,
            config,
            prices: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    pub fn market(&self) -> &M {
        &self.market
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn last_price(&self, symbol: &Symbol) -> Option<f64> {
        self.prices.get(symbol).copied()
    }

    /// Positions first, then pending orders. An order filled on this tick
    /// is not checked for TP/SL until a later one.
    pub async fn on_tick(&mut self, tick: &Tick) -> TickOutcome {
        self.prices.insert(tick.symbol.clone(), tick.price);

        let closed = self
            .ledger
            .check_positions(&tick.symbol, tick.price, tick.time);
        for record in &closed {
            self.mirror_close(record).await;
        }

        let report = self
            .ledger
            .check_pending_orders(&tick.symbol, tick.price, tick.time);
        for order in &report.cancelled {
            self.mirror_cancel(order).await;
        }

        TickOutcome {
            closed,
            filled: report.filled,
            cancelled: report.cancelled,
        }
    }

    /// Re-price every symbol with exposure and evaluate it. A failed price
    /// request skips that symbol until the next poll.
    pub async fn poll_prices(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        for symbol in self.ledger.tracked_symbols() {
            match self.market.get_current_price(&symbol).await {
                Ok(price) => {
                    let tick = Tick::new(symbol, price, now);
                    outcome.absorb(self.on_tick(&tick).await);
                }
                Err(e) => warn!("{}: price poll failed: {}", symbol, e),
            }
        }
        outcome
    }

    /// Whether a scan cycle may place another order
    pub fn has_capacity(&self) -> bool {
        self.ledger.available_margin() >= self.config.min_available_margin
            && self.ledger.active_operations() < self.config.max_simultaneous
    }

    /// Scan the universe and place an order for every tradable case, until
    /// capacity runs out. Symbols with exposure are not scanned.
    pub async fn scan_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        if !self.has_capacity() {
            info!(
                "Skipping scan: available margin {:.4}, {} active operations",
                self.ledger.available_margin(),
                self.ledger.active_operations()
            );
            report.capacity_reached = true;
            return report;
        }

        let universe = match self.scanner.universe(&self.market).await {
            Ok(universe) => universe,
            Err(e) => {
                error!("Failed to load symbol universe: {}", e);
                return report;
            }
        };

        let ledger = &self.ledger;
        let results = self
            .scanner
            .scan(&self.market, &universe, |s| ledger.has_exposure(s))
            .await;
        report.candidates = results.len();

        for result in &results {
            if !self.has_capacity() {
                report.capacity_reached = true;
                break;
            }
            match self.place(result, now).await {
                Ok(id) => report.placed.push(id),
                Err(e) => {
                    warn!("{}: {} order rejected: {}", result.symbol, result.case, e);
                    report.rejected.push((result.symbol.clone(), e.to_string()));
                }
            }
        }

        info!(
            "Scan cycle: {} candidates, {} placed, {} rejected | available margin {:.4}",
            report.candidates,
            report.placed.len(),
            report.rejected.len(),
            self.ledger.available_margin()
        );
        report
    }

    /// Route one plan through the gateway, then record it
    pub async fn place(
        &mut self,
        result: &ScanResult,
        now: DateTime<Utc>,
    ) -> Result<OrderId, PlacementError> {
        let symbol = &result.symbol;
        let instrument = self.market.instrument(symbol).await?;
        self.ledger.set_instrument(symbol.clone(), instrument);

        let request =
            OrderRequest::from_plan(symbol.clone(), &result.plan, self.config.margin_per_trade);
        let (price, quantity) = self.ledger.admit(&request, result.plan.kind)?;
        let client_id = self.ledger.peek_order_id(now);

        let ack = self
            .gateway
            .place_order(&GatewayOrder {
                symbol: symbol.clone(),
                side: result.plan.side,
                kind: result.plan.kind,
                quantity,
                price,
                reduce_only: false,
                client_order_id: Some(client_id.to_string()),
            })
            .await?;
        let request = request.with_exchange_order_id(ack.exchange_order_id.clone());

        let recorded = match result.plan.kind {
            OrderKind::Limit => self.ledger.place_limit_order(request, now).map(|o| o.id),
            OrderKind::Market => self.ledger.place_market_order(request, now).map(|p| p.id),
        };
        match recorded {
            Ok(id) => {
                debug!("{}: recorded {} as {}", symbol, ack.exchange_order_id, id);
                Ok(id)
            }
            Err(e) => {
                // Acknowledged remotely but refused locally; pull it back.
                if self.gateway.is_live() && result.plan.kind == OrderKind::Limit {
                    if let Err(cancel) = self
                        .gateway
                        .cancel_order(symbol, &ack.exchange_order_id)
                        .await
                    {
                        error!(
                            "{}: orphaned exchange order {}: {}",
                            symbol, ack.exchange_order_id, cancel
                        );
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Mark open positions at the last seen prices and append an equity point
    pub fn record_equity(&mut self, now: DateTime<Utc>) -> EquityPoint {
        self.ledger.record_equity(&self.prices, now)
    }

    async fn mirror_close(&self, record: &TradeRecord) {
        if !self.gateway.is_live() {
            return;
        }
        let order = GatewayOrder::close(record.symbol.clone(), record.side, record.quantity)
            .with_client_order_id(format!("{}-X", record.order_id));
        if let Err(e) = self.gateway.place_order(&order).await {
            error!(
                "{}: position {} closed locally but exchange close failed: {}",
                record.symbol, record.order_id, e
            );
        }
    }

    async fn mirror_cancel(&self, order: &Order) {
        if !self.gateway.is_live() {
            return;
        }
        let Some(exchange_id) = &order.exchange_order_id else {
            return;
        };
        if let Err(e) = self.gateway.cancel_order(&order.symbol, exchange_id).await {
            error!(
                "{}: order {} cancelled locally but exchange cancel failed: {}",
                order.symbol, order.id, e
            );
        }
    }
}
