//! Order and position ledger
//!
//! The ledger owns one account: balance, resting orders, open positions and
//! the archive of closed trades and cancellations. It is the simulated
//! exchange in paper mode and the local book of record in live mode.
//!
//! State machine:
//!
//! ```text
//! Order:    Pending --fill--> Filled (becomes a Position under the same id)
//!           Pending --cancel--> Cancelled (archived as a CancelRecord)
//! Position: Open --TP/SL/manual--> Closed (archived as a TradeRecord)
//! ```
//!
//! Every transition is synchronous, takes the current time explicitly and is
//! followed by a full snapshot through the configured [`SnapshotStore`].

pub mod error;
pub mod snapshot;
pub mod sqlite;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use snapshot::{JsonFileStore, LedgerSnapshot, MemoryStore, SnapshotError, SnapshotStore};
pub use sqlite::SqliteStore;
pub use types::{
    Book, CancelReason, CancelRecord, CloseReason, EquityPoint, Execution, LedgerStats, Order,
    OrderId, OrderRequest, OrderStatus, Position, TradeRecord,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use crate::config::{Config, FibonacciConfig};
use crate::instrument::Instrument;
use crate::notify::{EventKind, LogNotifier, Notifier, TradeEvent};
use crate::{Case, OrderKind, Side, Symbol};

/// Ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub initial_balance: f64,
    pub leverage: f64,
    pub maker_rate: f64,
    pub taker_rate: f64,
    /// Placement is refused once available margin falls below this
    pub min_reserve: f64,
    /// Positions younger than this skip TP/SL evaluation
    pub cooldown: Duration,
    pub equity_cap: usize,
    pub fibonacci: FibonacciConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 30.0,
            leverage: 10.0,
            maker_rate: 0.0002,
            taker_rate: 0.0006,
            min_reserve: 3.0,
            cooldown: Duration::milliseconds(1000),
            equity_cap: 10_000,
            fibonacci: FibonacciConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_balance: config.trading.initial_balance,
            leverage: config.trading.leverage,
            maker_rate: config.exchange.maker_fee,
            taker_rate: config.exchange.taker_fee,
            min_reserve: config.trading.min_available_margin,
            cooldown: Duration::milliseconds(config.trading.cooldown_ms as i64),
            equity_cap: config.state.equity_history_cap,
            fibonacci: config.fibonacci.clone(),
        }
    }

    pub fn with_initial_balance(mut self, balance: f64) -> Self {
        self.initial_balance = balance;
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_commission(mut self, maker_rate: f64, taker_rate: f64) -> Self {
        self.maker_rate = maker_rate;
        self.taker_rate = taker_rate;
        self
    }

    pub fn with_min_reserve(mut self, min_reserve: f64) -> Self {
        self.min_reserve = min_reserve;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_equity_cap(mut self, cap: usize) -> Self {
        self.equity_cap = cap;
        self
    }

    pub fn with_fibonacci(mut self, fibonacci: FibonacciConfig) -> Self {
        self.fibonacci = fibonacci;
        self
    }
}

/// Result of running the pending-order rules for one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingReport {
    pub filled: Vec<Position>,
    pub cancelled: Vec<Order>,
}

impl PendingReport {
    pub fn is_empty(&self) -> bool {
        self.filled.is_empty() && self.cancelled.is_empty()
    }
}

pub struct Ledger {
    config: LedgerConfig,
    state: LedgerSnapshot,
    instruments: HashMap<Symbol, Instrument>,
    store: Option<Box<dyn SnapshotStore>>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("balance", &self.state.balance)
            .field("open_positions", &self.state.open_positions.len())
            .field("pending_orders", &self.state.pending_orders.len())
            .field(
                "store",
                &self.store.as_ref().map(|s| s.describe()).unwrap_or_default(),
            )
            .finish()
    }
}

impl Ledger {
    /// Fresh in-memory ledger without persistence
    pub fn new(config: LedgerConfig, now: DateTime<Utc>) -> Self {
        let state = LedgerSnapshot::fresh(config.initial_balance, config.leverage, now);
        Self {
            config,
            state,
            instruments: HashMap::new(),
            store: None,
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Restore from `store`, or start fresh when it is empty.
    ///
    /// A corrupted snapshot is an error. With `reset` the stored state is
    /// discarded and overwritten with a fresh ledger.
    pub fn open(
        config: LedgerConfig,
        mut store: Box<dyn SnapshotStore>,
        reset: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, SnapshotError> {
        let state = if reset {
            info!("Resetting ledger state in {}", store.describe());
            let fresh = LedgerSnapshot::fresh(config.initial_balance, config.leverage, now);
            store.save(&fresh)?;
            fresh
        } else {
            match store.load()? {
                Some(state) => {
                    info!(
                        "Ledger restored from {}: balance {:.4}, {} open, {} pending, {} trades",
                        store.describe(),
                        state.balance,
                        state.open_positions.len(),
                        state.pending_orders.len(),
                        state.history.len()
                    );
                    state
                }
                None => {
                    info!("No ledger state in {}, starting fresh", store.describe());
                    LedgerSnapshot::fresh(config.initial_balance, config.leverage, now)
                }
            }
        };

        Ok(Self {
            config,
            state,
            instruments: HashMap::new(),
            store: Some(store),
            notifier: Arc::new(LogNotifier),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn set_instrument(&mut self, symbol: Symbol, instrument: Instrument) {
        self.instruments.insert(symbol, instrument);
    }

    pub fn instrument(&self, symbol: &Symbol) -> Instrument {
        self.instruments.get(symbol).copied().unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &LedgerSnapshot {
        &self.state
    }

    pub fn balance(&self) -> f64 {
        self.state.balance
    }

    pub fn initial_balance(&self) -> f64 {
        self.state.initial_balance
    }

    pub fn leverage(&self) -> f64 {
        self.state.leverage
    }

    pub fn open_positions(&self) -> &Book<Position> {
        &self.state.open_positions
    }

    pub fn pending_orders(&self) -> &Book<Order> {
        &self.state.pending_orders
    }

    pub fn history(&self) -> &[TradeRecord] {
        &self.state.history
    }

    pub fn cancelled_history(&self) -> &[CancelRecord] {
        &self.state.cancelled_history
    }

    pub fn equity_history(&self) -> &[EquityPoint] {
        &self.state.equity_history
    }

    pub fn stats(&self) -> &LedgerStats {
        &self.state.stats
    }

    /// `balance − Σ open margin − Σ pending margin`
    pub fn available_margin(&self) -> f64 {
        let used: f64 = self.state.open_positions.values().map(|p| p.margin).sum::<f64>()
            + self.state.pending_orders.values().map(|o| o.margin).sum::<f64>();
        self.state.balance - used
    }

    /// Last marked unrealized P&L across open positions
    pub fn unrealized_pnl(&self) -> f64 {
        self.state.open_positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn equity(&self) -> f64 {
        self.state.balance + self.unrealized_pnl()
    }

    /// Open positions plus pending orders
    pub fn active_operations(&self) -> usize {
        self.state.open_positions.len() + self.state.pending_orders.len()
    }

    /// True when `symbol` has an open position or a resting order
    pub fn has_exposure(&self, symbol: &Symbol) -> bool {
        self.state.open_positions.values().any(|p| &p.symbol == symbol)
            || self.state.pending_orders.values().any(|o| &o.symbol == symbol)
    }

    /// Symbols with a position or a resting order, for price polling
    pub fn tracked_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .state
            .open_positions
            .values()
            .map(|p| p.symbol.clone())
            .chain(self.state.pending_orders.values().map(|o| o.symbol.clone()))
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    /// Rest a limit order at `request.price`
    pub fn place_limit_order(
        &mut self,
        request: OrderRequest,
        now: DateTime<Utc>,
    ) -> LedgerResult<Order> {
        let (price, quantity) = self.admit(&request, OrderKind::Limit)?;
        let id = self.next_order_id(now);

        let order = Order {
            id: id.clone(),
            symbol: request.symbol,
            side: request.side,
            kind: OrderKind::Limit,
            quantity,
            price,
            margin: request.margin,
            leverage: self.state.leverage,
            take_profit: request.take_profit,
            stop_loss: request.stop_loss,
            status: OrderStatus::Pending,
            strategy_case: request.strategy_case,
            swing_high: request.swing_high,
            swing_low: request.swing_low,
            exchange_order_id: request.exchange_order_id,
            created_at: now,
        };

        debug!(
            order_id = %id,
            symbol = %order.symbol,
            price,
            quantity,
            margin = order.margin,
            "limit order placed"
        );
        self.state.pending_orders.insert(id, order.clone());
        self.update_max_simultaneous();
        self.emit(
            EventKind::Opened,
            &order.id,
            &order.symbol,
            order.side,
            price,
            None,
            Some(order.strategy_case),
        );
        self.persist(now);
        Ok(order)
    }

    /// Open a position immediately at `request.price`, paying taker commission
    pub fn place_market_order(
        &mut self,
        request: OrderRequest,
        now: DateTime<Utc>,
    ) -> LedgerResult<Position> {
        let (price, quantity) = self.admit(&request, OrderKind::Market)?;
        let id = self.next_order_id(now);
        let commission = quantity * price * self.config.taker_rate;

        let position = Position {
            id: id.clone(),
            symbol: request.symbol,
            side: request.side,
            entry_price: price,
            quantity,
            margin: request.margin,
            leverage: self.state.leverage,
            take_profit: request.take_profit,
            stop_loss: request.stop_loss,
            unrealized_pnl: 0.0,
            min_pnl: 0.0,
            max_pnl: 0.0,
            strategy_case: request.strategy_case,
            swing_high: request.swing_high,
            swing_low: request.swing_low,
            entry_kind: OrderKind::Market,
            entry_commission: commission,
            executions: vec![Execution {
                price,
                quantity,
                kind: OrderKind::Market,
                time: now,
            }],
            exchange_order_id: request.exchange_order_id,
            opened_at: now,
        };

        self.charge(commission);
        debug!(
            order_id = %id,
            symbol = %position.symbol,
            price,
            quantity,
            commission,
            "market order executed"
        );
        self.state.open_positions.insert(id, position.clone());
        self.update_max_simultaneous();
        self.emit(
            EventKind::Filled,
            &position.id,
            &position.symbol,
            position.side,
            price,
            None,
            Some(position.strategy_case),
        );
        self.persist(now);
        Ok(position)
    }

    /// Preconditions shared by both placement paths. Returns the rounded
    /// price and quantity; nothing is mutated. Callers that route to an
    /// exchange first use this to size the order.
    ///
    /// Market orders pay the taker commission on entry, so they must also
    /// fit it inside the available margin.
    pub fn admit(&self, request: &OrderRequest, kind: OrderKind) -> LedgerResult<(f64, f64)> {
        if !request.price.is_finite() || request.price <= 0.0 {
            return Err(LedgerError::InvalidPrice(request.price));
        }
        if self.has_exposure(&request.symbol) {
            return Err(LedgerError::SymbolOccupied(request.symbol.clone()));
        }

        let available = self.available_margin();
        if available < request.margin || available < self.config.min_reserve {
            return Err(LedgerError::InsufficientMargin {
                available,
                required: request.margin.max(self.config.min_reserve),
            });
        }

        let instrument = self.instrument(&request.symbol);
        let price = instrument.round_price(request.price);
        let quantity = instrument
            .quantity_for(request.margin, self.state.leverage, price)
            .ok_or_else(|| LedgerError::PrecisionRejected {
                symbol: request.symbol.clone(),
                quantity: request.margin * self.state.leverage / price,
                price,
            })?;

        if kind == OrderKind::Market {
            let required = request.margin + quantity * price * self.config.taker_rate;
            if available < required {
                return Err(LedgerError::InsufficientMargin {
                    available,
                    required,
                });
            }
        }
        Ok((price, quantity))
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Turn a pending order into a position at `fill_price`, paying maker
    /// commission. The position keeps the order's id.
    pub fn fill_order(
        &mut self,
        id: &OrderId,
        fill_price: f64,
        now: DateTime<Utc>,
    ) -> LedgerResult<Position> {
        let mut order = self
            .state
            .pending_orders
            .remove(id)
            .ok_or_else(|| LedgerError::UnknownOrder(id.clone()))?;
        order.status = OrderStatus::Filled;

        let commission = order.quantity * fill_price * self.config.maker_rate;
        let position = Position {
            id: order.id.clone(),
            symbol: order.symbol,
            side: order.side,
            entry_price: fill_price,
            quantity: order.quantity,
            margin: order.margin,
            leverage: order.leverage,
            take_profit: order.take_profit,
            stop_loss: order.stop_loss,
            unrealized_pnl: 0.0,
            min_pnl: 0.0,
            max_pnl: 0.0,
            strategy_case: order.strategy_case,
            swing_high: order.swing_high,
            swing_low: order.swing_low,
            entry_kind: OrderKind::Limit,
            entry_commission: commission,
            executions: vec![Execution {
                price: fill_price,
                quantity: order.quantity,
                kind: OrderKind::Limit,
                time: now,
            }],
            exchange_order_id: order.exchange_order_id,
            opened_at: now,
        };

        self.charge(commission);
        debug!(
            order_id = %id,
            symbol = %position.symbol,
            limit = order.price,
            fill_price,
            commission,
            "limit order filled"
        );
        self.state.open_positions.insert(id.clone(), position.clone());
        self.update_max_simultaneous();
        self.emit(
            EventKind::Filled,
            id,
            &position.symbol,
            position.side,
            fill_price,
            None,
            Some(position.strategy_case),
        );
        self.persist(now);
        Ok(position)
    }

    /// Remove a pending order and archive it with `reason`
    pub fn cancel_order(
        &mut self,
        id: &OrderId,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> LedgerResult<Order> {
        let mut order = self
            .state
            .pending_orders
            .remove(id)
            .ok_or_else(|| LedgerError::UnknownOrder(id.clone()))?;
        order.status = OrderStatus::Cancelled;

        let reason = reason.to_string();
        debug!(order_id = %id, symbol = %order.symbol, %reason, "order cancelled");
        self.state.cancelled_history.push(CancelRecord {
            order_id: id.clone(),
            symbol: order.symbol.clone(),
            reason: reason.clone(),
            cancelled_at: now,
            strategy_case: order.strategy_case,
            price: order.price,
            quantity: order.quantity,
        });
        self.state.stats.cancelled_orders += 1;
        self.emit(
            EventKind::Cancelled(reason),
            id,
            &order.symbol,
            order.side,
            order.price,
            None,
            Some(order.strategy_case),
        );
        self.persist(now);
        Ok(order)
    }

    /// Realize a position at `price`. The closing commission uses the maker
    /// rate for positions opened by a limit fill and the taker rate otherwise.
    pub fn close_position(
        &mut self,
        id: &OrderId,
        price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> LedgerResult<TradeRecord> {
        let mut position = self
            .state
            .open_positions
            .remove(id)
            .ok_or_else(|| LedgerError::UnknownPosition(id.clone()))?;

        let pnl = position.mark(price);
        let rate = match position.entry_kind {
            OrderKind::Limit => self.config.maker_rate,
            OrderKind::Market => self.config.taker_rate,
        };
        let exit_commission = position.quantity * price * rate;
        let commission = position.entry_commission + exit_commission;

        self.state.balance += pnl;
        self.charge(exit_commission);

        let record = TradeRecord {
            order_id: id.clone(),
            symbol: position.symbol,
            side: position.side,
            entry_price: position.entry_price,
            close_price: price,
            quantity: position.quantity,
            margin: position.margin,
            pnl,
            commission,
            net_pnl: pnl - commission,
            min_pnl: position.min_pnl,
            max_pnl: position.max_pnl,
            strategy_case: position.strategy_case,
            reason,
            swing_high: position.swing_high,
            swing_low: position.swing_low,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            executions: position.executions,
            opened_at: position.opened_at,
            closed_at: now,
        };

        let stats = &mut self.state.stats;
        stats.total_trades += 1;
        if record.is_win() {
            stats.wins += 1;
        } else {
            stats.losses += 1;
        }

        info!(
            "Position closed ({}): {} {} @ {:.6} | PnL {:+.4} net {:+.4} | Balance {:.4}",
            reason,
            record.side,
            record.symbol,
            price,
            pnl,
            record.net_pnl,
            self.state.balance
        );
        self.state.history.push(record.clone());
        self.emit(
            EventKind::Closed(reason),
            id,
            &record.symbol,
            record.side,
            price,
            Some(record.net_pnl),
            Some(record.strategy_case),
        );
        self.persist(now);
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Tick rules
    // ------------------------------------------------------------------

    /// Cancellation first, then fills, for every pending order on `symbol`.
    /// An order cancelled on this tick never fills.
    pub fn check_pending_orders(
        &mut self,
        symbol: &Symbol,
        price: f64,
        now: DateTime<Utc>,
    ) -> PendingReport {
        let mut report = PendingReport::default();

        let ids = self.state.pending_orders.ids_where(|o| &o.symbol == symbol);
        for id in ids {
            let Some(order) = self.state.pending_orders.get(&id) else {
                continue;
            };

            if let Some(reason) = self.invalidation(order, price) {
                if let Ok(order) = self.cancel_order(&id, reason, now) {
                    report.cancelled.push(order);
                }
                continue;
            }

            let touched = match order.side {
                Side::Short => price >= order.price,
                Side::Long => price <= order.price,
            };
            if touched {
                if let Ok(position) = self.fill_order(&id, price, now) {
                    report.filled.push(position);
                }
            }
        }
        report
    }

    fn invalidation(&self, order: &Order, price: f64) -> Option<CancelReason> {
        let fraction = self
            .config
            .fibonacci
            .case_params(order.strategy_case)?
            .cancel_below?;
        let level = swing_level(order.side, order.swing_high, order.swing_low, fraction)?;
        let crossed = match order.side {
            Side::Short => price <= level,
            Side::Long => price >= level,
        };
        crossed.then_some(CancelReason::ZoneInvalidated {
            case: order.strategy_case,
            fraction,
        })
    }

    /// Mark and close positions on `symbol` that are past the cool-down.
    /// Take profit is checked before stop loss.
    pub fn check_positions(
        &mut self,
        symbol: &Symbol,
        price: f64,
        now: DateTime<Utc>,
    ) -> Vec<TradeRecord> {
        let cooldown = self.config.cooldown;
        let ids = self
            .state
            .open_positions
            .ids_where(|p| &p.symbol == symbol && now - p.opened_at >= cooldown);
        if ids.is_empty() {
            return Vec::new();
        }

        let mut exits = Vec::new();
        for id in &ids {
            let Some(position) = self.state.open_positions.get_mut(id) else {
                continue;
            };
            position.mark(price);

            let reason = if position.take_profit_hit(price) {
                Some(CloseReason::TakeProfit)
            } else {
                let stop_loss = position.stop_loss.or_else(|| {
                    let ratio = self
                        .config
                        .fibonacci
                        .case_params(position.strategy_case)?
                        .stop_loss;
                    swing_level(position.side, position.swing_high, position.swing_low, ratio)
                });
                stop_loss
                    .filter(|&sl| position.stop_loss_hit(sl, price))
                    .map(|_| CloseReason::StopLoss)
            };
            if let Some(reason) = reason {
                exits.push((id.clone(), reason));
            }
        }

        let mut closed = Vec::new();
        for (id, reason) in exits {
            if let Ok(record) = self.close_position(&id, price, reason, now) {
                closed.push(record);
            }
        }
        if closed.is_empty() {
            self.persist(now);
        }
        closed
    }

    /// Mark every position with a known price and append an equity point
    pub fn record_equity(
        &mut self,
        prices: &HashMap<Symbol, f64>,
        now: DateTime<Utc>,
    ) -> EquityPoint {
        let ids: Vec<OrderId> = self.state.open_positions.ids().cloned().collect();
        for id in ids {
            if let Some(position) = self.state.open_positions.get_mut(&id) {
                if let Some(&price) = prices.get(&position.symbol) {
                    position.mark(price);
                }
            }
        }

        let unrealized_pnl = self.unrealized_pnl();
        let point = EquityPoint {
            time: now,
            balance: self.state.balance,
            unrealized_pnl,
            equity: self.state.balance + unrealized_pnl,
            active_operations: self.active_operations(),
        };
        self.state.equity_history.push(point.clone());

        let cap = self.config.equity_cap.max(1);
        let len = self.state.equity_history.len();
        if len > cap {
            self.state.equity_history.drain(..len - cap);
        }
        self.persist(now);
        point
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Id the next placement at `now` will receive
    pub fn peek_order_id(&self, now: DateTime<Utc>) -> OrderId {
        OrderId::generate(now, self.state.next_sequence)
    }

    fn next_order_id(&mut self, now: DateTime<Utc>) -> OrderId {
        let id = OrderId::generate(now, self.state.next_sequence);
        self.state.next_sequence += 1;
        id
    }

    fn charge(&mut self, commission: f64) {
        self.state.balance -= commission;
        self.state.stats.total_commission += commission;
    }

    fn update_max_simultaneous(&mut self) {
        let active = self.active_operations();
        if active > self.state.stats.max_simultaneous {
            self.state.stats.max_simultaneous = active;
            debug!("New simultaneous maximum: {}", active);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        kind: EventKind,
        id: &OrderId,
        symbol: &Symbol,
        side: Side,
        price: f64,
        pnl: Option<f64>,
        case: Option<Case>,
    ) {
        self.notifier.notify(TradeEvent {
            kind,
            order_id: id.clone(),
            symbol: symbol.clone(),
            side,
            price,
            pnl,
            case,
        });
    }

    /// Save failures are logged; the in-memory transition stands
    fn persist(&mut self, now: DateTime<Utc>) {
        self.state.last_updated = now;
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.save(&self.state) {
                error!("Failed to persist ledger to {}: {}", store.describe(), e);
            }
        }
    }
}

/// Level at `fraction` of a swing, measured from the Low for shorts and from
/// the High for longs. `None` for a degenerate swing.
fn swing_level(side: Side, high: f64, low: f64, fraction: f64) -> Option<f64> {
    let range = high - low;
    (range > 0.0).then(|| match side {
        Side::Short => low + range * fraction,
        Side::Long => high - range * fraction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    fn config() -> LedgerConfig {
        LedgerConfig::default()
            .with_initial_balance(1000.0)
            .with_leverage(10.0)
            .with_commission(0.0002, 0.0006)
            .with_min_reserve(3.0)
    }

    fn request(symbol: &str, price: f64, margin: f64, case: Case) -> OrderRequest {
        OrderRequest {
            symbol: Symbol::new(symbol),
            side: Side::Short,
            margin,
            price,
            take_profit: 55.0,
            stop_loss: Some(90.0),
            strategy_case: case,
            swing_high: 100.0,
            swing_low: 0.0,
            exchange_order_id: None,
        }
    }

    fn assert_balance_invariant(ledger: &Ledger) {
        let realized: f64 = ledger.history().iter().map(|t| t.pnl).sum();
        assert_relative_eq!(
            ledger.balance(),
            ledger.initial_balance() + realized - ledger.stats().total_commission,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_limit_fill_at_entry() {
        let mut ledger = Ledger::new(config(), t0());
        // qty 10 at 68 with 10x leverage needs 68 of margin
        let order = ledger
            .place_limit_order(request("ETHUSDT", 68.0, 68.0, Case::One), t0())
            .unwrap();
        assert_relative_eq!(order.quantity, 10.0, epsilon = 1e-9);
        assert_eq!(order.status, OrderStatus::Pending);

        let report = ledger.check_pending_orders(&Symbol::new("ETHUSDT"), 68.0, secs(1));
        assert_eq!(report.filled.len(), 1);
        let position = &report.filled[0];
        assert_eq!(position.id, order.id);
        assert_eq!(position.entry_price, 68.0);
        assert_relative_eq!(position.quantity, 10.0, epsilon = 1e-9);
        assert_relative_eq!(position.entry_commission, 10.0 * 68.0 * 0.0002, epsilon = 1e-12);
        assert!(ledger.pending_orders().is_empty());
        assert_balance_invariant(&ledger);
    }

    #[test]
    fn test_take_profit_after_adverse_ticks() {
        let mut ledger = Ledger::new(config(), t0());
        let mut req = request("BTCUSDT", 100.0, 50.0, Case::Four);
        req.take_profit = 90.0;
        req.stop_loss = Some(120.0);
        let position = ledger.place_market_order(req, t0()).unwrap();
        assert_relative_eq!(position.quantity, 5.0, epsilon = 1e-9);

        let symbol = Symbol::new("BTCUSDT");
        assert!(ledger.check_positions(&symbol, 105.0, secs(2)).is_empty());
        assert!(ledger.check_positions(&symbol, 95.0, secs(3)).is_empty());
        let closed = ledger.check_positions(&symbol, 89.0, secs(4));

        assert_eq!(closed.len(), 1);
        let trade = &closed[0];
        assert_eq!(trade.reason, CloseReason::TakeProfit);
        assert_eq!(trade.close_price, 89.0);
        assert_relative_eq!(trade.pnl, 55.0, epsilon = 1e-9);
        let commission = 5.0 * 100.0 * 0.0006 + 5.0 * 89.0 * 0.0006;
        assert_relative_eq!(trade.commission, commission, epsilon = 1e-12);
        assert_relative_eq!(trade.net_pnl, 55.0 - commission, epsilon = 1e-9);
        assert_relative_eq!(trade.min_pnl, -25.0, epsilon = 1e-9);
        assert!(ledger.open_positions().is_empty());
        assert_eq!(ledger.history().len(), 1);
        assert_balance_invariant(&ledger);
    }

    #[test]
    fn test_case_one_invalidation_cancels_before_fill() {
        let notifier = RecordingNotifier::new();
        let mut ledger = Ledger::new(config(), t0()).with_notifier(Arc::new(notifier.clone()));
        ledger
            .place_limit_order(request("SOLUSDT", 68.0, 10.0, Case::One), t0())
            .unwrap();

        let symbol = Symbol::new("SOLUSDT");
        let report = ledger.check_pending_orders(&symbol, 35.0, secs(1));
        assert_eq!(report.cancelled.len(), 1);
        assert!(ledger.pending_orders().is_empty());

        let record = &ledger.cancelled_history()[0];
        assert!(!record.reason.is_empty());
        assert!(record.reason.contains("38.2%"));

        let report = ledger.check_pending_orders(&symbol, 70.0, secs(2));
        assert!(report.is_empty());
        assert!(ledger.open_positions().is_empty());
        assert_eq!(ledger.stats().cancelled_orders, 1);
        assert!(matches!(
            notifier.events().last().map(|e| &e.kind),
            Some(EventKind::Cancelled(_))
        ));
    }

    #[test]
    fn test_stop_loss_derived_from_swing() {
        let mut ledger = Ledger::new(config(), t0());
        let mut req = request("XRPUSDT", 81.0, 10.0, Case::Four);
        req.take_profit = 62.0;
        req.stop_loss = None;
        ledger.place_market_order(req, t0()).unwrap();

        let symbol = Symbol::new("XRPUSDT");
        // Case 4 stops at 105% of a 0..100 swing
        assert!(ledger.check_positions(&symbol, 104.0, secs(2)).is_empty());
        let closed = ledger.check_positions(&symbol, 105.0, secs(3));
        assert_eq!(closed[0].reason, CloseReason::StopLoss);
        assert!(closed[0].net_pnl < 0.0);
        assert_eq!(ledger.stats().losses, 1);
    }

    #[test]
    fn test_cooldown_skips_young_positions() {
        let mut ledger = Ledger::new(config(), t0());
        let mut req = request("ADAUSDT", 100.0, 10.0, Case::Four);
        req.take_profit = 90.0;
        ledger.place_market_order(req, t0()).unwrap();

        let symbol = Symbol::new("ADAUSDT");
        let young = t0() + Duration::milliseconds(500);
        assert!(ledger.check_positions(&symbol, 80.0, young).is_empty());
        assert_eq!(ledger.open_positions().len(), 1);
        assert_eq!(ledger.check_positions(&symbol, 80.0, secs(1)).len(), 1);
    }

    #[test]
    fn test_margin_rules() {
        let mut ledger = Ledger::new(config().with_initial_balance(30.0), t0());
        ledger
            .place_limit_order(request("AUSDT", 68.0, 12.0, Case::One), t0())
            .unwrap();
        ledger
            .place_limit_order(request("BUSDT", 68.0, 12.0, Case::One), t0())
            .unwrap();
        assert_relative_eq!(ledger.available_margin(), 6.0, epsilon = 1e-9);

        let err = ledger
            .place_limit_order(request("CUSDT", 68.0, 12.0, Case::One), t0())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientMargin { .. }));
        assert_eq!(ledger.pending_orders().len(), 2);

        let err = ledger
            .place_limit_order(request("AUSDT", 68.0, 1.0, Case::One), t0())
            .unwrap_err();
        assert_eq!(err, LedgerError::SymbolOccupied(Symbol::new("AUSDT")));

        // 6 -> 5 -> 2.5 available; the next order trips the 3.0 reserve floor
        ledger
            .place_limit_order(request("DUSDT", 68.0, 1.0, Case::One), t0())
            .unwrap();
        ledger
            .place_limit_order(request("EUSDT", 68.0, 2.5, Case::One), t0())
            .unwrap();
        let err = ledger
            .place_limit_order(request("FUSDT", 68.0, 1.0, Case::One), t0())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientMargin { .. }));
        assert!(ledger.available_margin() >= 0.0);
        assert_eq!(ledger.stats().max_simultaneous, 4);
    }

    #[test]
    fn test_market_order_fits_entry_commission() {
        let mut ledger = Ledger::new(config().with_initial_balance(30.0), t0());
        let mut req = request("AUSDT", 100.0, 30.0, Case::Four);
        req.take_profit = 90.0;

        // qty 3 @ 100 pays 0.18 taker on entry, which the full balance cannot cover
        let err = ledger.place_market_order(req.clone(), t0()).unwrap_err();
        match err {
            LedgerError::InsufficientMargin { available, required } => {
                assert_relative_eq!(available, 30.0, epsilon = 1e-12);
                assert_relative_eq!(required, 30.18, epsilon = 1e-9);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(ledger.open_positions().is_empty());
        assert_eq!(ledger.balance(), 30.0);

        req.margin = 29.8;
        let position = ledger.place_market_order(req, t0()).unwrap();
        assert_relative_eq!(position.entry_commission, 2.98 * 100.0 * 0.0006, epsilon = 1e-12);
        assert!(ledger.available_margin() >= 0.0);
        assert_relative_eq!(ledger.available_margin(), 30.0 - 29.8 - 0.1788, epsilon = 1e-9);
        assert_balance_invariant(&ledger);
    }

    #[test]
    fn test_admit_limit_ignores_entry_commission() {
        let ledger = Ledger::new(config().with_initial_balance(30.0), t0());
        let req = request("AUSDT", 100.0, 30.0, Case::One);
        assert!(ledger.admit(&req, OrderKind::Limit).is_ok());
        assert!(matches!(
            ledger.admit(&req, OrderKind::Market),
            Err(LedgerError::InsufficientMargin { .. })
        ));
    }

    #[test]
    fn test_precision_rejected() {
        let mut ledger = Ledger::new(config(), t0());
        let symbol = Symbol::new("BTCUSDT");
        ledger.set_instrument(
            symbol.clone(),
            Instrument::new(
                rust_decimal::Decimal::new(1, 1),
                rust_decimal::Decimal::new(1, 3),
                rust_decimal::Decimal::new(5, 0),
            ),
        );
        let err = ledger
            .place_market_order(request("BTCUSDT", 60_000.0, 3.0, Case::Four), t0())
            .unwrap_err();
        assert!(matches!(err, LedgerError::PrecisionRejected { .. }));
        assert_eq!(ledger.balance(), 1000.0);
        assert!(!ledger.has_exposure(&symbol));
    }

    #[test]
    fn test_unknown_ids() {
        let mut ledger = Ledger::new(config(), t0());
        let id = OrderId::from("ORD-0-0");
        assert_eq!(
            ledger.fill_order(&id, 1.0, t0()).unwrap_err(),
            LedgerError::UnknownOrder(id.clone())
        );
        assert_eq!(
            ledger
                .close_position(&id, 1.0, CloseReason::Manual, t0())
                .unwrap_err(),
            LedgerError::UnknownPosition(id)
        );
    }

    #[test]
    fn test_order_ids_are_sequential() {
        let mut ledger = Ledger::new(config(), t0());
        let a = ledger
            .place_limit_order(request("AUSDT", 68.0, 5.0, Case::One), t0())
            .unwrap();
        let b = ledger
            .place_limit_order(request("BUSDT", 68.0, 5.0, Case::One), t0())
            .unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.as_str().ends_with("-1"));
        assert!(b.id.as_str().ends_with("-2"));
    }

    #[test]
    fn test_persist_and_reload() {
        let store = MemoryStore::new();
        let mut ledger =
            Ledger::open(config(), Box::new(store.clone()), false, t0()).unwrap();
        ledger
            .place_limit_order(request("AUSDT", 68.0, 10.0, Case::One), t0())
            .unwrap();
        let mut req = request("BUSDT", 100.0, 10.0, Case::Four);
        req.take_profit = 90.0;
        ledger.place_market_order(req, t0()).unwrap();

        let reloaded = Ledger::open(config(), Box::new(store.clone()), false, secs(5)).unwrap();
        assert_eq!(reloaded.balance(), ledger.balance());
        assert_eq!(reloaded.open_positions(), ledger.open_positions());
        assert_eq!(reloaded.pending_orders(), ledger.pending_orders());
        assert_eq!(reloaded.snapshot().next_sequence, 3);

        let reset = Ledger::open(config(), Box::new(store), true, secs(6)).unwrap();
        assert_eq!(reset.balance(), 1000.0);
        assert!(reset.open_positions().is_empty());
        assert!(reset.pending_orders().is_empty());
    }

    #[test]
    fn test_corrupted_snapshot_is_fatal() {
        let store = MemoryStore::with_document("not json");
        let err = Ledger::open(config(), Box::new(store.clone()), false, t0()).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupted { .. }));
        assert!(Ledger::open(config(), Box::new(store), true, t0()).is_ok());
    }

    #[test]
    fn test_equity_history_is_capped() {
        let mut ledger = Ledger::new(config().with_equity_cap(3), t0());
        let mut req = request("AUSDT", 100.0, 10.0, Case::Four);
        req.take_profit = 50.0;
        ledger.place_market_order(req, t0()).unwrap();

        let mut prices = HashMap::new();
        for (i, price) in [99.0, 98.0, 97.0, 96.0, 95.0].iter().enumerate() {
            prices.insert(Symbol::new("AUSDT"), *price);
            ledger.record_equity(&prices, secs(i as i64));
        }
        let history = ledger.equity_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].time, secs(2));
        let last = history.last().unwrap();
        assert_relative_eq!(last.unrealized_pnl, 5.0, epsilon = 1e-9);
        assert_relative_eq!(last.equity, ledger.balance() + 5.0, epsilon = 1e-9);
        assert_eq!(last.active_operations, 1);
    }

    #[test]
    fn test_long_mirrored_rules() {
        let mut ledger = Ledger::new(config(), t0());
        let mut req = request("LUSDT", 40.0, 10.0, Case::One);
        req.side = Side::Long;
        req.take_profit = 60.0;
        req.stop_loss = Some(10.0);
        ledger.place_limit_order(req, t0()).unwrap();

        let symbol = Symbol::new("LUSDT");
        assert!(ledger.check_pending_orders(&symbol, 45.0, secs(1)).is_empty());
        let report = ledger.check_pending_orders(&symbol, 39.0, secs(2));
        assert_eq!(report.filled.len(), 1);

        let closed = ledger.check_positions(&symbol, 61.0, secs(4));
        assert_eq!(closed[0].reason, CloseReason::TakeProfit);
        assert!(closed[0].pnl > 0.0);
        assert_balance_invariant(&ledger);
    }
}
