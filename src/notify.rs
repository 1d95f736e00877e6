//! Trade event notifications
//!
//! Sinks are fire-and-forget: a slow or failing sink never blocks or fails
//! the ledger transition that produced the event.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::NotificationConfig;
use crate::ledger::{CloseReason, OrderId};
use crate::{Case, Side, Symbol};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Limit order resting on the book
    Opened,
    /// Position opened by a fill or a market order
    Filled,
    Closed(CloseReason),
    Cancelled(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub kind: EventKind,
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: f64,
    pub pnl: Option<f64>,
    pub case: Option<Case>,
}

impl TradeEvent {
    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let case = self.case.map(|c| format!(" [{}]", c)).unwrap_or_default();
        match &self.kind {
            EventKind::Opened => format!(
                "Order placed: {} {} @ {:.6}{}",
                self.side, self.symbol, self.price, case
            ),
            EventKind::Filled => format!(
                "Position opened: {} {} @ {:.6}{}",
                self.side, self.symbol, self.price, case
            ),
            EventKind::Closed(reason) => format!(
                "Position closed ({}): {} {} @ {:.6} pnl {:+.4}{}",
                reason,
                self.side,
                self.symbol,
                self.price,
                self.pnl.unwrap_or_default(),
                case
            ),
            EventKind::Cancelled(reason) => format!(
                "Order cancelled: {} {} ({}){}",
                self.side, self.symbol, reason, case
            ),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: TradeEvent);
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: TradeEvent) {
        info!(order_id = %event.order_id, "{}", event.summary());
    }
}

/// Sends events to every configured chat through the Telegram Bot API
///
/// Messages are posted from a spawned task on the current tokio runtime.
/// Outside a runtime the event is dropped with a warning.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    url: String,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_ids: Vec<i64>) -> Self {
        TelegramNotifier {
            client: reqwest::Client::new(),
            url: format!("{}/bot{}/sendMessage", TELEGRAM_API, token),
            chat_ids,
        }
    }

    /// `None` when no token or no chat is configured
    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        let token = config.telegram_token.as_deref()?;
        if config.chat_ids.is_empty() {
            return None;
        }
        Some(Self::new(token, config.chat_ids.clone()))
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, event: TradeEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; dropping notification for {}", event.symbol);
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        let chat_ids = self.chat_ids.clone();
        let text = event.summary();

        handle.spawn(async move {
            for chat_id in chat_ids {
                let body = serde_json::json!({ "chat_id": chat_id, "text": text });
                match client.post(&url).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {}
                    Ok(resp) => warn!("Telegram error status: {}", resp.status()),
                    Err(e) => warn!("Telegram send failed: {}", e),
                }
            }
        });
    }
}

/// Fans one event out to several sinks
#[derive(Default, Clone)]
pub struct Notifiers(Vec<Arc<dyn Notifier>>);

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.0.push(notifier);
        self
    }

    /// Log sink plus Telegram when configured
    pub fn from_config(config: &NotificationConfig) -> Self {
        let notifiers = Self::new().with(Arc::new(LogNotifier));
        match TelegramNotifier::from_config(config) {
            Some(telegram) => notifiers.with(Arc::new(telegram)),
            None => notifiers,
        }
    }
}

impl Notifier for Notifiers {
    fn notify(&self, event: TradeEvent) {
        for notifier in &self.0 {
            notifier.notify(event.clone());
        }
    }
}

/// Keeps every event in memory; handy for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<TradeEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TradeEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: TradeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
