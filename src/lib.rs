//! Fibonacci Short Trader
//!
//! An automated short-selling system for USDⓈ-M crypto futures built on
//! Fibonacci retracements of price swings.
//!
//! The detection pipeline is pure and synchronous:
//!
//! ```text
//! candles -> zigzag::detect -> SwingFinder::find -> Classifier::classify -> plan_order
//! ```
//!
//! The [`ledger::Ledger`] is the account state machine: it rests and fills
//! orders, marks positions, enforces take profit, stop loss and zone
//! invalidation, and snapshots itself after every transition. The
//! [`evaluator::TickEvaluator`] drives it from price ticks and scan cycles
//! against the [`exchange::MarketData`] and [`exchange::OrderGateway`]
//! traits, in paper mode or mirrored to Binance futures.
//!
//! ## Offline Example
//! ```no_run
//! use fib_short_trader::config::Config;
//! use fib_short_trader::scanner::Scanner;
//! use fib_short_trader::{data, Symbol};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let candles = data::load_csv("data/ETHUSDT_4h.csv")?;
//!     if let Some(result) = Scanner::new(&config).analyze(&Symbol::new("ETHUSDT"), &candles) {
//!         println!("{} -> {} at {:.4}", result.symbol, result.case, result.plan.price);
//!     }
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod data;
pub mod evaluator;
pub mod exchange;
pub mod indicators;
pub mod instrument;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod scanner;
pub mod swing;
pub mod types;
pub mod zigzag;

pub use classifier::{plan_order, Classifier, OrderPlan};
pub use config::Config;
pub use evaluator::{Tick, TickEvaluator};
pub use instrument::Instrument;
pub use ledger::{Ledger, LedgerConfig};
pub use metrics::PerformanceReport;
pub use swing::{Swing, SwingFinder};
pub use types::*;
pub use zigzag::{Pivot, PivotKind, ZigZagParams};
