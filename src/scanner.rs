//! Market scanner
//!
//! Picks the symbol universe and runs the detection pipeline for each one:
//! candles → ZigZag pivots → swing → case → order plan. A symbol that cannot
//! be fetched or has nothing tradable is skipped, never fatal for the scan.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{plan_order, Classifier, OrderPlan};
use crate::config::{Config, FibonacciConfig, ScannerConfig};
use crate::exchange::{ExchangeResult, MarketData};
use crate::indicators;
use crate::swing::{Swing, SwingFinder};
use crate::zigzag::{self, ZigZagParams};
use crate::{Candle, Case, Symbol};

/// Candles requested for the RSI filter
const RSI_CANDLES: u32 = 100;

/// A symbol with a tradable case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub symbol: Symbol,
    /// Close of the newest candle
    pub price: f64,
    pub rsi: Option<f64>,
    pub swing: Swing,
    pub case: Case,
    pub plan: OrderPlan,
}

#[derive(Debug, Clone)]
pub struct Scanner {
    config: ScannerConfig,
    zigzag: ZigZagParams,
    fibonacci: FibonacciConfig,
    finder: SwingFinder,
    classifier: Classifier,
}

impl Scanner {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(
            config.scanner.clone(),
            config.zigzag_params(),
            config.fibonacci.clone(),
        )
    }

    pub fn from_parts(
        config: ScannerConfig,
        zigzag: ZigZagParams,
        fibonacci: FibonacciConfig,
    ) -> Self {
        Self {
            finder: SwingFinder::new(&fibonacci),
            classifier: Classifier::new(&fibonacci),
            config,
            zigzag,
            fibonacci,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Configured targets, or the top symbols by volume. Exclusions apply to
    /// both.
    pub async fn universe<M: MarketData>(&self, market: &M) -> ExchangeResult<Vec<Symbol>> {
        let symbols = if self.config.target_pairs.is_empty() {
            market.top_symbols(self.config.top_pairs_limit).await?
        } else {
            self.config.target_symbols()
        };
        Ok(symbols
            .into_iter()
            .filter(|s| !self.config.is_excluded(s.as_str()))
            .collect())
    }

    /// Run the pipeline on candles already in hand. Price is the newest
    /// close.
    pub fn analyze(&self, symbol: &Symbol, candles: &[Candle]) -> Option<ScanResult> {
        if candles.len() < self.config.min_candles {
            debug!("{}: only {} candles", symbol, candles.len());
            return None;
        }
        let price = candles.last()?.close;

        let pivots = zigzag::detect(candles, &self.zigzag);
        if pivots.len() < 2 {
            debug!("{}: not enough pivots ({})", symbol, pivots.len());
            return None;
        }

        let Some(swing) = self.finder.find(&pivots, candles, price) else {
            debug!("{}: no tradable swing", symbol);
            return None;
        };

        let case = self.classifier.classify(price, &swing, candles);
        let plan = plan_order(case, &swing, price, &self.fibonacci)?;
        debug!(
            "{}: swing {:.6} -> {:.6}, price {:.6} ({:.1}%) -> {}",
            symbol,
            swing.high.price,
            swing.low.price,
            price,
            swing.fraction_of(price) * 100.0,
            case
        );

        Some(ScanResult {
            symbol: symbol.clone(),
            price,
            rsi: None,
            swing,
            case,
            plan,
        })
    }

    /// Fetch and analyze one symbol
    pub async fn scan_symbol<M: MarketData>(
        &self,
        market: &M,
        symbol: &Symbol,
    ) -> ExchangeResult<Option<ScanResult>> {
        let rsi = if self.config.rsi_threshold > 0.0 {
            let candles = market
                .get_candles(symbol, &self.config.rsi_timeframe, RSI_CANDLES)
                .await?;
            let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            match indicators::latest_rsi(&closes, self.config.rsi_period) {
                Some(rsi) if rsi >= self.config.rsi_threshold => Some(rsi),
                Some(rsi) => {
                    debug!(
                        "{}: RSI {:.1} < {}",
                        symbol, rsi, self.config.rsi_threshold
                    );
                    return Ok(None);
                }
                None => {
                    debug!("{}: not enough {} candles for RSI", symbol, self.config.rsi_timeframe);
                    return Ok(None);
                }
            }
        } else {
            None
        };

        let candles = market
            .get_candles(symbol, &self.config.timeframe, self.config.candle_limit)
            .await?;
        Ok(self.analyze(symbol, &candles).map(|mut result| {
            result.rsi = rsi;
            result
        }))
    }

    /// Scan every symbol for which `skip` is false. Failures are logged and
    /// the symbol is left out.
    pub async fn scan<M: MarketData>(
        &self,
        market: &M,
        symbols: &[Symbol],
        skip: impl Fn(&Symbol) -> bool,
    ) -> Vec<ScanResult> {
        let mut results = Vec::new();
        for symbol in symbols.iter().filter(|s| !skip(s)) {
            match self.scan_symbol(market, symbol).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => warn!("{}: scan failed: {}", symbol, e),
            }
        }

        let count = |case: Case| results.iter().filter(|r| r.case == case).count();
        info!(
            "Scan: {} symbols, case 4: {} | case 3: {} | case 1: {}",
            symbols.len(),
            count(Case::Four),
            count(Case::Three),
            count(Case::One)
        );
        results
    }
}
