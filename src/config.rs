//! Configuration management
//!
//! Handles loading and parsing of the JSON configuration file with environment
//! variable overrides for credentials and the most commonly tuned knobs.
//! Every section is optional in the file and falls back to its `Default`.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::zigzag::{self, ZigZagParams};
use crate::{Case, Symbol};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub fibonacci: FibonacciConfig,
    /// ZigZag (deviation %, depth) keyed by timeframe
    pub zigzag: ZigZagTable,
    pub scanner: ScannerConfig,
    pub state: StateConfig,
    pub notifications: NotificationConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment wins over the file: credentials never need to live in JSON
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
            self.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BINANCE_API_SECRET") {
            self.exchange.api_secret = Some(api_secret);
        }
        if let Ok(token) = std::env::var("TELEGRAM_TOKEN") {
            self.notifications.telegram_token = Some(token);
        }
        if let Ok(timeframe) = std::env::var("BOT_TIMEFRAME") {
            self.scanner.timeframe = timeframe;
        }
        if let Ok(interval) = std::env::var("BOT_SCAN_INTERVAL") {
            self.scanner.scan_interval_secs = interval
                .parse()
                .with_context(|| format!("BOT_SCAN_INTERVAL is not a number: {}", interval))?;
        }
        if let Ok(path) = std::env::var("BOT_TRADES_FILE") {
            self.state.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot trade with
    pub fn validate(&self) -> Result<()> {
        ensure!(self.trading.leverage > 0.0, "leverage must be positive");
        ensure!(
            self.trading.margin_per_trade > 0.0,
            "margin_per_trade must be positive"
        );
        ensure!(
            self.exchange.maker_fee >= 0.0 && self.exchange.taker_fee >= 0.0,
            "commission rates must not be negative"
        );
        self.fibonacci.zones.validate()?;
        for (timeframe, params) in &self.zigzag.0 {
            ensure!(
                params.depth > 0,
                "zigzag depth for {} must be positive",
                timeframe
            );
        }
        Ok(())
    }

    /// ZigZag parameters for the scanner's timeframe
    pub fn zigzag_params(&self) -> ZigZagParams {
        self.zigzag.for_timeframe(&self.scanner.timeframe)
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub base_url: String,
    pub maker_fee: f64,
    pub taker_fee: f64,
    /// Requests per second
    pub rate_limit: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            base_url: "https://fapi.binance.com".to_string(),
            maker_fee: 0.0002, // 0.02%
            taker_fee: 0.0006, // 0.06%
            rate_limit: 10,
            max_retries: 3,
            timeout_secs: 30,
            recv_window_ms: 5000,
        }
    }
}

/// Paper accounts simulate fills locally; live accounts mirror every order to
/// the exchange before recording it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

/// Account and sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub mode: TradingMode,
    /// Starting balance in the quote currency (USDT)
    pub initial_balance: f64,
    pub leverage: f64,
    pub margin_per_trade: f64,
    /// Placements are refused once available margin falls below this
    pub min_available_margin: f64,
    /// Open positions plus pending orders
    pub max_simultaneous: usize,
    /// Positions younger than this are not checked for TP/SL
    pub cooldown_ms: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            mode: TradingMode::Paper,
            initial_balance: 30.0,
            leverage: 10.0,
            margin_per_trade: 3.0,
            min_available_margin: 3.0,
            max_simultaneous: 10,
            cooldown_ms: 1000,
        }
    }
}

/// Retracement zone boundaries as fractions of the swing range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub case1_min: f64,
    /// Upper bound of case 1, lower bound of case 3, case 1 limit entry
    pub case3_min: f64,
    /// Upper bound of case 3, lower bound of case 4, case 3 limit entry
    pub case4_min: f64,
    /// Swing is dead once any high after the Low reaches this
    pub invalidation: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        ZoneConfig {
            case1_min: 0.58,
            case3_min: 0.68,
            case4_min: 0.786,
            invalidation: 0.90,
        }
    }
}

impl ZoneConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            0.0 < self.case1_min
                && self.case1_min < self.case3_min
                && self.case3_min < self.case4_min
                && self.case4_min < self.invalidation,
            "zone boundaries must be strictly increasing: {:?}",
            self
        );
        Ok(())
    }

    /// Lower bound of the zone for `case`
    pub fn zone_floor(&self, case: Case) -> Option<f64> {
        match case {
            Case::None => None,
            Case::One => Some(self.case1_min),
            Case::Three => Some(self.case3_min),
            Case::Four => Some(self.case4_min),
        }
    }

    /// Limit entry level for cases entered with a resting order
    pub fn entry_fraction(&self, case: Case) -> Option<f64> {
        match case {
            Case::One => Some(self.case3_min),
            Case::Three => Some(self.case4_min),
            Case::None | Case::Four => None,
        }
    }
}

/// Exit and invalidation ratios for one case
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaseParams {
    pub take_profit: f64,
    pub stop_loss: f64,
    /// Pending order is cancelled once price falls to this fraction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_below: Option<f64>,
}

impl CaseParams {
    pub fn new(take_profit: f64, stop_loss: f64, cancel_below: Option<f64>) -> Self {
        CaseParams {
            take_profit,
            stop_loss,
            cancel_below,
        }
    }
}

/// Swing detection, classification and exit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FibonacciConfig {
    pub zones: ZoneConfig,
    /// Most recent candles excluded from swing touch checks and inspected by
    /// the classifier for wick-through
    pub recent_candles: usize,
    pub case1: CaseParams,
    pub case3: CaseParams,
    pub case4: CaseParams,
}

impl Default for FibonacciConfig {
    fn default() -> Self {
        FibonacciConfig {
            zones: ZoneConfig::default(),
            recent_candles: 3,
            case1: CaseParams::new(0.55, 0.90, Some(0.382)),
            case3: CaseParams::new(0.62, 1.05, Some(0.30)),
            case4: CaseParams::new(0.62, 1.05, None),
        }
    }
}

impl FibonacciConfig {
    pub fn case_params(&self, case: Case) -> Option<&CaseParams> {
        match case {
            Case::None => None,
            Case::One => Some(&self.case1),
            Case::Three => Some(&self.case3),
            Case::Four => Some(&self.case4),
        }
    }

    pub fn with_zones(mut self, zones: ZoneConfig) -> Self {
        self.zones = zones;
        self
    }

    pub fn with_recent_candles(mut self, n: usize) -> Self {
        self.recent_candles = n;
        self
    }

    pub fn with_case_params(mut self, case: Case, params: CaseParams) -> Self {
        match case {
            Case::One => self.case1 = params,
            Case::Three => self.case3 = params,
            Case::Four => self.case4 = params,
            Case::None => {}
        }
        self
    }
}

/// ZigZag parameters per timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZigZagTable(pub BTreeMap<String, ZigZagParams>);

impl Default for ZigZagTable {
    fn default() -> Self {
        ZigZagTable(zigzag::default_table())
    }
}

impl ZigZagTable {
    /// Falls back to the built-in table, then to the 1h setting
    pub fn for_timeframe(&self, timeframe: &str) -> ZigZagParams {
        self.0
            .get(timeframe)
            .copied()
            .unwrap_or_else(|| ZigZagParams::for_timeframe(timeframe))
    }
}

/// Symbol selection and scan cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub timeframe: String,
    pub candle_limit: u32,
    /// Symbols with fewer candles are skipped
    pub min_candles: usize,
    pub scan_interval_secs: u64,
    pub first_scan_delay_secs: u64,
    /// How often tracked symbols are re-priced
    pub price_poll_secs: u64,
    /// Universe size when `target_pairs` is empty
    pub top_pairs_limit: usize,
    pub target_pairs: Vec<String>,
    pub excluded_pairs: Vec<String>,
    /// RSI filter is disabled at 0
    pub rsi_threshold: f64,
    pub rsi_timeframe: String,
    pub rsi_period: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            timeframe: "4h".to_string(),
            candle_limit: 1000,
            min_candles: 50,
            scan_interval_secs: 30,
            first_scan_delay_secs: 5,
            price_poll_secs: 5,
            top_pairs_limit: 200,
            target_pairs: Vec::new(),
            excluded_pairs: [
                "USDCUSDT",
                "TUSDUSDT",
                "BUSDUSDT",
                "FDUSDUSDT",
                "USDPUSDT",
                "BTCDOMUSDT",
                "DAIUSDT",
                "EURUSDT",
                "GBPUSDT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            rsi_threshold: 0.0,
            rsi_timeframe: "5m".to_string(),
            rsi_period: 14,
        }
    }
}

impl ScannerConfig {
    pub fn target_symbols(&self) -> Vec<Symbol> {
        self.target_pairs.iter().map(Symbol::new).collect()
    }

    pub fn is_excluded(&self, symbol: &str) -> bool {
        self.excluded_pairs.iter().any(|s| s == symbol)
    }
}

/// Snapshot backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

/// Ledger persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub path: PathBuf,
    /// Start from an empty ledger instead of the stored snapshot
    pub reset_on_load: bool,
    pub equity_history_cap: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            backend: StateBackend::Json,
            path: PathBuf::from("trades.json"),
            reset_on_load: false,
            equity_history_cap: 10_000,
        }
    }
}

/// Telegram notifications
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_token: Option<String>,
    pub chat_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.trading.initial_balance, 30.0);
        assert_eq!(config.trading.leverage, 10.0);
        assert_eq!(config.scanner.timeframe, "4h");
        assert_eq!(config.fibonacci.recent_candles, 3);
        assert_eq!(config.zigzag_params(), ZigZagParams::new(3.0, 10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let json = r#"{
            "trading": { "leverage": 20, "mode": "live" },
            "fibonacci": { "zones": { "case1_min": 0.6 },
                           "case1": { "take_profit": 0.5, "stop_loss": 0.9, "cancel_below": 0.2 } },
            "zigzag": { "4h": { "deviation": 4.0, "depth": 12 } }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.trading.leverage, 20.0);
        assert_eq!(config.trading.mode, TradingMode::Live);
        assert_eq!(config.trading.margin_per_trade, 3.0);
        assert_eq!(config.fibonacci.zones.case1_min, 0.6);
        assert_eq!(config.fibonacci.zones.case3_min, 0.68);
        assert_eq!(config.fibonacci.case1.cancel_below, Some(0.2));
        assert_eq!(config.zigzag_params(), ZigZagParams::new(4.0, 12));
        // Overriding one timeframe drops the rest of the table; lookups still
        // fall back to the built-in values.
        assert_eq!(config.zigzag.for_timeframe("1d"), ZigZagParams::new(5.0, 10));
    }

    #[test]
    fn test_zone_validation() {
        let zones = ZoneConfig {
            case3_min: 0.5,
            ..ZoneConfig::default()
        };
        assert!(zones.validate().is_err());
    }

    #[test]
    fn test_entry_fractions_follow_zone_bounds() {
        let zones = ZoneConfig::default();
        assert_eq!(zones.entry_fraction(Case::One), Some(0.68));
        assert_eq!(zones.entry_fraction(Case::Three), Some(0.786));
        assert_eq!(zones.entry_fraction(Case::Four), None);
        assert_eq!(zones.zone_floor(Case::Four), Some(0.786));
    }

    #[test]
    fn test_excluded_pairs() {
        let scanner = ScannerConfig::default();
        assert!(scanner.is_excluded("USDCUSDT"));
        assert!(!scanner.is_excluded("BTCUSDT"));
    }
}
