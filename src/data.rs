//! Candle files
//!
//! Offline scans read OHLCV candles from CSV files named
//! `{SYMBOL}_{timeframe}.csv` with the header
//! `datetime,open,high,low,close,volume`. The datetime column takes RFC 3339,
//! `%Y-%m-%d %H:%M:%S` or unix milliseconds. Rows that fail candle
//! validation are dropped with a warning.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Candle, Symbol};

/// Load OHLCV data from CSV file
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    let mut dropped = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.with_context(|| format!("Failed to read row {}", row))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let time = parse_time(dt_str)
            .with_context(|| format!("Failed to parse datetime on row {}: {}", row, dt_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse {} on row {}", name, row))
        };

        match Candle::new(
            time,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        ) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                warn!("{}: row {} dropped: {}", path.display(), row, e);
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        warn!("{}: {} invalid candles dropped", path.display(), dropped);
    }
    Ok(candles)
}

pub fn csv_path(data_dir: impl AsRef<Path>, symbol: &Symbol, timeframe: &str) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol.as_str(), timeframe))
}

/// Load data for multiple symbols from CSV files. Missing files are skipped;
/// finding none at all is an error.
pub fn load_multi_symbol(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    timeframe: &str,
) -> Result<HashMap<Symbol, Vec<Candle>>> {
    let mut data = HashMap::new();

    for symbol in symbols {
        let path = csv_path(&data_dir, symbol, timeframe);
        if !path.exists() {
            warn!("Data file not found: {}", path.display());
            continue;
        }

        let candles =
            load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;
        info!("Loaded {} candles for {}", candles.len(), symbol);
        data.insert(symbol.clone(), candles);
    }

    if data.is_empty() {
        bail!("No data loaded for any symbol");
    }
    Ok(data)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = value.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }
    let millis: i64 = value.parse()?;
    DateTime::<Utc>::from_timestamp_millis(millis).context("timestamp out of range")
}
