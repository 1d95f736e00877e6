//! One-shot scan
//!
//! Runs the detection pipeline once and prints every tradable case. With
//! `--data-dir` candles come from CSV files instead of the exchange and no
//! network access is needed.

use anyhow::{Context, Result};
use itertools::Itertools;
use tracing::info;

use fib_short_trader::data;
use fib_short_trader::exchange::BinanceFuturesClient;
use fib_short_trader::scanner::{ScanResult, Scanner};

pub fn run(
    config_path: String,
    symbols: Option<String>,
    timeframe: Option<String>,
    data_dir: Option<String>,
) -> Result<()> {
    let mut config = super::load_config(&config_path)?;
    if let Some(timeframe) = timeframe {
        config.scanner.timeframe = timeframe;
    }
    if let Some(symbols) = symbols {
        config.scanner.target_pairs = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    let scanner = Scanner::new(&config);

    let results = match data_dir {
        Some(dir) => {
            let symbols = config.scanner.target_symbols();
            if symbols.is_empty() {
                anyhow::bail!("Offline scans need --symbols");
            }
            let candles = data::load_multi_symbol(&dir, &symbols, &config.scanner.timeframe)?;
            let mut results: Vec<ScanResult> = symbols
                .iter()
                .filter_map(|s| scanner.analyze(s, candles.get(s)?))
                .collect();
            results.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            results
        }
        None => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            runtime.block_on(async {
                let market = BinanceFuturesClient::new(&config.exchange)?;
                let universe = scanner.universe(&market).await?;
                info!("Scanning {} symbols on {}", universe.len(), config.scanner.timeframe);
                Ok::<_, anyhow::Error>(scanner.scan(&market, &universe, |_| false).await)
            })?
        }
    };

    print_results(&results);
    Ok(())
}

fn print_results(results: &[ScanResult]) {
    println!("\n{}", "=".repeat(96));
    println!(
        "{:<14} {:>4} {:>14} {:>14} {:>14} {:>7} {:>6} {:>14}",
        "SYMBOL", "CASE", "PRICE", "HIGH", "LOW", "RETR%", "TYPE", "ENTRY"
    );
    println!("{}", "-".repeat(96));
    for r in results {
        println!(
            "{:<14} {:>4} {:>14.6} {:>14.6} {:>14.6} {:>6.1}% {:>6} {:>14.6}",
            r.symbol.as_str(),
            r.case.to_string(),
            r.price,
            r.swing.high.price,
            r.swing.low.price,
            r.swing.fraction_of(r.price) * 100.0,
            r.plan.kind.to_string(),
            r.plan.price
        );
    }
    println!("{}", "=".repeat(96));
    println!("{} tradable setups", results.len());

    if !results.is_empty() {
        info!(
            "Tradable: {}",
            results.iter().map(|r| r.symbol.as_str()).join(", ")
        );
    }
}
