//! Account status from the stored ledger snapshot

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::warn;

use fib_short_trader::config::TradingMode;
use fib_short_trader::exchange::{BinanceFuturesClient, OrderGateway};
use fib_short_trader::ledger::Ledger;
use fib_short_trader::metrics::PerformanceReport;

pub fn run(config_path: String) -> Result<()> {
    let config = super::load_config(&config_path)?;
    // Never reset from a read-only command
    let ledger = super::open_ledger(&config, false, Utc::now())?;

    print_ledger(&ledger);
    println!("\n{}", PerformanceReport::from_ledger(&ledger).render());

    if config.trading.mode == TradingMode::Live {
        if let (Some(key), Some(secret)) = (&config.exchange.api_key, &config.exchange.api_secret) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            let client = BinanceFuturesClient::new(&config.exchange)?.with_credentials(key, secret);
            runtime.block_on(print_exchange(&client))?;
        } else {
            warn!("Live mode configured without API credentials, skipping exchange status");
        }
    }
    Ok(())
}

fn print_ledger(ledger: &Ledger) {
    println!("\n{}", "=".repeat(80));
    println!(
        "Balance: {:.4} USDT (initial {:.2})  Equity: {:.4}  Available margin: {:.4}",
        ledger.balance(),
        ledger.initial_balance(),
        ledger.equity(),
        ledger.available_margin()
    );
    println!(
        "Max simultaneous operations: {}",
        ledger.stats().max_simultaneous
    );

    println!("\nOpen positions ({}):", ledger.open_positions().len());
    for p in ledger.open_positions().values() {
        println!(
            "  {} {} {} qty {} @ {:.6}  TP {:.6}  SL {}  uPnL {:+.4}  [{}]",
            p.id,
            p.side,
            p.symbol,
            p.quantity,
            p.entry_price,
            p.take_profit,
            p.stop_loss
                .map(|sl| format!("{:.6}", sl))
                .unwrap_or_else(|| "-".to_string()),
            p.unrealized_pnl,
            p.strategy_case
        );
    }

    println!("\nPending orders ({}):", ledger.pending_orders().len());
    for o in ledger.pending_orders().values() {
        println!(
            "  {} {} {} {} qty {} @ {:.6}  [{}] since {}",
            o.id,
            o.kind,
            o.side,
            o.symbol,
            o.quantity,
            o.price,
            o.strategy_case,
            o.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\nRecent trades:");
    for t in ledger.history().iter().rev().take(10) {
        println!(
            "  {} {} {} {:.6} -> {:.6}  net {:+.4}  ({})",
            t.closed_at.format("%Y-%m-%d %H:%M"),
            t.symbol,
            t.strategy_case,
            t.entry_price,
            t.close_price,
            t.net_pnl,
            t.reason
        );
    }
    println!("{}", "=".repeat(80));
}

async fn print_exchange(client: &BinanceFuturesClient) -> Result<()> {
    let balance = client
        .get_balance()
        .await
        .context("Failed to read futures wallet balance")?;
    let positions = client
        .get_positions()
        .await
        .context("Failed to read exchange positions")?;

    println!("\nExchange wallet: {:.4} USDT", balance);
    for p in positions {
        println!(
            "  {} {} qty {} @ {:.6}  uPnL {:+.4}",
            p.side, p.symbol, p.quantity, p.entry_price, p.unrealized_pnl
        );
    }
    Ok(())
}
