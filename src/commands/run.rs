//! Trading loop
//!
//! Two cadences share one task: price polling feeds ticks for every symbol
//! with exposure, and the slower scan cycle places new orders. Ctrl+C is
//! observed between iterations so an in-flight placement is always recorded
//! before exit.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use fib_short_trader::config::{Config, TradingMode};
use fib_short_trader::evaluator::{EvaluatorConfig, TickEvaluator};
use fib_short_trader::exchange::{
    BinanceFuturesClient, ClientConfig, MarketData, OrderGateway, PaperGateway,
};
use fib_short_trader::metrics::PerformanceReport;
use fib_short_trader::scanner::Scanner;

pub fn run(config_path: String, paper: bool, live: bool, reset: bool) -> Result<()> {
    if live && paper {
        bail!("Cannot specify both --paper and --live modes");
    }

    let mut config = super::load_config(&config_path)?;
    if paper {
        config.trading.mode = TradingMode::Paper;
    } else if live {
        config.trading.mode = TradingMode::Live;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config, reset))
}

async fn run_async(config: Config, reset: bool) -> Result<()> {
    let mode_str = match config.trading.mode {
        TradingMode::Paper => "PAPER",
        TradingMode::Live => "LIVE",
    };

    info!("============================================================");
    info!("  FIBONACCI SHORT TRADER - {} MODE", mode_str);
    info!("============================================================");
    info!("Timeframe: {}", config.scanner.timeframe);
    info!(
        "Balance: {:.2} USDT | Leverage: {}x | Margin/trade: {:.2}",
        config.trading.initial_balance, config.trading.leverage, config.trading.margin_per_trade
    );
    info!(
        "Scan every {}s, prices every {}s",
        config.scanner.scan_interval_secs, config.scanner.price_poll_secs
    );
    info!("State: {}", config.state.path.display());

    let market = BinanceFuturesClient::new(&config.exchange)
        .context("Failed to create market data client")?;
    let ledger = super::open_ledger(&config, reset, Utc::now())?;
    let scanner = Scanner::new(&config);
    let evaluator_config = EvaluatorConfig::from_config(&config);

    match config.trading.mode {
        TradingMode::Paper => {
            let gateway = PaperGateway::new(ledger.balance());
            let evaluator =
                TickEvaluator::new(market, gateway, scanner, ledger, evaluator_config);
            trading_loop(evaluator, &config).await
        }
        TradingMode::Live => {
            let (Some(key), Some(secret)) = (&config.exchange.api_key, &config.exchange.api_secret)
            else {
                bail!("Live mode needs BINANCE_API_KEY and BINANCE_API_SECRET");
            };
            let gateway = BinanceFuturesClient::with_config(
                ClientConfig::from_exchange(&config.exchange)
                    .with_leverage(config.trading.leverage.round() as u32),
            )?
            .with_credentials(key, secret);

            let balance = gateway
                .get_balance()
                .await
                .context("Failed to read futures wallet balance")?;
            info!("Exchange wallet balance: {:.4} USDT", balance);

            warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
            warn!("Press Ctrl+C within 10 seconds to abort...");
            for i in (1..=10).rev() {
                info!("Starting in {} seconds...", i);
                sleep(Duration::from_secs(1)).await;
            }

            let evaluator =
                TickEvaluator::new(market, gateway, scanner, ledger, evaluator_config);
            trading_loop(evaluator, &config).await
        }
    }
}

async fn trading_loop<M: MarketData, G: OrderGateway>(
    mut evaluator: TickEvaluator<M, G>,
    config: &Config,
) -> Result<()> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                shutdown_flag_clone.store(true, Ordering::SeqCst);
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    let scanner = &config.scanner;
    let mut scan_interval = interval_at(
        Instant::now() + Duration::from_secs(scanner.first_scan_delay_secs),
        Duration::from_secs(scanner.scan_interval_secs.max(1)),
    );
    scan_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut price_interval = interval(Duration::from_secs(scanner.price_poll_secs.max(1)));
    price_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Starting trading loop...");
    let mut cycle_count = 0u64;

    loop {
        tokio::select! {
            _ = scan_interval.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
                cycle_count += 1;
                info!("--- Scan cycle {} ---", cycle_count);
                evaluator.scan_cycle(Utc::now()).await;

                let point = evaluator.record_equity(Utc::now());
                info!(
                    "Equity {:.4} (balance {:.4}, unrealized {:+.4}) | {} active",
                    point.equity, point.balance, point.unrealized_pnl, point.active_operations
                );
            }
            _ = price_interval.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
                evaluator.poll_prices(Utc::now()).await;
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let ledger = evaluator.ledger();
    info!(
        "Session ended: balance {:.4}, {} open, {} pending",
        ledger.balance(),
        ledger.open_positions().len(),
        ledger.pending_orders().len()
    );
    for line in PerformanceReport::from_ledger(ledger).render().lines() {
        info!("{}", line);
    }
    Ok(())
}
