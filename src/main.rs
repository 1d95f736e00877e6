//! Fibonacci short trader - main entry point
//!
//! This binary provides three subcommands:
//! - run: Run the trading loop (paper or live)
//! - scan: Run the detection pipeline once and print tradable setups
//! - status: Show the stored account state and performance

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "fib-short-trader")]
#[command(about = "Fibonacci retracement short-selling bot for crypto futures", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading loop
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: String,

        /// Paper trading mode (overrides config)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,

        /// Discard the stored ledger and start fresh
        #[arg(long)]
        reset: bool,
    },

    /// Scan once and print tradable setups
    Scan {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: String,

        /// Symbols to scan (comma-separated). E.g., "ETHUSDT,SOLUSDT"
        #[arg(short, long)]
        symbols: Option<String>,

        /// Timeframe (overrides config). E.g., "1h", "4h"
        #[arg(short, long)]
        timeframe: Option<String>,

        /// Read candles from {SYMBOL}_{timeframe}.csv files in this directory
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Show account state and performance
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);
    if file_only {
        // Table output stays clean on the console
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Run { .. } => ("run", false),
        Commands::Scan { .. } => ("scan", false),
        Commands::Status { .. } => ("status", true),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Run {
            config,
            paper,
            live,
            reset,
        } => commands::run::run(config, paper, live, reset),

        Commands::Scan {
            config,
            symbols,
            timeframe,
            data_dir,
        } => commands::scan::run(config, symbols, timeframe, data_dir),

        Commands::Status { config } => commands::status::run(config),
    }
}
