//! Polymarket Position Mirror
//!
//! Watches a target wallet's positions and replicates position changes into a
//! local wallet with bounded sizing and slippage-capped execution.

mod api;
mod bot;
mod db;
mod ledger;
mod models;
mod simulation;
mod trading;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::api::{ClobConnector, DataClient};
use crate::bot::{Bot, BotConfig};
use crate::db::Database;
use crate::ledger::{export_csv, Ledger};
use crate::models::{from_units, COLLATERAL_DECIMALS};
use crate::simulation::{simulator, PaperConfig};
use crate::trading::{Orchestrator, ReplicationConfig, RetryPolicy};

/// Polymarket position mirror CLI.
#[derive(Parser)]
#[command(name = "polymirror")]
#[command(about = "Mirror a Polymarket wallet's positions into your own", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", env = "MIRROR_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Sizing and execution guards.
#[derive(Args, Debug, Clone)]
struct ReplicationArgs {
    /// Scale applied to the target's investment
    #[arg(long, env = "MIRROR_MULTIPLIER", default_value = "1.0")]
    multiplier: Decimal,

    /// Minimum trade size in USDC
    #[arg(long, env = "MIRROR_MIN_TRADE", default_value = "1")]
    min_trade: Decimal,

    /// Maximum trade size in USDC
    #[arg(long, env = "MIRROR_MAX_TRADE", default_value = "50")]
    max_trade: Decimal,

    /// Relative balance growth that counts as an increase (0.1 = 10%)
    #[arg(long, env = "MIRROR_INCREASE_THRESHOLD", default_value = "0.1")]
    increase_threshold: Decimal,

    /// Slippage tolerance on opens, in basis points
    #[arg(long, env = "MIRROR_SLIPPAGE_BPS", default_value = "100")]
    slippage_bps: u32,

    /// Haircut on the expected return when closing, in percent
    #[arg(long, env = "MIRROR_SELL_HAIRCUT_PCT", default_value = "5")]
    sell_haircut_pct: u32,

    /// Ceiling on price per unit of execution effort (fee rate in bps on the CLOB)
    #[arg(long, env = "MIRROR_FEE_CEILING", default_value = "100")]
    fee_ceiling: u64,

    /// Confirmations to wait for before a leg counts as done
    #[arg(long, env = "MIRROR_CONFIRMATIONS", default_value = "1")]
    confirmations: u32,

    /// Confirmation timeout in seconds
    #[arg(long, env = "MIRROR_CONFIRMATION_TIMEOUT", default_value = "120")]
    confirmation_timeout: u64,

    /// Markets processed concurrently within one pass (1 = sequential)
    #[arg(long, env = "MIRROR_MAX_CONCURRENT", default_value = "4")]
    max_concurrent: usize,

    /// Attempts for each connector read
    #[arg(long, env = "MIRROR_RETRY_ATTEMPTS", default_value = "3")]
    retry_attempts: u32,
}

impl ReplicationArgs {
    fn into_config(self) -> ReplicationConfig {
        ReplicationConfig {
            multiplier: self.multiplier,
            min_trade_size: self.min_trade,
            max_trade_size: self.max_trade,
            increase_threshold: self.increase_threshold,
            slippage_bps: self.slippage_bps,
            sell_haircut_pct: self.sell_haircut_pct,
            fee_ceiling: self.fee_ceiling,
            confirmations: self.confirmations,
            confirmation_timeout_secs: self.confirmation_timeout,
            max_concurrent_markets: self.max_concurrent,
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Polling loop settings.
#[derive(Args, Debug, Clone)]
struct LoopArgs {
    /// Wallet address to mirror
    #[arg(short, long, env = "MIRROR_TARGET")]
    target: String,

    /// Polling interval in seconds
    #[arg(short, long, env = "MIRROR_POLL_INTERVAL", default_value = "30")]
    interval: u64,

    /// Log a summary every N passes (0 disables)
    #[arg(long, default_value = "20")]
    summary_every: u64,

    /// Stop after N polls
    #[arg(long)]
    max_polls: Option<u64>,
}

impl LoopArgs {
    fn into_config(self) -> BotConfig {
        BotConfig {
            target: self.target,
            poll_interval_secs: self.interval,
            summary_every: self.summary_every,
            max_polls: self.max_polls,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the target wallet with real orders on the CLOB
    Run {
        #[command(flatten)]
        looping: LoopArgs,

        #[command(flatten)]
        replication: ReplicationArgs,

        /// Ledger file path
        #[arg(long, env = "MIRROR_LEDGER", default_value = "ledger.json")]
        ledger: PathBuf,

        /// Database URL for reconciliation state
        #[arg(long, env = "MIRROR_DATABASE", default_value = "sqlite:./polymirror.db?mode=rwc")]
        database: String,
    },

    /// Mirror the target wallet against a paper exchange (no real money)
    Simulate {
        #[command(flatten)]
        looping: LoopArgs,

        #[command(flatten)]
        replication: ReplicationArgs,

        /// Ledger file path
        #[arg(long, default_value = "paper_ledger.json")]
        ledger: PathBuf,

        /// Database URL for reconciliation state
        #[arg(long, default_value = "sqlite:./paper_state.db?mode=rwc")]
        database: String,

        /// Initial virtual balance in USDC
        #[arg(short, long, default_value = "10000")]
        capital: Decimal,

        /// Simulated slippage percentage (0-100)
        #[arg(long, default_value = "0.3")]
        slippage: Decimal,

        /// Simulated fee percentage (0-100)
        #[arg(long, default_value = "0.1")]
        fee: Decimal,
    },

    /// Show ledger statistics and open positions
    Stats {
        /// Ledger file path
        #[arg(long, env = "MIRROR_LEDGER", default_value = "ledger.json")]
        ledger: PathBuf,
    },

    /// Export the ledger as CSV
    Export {
        /// Ledger file path
        #[arg(long, env = "MIRROR_LEDGER", default_value = "ledger.json")]
        ledger: PathBuf,

        /// Output CSV path
        #[arg(short, long, default_value = "ledger.csv")]
        output: PathBuf,
    },

    /// Show the effective replication configuration
    Config {
        #[command(flatten)]
        replication: ReplicationArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            looping,
            replication,
            ledger,
            database,
        } => {
            let config = replication.into_config();
            let bot_config = looping.into_config();

            let connector = ClobConnector::from_env().context("CLOB connector not configured")?;
            info!(address = %connector.address(), "CLOB connector initialized");

            let ledger = Ledger::open(&ledger)
                .with_context(|| format!("Failed to open ledger {}", ledger.display()))?;
            let engine = Orchestrator::new(config.clone(), connector, ledger)?;
            let db = Database::new(&database).await?;

            println!("\n=== Polymarket Position Mirror ===");
            println!("Target:           {}", bot_config.target);
            println!("Polling interval: {}s", bot_config.poll_interval_secs);
            println!("Trade size:       ${} - ${} (x{})", config.min_trade_size, config.max_trade_size, config.multiplier);
            println!("Mode:             LIVE TRADING");
            println!("\nPress Ctrl+C to stop.\n");

            let mut bot = Bot::new(bot_config, DataClient::new()?, engine, db).await?;
            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }

            println!("\n{}", bot.stats());
        }

        Commands::Simulate {
            looping,
            replication,
            ledger,
            database,
            capital,
            slippage,
            fee,
        } => {
            let config = replication.into_config();
            let bot_config = looping.into_config();

            let paper = PaperConfig {
                initial_balance: capital,
                slippage: slippage / dec!(100),
                fee_rate: fee / dec!(100),
            };

            let ledger = Ledger::open(&ledger)
                .with_context(|| format!("Failed to open ledger {}", ledger.display()))?;
            let engine = simulator(config, paper, ledger)?;
            let db = Database::new(&database).await?;

            println!("\n=== Paper Mirroring Mode ===");
            println!("Target:           {}", bot_config.target);
            println!("Capital:          ${}", capital);
            println!("Polling interval: {}s", bot_config.poll_interval_secs);
            println!("Slippage:         {}%", slippage);
            println!("Fee:              {}%", fee);
            println!("\nThis is SIMULATED trading - no real money involved.");
            println!("Press Ctrl+C to stop.\n");

            let mut bot = Bot::new(bot_config, DataClient::new()?, engine, db).await?;
            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Simulation error");
            }

            println!("\n{}", bot.stats());
            println!("{}", bot.engine().connector().stats());
        }

        Commands::Stats { ledger } => {
            let ledger = Ledger::open(&ledger)
                .with_context(|| format!("Failed to open ledger {}", ledger.display()))?;

            println!("\n{}\n", ledger.statistics());

            let open = ledger.open_positions();
            if open.is_empty() {
                println!("No open positions.");
                return Ok(());
            }

            println!("{:<6} {:<44} {:<8} {:>12} {:>16}", "ID", "MARKET", "OUTCOME", "INVESTED", "OPENED");
            println!("{}", "-".repeat(90));
            for entry in open {
                println!(
                    "{:<6} {:<44} {:<8} {:>12.2} {:>16}",
                    entry.trade_id,
                    truncate(&entry.market_id, 44),
                    entry.outcome,
                    from_units(entry.amount, COLLATERAL_DECIMALS),
                    entry.recorded_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }

        Commands::Export { ledger, output } => {
            let ledger = Ledger::open(&ledger)
                .with_context(|| format!("Failed to open ledger {}", ledger.display()))?;
            export_csv(ledger.entries(), &output)?;
            println!("Exported {} entries to {}", ledger.entries().len(), output.display());
        }

        Commands::Config { replication } => {
            let config = replication.into_config();

            println!("\n=== Replication Configuration ===\n");
            println!("Sizing:");
            println!("  Multiplier:           {}", config.multiplier);
            println!("  Min Trade Size:       ${}", config.min_trade_size);
            println!("  Max Trade Size:       ${}", config.max_trade_size);
            println!("  Increase Threshold:   {}%", config.increase_threshold * dec!(100));

            println!("\nExecution Guards:");
            println!("  Open Slippage:        {} bps", config.slippage_bps);
            println!("  Close Haircut:        {}%", config.sell_haircut_pct);
            println!("  Fee Ceiling:          {}", config.fee_ceiling);
            println!("  Confirmations:        {}", config.confirmations);
            println!("  Confirmation Timeout: {}s", config.confirmation_timeout_secs);

            println!("\nConcurrency:");
            println!("  Max Concurrent:       {}", config.max_concurrent_markets);
            println!("  Read Attempts:        {}", config.retry.max_attempts);

            if let Err(e) = config.validate() {
                println!("\nINVALID: {}", e);
            }
        }
    }

    Ok(())
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
