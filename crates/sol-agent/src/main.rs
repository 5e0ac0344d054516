//! Sol-agent: multi-tenant autonomous Solana trading agent.
//!
//! Usage:
//!   sol-agent [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/agent.toml)
//!   --rpc-url <URL>         Solana RPC endpoint (overrides config)
//!   --log-level <LEVEL>     Logging level (overrides config)

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sol_agent::config::AgentConfig;
use sol_agent::decision::ThresholdDecisionService;
use sol_agent::notify::LogNotifier;
use sol_agent::persist::MemoryTradeStore;
use sol_agent::queue::TradeQueue;
use sol_agent::risk::RiskManager;
use sol_agent::scanner::OpportunityScanner;
use sol_agent::scheduler::ControlLoop;
use sol_agent::wallet::{SolanaRpc, WalletManager, WalletStore};

/// CLI arguments for sol-agent.
#[derive(Parser, Debug)]
#[command(name = "sol-agent")]
#[command(about = "Multi-tenant autonomous Solana trading agent")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/agent.toml")]
    config: PathBuf,

    /// Solana RPC endpoint (overrides config file)
    #[arg(long)]
    rpc_url: Option<String>,

    /// Logging level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        AgentConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        AgentConfig::default()
    };

    config.apply_env_overrides();
    config.apply_cli_overrides(args.rpc_url, args.log_level);

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    config.validate().context("Configuration validation failed")?;

    info!("Starting sol-agent");
    info!("RPC endpoint: {}", config.rpc.url);
    info!(
        "Scan interval: {}s (floor {}s)",
        config.scheduler.scan_interval.as_secs(),
        config.scheduler.min_scan_interval.as_secs()
    );

    // Wire the component graph.
    let store = WalletStore::open(&config.wallet.keystore_path)
        .with_context(|| format!("Failed to open keystore {:?}", config.wallet.keystore_path))?;
    info!("Keystore loaded: {} wallets", store.accounts().len());

    let provider = Arc::new(SolanaRpc::new(&config.rpc));
    let wallet = Arc::new(WalletManager::new(&config.rpc, store, provider));
    let risk = Arc::new(RiskManager::new(
        config.trading.clone(),
        config.risk.clone(),
    ));

    // Strategies are registered here at startup; an empty registry runs
    // the loop as a balance monitor only.
    let scanner = Arc::new(OpportunityScanner::new(Vec::new()));
    if scanner.strategy_count() == 0 {
        warn!("No strategies registered; running in monitor-only mode");
    }

    let decision = Arc::new(ThresholdDecisionService::default());
    let notifier = Arc::new(LogNotifier);
    let trade_store = Arc::new(MemoryTradeStore::new());
    let queue = Arc::new(TradeQueue::new());

    let (control, handle) = ControlLoop::new(
        config.scheduler.clone(),
        config.trading.clone(),
        wallet,
        risk,
        scanner,
        decision,
        notifier,
        trade_store,
        queue,
    );

    // Ctrl-C requests a graceful stop: the current cycle finishes and the
    // trade queue drains before exit.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            handle.stop();
        }
    });

    control.run().await
}
