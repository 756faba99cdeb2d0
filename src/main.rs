use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pumpbot::api::{balance_or_zero, Exchange, MexcClient, PaperExchange};
use pumpbot::clock::SystemClock;
use pumpbot::config::AppConfig;
use pumpbot::execution::{EventSink, SessionEvent, SignalProcessor, TradeEngine};
use pumpbot::gateway::RequestGateway;
use pumpbot::models::{CurrencyPair, Signal};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pumpbot")]
#[command(about = "Rides announced pump events on MEXC spot: buy, ladder out, forced exit", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./pumpbot.toml when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one session for a symbol right now
    Trade {
        /// Asset symbol, e.g. XYZ
        #[arg(short, long)]
        symbol: String,

        /// Simulate orders against live prices
        #[arg(long, default_value = "false")]
        paper: bool,

        /// Starting quote balance in paper mode
        #[arg(long, default_value = "100")]
        paper_balance: Decimal,
    },

    /// Read symbols from stdin, one per line, and trade each
    Listen {
        #[arg(long, default_value = "false")]
        paper: bool,

        #[arg(long, default_value = "100")]
        paper_balance: Decimal,
    },

    /// Print the current price of a symbol
    Price {
        #[arg(short, long)]
        symbol: String,
    },

    /// Print the free balance of an asset
    Balance {
        #[arg(short, long)]
        asset: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let gateway = RequestGateway::start(&config.gateway);
    let client = MexcClient::new(&config.exchange, gateway.clone())
        .context("Failed to build exchange client")?;

    let root = CancellationToken::new();
    spawn_ctrl_c(root.clone());

    let result = run_command(cli.command, &config, client, &root).await;

    // Late requests of a cancelled session may still hold the queue open
    if tokio::time::timeout(SHUTDOWN_GRACE, gateway.shutdown()).await.is_err() {
        tracing::warn!("Request gateway did not drain within {:?}", SHUTDOWN_GRACE);
    }
    tracing::info!("👋 pumpbot stopped");
    result
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pumpbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn require_credentials(config: &AppConfig) -> Result<()> {
    if !config.exchange.has_credentials() {
        bail!("MEXC_API_KEY and MEXC_API_SECRET must be set for live trading");
    }
    Ok(())
}

/// Live client, or a paper account fed with the live client's market data
fn select_exchange(
    config: &AppConfig,
    client: MexcClient,
    paper: bool,
    paper_balance: Decimal,
) -> Result<Arc<dyn Exchange>> {
    if paper {
        tracing::info!("📝 Paper trading with {} {}", paper_balance, config.exchange.quote_currency);
        let account = PaperExchange::new()
            .with_balance(&config.exchange.quote_currency, paper_balance)
            .with_market_data(Arc::new(client));
        return Ok(Arc::new(account));
    }
    require_credentials(config)?;
    Ok(Arc::new(client))
}

fn spawn_ctrl_c(root: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("⚠️  Received Ctrl+C, stopping (open positions are still closed)");
            root.cancel();
        }
    });
}

/// Forward audit events to the log
fn spawn_event_logger() -> EventSink {
    let (sink, mut events) = EventSink::channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(target: "pumpbot::audit", "{json}"),
                Err(e) => tracing::warn!("Unserializable audit event: {e}"),
            }
            if let SessionEvent::SessionClosed { clean: false, session_id, .. } = event {
                tracing::warn!(session = %session_id, "Session closed with errors");
            }
        }
    });
    sink
}

// ============================================================================
// Commands
// ============================================================================

/// Runs `command`; the client and everything built on it is dropped on return
async fn run_command(
    command: Commands,
    config: &AppConfig,
    client: MexcClient,
    root: &CancellationToken,
) -> Result<()> {
    match command {
        Commands::Trade {
            symbol,
            paper,
            paper_balance,
        } => run_trade(config, client, &symbol, paper, paper_balance, root).await,
        Commands::Listen {
            paper,
            paper_balance,
        } => run_listen(config, client, paper, paper_balance, root).await,
        Commands::Price { symbol } => {
            let pair = CurrencyPair::new(symbol, config.exchange.quote_currency.as_str());
            let price = client.get_price(root, &pair).await?;
            println!("{pair} {price}");
            Ok(())
        }
        Commands::Balance { asset } => {
            require_credentials(config)?;
            let free = balance_or_zero(&client, root, &asset).await?;
            println!("{} {free}", asset.to_uppercase());
            Ok(())
        }
    }
}

async fn run_trade(
    config: &AppConfig,
    client: MexcClient,
    symbol: &str,
    paper: bool,
    paper_balance: Decimal,
    root: &CancellationToken,
) -> Result<()> {
    let exchange = select_exchange(config, client, paper, paper_balance)?;
    let engine = TradeEngine::from_config(exchange, config, Arc::new(SystemClock))?
        .with_events(spawn_event_logger());

    let pair = CurrencyPair::new(symbol.trim(), config.exchange.quote_currency.as_str());
    let report = engine.run_session(pair, root).await;

    tracing::info!("\n📊 Session summary:");
    tracing::info!("  Symbol: {}", report.pair);
    tracing::info!("  Bought: {} @ {:?}", report.quantity_bought, report.entry_price);
    tracing::info!("  Exit: {}", report.exit_reason);
    if let Some(order) = &report.exit_order {
        tracing::info!("  Sold: {} @ {}", order.quantity, order.price);
    }

    if let Some(e) = report.exit_error {
        bail!("exit failed, position on {} is unmanaged: {e}", report.pair);
    }
    if let Some(e) = report.error {
        bail!("session for {} failed: {e}", report.pair);
    }
    Ok(())
}

async fn run_listen(
    config: &AppConfig,
    client: MexcClient,
    paper: bool,
    paper_balance: Decimal,
    root: &CancellationToken,
) -> Result<()> {
    let exchange = select_exchange(config, client, paper, paper_balance)?;
    let clock = Arc::new(SystemClock);
    let engine = TradeEngine::from_config(exchange, config, clock.clone())?
        .with_events(spawn_event_logger());
    let processor = SignalProcessor::new(
        engine,
        &config.exchange.quote_currency,
        config.strategy.max_signal_age(),
        clock,
    );

    let (tx, signals) = mpsc::channel(16);
    let reader_ctx = root.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = reader_ctx.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if tx.send(Signal::new(line, Utc::now())).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read signal input: {e}");
                    break;
                }
            }
        }
    });

    tracing::info!("👂 Listening for symbols on stdin (Ctrl+C to stop)");
    let summary = processor.run(signals, root).await;
    if summary.unmanaged > 0 {
        bail!("{} session(s) left an unmanaged position", summary.unmanaged);
    }
    Ok(())
}
