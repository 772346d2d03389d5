//! blockscribe CLI: run the indexer and manage its queue.
//!
//! # Commands
//! ```bash
//! blockscribe run   --http-url http://localhost:8545 --ws-url ws://localhost:8546
//! blockscribe queue --block 17000000
//! blockscribe queue --from 17000000 --to 17000100
//! blockscribe reset
//! blockscribe info
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use blockscribe_core::{
    chain::http_chain_source, Indexer, IndexerBuilder, IndexerConfig, RpcHeadConnector,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "blockscribe",
    about = "Reorg-aware EVM block indexer",
    long_about = "
blockscribe follows the chain head of an Ethereum JSON-RPC node, fetches every
block with its receipts and uncles, and writes them into PostgreSQL or SQLite.

ENVIRONMENT VARIABLES:
  DATABASE_URL            postgres://... or sqlite:path (default: sqlite:blockscribe.db)
  BLOCKSCRIBE_HTTP_URL    JSON-RPC HTTP endpoint
  BLOCKSCRIBE_WS_URL      JSON-RPC WebSocket endpoint (enables newHeads)
  RUST_LOG                tracing filter, overrides --log-level
",
    version
)]
struct Cli {
    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json: bool,

    /// Database URL; the scheme selects the backend
    #[arg(long, global = true, env = "DATABASE_URL", default_value = "sqlite:blockscribe.db")]
    database_url: String,

    /// Do not create tables on startup
    #[arg(long, global = true)]
    no_automigrate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index blocks until interrupted
    Run(RunArgs),

    /// Enqueue one block or an inclusive range
    Queue {
        #[arg(long, conflicts_with_all = ["from", "to"], required_unless_present = "from")]
        block: Option<u64>,
        #[arg(long, requires = "to")]
        from: Option<u64>,
        #[arg(long, requires = "from")]
        to: Option<u64>,
    },

    /// Clear the queue and delete every stored block
    Reset,

    /// Print the default configuration
    Info,
}

#[derive(Args)]
struct RunArgs {
    /// JSON-RPC HTTP endpoint
    #[arg(long, env = "BLOCKSCRIBE_HTTP_URL", default_value = "http://localhost:8545")]
    http_url: String,

    /// JSON-RPC WebSocket endpoint; heads are polled when absent
    #[arg(long, env = "BLOCKSCRIBE_WS_URL")]
    ws_url: Option<String>,

    /// Stay this many blocks behind the head
    #[arg(long)]
    lag: Option<u64>,

    /// Do not enqueue skipped blocks when the head jumps
    #[arg(long)]
    no_backfill: bool,

    /// Skip fetching uncles
    #[arg(long)]
    no_uncles: bool,

    /// eth_blockNumber polling interval when no WebSocket is configured
    #[arg(long, default_value_t = 15_000)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json);

    let automigrate = !cli.no_automigrate;
    match cli.command {
        Commands::Run(args) => cmd_run(&cli.database_url, automigrate, args).await,
        Commands::Queue { block, from, to } => {
            let range = match (block, from, to) {
                (Some(n), _, _) => n..=n,
                (None, Some(from), Some(to)) => from..=to,
                _ => bail!("pass --block N or --from A --to B"),
            };
            cmd_queue(&cli.database_url, automigrate, range).await
        }
        Commands::Reset => cmd_reset(&cli.database_url, automigrate).await,
        Commands::Info => cmd_info(),
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_run(database_url: &str, automigrate: bool, args: RunArgs) -> Result<()> {
    let mut builder = IndexerBuilder::new()
        .http_url(&args.http_url)
        .poll_interval_ms(args.poll_interval_ms)
        .backfill(!args.no_backfill)
        .uncles(!args.no_uncles)
        .automigrate(automigrate);
    if let Some(ws) = &args.ws_url {
        builder = builder.ws_url(ws);
    }
    if let Some(lag) = args.lag {
        builder = builder.lag(lag);
    }
    let config = builder.build_config();

    let backend = blockscribe_storage::open(database_url, automigrate)
        .await
        .with_context(|| format!("opening {database_url}"))?;
    let chain = http_chain_source(&config.head.http_url).context("building RPC client")?;
    let connector = Arc::new(RpcHeadConnector::new(config.head.ws_url.clone()));

    let indexer = Indexer::new(config, chain, connector, backend.queue, backend.blocks);
    indexer.start().await.context("starting indexer")?;
    tracing::info!(
        http = %args.http_url,
        ws = args.ws_url.as_deref().unwrap_or("-"),
        head = indexer.head().map(|h| h.number),
        "indexer running, press ctrl-c or send SIGTERM to stop"
    );

    let signal = shutdown_signal().await?;
    tracing::info!(signal, "shutting down");
    indexer.close().await.context("closing indexer")?;

    let m = indexer.metrics();
    tracing::info!(
        stored = m.stored_blocks,
        reorged = m.reorged_blocks,
        invalid = m.invalid_blocks,
        avg_processing_ms = m.avg_processing_ms,
        "stopped"
    );
    Ok(())
}

/// Wait for ctrl-c or, on Unix, SIGTERM. Returns the signal's name.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for ctrl-c")?;
                Ok("SIGINT")
            }
            _ = term.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        Ok("ctrl-c")
    }
}

async fn cmd_queue(
    database_url: &str,
    automigrate: bool,
    range: std::ops::RangeInclusive<u64>,
) -> Result<()> {
    if range.is_empty() {
        bail!("empty range {}..={}", range.start(), range.end());
    }
    let backend = blockscribe_storage::open(database_url, automigrate)
        .await
        .with_context(|| format!("opening {database_url}"))?;

    let (first, last) = (*range.start(), *range.end());
    for n in range {
        backend.queue.upsert(n).await.with_context(|| format!("enqueue block {n}"))?;
    }
    let len = backend.queue.len().await?;
    backend.queue.close().await?;

    println!("enqueued blocks {first}..={last} (queue length {len})");
    Ok(())
}

async fn cmd_reset(database_url: &str, automigrate: bool) -> Result<()> {
    let backend = blockscribe_storage::open(database_url, automigrate)
        .await
        .with_context(|| format!("opening {database_url}"))?;
    backend.queue.clear().await.context("clearing queue")?;
    backend.blocks.reset().await.context("truncating tables")?;
    backend.blocks.close().await?;

    println!("queue cleared, all tables truncated");
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("blockscribe v{}", env!("CARGO_PKG_VERSION"));
    println!("  Storage backends: PostgreSQL (postgres://), SQLite (sqlite:)");
    println!("  Heads: eth_subscribe(newHeads) with --ws-url, eth_blockNumber polling otherwise");
    println!();
    println!("Default configuration:");
    println!("{}", serde_json::to_string_pretty(&IndexerConfig::default())?);
    Ok(())
}
