//! Cordon Keeper - The off-chain authorization & accounting daemon
//!
//! Runs the reconstruction pipeline against the enforcement substrate:
//!
//! - Indexes module events (GraphQL indexer with direct-RPC fallback)
//! - Rebuilds per-sub-account acquired-balance state
//! - Computes and pushes spending allowances through the execution gateway
//!
//! # Quick Start
//!
//! ```bash
//! # Dry run against a single RPC endpoint, in-memory storage
//! cordon-keeper --rpc-url http://localhost:8545 --module 0x...
//!
//! # Production shape: indexer primary, Postgres, gateway submissions
//! cordon-keeper \
//!     --rpc-url https://rpc-a.example,https://rpc-b.example \
//!     --indexer-url https://indexer.example/graphql \
//!     --database-url postgres://cordon@db/cordon \
//!     --gateway-url https://gateway.internal \
//!     --module 0x...
//! ```

mod cycle;
mod gateway;
mod state_reader;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cordon_allowance::{AllowanceCalculator, AllowancePusher, SubstrateWriter};
use cordon_db::{Database, DatabaseConfig, PgEventStore, PgUpdateJournal};
use cordon_indexer::{
    EventSource, IndexerClient, JsonRpcClient, LendingPoolParser, ParserRegistry, RotatingClient,
    SubstrateClient,
};
use cordon_ledger::{EventStore, MemoryEventStore};
use cordon_oracle::FeedRegistry;
use cordon_rebuilder::Rebuilder;
use cordon_types::CoreConfig;

use cycle::{CycleDeps, CycleOutcome, CycleRunner};
use gateway::{DryRunWriter, GatewayWriter};
use state_reader::StoreStateReader;

/// Cordon Keeper - off-chain authorization & accounting pipeline
#[derive(Parser, Debug)]
#[command(name = "cordon-keeper", about = "Cordon authorization & accounting keeper", version)]
struct Args {
    /// Substrate RPC endpoints, first is primary
    #[arg(long, env = "CORDON_RPC_URLS", value_delimiter = ',', required = true)]
    rpc_url: Vec<String>,

    /// GraphQL indexer endpoint (primary event path)
    #[arg(long, env = "CORDON_INDEXER_URL")]
    indexer_url: Option<String>,

    /// PostgreSQL URL; omit for in-memory storage
    #[arg(long, env = "CORDON_DATABASE_URL")]
    database_url: Option<String>,

    /// Execution gateway endpoint; omit for dry-run mode
    #[arg(long, env = "CORDON_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// DeFi interactor module address
    #[arg(long, env = "CORDON_MODULE")]
    module: String,

    /// Seconds between periodic refresh cycles
    #[arg(long, default_value = "60", env = "CORDON_CYCLE_INTERVAL")]
    interval_secs: u64,

    /// Module spending budget in basis points of the safe value
    #[arg(long, default_value = "1000", env = "CORDON_MAX_SPENDING_BPS")]
    max_spending_bps: u64,

    /// Lending-pool calldata parser mapping, `POOL=ASSET:RECEIPT`.
    /// Repeat (or comma-separate) for more assets; raw-calldata executions
    /// against unregistered targets fail the decode.
    #[arg(long = "lending-pool", env = "CORDON_LENDING_POOLS", value_delimiter = ',')]
    lending_pool: Vec<String>,

    /// Path to a JSON core-config file; defaults apply when omitted
    #[arg(long, env = "CORDON_CONFIG")]
    config: Option<std::path::PathBuf>,
}

fn build_parser_registry(specs: &[String]) -> Result<ParserRegistry> {
    let mut pools: std::collections::HashMap<
        Address,
        std::collections::HashMap<Address, Address>,
    > = std::collections::HashMap::new();
    for spec in specs {
        let (pool, mapping) = spec
            .split_once('=')
            .with_context(|| format!("bad lending-pool spec {spec}, want POOL=ASSET:RECEIPT"))?;
        let (asset, receipt) = mapping
            .split_once(':')
            .with_context(|| format!("bad lending-pool spec {spec}, want POOL=ASSET:RECEIPT"))?;
        pools
            .entry(Address::from_str(pool.trim()).context("invalid pool address")?)
            .or_default()
            .insert(
                Address::from_str(asset.trim()).context("invalid asset address")?,
                Address::from_str(receipt.trim()).context("invalid receipt token address")?,
            );
    }
    let mut registry = ParserRegistry::new();
    for (pool, receipts) in pools {
        registry.register(pool, Arc::new(LendingPoolParser::new(receipts)));
    }
    Ok(registry)
}

fn load_config(args: &Args) -> Result<CoreConfig> {
    match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(CoreConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config(&args)?;
    let module = Address::from_str(&args.module).context("invalid module address")?;
    if args.max_spending_bps > config.absolute_max_spending_bps {
        bail!(
            "max_spending_bps {} exceeds absolute ceiling {}",
            args.max_spending_bps,
            config.absolute_max_spending_bps
        );
    }

    info!(
        %module,
        rpc_endpoints = args.rpc_url.len(),
        indexer = args.indexer_url.is_some(),
        database = args.database_url.is_some(),
        gateway = args.gateway_url.is_some(),
        interval = args.interval_secs,
        "starting cordon-keeper"
    );

    let parsers = build_parser_registry(&args.lending_pool)?;
    let endpoints: Vec<Arc<dyn SubstrateClient>> = args
        .rpc_url
        .iter()
        .map(|url| {
            Arc::new(JsonRpcClient::with_parsers(url.clone(), module, parsers.clone()))
                as Arc<dyn SubstrateClient>
        })
        .collect();
    let client: Arc<dyn SubstrateClient> = Arc::new(RotatingClient::new(endpoints));
    let indexer = args.indexer_url.as_ref().map(IndexerClient::new);

    let writer: Arc<dyn SubstrateWriter> = match &args.gateway_url {
        Some(url) => Arc::new(GatewayWriter::new(url.clone())),
        None => {
            warn!("no gateway configured, running in dry-run mode");
            Arc::new(DryRunWriter)
        }
    };

    match &args.database_url {
        Some(url) => {
            let db = Database::connect(&DatabaseConfig::new(url.clone())).await?;
            db.migrate().await?;
            let store = Arc::new(PgEventStore::new(db.pg.clone()));
            // Confirmed pushes are journaled so the staleness policy
            // survives keeper restarts.
            let pusher =
                AllowancePusher::with_journal(writer, Arc::new(PgUpdateJournal::new(db.pg.clone())));
            run(args, config, module, client, indexer, pusher, store).await
        }
        None => {
            let store = Arc::new(MemoryEventStore::new());
            let pusher = AllowancePusher::new(writer);
            run(args, config, module, client, indexer, pusher, store).await
        }
    }
}

async fn run<S: EventStore + 'static>(
    args: Args,
    config: CoreConfig,
    module: Address,
    client: Arc<dyn SubstrateClient>,
    indexer: Option<IndexerClient>,
    pusher: AllowancePusher,
    store: Arc<S>,
) -> Result<()> {
    let source = EventSource::new(indexer, client, store.clone(), config.clone());
    let deps = CycleDeps {
        source,
        store: store.clone(),
        rebuilder: Rebuilder::new(config.window_duration_seconds),
        calculator: AllowanceCalculator::new(config.clone()),
        pusher,
        feeds: FeedRegistry::new(),
        reader: Arc::new(StoreStateReader::new(store)),
        config: config.clone(),
        module,
        max_spending_bps: args.max_spending_bps,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let runner = Arc::new(CycleRunner::new(deps, shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, finishing at next boundary");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut interval = tokio::time::interval(Duration::from_secs(args.interval_secs));
    loop {
        interval.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            info!("keeper stopped");
            return Ok(());
        }
        match runner.run_cycle().await {
            Ok(CycleOutcome::Completed(_)) => {}
            Ok(CycleOutcome::Skipped) => {}
            Ok(CycleOutcome::Cancelled) => {
                info!("keeper stopped");
                return Ok(());
            }
            // The cursor was not advanced; the next cycle retries the same
            // range.
            Err(e) => error!(error = %e, "cycle failed"),
        }
    }
}
