//! OpenBox daemon — randomized-reward admission and settlement service.

use clap::Parser;
use openbox::{Config, LedgerRpc, OpenBoxEngine, Storage, http, types::now};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Interval between store GC sweeps. Window entries and proof claims also
/// expire lazily on read; the sweep only reclaims space.
const SWEEP_INTERVAL_SECS: u64 = 30 * 60;

#[derive(Parser)]
#[command(name = "openboxd", version, about = "OpenBox: randomized-reward settlement engine")]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "./openbox.json")]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Override the configured data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("openbox=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config {}: {}", args.config.display(), e);
            return;
        }
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    info!("════════════════════════════════════════════════════════════");
    info!("  OpenBox v{} — admission & settlement engine", VERSION);
    info!("  started {}", chrono::Utc::now().to_rfc3339());
    info!("════════════════════════════════════════════════════════════");
    info!(
        "network: {} | treasury: {} | fee: {} {}",
        config.network, config.treasury, config.fee_amount, config.fee_label
    );
    info!(
        "cooldown: {}s | proof ttl: {}s | prizes: {}",
        config.cooldown_secs,
        config.proof_ttl_secs,
        config.prizes.len()
    );

    let storage = match Storage::open(&config.data_dir, config.cooldown_secs, config.proof_ttl_secs)
    {
        Ok(storage) => storage,
        Err(e) => {
            error!("failed to open store at {}: {}", config.data_dir.display(), e);
            return;
        }
    };

    let client = LedgerRpc::new(config.rpc_endpoint.clone(), config.rpc_timeout_ms);
    let config = Arc::new(config);
    let engine = match OpenBoxEngine::new(config.clone(), storage, client) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("failed to build engine: {}", e);
            return;
        }
    };

    // Periodic GC of aged-out window entries and expired proof claims.
    let sweeper = engine.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.store().sweep_expired(now()) {
                warn!("store sweep failed: {}", e);
            }
        }
    });

    let server = engine.clone();
    let listen_addr = config.listen_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = http::serve(server, &listen_addr).await {
            error!("http server exited: {}", e);
        }
    });

    info!("openboxd running on {}", config.listen_addr);

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down...");
    if let Err(e) = engine.store().flush() {
        warn!("flush on shutdown failed: {}", e);
    }
}
