//! HTTP Server Binary for the webofdata store
//!
//! Usage:
//!   cargo run --bin http_server -- --host 0.0.0.0 --port 8080 --data-dir ./data/store

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use webofdata::{
    http::{start_server, ServerConfig, DEFAULT_PAGE_SIZE},
    storage::util::{DEFAULT_BATCH_SIZE, DEFAULT_PREFIX, DEFAULT_SHARD_COUNT},
    Store, StoreConfig,
};

#[derive(Parser, Debug)]
#[command(name = "webofdata HTTP Server")]
#[command(about = "HTTP API server for the webofdata entity store", long_about = None)]
struct Args {
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value = "8080")]
    port: u16,

    #[arg(short, long, default_value = "./data/store")]
    data_dir: String,

    /// Entities per committed ingestion batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_SHARD_COUNT)]
    shard_count: u32,

    /// Prefix bare names resolve against
    #[arg(long, default_value = DEFAULT_PREFIX)]
    default_prefix: String,

    /// Entries per listing page when a request gives no `take`
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).compact().init();

    let config = StoreConfig {
        batch_size: args.batch_size,
        shard_count: args.shard_count,
        default_prefix: args.default_prefix.clone(),
        ..StoreConfig::with_path(&args.data_dir)
    };
    info!(path = %args.data_dir, shards = config.shard_count, "opening store");
    let store = Arc::new(Store::open(config)?);
    info!(datasets = store.datasets().len(), "store ready");

    let server = ServerConfig { host: args.host, port: args.port, page_size: args.page_size };

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received, stopping server");
    };

    if let Err(e) = start_server(&server, store, shutdown_signal).await {
        error!(error = %e, "server error");
        return Err(e);
    }

    info!("server shut down gracefully");
    Ok(())
}
