//! duoserve: an HTTP workload benchmark server
//!
//! Serves the same endpoints under one of two connection models:
//! - concurrent: one task per connection on a multi-threaded runtime
//! - sequential: one connection at a time on a single thread
//!
//! Features:
//! - CPU-bound (`/compute`) and I/O-bound (`/io`) synthetic workloads
//! - Latency and throughput snapshot at `/metrics`
//! - WebSocket signaling relay at `/ws` with room-scoped broadcast
//! - Configuration via CLI arguments or TOML file

mod config;
mod http;
mod metrics;
mod pages;
mod server;
mod workload;
mod ws;

use config::{Config, Model};
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let workers = config.workers.unwrap_or_else(num_cpus);

    info!(
        listen = %config.listen,
        model = ?config.model,
        workers = if config.model == Model::Concurrent { workers } else { 1 },
        "Starting duoserve"
    );

    let runtime = match config.model {
        Model::Concurrent => tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .enable_all()
            .build()?,
        Model::Sequential => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?,
    };

    runtime.block_on(async {
        let server = Server::new(config);
        let listener = server.bind()?;
        server.run(listener).await
    })?;

    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
