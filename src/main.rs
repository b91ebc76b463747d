//! echo-server: A byte-transparent TCP/TLS echo server
//!
//! Every byte a client sends is written back unchanged, chunk by chunk,
//! until the client disconnects.
//!
//! Features:
//! - Plain TCP or TLS termination (`--ssl`)
//! - TCP (`host:port`) or Unix domain socket (`file:<path>`) listening
//! - One task per connection, no cap unless `--max-connections` is set
//! - Configuration via CLI arguments or TOML file

mod config;
mod echo;
mod listener;
mod server;
mod tls;

use config::Config;
use listener::Listener;
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

    info!(
        listen = %config.listen,
        tls = config.tls.is_some(),
        buffer_size = config.buffer_size,
        nodelay = config.nodelay,
        max_connections = ?config.max_connections,
        workers = ?config.workers,
        "Starting echo-server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        let listener = Listener::bind(&config)?;
        Server::new(listener, &config).run().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
