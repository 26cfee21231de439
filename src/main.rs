//! fencekv server
//!
//! Wires the hash store, lock service and archive together behind an
//! [`ExpiryCoordinator`], starts the index reaper, and serves the user API
//! over RESP until Ctrl+C.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use fencekv::archive::{FileSink, MemorySink, PersistenceSink};
use fencekv::client::{self, ClientOptions};
use fencekv::commands::CommandHandler;
use fencekv::connection::{handle_connection, ConnectionStats};
use fencekv::coordinator::{ExpiryConfig, ExpiryCoordinator, IndexReaper, SweepConfig};
use fencekv::lock::{LockService, MemoryLockService, RedisLockService, RetryPolicy};
use fencekv::storage::{HashStore, MemoryHashStore, RecordStore, RedisHashStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Everything in this process; records do not survive a restart
    Memory,
    /// Records and locks on a Redis server
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ArchiveMode {
    /// One file per expired user under --persist-path
    File,
    /// Kept in this process only; for trying things out
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "fencekv", version)]
#[command(about = "User records with token-fenced TTL eviction, served over RESP", long_about = None)]
struct Config {
    /// Host to bind to
    #[arg(long, default_value = fencekv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = fencekv::DEFAULT_PORT)]
    listen_port: u16,

    /// Where records and locks live
    #[arg(long, value_enum, default_value_t = Backend::Redis)]
    backend: Backend,

    /// Redis server address
    #[arg(long, default_value = "localhost")]
    redis_address: String,

    /// Redis server port
    #[arg(long, default_value_t = 6379)]
    redis_port: u16,

    /// Redis server password
    #[arg(long)]
    redis_password: Option<String>,

    /// Redis database index
    #[arg(long, default_value_t = 0)]
    redis_db_index: u32,

    /// Reconnect attempts before a Redis command fails
    #[arg(long, default_value_t = 5)]
    redis_max_retries: u32,

    /// Longest wait for one Redis reply, in milliseconds
    #[arg(long, default_value_t = 1000)]
    redis_timeout_ms: u64,

    /// Seconds a user lives after its last change
    #[arg(long, default_value_t = 60)]
    data_ttl: u64,

    /// Where expired users are archived
    #[arg(long, value_enum, default_value_t = ArchiveMode::File)]
    archive: ArchiveMode,

    /// Directory expired users are archived to (with --archive file)
    #[arg(long, default_value = "/opt/userapidata")]
    persist_path: PathBuf,

    /// Per-key lock lease in milliseconds
    #[arg(long, default_value_t = 5000)]
    lock_lease_ms: u64,

    /// Seconds between index reaper scans (0 disables the reaper)
    #[arg(long, default_value_t = 30)]
    sweep_interval: u64,
}

impl Config {
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.listen_port)
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            host: self.redis_address.clone(),
            port: self.redis_port,
            password: self.redis_password.clone().filter(|p| !p.is_empty()),
            database: self.redis_db_index,
            max_retries: self.redis_max_retries,
            response_timeout: Duration::from_millis(self.redis_timeout_ms),
            ..Default::default()
        }
    }

    fn expiry_config(&self) -> ExpiryConfig {
        ExpiryConfig {
            ttl: Duration::from_secs(self.data_ttl),
            lock_lease: Duration::from_millis(self.lock_lease_ms),
            ..Default::default()
        }
    }

    fn sweep_config(&self) -> Option<SweepConfig> {
        (self.sweep_interval > 0).then(|| SweepConfig {
            interval: Duration::from_secs(self.sweep_interval),
            ..Default::default()
        })
    }
}

async fn build_backend(
    config: &Config,
) -> anyhow::Result<(Arc<dyn HashStore>, Arc<dyn LockService>)> {
    match config.backend {
        Backend::Memory => {
            info!("Using in-memory store and locks");
            let hash: Arc<dyn HashStore> = Arc::new(MemoryHashStore::new());
            let locks: Arc<dyn LockService> = Arc::new(MemoryLockService::new());
            Ok((hash, locks))
        }
        Backend::Redis => {
            let options = config.client_options();
            check_lease(&config.expiry_config(), &options)?;

            let conn = client::connect(&options)
                .await
                .with_context(|| format!("failed to connect to Redis at {}", options.address()))?;

            let hash: Arc<dyn HashStore> = Arc::new(RedisHashStore::new(conn.clone()));
            let locks: Arc<dyn LockService> =
                Arc::new(RedisLockService::new(conn, RetryPolicy::default()));
            Ok((hash, locks))
        }
    }
}

/// Refuses a lease too short for the Redis calls an eviction makes under it.
fn check_lease(expiry: &ExpiryConfig, options: &ClientOptions) -> anyhow::Result<()> {
    if !expiry.lease_covers(options.slowest_call()) {
        anyhow::bail!(
            "--lock-lease-ms {} is too short for --redis-timeout-ms {}",
            expiry.lock_lease.as_millis(),
            options.slowest_call().as_millis()
        );
    }
    Ok(())
}

fn build_sink(config: &Config) -> Arc<dyn PersistenceSink> {
    match config.archive {
        ArchiveMode::File => {
            info!(path = %config.persist_path.display(), "Archiving expired users to disk");
            Arc::new(FileSink::new(&config.persist_path))
        }
        ArchiveMode::Memory => {
            info!("Archiving expired users in memory");
            Arc::new(MemorySink::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!(version = fencekv::VERSION, "Starting fencekv");

    let (hash, locks) = build_backend(&config).await?;
    let sink = build_sink(&config);

    let coordinator = ExpiryCoordinator::new(
        RecordStore::new(hash),
        locks,
        sink,
        config.expiry_config(),
    );
    info!(ttl_secs = config.data_ttl, lease_ms = config.lock_lease_ms, "Expiry coordinator ready");

    let _reaper = config
        .sweep_config()
        .map(|sweep| IndexReaper::start(coordinator.clone(), sweep));

    let handler = CommandHandler::new(Arc::new(coordinator.clone()));
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    tokio::select! {
        _ = accept_loop(listener, handler, stats) => {}
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    coordinator.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
