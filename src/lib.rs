//! # fencekv - Ephemeral Records with Fenced TTL Eviction
//!
//! fencekv keeps user records in a hash store (in memory or on Redis) and
//! removes each one a fixed TTL after its last write, archiving a snapshot
//! just before it goes. It is served over RESP, so `redis-cli` works as a
//! client.
//!
//! ## How eviction stays correct
//!
//! - Every write gets a fresh [`ModificationToken`], recorded in an index
//!   next to the record.
//! - Every write spawns a deferred task carrying its token. When the TTL is
//!   up, the task evicts only if the index still holds that token, so a
//!   rewrite silently disarms all older tasks.
//! - The decisive token check, the archive and the delete all happen under
//!   a per-key lease lock, which writes and deletes take too.
//! - The locked section gives up before its lease lapses, and the final
//!   delete removes the record only while the index still holds the token.
//! - An [`IndexReaper`] re-runs eviction for index entries whose task was
//!   lost (for example across a restart).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              fencekv                               │
//! │                                                                    │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────────┐              │
//! │  │ TCP Server │──>│ Connection │──>│ CommandHandler │              │
//! │  └────────────┘   └────────────┘   └───────┬────────┘              │
//! │                                            │ UserDatabase          │
//! │                                            ▼                       │
//! │                  ┌────────────────────────────────────────────┐    │
//! │                  │            ExpiryCoordinator               │    │
//! │                  │ write / create / read / delete / run_expiry│    │
//! │                  └──────┬──────────────┬───────────────┬──────┘    │
//! │                         ▼              ▼               ▼           │
//! │                  ┌────────────┐ ┌─────────────┐ ┌─────────────────┐│
//! │                  │RecordStore │ │ LockService │ │ PersistenceSink ││
//! │                  │ (HashStore)│ │  (leases)   │ │   (archive)     ││
//! │                  └────────────┘ └─────────────┘ └─────────────────┘│
//! │                         ▲                                          │
//! │                  ┌──────┴──────┐                                   │
//! │                  │ IndexReaper │  (background task)                │
//! │                  └─────────────┘                                   │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use fencekv::archive::MemorySink;
//! use fencekv::coordinator::{ExpiryConfig, ExpiryCoordinator};
//! use fencekv::lock::MemoryLockService;
//! use fencekv::storage::{MemoryHashStore, RecordStore};
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let coordinator = ExpiryCoordinator::new(
//!     RecordStore::new(Arc::new(MemoryHashStore::new())),
//!     Arc::new(MemoryLockService::new()),
//!     Arc::new(MemorySink::new()),
//!     ExpiryConfig { ttl: Duration::from_secs(60), ..Default::default() },
//! );
//!
//! coordinator.write("alice2024", Bytes::from("{}")).await.unwrap();
//! assert_eq!(coordinator.read("alice2024").await.unwrap(), Bytes::from("{}"));
//! # });
//! ```
//!
//! ## Module Overview
//!
//! - [`coordinator`]: the write/expire protocol and the index reaper
//! - [`storage`]: hash stores and the record/index view over them
//! - [`lock`]: lease locks, in memory or on Redis
//! - [`archive`]: persistence sinks for expired records
//! - [`user`]: user documents, validation, the `UserDatabase` seam
//! - [`commands`], [`connection`]: the RESP server
//! - [`protocol`]: the RESP codec the server speaks
//! - [`client`]: the shared Redis connection behind both Redis backends

pub mod archive;
pub mod client;
pub mod commands;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod protocol;
pub mod storage;
pub mod token;
pub mod user;

pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use coordinator::{
    ArchivePolicy, ExpiryConfig, ExpiryCoordinator, ExpiryOutcome, IndexReaper, SweepConfig,
};
pub use error::{Result, StoreError};
pub use protocol::{ParseError, RespParser, RespValue};
pub use token::ModificationToken;
pub use user::UserDatabase;

/// The default port fencekv listens on
pub const DEFAULT_PORT: u16 = 8080;

/// The default host fencekv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
