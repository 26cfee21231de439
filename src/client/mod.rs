//! Backing Store Connection
//!
//! The Redis-backed hash store and lock service share one multiplexed
//! [`ConnectionManager`]. Requests from concurrent tasks are pipelined on
//! the same socket and nothing is locked while a reply is outstanding, so a
//! slow reply for one key does not queue calls for other keys behind it.
//!
//! ## Failures
//!
//! Every call is bounded by `response_timeout`. A dropped connection is
//! re-established in the background with exponential backoff between
//! `min_backoff` and `max_backoff`, at most `max_retries` times. Commands
//! themselves are never resent: a `SET NX` or a release script whose reply
//! was lost fails with a transport error instead of running twice.

#[cfg(test)]
pub(crate) mod mini_redis;

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError};
use std::time::Duration;
use tracing::info;

/// Connection settings for the backing store.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,

    /// Sent with `AUTH` after connecting, if set
    pub password: Option<String>,

    /// Selected with `SELECT` after connecting, if non-zero
    pub database: u32,

    /// Reconnect attempts before a call fails
    pub max_retries: u32,

    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub connect_timeout: Duration,

    /// Upper bound for one request/reply round trip
    pub response_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            database: 0,
            max_retries: 5,
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(1),
            response_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Longest a single call takes on a live connection before it fails.
    pub fn slowest_call(&self) -> Duration {
        self.response_timeout
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: i64::from(self.database),
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        }
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        // Delays grow as factor * 2^n, so the first one is min_backoff.
        let factor = (self.min_backoff.as_millis() as u64 / 2).max(1);
        ConnectionManagerConfig::new()
            .set_exponent_base(2)
            .set_factor(factor)
            .set_max_delay(self.max_backoff.as_millis() as u64)
            .set_number_of_retries(self.max_retries as usize)
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.response_timeout)
    }
}

/// Connects to the backing store, authenticating and selecting the
/// database. The returned manager is cheap to clone; clones share the
/// connection.
pub async fn connect(options: &ClientOptions) -> Result<ConnectionManager, RedisError> {
    let client = redis::Client::open(options.connection_info())?;
    let manager = ConnectionManager::new_with_config(client, options.manager_config()).await?;
    info!(address = %options.address(), database = options.database, "Connected to backing store");
    Ok(manager)
}
