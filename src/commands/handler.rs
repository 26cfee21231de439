//! Command Handler
//!
//! Parses incoming RESP arrays and dispatches them to the user API.
//!
//! ## Supported Commands
//!
//! ### User Commands
//! - `CREATEUSER json` - Create a user (fails if it exists)
//! - `GETUSER username` - Get a user's document
//! - `EDITUSER username json` - Replace an existing user's document
//! - `DELUSER username` - Delete a user
//!
//! ### Server Commands
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//! - `INFO` - Server and expiry statistics
//! - `COMMAND` - List commands
//! - `QUIT` - Close the connection
//!
//! Usernames are case-insensitive. Validation problems are reported to the
//! client verbatim; storage failures only as `ERR request failed`, with the
//! details going to the log.

use crate::error::StoreError;
use crate::protocol::RespValue;
use crate::user::{parse_user, validate_edit, UserDatabase};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const COMMANDS: &[&str] = &[
    "CREATEUSER",
    "GETUSER",
    "EDITUSER",
    "DELUSER",
    "PING",
    "ECHO",
    "INFO",
    "COMMAND",
    "QUIT",
];

/// Handles user API commands against a [`UserDatabase`].
#[derive(Clone)]
pub struct CommandHandler {
    db: Arc<dyn UserDatabase>,
    /// Server start time for INFO command
    start_time: Instant,
}

impl CommandHandler {
    pub fn new(db: Arc<dyn UserDatabase>) -> Self {
        Self {
            db,
            start_time: Instant::now(),
        }
    }

    /// Executes a command and returns the response.
    pub async fn execute(&self, command: RespValue) -> RespValue {
        let args = match command {
            RespValue::Array(args) => args,
            _ => {
                return RespValue::error("ERR invalid command format");
            }
        };

        if args.is_empty() {
            return RespValue::error("ERR empty command");
        }

        let cmd_name = match get_string(&args[0]) {
            Some(s) => s.to_uppercase(),
            None => return RespValue::error("ERR invalid command name"),
        };

        self.dispatch(&cmd_name, &args[1..]).await
    }

    async fn dispatch(&self, cmd: &str, args: &[RespValue]) -> RespValue {
        match cmd {
            "CREATEUSER" => self.cmd_createuser(args).await,
            "GETUSER" => self.cmd_getuser(args).await,
            "EDITUSER" => self.cmd_edituser(args).await,
            "DELUSER" => self.cmd_deluser(args).await,

            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "INFO" => self.cmd_info(args),
            "COMMAND" => self.cmd_command(args),
            "QUIT" => RespValue::ok(),

            _ => RespValue::error(format!("ERR unknown command '{}'", cmd)),
        }
    }

    // ========================================================================
    // User Commands
    // ========================================================================

    /// CREATEUSER json
    async fn cmd_createuser(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return wrong_args("CREATEUSER");
        }
        let body = match get_string(&args[0]) {
            Some(b) => b,
            None => return RespValue::error("ERR invalid user document"),
        };

        let user = match parse_user(&body) {
            Ok(user) => user,
            Err(e) => return RespValue::error(format!("ERR {}", e)),
        };

        match self
            .db
            .create_user(&user.username, Bytes::from(user.to_json()))
            .await
        {
            Ok(()) => {
                debug!(username = %user.username, "User created");
                RespValue::ok()
            }
            Err(e) if e.is_already_exists() => RespValue::error("ERR user already exists"),
            Err(e) => request_failed("CREATEUSER", e),
        }
    }

    /// GETUSER username
    async fn cmd_getuser(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return wrong_args("GETUSER");
        }
        let username = match get_username(&args[0]) {
            Some(u) => u,
            None => return RespValue::error("ERR invalid username"),
        };

        match self.db.get_user(&username).await {
            Ok(document) => RespValue::bulk_string(document),
            Err(e) if e.is_not_found() => RespValue::null(),
            Err(e) => request_failed("GETUSER", e),
        }
    }

    /// EDITUSER username json
    async fn cmd_edituser(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return wrong_args("EDITUSER");
        }
        let username = match get_username(&args[0]) {
            Some(u) => u,
            None => return RespValue::error("ERR invalid username"),
        };
        let body = match get_string(&args[1]) {
            Some(b) => b,
            None => return RespValue::error("ERR invalid user document"),
        };

        match self.db.get_user(&username).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return RespValue::null(),
            Err(e) => return request_failed("EDITUSER", e),
        }

        let user = match validate_edit(&username, &body) {
            Ok(user) => user,
            Err(e) => return RespValue::error(format!("ERR {}", e)),
        };

        match self.db.set_user(&username, Bytes::from(user.to_json())).await {
            Ok(()) => {
                debug!(username = %username, "User updated");
                RespValue::ok()
            }
            Err(e) => request_failed("EDITUSER", e),
        }
    }

    /// DELUSER username
    async fn cmd_deluser(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return wrong_args("DELUSER");
        }
        let username = match get_username(&args[0]) {
            Some(u) => u,
            None => return RespValue::error("ERR invalid username"),
        };

        match self.db.delete_user(&username).await {
            Ok(()) => RespValue::integer(1),
            Err(e) if e.is_not_found() => RespValue::integer(0),
            Err(e) => request_failed("DELUSER", e),
        }
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            RespValue::pong()
        } else {
            match get_bytes(&args[0]) {
                Some(msg) => RespValue::bulk_string(msg),
                None => RespValue::pong(),
            }
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return wrong_args("ECHO");
        }

        match get_bytes(&args[0]) {
            Some(msg) => RespValue::bulk_string(msg),
            None => RespValue::error("ERR invalid message"),
        }
    }

    /// INFO
    fn cmd_info(&self, _args: &[RespValue]) -> RespValue {
        let mut info = format!(
            "# Server\r\n\
             fencekv_version:{}\r\n\
             os:{}\r\n\
             uptime_in_seconds:{}\r\n",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            self.start_time.elapsed().as_secs(),
        );

        if let Some(stats) = self.db.expiry_stats() {
            info.push_str(&format!(
                "\r\n\
                 # Expiry\r\n\
                 writes:{}\r\n\
                 deletes:{}\r\n\
                 scheduled:{}\r\n\
                 expired:{}\r\n\
                 superseded:{}\r\n\
                 abandoned:{}\r\n\
                 retained:{}\r\n\
                 archive_failures:{}\r\n",
                stats.writes,
                stats.deletes,
                stats.scheduled,
                stats.expired,
                stats.superseded,
                stats.abandoned,
                stats.retained,
                stats.archive_failures,
            ));
        }

        RespValue::bulk_string(Bytes::from(info))
    }

    /// COMMAND
    fn cmd_command(&self, _args: &[RespValue]) -> RespValue {
        RespValue::array(
            COMMANDS
                .iter()
                .map(|c| RespValue::bulk_string(Bytes::from_static(c.as_bytes())))
                .collect(),
        )
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn get_bytes(value: &RespValue) -> Option<Bytes> {
    match value {
        RespValue::BulkString(b) => Some(b.clone()),
        RespValue::SimpleString(s) => Some(Bytes::from(s.clone())),
        _ => None,
    }
}

fn get_string(value: &RespValue) -> Option<String> {
    match value {
        RespValue::BulkString(b) => std::str::from_utf8(b).ok().map(|s| s.to_string()),
        RespValue::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Usernames are stored lower-cased.
fn get_username(value: &RespValue) -> Option<String> {
    get_string(value)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
}

fn wrong_args(cmd: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd
    ))
}

fn request_failed(cmd: &str, e: StoreError) -> RespValue {
    warn!(command = cmd, error = %e, "Request failed");
    RespValue::error("ERR request failed")
}
