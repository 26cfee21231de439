//! Client Connections
//!
//! Every accepted TCP connection runs in its own task: read bytes, parse
//! RESP (pipelined commands included), execute, reply.
//!
//! ```ignore
//! use fencekv::connection::{handle_connection, ConnectionStats};
//! use fencekv::commands::CommandHandler;
//!
//! let stats = Arc::new(ConnectionStats::new());
//! let handler = CommandHandler::new(Arc::new(coordinator));
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone(), stats));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
