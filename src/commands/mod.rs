//! Command Processing
//!
//! Receives parsed RESP commands, runs them against a
//! [`UserDatabase`](crate::user::UserDatabase), and builds the reply.
//!
//! ```text
//!   RESP Parser ──► CommandHandler ──► UserDatabase (ExpiryCoordinator)
//! ```

pub mod handler;

pub use handler::CommandHandler;
