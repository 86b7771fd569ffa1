//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (wait with signals unmasked, accept)
//!     → connection.rs (numbered read/write/close transport)
//!     → forked child hands it to the connection handler
//! ```
//!
//! # Design Decisions
//! - The listener is non-blocking; waiting happens in `ppoll` under an explicit mask
//! - `EINTR` is reported, never retried here
//! - Backlog follows the live configuration

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionId};
pub use listener::{Listener, ListenerError};
