//! Fork-per-connection server.
//!
//! # Data Flow
//! ```text
//! Listener (net) ──accept──▶ runner.rs ──fork──▶ child
//!                               │                  ├─ admit (state.rs, under semaphore)
//!                               │                  ├─ handler.rs (application callback)
//!                               │                  └─ release, close, exit 0
//!                               └─ on reload flag: state.rs reload under semaphore
//! ```
//!
//! # Design Decisions
//! - One OS process per connection; only the kernel objects are shared
//! - The parent closes its copy of each connection right after fork
//! - Per-connection and per-reload errors are logged, never fatal

pub mod handler;
pub mod runner;
pub mod state;

pub use handler::{ConnectionHandler, EchoHandler};
pub use runner::{ConnectionServer, ServerError};
pub use state::{ServerData, SharedState};
