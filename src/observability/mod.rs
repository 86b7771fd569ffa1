//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems emit tracing events
//!     → logging.rs (EnvFilter + fmt layer to stdout)
//!
//! Forked children inherit the subscriber and log through it unchanged.
//! ```
//!
//! # Design Decisions
//! - Structured fields (`connection_id`, `error`, keys) on every event
//! - `RUST_LOG` wins over the configured level

pub mod logging;

pub use logging::init_logging;
