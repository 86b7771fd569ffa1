//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate settings → Create shared state → Bind listener
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → on_terminate → stop flag
//!     SIGHUP → on_reconfigure → reload flag
//!     SIGCHLD → ignored (children reaped by the kernel)
//!
//! Shutdown (shutdown.rs):
//!     Flags read by the accept loop → stop accepting → close listener → return
//! ```
//!
//! # Design Decisions
//! - Ordered startup: settings first, then kernel objects, then the listener
//! - Any startup error is fatal; nothing half-created is left behind
//! - In-flight children are never waited for

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use signals::ControlSignals;
pub use startup::{bootstrap, Startup, StartupError};
