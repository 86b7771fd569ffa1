//! Multi-process Unix IPC toolkit.
//!
//! Kernel-managed semaphores, shared memory segments and priority message
//! queues, a signal-control layer, and a fork-per-connection server driven by
//! signals.

pub mod config;
pub mod ipc;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;
pub mod signal;

pub use config::schema::ServerSettings;
pub use ipc::{IpcError, PriorityQueue, ResourceKey, Semaphore, SharedSegment};
pub use server::{ConnectionServer, SharedState};
pub use signal::SignalControl;
