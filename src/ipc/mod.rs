//! Kernel IPC objects.
//!
//! # Data Flow
//! ```text
//! (path, id)
//!     → key.rs (ResourceKey via ftok)
//!     → semaphore.rs      create/attach → op/get/set → destroy
//!     → shared_memory.rs  create/attach → read/write/index → drop (detach) | destroy
//!     → queue.rs          create/attach → send/receive/peek → destroy
//! ```
//!
//! # Design Decisions
//! - Handles are process-local views; dropping one never touches the kernel object
//! - `destroy(self)` is explicit, consumes the handle, and belongs to one process
//! - Create and attach failures always surface, never retried
//! - Blocking calls interrupted by a signal return `IpcError::Interrupted`

pub mod error;
pub mod key;
pub mod queue;
pub mod semaphore;
pub mod shared_memory;

pub use error::IpcError;
pub use key::{ResourceKey, ResourceName};
pub use queue::{Message, PriorityQueue, Selector};
pub use semaphore::{Semaphore, SemaphoreGuard};
pub use shared_memory::SharedSegment;

/// Permission bits for every object this crate creates.
pub(crate) const IPC_MODE: libc::c_int = 0o666;
