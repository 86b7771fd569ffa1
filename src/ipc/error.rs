//! Error taxonomy shared by every kernel object wrapper.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::ipc::key::ResourceKey;

/// Error type for semaphore, shared segment and message queue operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// A create was requested for a key already bound to a live object.
    #[error("kernel object already exists for key {0}")]
    AlreadyExists(ResourceKey),

    /// Attach or operate on a key with no live object.
    #[error("no kernel object exists for key {0}")]
    NotFound(ResourceKey),

    /// A non-blocking receive or a peek found nothing eligible.
    #[error("no eligible message")]
    NoMatch,

    /// The object was destroyed by another process while this call waited on it.
    #[error("kernel object was destroyed while in use")]
    InterruptedByDestruction,

    /// A blocking call was interrupted by a caught signal.
    #[error("interrupted by signal")]
    Interrupted,

    /// Kernel table or memory limits were reached.
    #[error("kernel resource limit reached: {0}")]
    ResourceExhausted(Errno),

    /// The `(path, id)` pair could not be turned into a key.
    #[error("cannot derive key from {path:?}: {source}")]
    KeyResolution {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checked segment access outside the segment.
    #[error("index {index} out of bounds for segment of {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Any other failure, tagged with the syscall that produced it.
    #[error("{op} failed: {errno}")]
    Os { op: &'static str, errno: Errno },
}

impl IpcError {
    /// Classify the current `errno` after `op` failed on `key`.
    pub(crate) fn last(op: &'static str, key: ResourceKey) -> Self {
        Self::from_errno(op, key, Errno::last())
    }

    pub(crate) fn from_errno(op: &'static str, key: ResourceKey, errno: Errno) -> Self {
        match errno {
            Errno::EEXIST => IpcError::AlreadyExists(key),
            Errno::ENOENT => IpcError::NotFound(key),
            Errno::EIDRM => IpcError::InterruptedByDestruction,
            Errno::EINTR => IpcError::Interrupted,
            Errno::ENOMSG | Errno::EAGAIN => IpcError::NoMatch,
            Errno::ENOSPC | Errno::ENOMEM | Errno::ENFILE => IpcError::ResourceExhausted(errno),
            _ => IpcError::Os { op, errno },
        }
    }

    /// Like [`IpcError::last`], for calls on an already resolved identifier.
    ///
    /// There `EINVAL` means the identifier no longer names a live object.
    pub(crate) fn last_on_object(op: &'static str, key: ResourceKey) -> Self {
        match Errno::last() {
            Errno::EINVAL => IpcError::NotFound(key),
            errno => Self::from_errno(op, key, errno),
        }
    }
}
