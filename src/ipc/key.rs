//! Resource naming.
//!
//! Every kernel object is named by a `(path, id)` pair. Processes that want to
//! share an object agree on both out of band, typically a well-known path and
//! a compile-time id.

use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::ipc::error::IpcError;

/// Kernel key for a System V IPC object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey(libc::key_t);

impl ResourceKey {
    /// Derive the key for `(path, id)`.
    ///
    /// The path must exist: the kernel key is built from the file's device and
    /// inode numbers, so two processes naming the same file with the same id
    /// always land on the same object. `id` must be non-zero.
    pub fn new(path: impl AsRef<Path>, id: u8) -> Result<Self, IpcError> {
        let path = path.as_ref();

        if id == 0 {
            return Err(IpcError::KeyResolution {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "id must be non-zero"),
            });
        }

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| IpcError::KeyResolution {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;

        let key = unsafe { libc::ftok(c_path.as_ptr(), libc::c_int::from(id)) };
        if key == -1 {
            return Err(IpcError::KeyResolution {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(Self(key))
    }

    /// Raw key as handed to `semget`/`shmget`/`msgget`.
    pub fn as_raw(&self) -> libc::key_t {
        self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A `(path, id)` pair, kept around so callers can log where a key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    pub path: PathBuf,
    pub id: u8,
}

impl ResourceName {
    pub fn new(path: impl Into<PathBuf>, id: u8) -> Self {
        Self { path: path.into(), id }
    }

    pub fn key(&self) -> Result<ResourceKey, IpcError> {
        ResourceKey::new(&self.path, self.id)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.id)
    }
}
