//! Cross-process server state: a one-element shared segment and the
//! semaphore that guards it.
//!
//! # Ownership
//! The server process creates both objects at startup and is the only one
//! that destroys them. Connection children inherit the attachment through
//! `fork`; tools such as `ipcctl` attach by name.
//!
//! # Hazards
//! The semaphore is taken with `SEM_UNDO`, so a child killed inside a
//! critical section does not leave it held. `client_count` has no such
//! protection: a child killed between [`SharedState::admit`] and
//! [`SharedState::release`] keeps its slot until the server restarts.

use std::path::Path;

use serde::Serialize;

use crate::config::loader::reload_tunables;
use crate::config::{IpcConfig, Tunables};
use crate::ipc::{IpcError, ResourceKey, Semaphore, SharedSegment};

/// What lives in the shared segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(C)]
pub struct ServerData {
    pub tunables: Tunables,
    /// Connections currently being served by children.
    pub client_count: i32,
}

impl Default for ServerData {
    fn default() -> Self {
        Self {
            tunables: Tunables::default(),
            client_count: 0,
        }
    }
}

/// Shared segment + semaphore pair. Every access goes through the semaphore.
#[derive(Debug)]
pub struct SharedState {
    segment: SharedSegment<ServerData>,
    lock: Semaphore,
}

impl SharedState {
    /// Create both kernel objects and store the defaults.
    pub fn create(ipc: &IpcConfig) -> Result<Self, IpcError> {
        let (shm_key, sem_key) = keys(ipc)?;

        let mut segment = SharedSegment::<ServerData>::create(shm_key, 1)?;
        segment.write_one(ServerData::default(), 0);

        let lock = match Semaphore::create(sem_key, 1) {
            Ok(lock) => lock,
            Err(e) => {
                if let Err(cleanup) = segment.destroy() {
                    tracing::warn!(error = %cleanup, "Failed to remove shared segment after semaphore error");
                }
                return Err(e);
            }
        };

        tracing::info!(shm_key = %shm_key, sem_key = %sem_key, "Shared state created");
        Ok(Self { segment, lock })
    }

    /// Attach to the state a running server created.
    pub fn attach(ipc: &IpcConfig) -> Result<Self, IpcError> {
        let (shm_key, sem_key) = keys(ipc)?;
        let segment = SharedSegment::attach(shm_key)?;
        let lock = Semaphore::attach(sem_key)?;
        Ok(Self { segment, lock })
    }

    /// Consistent copy of the whole record.
    pub fn snapshot(&self) -> Result<ServerData, IpcError> {
        let _guard = self.lock.acquire()?;
        Ok(self.segment.read_one(0))
    }

    pub fn tunables(&self) -> Result<Tunables, IpcError> {
        Ok(self.snapshot()?.tunables)
    }

    /// Run `f` on the record with the semaphore held.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut ServerData) -> R) -> Result<R, IpcError> {
        let _guard = self.lock.acquire()?;
        Ok(f(&mut self.segment[0]))
    }

    /// Re-read the key=value file into the shared record.
    pub fn reload(&mut self, config_file: &Path) -> Result<Tunables, IpcError> {
        self.update(|data| {
            data.tunables = reload_tunables(config_file, &data.tunables);
            data.tunables
        })
    }

    /// Take a client slot. `false` when `max_clients` are already served.
    pub fn admit(&mut self) -> Result<bool, IpcError> {
        self.update(|data| {
            if data.client_count >= data.tunables.max_clients {
                return false;
            }
            data.client_count += 1;
            true
        })
    }

    /// Give back a slot taken by [`SharedState::admit`].
    pub fn release(&mut self) -> Result<(), IpcError> {
        self.update(|data| {
            if data.client_count > 0 {
                data.client_count -= 1;
            }
        })
    }

    /// Remove both kernel objects. Only the creating server calls this.
    pub fn destroy(self) -> Result<(), IpcError> {
        let SharedState { segment, lock } = self;
        let segment_result = segment.destroy();
        let lock_result = lock.destroy();
        segment_result.and(lock_result)
    }
}

fn keys(ipc: &IpcConfig) -> Result<(ResourceKey, ResourceKey), IpcError> {
    Ok((ResourceKey::new(&ipc.path, ipc.shm_id)?, ResourceKey::new(&ipc.path, ipc.sem_id)?))
}
