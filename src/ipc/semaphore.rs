//! Kernel-persisted counting semaphore.
//!
//! # Lifetime
//! A semaphore outlives every process that uses it. Exactly one process
//! creates it (`create`), any number attach (`attach`), and exactly one
//! process, normally the creator, removes it with [`Semaphore::destroy`] once
//! every other user is done. Dropping a handle does nothing to the kernel
//! object.
//!
//! # Hazards
//! A decrement that can never be satisfied blocks forever. This mirrors the
//! kernel and is not detected. Plain `op` calls are not undone when the
//! process dies; [`Semaphore::acquire`] is.

use libc::{c_int, c_short};

use crate::ipc::error::IpcError;
use crate::ipc::key::ResourceKey;
use crate::ipc::IPC_MODE;

/// Handle to a single-slot System V semaphore.
#[derive(Debug)]
pub struct Semaphore {
    id: c_int,
    key: ResourceKey,
    creator: bool,
}

impl Semaphore {
    /// Create the semaphore for `key` with `initial` as its value.
    ///
    /// Fails with [`IpcError::AlreadyExists`] if another process got there first.
    pub fn create(key: ResourceKey, initial: i32) -> Result<Self, IpcError> {
        let id = unsafe { libc::semget(key.as_raw(), 1, libc::IPC_CREAT | libc::IPC_EXCL | IPC_MODE) };
        if id == -1 {
            return Err(IpcError::last("semget", key));
        }

        let sem = Self { id, key, creator: true };
        if let Err(e) = sem.set(initial) {
            // Do not leave a half-initialized object behind for attachers.
            unsafe { libc::semctl(id, 0, libc::IPC_RMID) };
            return Err(e);
        }

        tracing::debug!(key = %key, semid = id, initial, "Semaphore created");
        Ok(sem)
    }

    /// Attach to the semaphore another process created for `key`.
    pub fn attach(key: ResourceKey) -> Result<Self, IpcError> {
        let id = unsafe { libc::semget(key.as_raw(), 0, 0) };
        if id == -1 {
            return Err(IpcError::last("semget", key));
        }

        tracing::debug!(key = %key, semid = id, "Semaphore attached");
        Ok(Self { id, key, creator: false })
    }

    /// Whether a semaphore currently exists for `key`.
    pub fn exists(key: ResourceKey) -> bool {
        unsafe { libc::semget(key.as_raw(), 0, 0) != -1 }
    }

    /// Current value.
    pub fn get(&self) -> Result<i32, IpcError> {
        let value = unsafe { libc::semctl(self.id, 0, libc::GETVAL) };
        if value == -1 {
            return Err(IpcError::last_on_object("semctl(GETVAL)", self.key));
        }
        Ok(value)
    }

    /// Number of processes blocked in a decrement right now.
    pub fn waiting(&self) -> Result<usize, IpcError> {
        let count = unsafe { libc::semctl(self.id, 0, libc::GETNCNT) };
        if count == -1 {
            return Err(IpcError::last_on_object("semctl(GETNCNT)", self.key));
        }
        Ok(count as usize)
    }

    /// Number of processes blocked in `op(0)` right now.
    pub fn waiting_for_zero(&self) -> Result<usize, IpcError> {
        let count = unsafe { libc::semctl(self.id, 0, libc::GETZCNT) };
        if count == -1 {
            return Err(IpcError::last_on_object("semctl(GETZCNT)", self.key));
        }
        Ok(count as usize)
    }

    /// Overwrite the value. Waiters are re-evaluated by the kernel.
    pub fn set(&self, value: i32) -> Result<(), IpcError> {
        if unsafe { libc::semctl(self.id, 0, libc::SETVAL, value as c_int) } == -1 {
            return Err(IpcError::last_on_object("semctl(SETVAL)", self.key));
        }
        Ok(())
    }

    /// Add `delta` to the value.
    ///
    /// A negative delta blocks while the result would be negative. A zero
    /// delta blocks until the value is exactly zero. If the semaphore is
    /// destroyed while waiting, returns [`IpcError::InterruptedByDestruction`];
    /// a caught signal yields [`IpcError::Interrupted`].
    pub fn op(&self, delta: i16) -> Result<(), IpcError> {
        self.semop(delta, 0).map(|_| ())
    }

    /// Like [`Semaphore::op`] but never blocks. Returns `false` if the
    /// operation would have had to wait.
    pub fn try_op(&self, delta: i16) -> Result<bool, IpcError> {
        self.semop(delta, libc::IPC_NOWAIT)
    }

    pub fn increment(&self) -> Result<(), IpcError> {
        self.op(1)
    }

    pub fn decrement(&self) -> Result<(), IpcError> {
        self.op(-1)
    }

    /// Decrement now and increment again when the returned guard drops.
    ///
    /// Uses `SEM_UNDO`: if the process dies while holding the guard, the
    /// kernel gives the unit back.
    pub fn acquire(&self) -> Result<SemaphoreGuard<'_>, IpcError> {
        self.semop(-1, libc::SEM_UNDO)?;
        Ok(SemaphoreGuard { sem: self })
    }

    /// Remove the semaphore for every attached process.
    ///
    /// Processes blocked in [`Semaphore::op`] wake up with an error. Call this
    /// from one process only, after every other user has finished.
    pub fn destroy(self) -> Result<(), IpcError> {
        if unsafe { libc::semctl(self.id, 0, libc::IPC_RMID) } == -1 {
            return Err(IpcError::last_on_object("semctl(IPC_RMID)", self.key));
        }
        tracing::debug!(key = %self.key, semid = self.id, "Semaphore destroyed");
        Ok(())
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn id(&self) -> c_int {
        self.id
    }

    /// True only in the process that created the semaphore.
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    fn semop(&self, delta: i16, flags: c_int) -> Result<bool, IpcError> {
        let mut sop = libc::sembuf {
            sem_num: 0,
            sem_op: delta as c_short,
            sem_flg: flags as c_short,
        };

        if unsafe { libc::semop(self.id, &mut sop, 1) } == -1 {
            return match IpcError::last_on_object("semop", self.key) {
                IpcError::NoMatch if flags & libc::IPC_NOWAIT != 0 => Ok(false),
                e => Err(e),
            };
        }
        Ok(true)
    }
}

/// Holds one unit of a [`Semaphore`]; gives it back on drop.
#[derive(Debug)]
pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        // Pairs with the SEM_UNDO decrement so the adjustment nets to zero.
        if let Err(e) = self.sem.semop(1, libc::SEM_UNDO) {
            tracing::warn!(key = %self.sem.key, error = %e, "Failed to release semaphore");
        }
    }
}
