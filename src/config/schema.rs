//! Configuration schema definitions.
//!
//! Two layers live here:
//! - [`ServerSettings`]: fixed for the life of the server process (bind
//!   address, where the key=value file is, how the kernel objects are named).
//! - [`Tunables`]: the values re-read on the reconfigure signal. They are
//!   stored in the shared segment, so every connection child sees the
//!   current ones.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings for the server process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Path of the key=value file holding [`Tunables`].
    pub config_file: PathBuf,

    /// Naming of the kernel objects the server owns.
    pub ipc: IpcConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Where the shared state segment and its semaphore are named.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Existing filesystem path used to derive the kernel keys.
    pub path: PathBuf,

    /// Id of the shared segment holding [`Tunables`] and counters.
    pub shm_id: u8,

    /// Id of the semaphore guarding that segment.
    pub sem_id: u8,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            shm_id: 1,
            sem_id: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            config_file: PathBuf::from("server.cfg"),
            ipc: IpcConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Live values, reloadable without a restart.
///
/// Plain `repr(C)` data so it can sit in a shared segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(C)]
pub struct Tunables {
    /// Pending-connection queue length of the listening socket.
    pub backlog: i32,

    /// Connections served at once; further ones are refused.
    pub max_clients: i32,

    /// Per-connection read timeout in milliseconds.
    pub read_timeout_ms: i32,
}

impl Tunables {
    pub const DEFAULT_BACKLOG: i32 = 2;
    pub const DEFAULT_MAX_CLIENTS: i32 = 1000;
    pub const DEFAULT_READ_TIMEOUT_MS: i32 = 30_000;

    /// Keys accepted in the key=value file.
    pub const KEYS: [&'static str; 3] = ["backlog", "max_clients", "read_timeout_ms"];

    pub fn get(&self, key: &str) -> Option<i32> {
        match key {
            "backlog" => Some(self.backlog),
            "max_clients" => Some(self.max_clients),
            "read_timeout_ms" => Some(self.read_timeout_ms),
            _ => None,
        }
    }

    /// Returns `false` for unknown keys.
    pub fn set(&mut self, key: &str, value: i32) -> bool {
        match key {
            "backlog" => self.backlog = value,
            "max_clients" => self.max_clients = value,
            "read_timeout_ms" => self.read_timeout_ms = value,
            _ => return false,
        }
        true
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            backlog: Self::DEFAULT_BACKLOG,
            max_clients: Self::DEFAULT_MAX_CLIENTS,
            read_timeout_ms: Self::DEFAULT_READ_TIMEOUT_MS,
        }
    }
}
