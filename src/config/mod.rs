//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (TOML, optional) + command line
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerSettings (fixed for the process lifetime)
//!
//! On reconfigure signal:
//!     key=value file
//!     → loader.rs reads it line by line into key/value pairs
//!     → validation.rs applies them key by key on top of the current Tunables
//!     → written into the shared segment under the semaphore
//!     → every connection child reads the new values
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - A missing or broken key=value file means defaults, never a crash
//! - Bad individual values keep the previous value

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{IpcConfig, ListenerConfig, ServerSettings, Tunables};
