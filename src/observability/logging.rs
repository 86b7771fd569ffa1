//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global subscriber once per process
//! - Take the level from settings unless `RUST_LOG` is set

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(level: &str) -> String {
    format!("ipc_toolkit={level},ipcctl={level}")
}

/// Install the global subscriber. Calling it a second time is a no-op.
pub fn init_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_names_both_binaries() {
        assert_eq!(default_filter("debug"), "ipc_toolkit=debug,ipcctl=debug");
        assert!(EnvFilter::try_new(default_filter("warn")).is_ok());
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging("info");
        init_logging("debug");
    }
}
