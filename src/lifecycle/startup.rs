//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate settings
//! - Create the server's own shared segment and semaphore
//! - Bind the listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Kernel objects that already exist are an error, not something to adopt
//! - The listener binds last; if it fails the kernel objects are removed again

use thiserror::Error;

use crate::config::validation::validate_settings;
use crate::config::{ConfigError, ServerSettings, Tunables};
use crate::ipc::IpcError;
use crate::net::{Listener, ListenerError};
use crate::server::SharedState;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid settings: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to create shared state: {0}")]
    Ipc(#[from] IpcError),

    #[error("failed to bind listener: {0}")]
    Listener(#[from] ListenerError),
}

/// Everything a server needs before it can start accepting.
#[derive(Debug)]
pub struct Startup {
    pub listener: Listener,
    pub state: SharedState,
}

/// Bring the server up to the point where `ConnectionServer::run` can take over.
pub fn bootstrap(settings: &ServerSettings) -> Result<Startup, StartupError> {
    validate_settings(settings).map_err(ConfigError::Validation)?;

    let state = SharedState::create(&settings.ipc)?;

    let listener = match Listener::bind(&settings.listener.bind_address, Tunables::DEFAULT_BACKLOG) {
        Ok(listener) => listener,
        Err(e) => {
            if let Err(cleanup) = state.destroy() {
                tracing::warn!(error = %cleanup, "Failed to remove shared state after bind error");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        address = %listener.local_addr(),
        ipc_path = %settings.ipc.path.display(),
        "Startup complete"
    );
    Ok(Startup { listener, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpcConfig;

    fn settings_in(dir: &tempfile::TempDir) -> ServerSettings {
        let mut settings = ServerSettings::default();
        settings.listener.bind_address = "127.0.0.1:0".to_string();
        settings.ipc = IpcConfig {
            path: dir.path().to_path_buf(),
            shm_id: 51,
            sem_id: 52,
        };
        settings
    }

    #[test]
    fn bootstrap_creates_state_and_listener() {
        let dir = tempfile::tempdir().unwrap();
        let startup = bootstrap(&settings_in(&dir)).unwrap();
        assert_ne!(startup.listener.local_addr().port(), 0);
        assert_eq!(startup.listener.backlog(), Tunables::DEFAULT_BACKLOG);
        startup.state.destroy().unwrap();
    }

    #[test]
    fn existing_state_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let first = bootstrap(&settings).unwrap();

        assert!(matches!(bootstrap(&settings), Err(StartupError::Ipc(IpcError::AlreadyExists(_)))));

        first.state.destroy().unwrap();
    }

    #[test]
    fn bind_failure_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(&dir);
        settings.listener.bind_address = "256.0.0.1:1".to_string();

        // Rejected by validation before anything is created.
        assert!(matches!(bootstrap(&settings), Err(StartupError::Config(_))));

        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        settings.listener.bind_address = taken.local_addr().unwrap().to_string();
        assert!(matches!(bootstrap(&settings), Err(StartupError::Listener(_))));
        assert!(SharedState::attach(&settings.ipc).is_err());
    }

    #[test]
    fn invalid_settings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(&dir);
        settings.ipc.shm_id = 0;
        assert!(matches!(bootstrap(&settings), Err(StartupError::Config(ConfigError::Validation(_)))));
    }
}
