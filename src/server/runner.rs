//! The signal-driven, fork-per-connection accept loop.
//!
//! # States
//! ```text
//! Initializing → Listening → (fork per connection) → Listening* → Draining → Stopped
//! ```
//!
//! The control signals are blocked in the loop everywhere except inside
//! [`Listener::wait_readable`], which unblocks them for exactly the duration of
//! the wait. A signal that arrives while the loop is doing work stays pending
//! and interrupts the next wait, so a stop or reload request is never lost
//! between the flag check and the blocking call.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::SigSet;
use nix::unistd::{fork, ForkResult};
use thiserror::Error;

use crate::ipc::IpcError;
use crate::lifecycle::shutdown;
use crate::lifecycle::signals::ControlSignals;
use crate::net::{Connection, Listener, ListenerError};
use crate::server::handler::ConnectionHandler;
use crate::server::state::SharedState;
use crate::signal::{SignalControl, SignalError};

/// Pause after an accept error that is likely to repeat, such as `EMFILE`.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("signal setup failed: {0}")]
    Signal(#[from] SignalError),

    #[error("listener failed: {0}")]
    Listener(#[from] ListenerError),

    #[error("shared state failed: {0}")]
    Ipc(#[from] IpcError),
}

/// Accepts connections and serves each one in a forked child.
pub struct ConnectionServer<'a, H> {
    listener: Listener,
    state: &'a mut SharedState,
    config_file: PathBuf,
    handler: H,
    signals: ControlSignals,
}

impl<'a, H: ConnectionHandler> ConnectionServer<'a, H> {
    pub fn new(listener: Listener, state: &'a mut SharedState, config_file: impl Into<PathBuf>, handler: H) -> Self {
        Self {
            listener,
            state,
            config_file: config_file.into(),
            handler,
            signals: ControlSignals::default(),
        }
    }

    /// Use a different set of control signals.
    pub fn with_signals(mut self, signals: ControlSignals) -> Self {
        self.signals = signals;
        self
    }

    /// Serve until a terminate signal arrives.
    ///
    /// The configuration file is read once before the first accept. In-flight
    /// children are not waited for; SIGCHLD is ignored so the kernel reaps them.
    pub fn run(self) -> Result<(), ServerError> {
        let ConnectionServer {
            mut listener,
            state,
            config_file,
            mut handler,
            signals,
        } = self;
        let control = SignalControl::global();

        shutdown::reset();
        shutdown::request_reload();

        signals.install(control)?;

        let original_mask = control.blocked()?;
        let control_set = signals.as_set();
        let mut wait_mask = original_mask;
        for signal in control_set.iter() {
            wait_mask.remove(signal);
        }
        control_set.thread_block().map_err(mask_error)?;

        tracing::info!(
            address = %listener.local_addr(),
            config_file = %config_file.display(),
            "Connection server listening"
        );

        let result = loop {
            if shutdown::stop_requested() {
                break Ok(());
            }

            if shutdown::take_reload_request() {
                apply_reload(state, &mut listener, &config_file);
            }

            match listener.wait_readable(&wait_mask) {
                Ok(()) => {}
                Err(e) if e.is_transient() => continue,
                Err(e) => break Err(e.into()),
            }

            let conn = match listener.accept() {
                Ok(conn) => conn,
                Err(e) => {
                    if let Some(pause) = accept_backoff(&e) {
                        tracing::warn!(error = %e, backoff_ms = pause.as_millis() as u64, "Accept failed");
                        std::thread::sleep(pause);
                    }
                    continue;
                }
            };

            // SAFETY: the server is single-threaded; the child never returns
            // into this loop.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    drop(listener);
                    run_child(control, &signals, &original_mask, state, &mut handler, conn);
                }
                Ok(ForkResult::Parent { child }) => {
                    tracing::debug!(connection_id = %conn.id(), child = %child, "Connection handed to child");
                    drop(conn);
                }
                Err(errno) => {
                    tracing::warn!(connection_id = %conn.id(), error = %errno, "Fork failed, dropping connection");
                }
            }
        };

        tracing::info!("Connection server draining");
        drop(listener);
        original_mask.thread_set_mask().map_err(mask_error)?;

        result
    }
}

fn mask_error(errno: nix::errno::Errno) -> SignalError {
    SignalError::Os {
        op: "pthread_sigmask",
        errno,
    }
}

/// How long to wait before accepting again after `e`. `None` retries at once.
fn accept_backoff(e: &ListenerError) -> Option<Duration> {
    if e.is_transient() {
        None
    } else {
        Some(ACCEPT_ERROR_BACKOFF)
    }
}

fn apply_reload(state: &mut SharedState, listener: &mut Listener, config_file: &Path) {
    match state.reload(config_file) {
        Ok(tunables) => {
            if let Err(e) = listener.set_backlog(tunables.backlog) {
                tracing::warn!(error = %e, backlog = tunables.backlog, "Failed to apply backlog");
            }
        }
        Err(e) => tracing::error!(error = %e, "Configuration reload failed"),
    }
}

/// Body of a connection child. Exits the process with status 0.
fn run_child<H: ConnectionHandler>(
    control: &SignalControl,
    signals: &ControlSignals,
    original_mask: &SigSet,
    state: &mut SharedState,
    handler: &mut H,
    mut conn: Connection,
) -> ! {
    if let Err(e) = signals.uninstall(control) {
        tracing::warn!(error = %e, "Failed to restore signal dispositions in child");
    }
    if let Err(errno) = original_mask.thread_set_mask() {
        tracing::warn!(error = %errno, "Failed to restore signal mask in child");
    }

    let timeout = state
        .tunables()
        .map(|t| Duration::from_millis(t.read_timeout_ms.max(1) as u64))
        .ok();
    if let Err(e) = conn.set_read_timeout(timeout) {
        tracing::debug!(connection_id = %conn.id(), error = %e, "Failed to set read timeout");
    }

    match state.admit() {
        Ok(true) => {
            handler.handle(&mut conn, state);
            if let Err(e) = state.release() {
                tracing::warn!(connection_id = %conn.id(), error = %e, "Failed to release client slot");
            }
        }
        Ok(false) => {
            tracing::info!(connection_id = %conn.id(), "Client limit reached, refusing connection");
            handler.refuse(&mut conn);
        }
        Err(e) => {
            tracing::warn!(connection_id = %conn.id(), error = %e, "Admission failed, refusing connection");
            handler.refuse(&mut conn);
        }
    }

    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "Connection close failed");
    }
    std::process::exit(0)
}
