//! OS signal handling for the server control plane.
//!
//! # Responsibilities
//! - Register handlers for the terminate and reconfigure signals
//! - Ignore SIGCHLD so finished connection children are reaped by the kernel
//! - Undo all of it in forked children
//!
//! # Design Decisions
//! - SIGTERM/SIGINT → graceful shutdown
//! - SIGHUP → config reload, not shutdown
//! - Each control handler blocks the other signals while it runs

use nix::sys::signal::{SigSet, Signal};

use crate::lifecycle::shutdown::{on_reconfigure, on_terminate};
use crate::signal::{Action, SignalControl, SignalError};

/// The signals that drive the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSignals {
    /// Requests a configuration reload.
    pub reload: Signal,
    /// Each of these requests a graceful shutdown.
    pub terminate: Vec<Signal>,
}

impl Default for ControlSignals {
    fn default() -> Self {
        Self {
            reload: Signal::SIGHUP,
            terminate: vec![Signal::SIGTERM, Signal::SIGINT],
        }
    }
}

impl ControlSignals {
    /// Every control signal, reload first.
    pub fn all(&self) -> Vec<Signal> {
        std::iter::once(self.reload).chain(self.terminate.iter().copied()).collect()
    }

    pub fn as_set(&self) -> SigSet {
        let mut set = SigSet::empty();
        for signal in self.all() {
            set.add(signal);
        }
        set
    }

    /// Install the flag-setting handlers and ignore SIGCHLD.
    pub fn install(&self, control: &SignalControl) -> Result<(), SignalError> {
        control.install_handler(self.reload, Action::Handler(on_reconfigure), &self.terminate)?;
        for signal in &self.terminate {
            control.install_handler(*signal, Action::Handler(on_terminate), &[self.reload])?;
        }
        control.ignore(Signal::SIGCHLD)?;

        tracing::debug!(reload = %self.reload, terminate = ?self.terminate, "Control signals installed");
        Ok(())
    }

    /// Back to default dispositions, as a connection child wants them.
    pub fn uninstall(&self, control: &SignalControl) -> Result<(), SignalError> {
        for signal in self.all() {
            control.restore_default(signal)?;
        }
        control.restore_default(Signal::SIGCHLD)
    }
}
