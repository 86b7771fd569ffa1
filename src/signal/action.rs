//! Dispositions and delivery targets.

use nix::sys::pthread::Pthread;
use nix::sys::signal::SigHandler;
use nix::unistd::Pid;

/// What happens when a signal is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Discard the signal.
    Ignore,
    /// The kernel's default behavior (terminate, stop, ignore, ...).
    Default,
    /// Run this function. It must be async-signal-safe: touch atomics only.
    Handler(extern "C" fn(libc::c_int)),
}

impl Action {
    pub(crate) fn as_handler(self) -> SigHandler {
        match self {
            Action::Ignore => SigHandler::SigIgn,
            Action::Default => SigHandler::SigDfl,
            Action::Handler(f) => SigHandler::Handler(f),
        }
    }
}

/// Where [`SignalControl::raise`](crate::signal::SignalControl::raise) sends a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A process; any of its threads with the signal unblocked may take it.
    Process(Pid),
    /// The calling process.
    CurrentProcess,
    /// A specific thread of the calling process.
    Thread(Pthread),
    /// The calling thread. Delivery happens before `raise` returns if the
    /// signal is unblocked.
    CurrentThread,
}
