//! Signal mask and handler management.
//!
//! # Data Flow
//! ```text
//! install_handler(sig, action, block_during)
//!     → sigaction with sa_mask = block_during (sig itself implied)
//!     → recorded in SignalControl's table
//!
//! block / unblock / unblock_all
//!     → pthread_sigmask on the calling thread
//!
//! raise / arm_timer
//!     → kill, pthread_kill, setitimer(ITIMER_REAL)
//!
//! suspend_until_any_signal / suspend_until / consume_signal
//!     → sigsuspend (handler runs) or sigwait (handler skipped)
//! ```
//!
//! # Design Decisions
//! - One process-wide `SignalControl`, created lazily, never torn down
//! - Handlers are plain `extern "C" fn`s and should only touch atomics
//! - No `SA_RESTART`: interrupted syscalls surface `EINTR` to their callers

pub mod action;
pub mod control;

pub use action::{Action, Target};
pub use control::{Installed, SignalControl, SignalError};

pub use nix::sys::signal::{SigSet, Signal};
