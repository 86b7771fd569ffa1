//! Process-wide signal state behind one serializing handle.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::pthread::{pthread_kill, pthread_self};
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigSet, SigmaskHow, Signal};
use nix::unistd::getpid;
use thiserror::Error;

use crate::signal::action::{Action, Target};

/// Error type for signal operations. Nothing here is retried.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("{0} cannot be caught, blocked or ignored")]
    Uncatchable(Signal),

    #[error("{op} failed: {errno}")]
    Os { op: &'static str, errno: Errno },
}

fn os(op: &'static str) -> impl Fn(Errno) -> SignalError {
    move |errno| SignalError::Os { op, errno }
}

/// Disposition recorded for a signal by [`SignalControl::install_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installed {
    pub action: Action,
    /// Blocked, together with the signal itself, while the handler runs.
    pub block_during: SigSet,
}

static GLOBAL: OnceLock<SignalControl> = OnceLock::new();

/// Handle to the process's signal dispositions and the calling thread's mask.
///
/// There is one per process, reached through [`SignalControl::global`].
/// Disposition changes are serialized through an internal lock, and the
/// signal being changed is blocked in the calling thread for the duration of
/// the `sigaction` call.
#[derive(Debug)]
pub struct SignalControl {
    installed: Mutex<HashMap<Signal, Installed>>,
}

impl SignalControl {
    /// The process-wide instance. The first call clears the calling thread's
    /// signal mask.
    pub fn global() -> &'static SignalControl {
        GLOBAL.get_or_init(|| {
            if let Err(errno) = SigSet::empty().thread_set_mask() {
                tracing::warn!(error = %errno, "Failed to clear signal mask");
            }
            tracing::debug!("Signal control initialized");
            SignalControl {
                installed: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Set what happens when `signal` arrives.
    ///
    /// While a handler for `signal` runs, `signal` itself and every signal in
    /// `block_during` are held back; they are delivered after it returns. The
    /// handler is installed without `SA_RESTART`, so blocking syscalls it
    /// interrupts fail with `EINTR` instead of resuming.
    pub fn install_handler(&self, signal: Signal, action: Action, block_during: &[Signal]) -> Result<(), SignalError> {
        if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP) && action != Action::Default {
            return Err(SignalError::Uncatchable(signal));
        }

        let mut mask = SigSet::empty();
        for s in block_during {
            mask.add(*s);
        }
        let sa = SigAction::new(action.as_handler(), SaFlags::empty(), mask);

        let mut installed = self.lock();

        let mut only = SigSet::empty();
        only.add(signal);
        let previous = only.thread_swap_mask(SigmaskHow::SIG_BLOCK).map_err(os("pthread_sigmask"))?;

        let result = unsafe { sigaction(signal, &sa) };
        previous.thread_set_mask().map_err(os("pthread_sigmask"))?;
        result.map_err(os("sigaction"))?;

        installed.insert(
            signal,
            Installed {
                action,
                block_during: mask,
            },
        );
        tracing::debug!(%signal, ?action, "Signal disposition installed");
        Ok(())
    }

    pub fn ignore(&self, signal: Signal) -> Result<(), SignalError> {
        self.install_handler(signal, Action::Ignore, &[])
    }

    pub fn restore_default(&self, signal: Signal) -> Result<(), SignalError> {
        self.install_handler(signal, Action::Default, &[])
    }

    /// Disposition last installed through this handle, if any.
    pub fn action(&self, signal: Signal) -> Option<Installed> {
        self.lock().get(&signal).copied()
    }

    /// Hold `signal` back from the calling thread. It stays pending until unblocked.
    pub fn block(&self, signal: Signal) -> Result<(), SignalError> {
        let mut set = SigSet::empty();
        set.add(signal);
        set.thread_block().map_err(os("pthread_sigmask"))
    }

    /// Let `signal` through again. A pending instance is delivered before this returns.
    pub fn unblock(&self, signal: Signal) -> Result<(), SignalError> {
        let mut set = SigSet::empty();
        set.add(signal);
        set.thread_unblock().map_err(os("pthread_sigmask"))
    }

    pub fn unblock_all(&self) -> Result<(), SignalError> {
        SigSet::empty().thread_set_mask().map_err(os("pthread_sigmask"))
    }

    /// The calling thread's current mask.
    pub fn blocked(&self) -> Result<SigSet, SignalError> {
        SigSet::thread_get_mask().map_err(os("pthread_sigmask"))
    }

    /// Send `signal` to `target`.
    pub fn raise(&self, target: Target, signal: Signal) -> Result<(), SignalError> {
        match target {
            Target::Process(pid) => kill(pid, signal).map_err(os("kill")),
            Target::CurrentProcess => kill(getpid(), signal).map_err(os("kill")),
            Target::Thread(thread) => pthread_kill(thread, signal).map_err(os("pthread_kill")),
            Target::CurrentThread => pthread_kill(pthread_self(), signal).map_err(os("pthread_kill")),
        }
    }

    /// Deliver `SIGALRM` to the process after `after`. Zero cancels a pending
    /// timer. Returns what was left of the previous timer.
    pub fn arm_timer(&self, after: Duration) -> Result<Duration, SignalError> {
        let value = libc::itimerval {
            it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
            it_value: libc::timeval {
                tv_sec: after.as_secs() as libc::time_t,
                tv_usec: after.subsec_micros() as libc::suseconds_t,
            },
        };
        let mut old = libc::itimerval {
            it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
            it_value: libc::timeval { tv_sec: 0, tv_usec: 0 },
        };

        if unsafe { libc::setitimer(libc::ITIMER_REAL, &value, &mut old) } == -1 {
            return Err(SignalError::Os {
                op: "setitimer",
                errno: Errno::last(),
            });
        }

        Ok(Duration::from_secs(old.it_value.tv_sec as u64) + Duration::from_micros(old.it_value.tv_usec as u64))
    }

    /// Sleep until some unblocked signal arrives and its handler has run.
    pub fn suspend_until_any_signal(&self) -> Result<(), SignalError> {
        let current = self.blocked()?;
        sigsuspend(&current)
    }

    /// Sleep until `signal` arrives and its handler has run. Every other
    /// signal stays pending meanwhile.
    ///
    /// Never returns if `signal` is ignored.
    pub fn suspend_until(&self, signal: Signal) -> Result<(), SignalError> {
        let mut mask = SigSet::all();
        mask.remove(signal);
        sigsuspend(&mask)
    }

    /// Wait until `signal` is pending and take it without running its handler.
    pub fn consume_signal(&self, signal: Signal) -> Result<(), SignalError> {
        let mut set = SigSet::empty();
        set.add(signal);

        // sigwait only sees signals that are blocked.
        let previous = set.thread_swap_mask(SigmaskHow::SIG_BLOCK).map_err(os("pthread_sigmask"))?;
        let waited = set.wait();
        previous.thread_set_mask().map_err(os("pthread_sigmask"))?;

        let received = waited.map_err(os("sigwait"))?;
        tracing::trace!(%received, "Signal consumed");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Signal, Installed>> {
        self.installed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sigsuspend(mask: &SigSet) -> Result<(), SignalError> {
    unsafe { libc::sigsuspend(mask.as_ref()) };
    match Errno::last() {
        Errno::EINTR => Ok(()),
        errno => Err(SignalError::Os { op: "sigsuspend", errno }),
    }
}
