//! Shared utilities for multi-process integration tests.

#![allow(dead_code)]

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, Instant};

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use ipc_toolkit::ResourceKey;

/// Fork, run `body` in the child, and exit the child with 0 if it returned
/// `true`, 1 if it returned `false`, and 101 if it panicked.
pub fn spawn_child<F: FnOnce() -> bool>(body: F) -> Pid {
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let code = match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(true) => 0,
                Ok(false) => 1,
                Err(_) => 101,
            };
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => child,
    }
}

/// Wait for `child` and return its exit code. Panics if it was killed.
pub fn exit_code(child: Pid) -> i32 {
    match waitpid(child, None).expect("waitpid") {
        WaitStatus::Exited(_, code) => code,
        other => panic!("child did not exit normally: {:?}", other),
    }
}

/// Run `body` in a forked child and return its exit code.
pub fn run_in_child<F: FnOnce() -> bool>(body: F) -> i32 {
    exit_code(spawn_child(body))
}

pub fn key_in(dir: &Path, id: u8) -> ResourceKey {
    ResourceKey::new(dir, id).expect("ftok")
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Whether `pid` is asleep in the kernel (state `S` in `/proc/<pid>/stat`).
pub fn is_sleeping(pid: Pid) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| stat.rsplit_once(')').map(|(_, rest)| rest.trim_start().starts_with('S')))
        .unwrap_or(false)
}
