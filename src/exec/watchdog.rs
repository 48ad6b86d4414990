//! Wall-clock watchdog.
//!
//! A child process that sleeps for the wall limit and exits 0. Its normal
//! exit is how the supervisor learns that the limit elapsed; the supervisor
//! kills it when the tracee finishes first.

use crate::config::types::{Result, SandboxError};
use nix::sys::prctl;
use nix::sys::signal::Signal;
use nix::unistd::{fork, ForkResult, Pid};
use std::time::Duration;

/// Body of the watchdog child. Returns its exit status: 0 once `nap` has
/// elapsed, 1 when it could not be tied to the supervisor's lifetime.
fn watch(nap: Duration, arm: impl FnOnce() -> nix::Result<()>) -> i32 {
    if arm().is_err() {
        return 1;
    }
    std::thread::sleep(nap);
    0
}

pub fn spawn(wall_time: f64) -> Result<Pid> {
    let nap = Duration::try_from_secs_f64(wall_time.max(0.0)).unwrap_or(Duration::MAX);

    // SAFETY: the child only calls prctl, nanosleep and _exit.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            log::debug!("Watchdog {} armed for {:.3}s", child, wall_time);
            Ok(child)
        }
        Ok(ForkResult::Child) => {
            let status = watch(nap, || prctl::set_pdeathsig(Signal::SIGKILL));
            // SAFETY: leave without running the parent's atexit handlers.
            unsafe { libc::_exit(status) }
        }
        Err(e) => Err(SandboxError::os("fork(watchdog)", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use std::time::Instant;

    #[test]
    fn test_watch_sleeps_then_succeeds() {
        let started = Instant::now();
        assert_eq!(watch(Duration::from_millis(20), || Ok(())), 0);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_unarmed_watchdog_fails_without_sleeping() {
        let started = Instant::now();
        assert_eq!(watch(Duration::from_secs(60), || Err(Errno::EINVAL)), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
