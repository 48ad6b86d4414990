//! Child reaping with resource usage.

use crate::config::types::{Result, SandboxError};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Resource usage reported alongside a wait status.
///
/// Memory is not taken from `ru_maxrss`: exec folds the peak of the replaced
/// image into it, and that image is a copy of the supervisor. See
/// [`peak_rss`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Usage {
    /// User CPU time in seconds
    pub cpu_time: f64,
}

impl Usage {
    fn from_rusage(usage: &libc::rusage) -> Self {
        let cpu_time = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1_000_000.0;
        Self { cpu_time }
    }
}

/// `VmHWM` of a `/proc/<pid>/status` document, in bytes.
fn parse_vm_hwm(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmHWM:"))?;
    let kib: u64 = line["VmHWM:".len()..]
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kib.saturating_mul(1024))
}

/// Peak resident set size of the current image of `pid`, in bytes.
///
/// The high-water mark starts over on exec. `None` once the process has
/// released its address space (zombies report no `VmHWM`).
pub fn peak_rss(pid: Pid) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_vm_hwm(&status)
}

/// One report from [`wait_any`].
#[derive(Clone, Copy, Debug)]
pub struct ChildReport {
    pub pid: Pid,
    pub status: WaitStatus,
    pub usage: Usage,
}

/// Block until any child changes state.
///
/// Ptrace stops of traced children are reported as well, with the usage the
/// kernel has accumulated for the child so far.
pub fn wait_any() -> Result<ChildReport> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: rusage is plain data and zero is a valid bit pattern.
        let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };

        // SAFETY: both out-pointers reference live stack locals.
        let rc = unsafe { libc::wait4(-1, &mut status, libc::__WALL, &mut rusage) };
        if rc < 0 {
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(SandboxError::os("wait4()", errno)),
            }
        }

        let pid = Pid::from_raw(rc);
        let status = WaitStatus::from_raw(pid, status)
            .map_err(|e| SandboxError::os("decoding wait status", e))?;
        return Ok(ChildReport {
            pid,
            status,
            usage: Usage::from_rusage(&rusage),
        });
    }
}

/// Exit code encoded the way results report it: the exit status, or the
/// negated signal number for a signal death.
pub fn exit_code_of(status: &WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(*code),
        WaitStatus::Signaled(_, signal, _) => Some(-(*signal as i32)),
        _ => None,
    }
}

/// SIGKILL `pid` and reap it. Returns the terminal status, or `None` when the
/// child was already gone.
pub fn kill_and_reap(pid: Pid) -> Option<WaitStatus> {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("kill({}, SIGKILL) failed: {}", pid, e),
    }

    loop {
        match waitpid(pid, Some(WaitPidFlag::__WALL)) {
            Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => {
                log::debug!("Reaped child {}: {:?}", pid, status);
                return Some(status);
            }
            // A pending ptrace stop may be reported before the kill lands.
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return None,
            Err(e) => {
                log::warn!("waitpid({}) failed while reaping: {}", pid, e);
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_encoding() {
        let pid = Pid::from_raw(42);
        assert_eq!(exit_code_of(&WaitStatus::Exited(pid, 3)), Some(3));
        assert_eq!(
            exit_code_of(&WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(-9)
        );
        assert_eq!(exit_code_of(&WaitStatus::PtraceSyscall(pid)), None);
    }

    #[test]
    fn test_usage_conversion() {
        // SAFETY: zeroed rusage is valid.
        let mut raw: libc::rusage = unsafe { std::mem::zeroed() };
        raw.ru_utime.tv_sec = 1;
        raw.ru_utime.tv_usec = 500_000;
        let usage = Usage::from_rusage(&raw);
        assert!((usage.cpu_time - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_vm_hwm_parsing() {
        let status = "Name:\tcat\nVmPeak:\t    8000 kB\nVmHWM:\t     1180 kB\nVmRSS:\t    1180 kB\n";
        assert_eq!(parse_vm_hwm(status), Some(1180 * 1024));
        assert_eq!(parse_vm_hwm("Name:\tkthreadd\nState:\tS (sleeping)\n"), None);
        assert_eq!(parse_vm_hwm("VmHWM:\tlots kB\n"), None);
    }

    #[test]
    fn test_peak_rss_of_live_and_missing_process() {
        assert!(peak_rss(nix::unistd::getpid()).unwrap_or(0) > 0);
        assert_eq!(peak_rss(Pid::from_raw(i32::MAX)), None);
    }
}
