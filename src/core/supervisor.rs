//! Tracer/Supervisor.
//!
//! One [`Supervisor::run`] forks the watchdog and the tracee, attaches to the
//! tracee, releases it into its exec and then drives the trace event loop
//! until the tracee is gone or a limit or the policy ends the run. Both
//! children are killed and reaped on every way out.

use crate::config::types::{ExecutionRequest, ExecutionResult, Result, SandboxError};
use crate::core::policy::{Decision, PolicyEngine};
use crate::core::state::{SyscallEdge, TraceState};
use crate::exec::bootstrap::{self, ExecPlan};
use crate::exec::handshake::Handshake;
use crate::exec::watchdog;
use crate::kernel::arch::ArchAdapter;
use crate::kernel::process::{self, exit_code_of, kill_and_reap, Usage};
use crate::kernel::ptrace::{self, PtraceTracee};
use crate::utils::path;
use crate::verdict::{crossed_limit, finalize_verdicts, Verdict};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::{fork, ForkResult, Pid};
use std::time::Instant;
use uuid::Uuid;

/// Cooperating processes of one run.
#[derive(Debug, Default)]
struct Children {
    tracee: Option<Pid>,
    watchdog: Option<Pid>,
}

impl Children {
    /// Kill and reap whatever is still alive. Returns the tracee's final
    /// status when it had to be reaped here.
    fn terminate_all(&mut self) -> Option<WaitStatus> {
        let tracee_status = self.tracee.take().and_then(kill_and_reap);
        if let Some(watchdog) = self.watchdog.take() {
            kill_and_reap(watchdog);
        }
        tracee_status
    }
}

/// Peak usage observed across all tracee reports.
#[derive(Debug, Default)]
struct Peak {
    cpu_time: f64,
    max_rss: u64,
}

impl Peak {
    fn observe(&mut self, usage: Usage) {
        self.cpu_time = self.cpu_time.max(usage.cpu_time);
    }

    fn observe_rss(&mut self, rss: Option<u64>) {
        if let Some(rss) = rss {
            self.max_rss = self.max_rss.max(rss);
        }
    }
}

#[derive(Default)]
struct Run {
    state: TraceState,
    children: Children,
    peak: Peak,
    result: ExecutionResult,
}

/// Signals that would park the tracee in a group stop; they are suppressed
/// instead of being delivered.
fn is_stop_signal(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU
    )
}

/// Ptrace calls fail with ESRCH when the tracee was killed behind our back;
/// its death is reported by the next wait.
fn vanished(err: &SandboxError) -> bool {
    matches!(
        err,
        SandboxError::Os {
            errno: Errno::ESRCH,
            ..
        }
    )
}

pub struct Supervisor<'r> {
    request: &'r ExecutionRequest<'r>,
    arch: &'r dyn ArchAdapter,
    run_id: Uuid,
}

impl<'r> Supervisor<'r> {
    pub fn new(request: &'r ExecutionRequest<'r>, arch: &'r dyn ArchAdapter) -> Self {
        Self {
            request,
            arch,
            run_id: Uuid::new_v4(),
        }
    }

    /// Supervise one execution. Engine failures end up in the result's error
    /// fields; this never returns early without cleaning up.
    ///
    /// The request is expected to have passed
    /// [`validate_request`](crate::config::validator::validate_request).
    /// Children of the calling process that are not part of the run may be
    /// reaped here and their status is lost.
    pub fn run(&self) -> ExecutionResult {
        let started = Instant::now();
        let mut run = Run::default();

        log::info!(
            "[{}] Running {} under profile {} ({})",
            self.run_id,
            self.request.exe.display(),
            self.request.profile.name,
            self.arch.name()
        );

        if let Err(err) = self.supervise(&mut run) {
            log::error!("[{}] {}", self.run_id, err);
            run.result.record_error(&err);
        }

        if let Some(status) = run.children.terminate_all() {
            log::debug!("[{}] Tracee reaped after stop: {:?}", self.run_id, status);
            if !run.result.has_error() {
                if let Some(code) = exit_code_of(&status) {
                    run.result.exit_code = code;
                }
            }
        }
        run.state.terminate();

        let mut result = run.result;
        result.wall_clock = started.elapsed().as_secs_f64();
        result.cpu_usage = run.peak.cpu_time;
        result.memory_usage = run.peak.max_rss;
        finalize_verdicts(&mut result, &self.request.limits);

        log::info!(
            "[{}] Finished: exit code {}, cpu {:.3}s, wall {:.3}s, memory {} bytes, verdicts {:?}",
            self.run_id,
            result.exit_code,
            result.cpu_usage,
            result.wall_clock,
            result.memory_usage,
            result.verdicts()
        );
        result
    }

    /// Absolute, symlink-free working directory of the tracee.
    fn resolve_workdir(&self) -> Result<String> {
        let cwd = std::env::current_dir()?;
        let dir = match &self.request.workdir {
            Some(dir) => cwd.join(dir),
            None => cwd,
        };
        let dir = std::fs::canonicalize(&dir).map_err(|e| match e.raw_os_error() {
            Some(code) => SandboxError::os(
                format!("cannot resolve working directory {}", dir.display()),
                Errno::from_i32(code),
            ),
            None => SandboxError::Io(e),
        })?;
        let dir = dir.to_str().ok_or_else(|| {
            SandboxError::Config(format!(
                "working directory {} is not valid UTF-8",
                dir.display()
            ))
        })?;
        Ok(path::resolve("/", dir))
    }

    fn supervise(&self, run: &mut Run) -> Result<()> {
        let engine = PolicyEngine::new(self.request, self.arch, self.resolve_workdir()?);
        let plan = ExecPlan::from_request(self.request)?;

        if let Some(wall_time) = self.request.limits.wall_time {
            run.children.watchdog = Some(watchdog::spawn(wall_time)?);
        }

        let handshake = Handshake::new()?;
        // SAFETY: the child runs only the bootstrap, which avoids allocation
        // and ends in exec or _exit.
        let tracee = match unsafe { fork() } {
            Ok(ForkResult::Child) => bootstrap::run_tracee(&plan, handshake.into_tracee()),
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => return Err(SandboxError::os("fork(tracee)", e)),
        };
        run.children.tracee = Some(tracee);
        let mut channel = handshake.into_supervisor();

        ptrace::attach(tracee)?;
        ptrace::set_supervision_options(tracee)?;
        ptrace::resume(tracee, None)?;
        run.state.attached();
        log::debug!("[{}] Attached to tracee {}", self.run_id, tracee);

        channel.release()?;
        channel.wait_ready()?;
        log::debug!(
            "[{}] Tracee exec'd {} in {}",
            self.run_id,
            self.request.exe.display(),
            engine.workdir()
        );

        self.event_loop(run, &engine, tracee)
    }

    fn event_loop(&self, run: &mut Run, engine: &PolicyEngine<'_>, tracee: Pid) -> Result<()> {
        let mut access = PtraceTracee::new(tracee);

        loop {
            let report = process::wait_any()?;

            if run.children.watchdog == Some(report.pid) {
                run.children.watchdog = None;
                if let WaitStatus::Exited(_, 0) = report.status {
                    log::warn!("[{}] Wall clock limit exceeded", self.run_id);
                    run.result.mark(Verdict::WallLimitExceeded);
                    return Ok(());
                }
                log::warn!(
                    "[{}] Watchdog ended unexpectedly: {:?}",
                    self.run_id,
                    report.status
                );
                continue;
            }

            if report.pid != tracee {
                log::debug!("[{}] Ignoring unrelated child {}", self.run_id, report.pid);
                continue;
            }

            run.peak.observe(report.usage);
            // The pre-exec image is a copy of the supervisor; only the
            // target's own address space counts.
            if run.state.traces_syscalls() {
                run.peak.observe_rss(process::peak_rss(tracee));
            }

            match report.status {
                WaitStatus::Exited(_, code) => {
                    run.children.tracee = None;
                    run.result.exit_code = code;
                    log::info!("[{}] Tracee exited with code {}", self.run_id, code);
                    return Ok(());
                }
                WaitStatus::Signaled(_, signal, _) => {
                    run.children.tracee = None;
                    run.result.exit_code = -(signal as i32);
                    log::info!("[{}] Tracee killed by {}", self.run_id, signal);
                    return Ok(());
                }
                _ => {}
            }

            if let Some(verdict) = crossed_limit(
                &self.request.limits,
                run.peak.cpu_time,
                run.peak.max_rss,
            ) {
                log::warn!(
                    "[{}] {} (cpu {:.3}s, memory {} bytes)",
                    self.run_id,
                    verdict,
                    run.peak.cpu_time,
                    run.peak.max_rss
                );
                run.result.mark(verdict);
                return Ok(());
            }

            let inject = match report.status {
                WaitStatus::PtraceSyscall(_) => {
                    match self.on_syscall_stop(run, engine, &mut access) {
                        Ok(true) => return Ok(()),
                        Ok(false) => None,
                        Err(err) if vanished(&err) => continue,
                        Err(err) => return Err(err),
                    }
                }
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                    if run.state.exec_trap() {
                        log::debug!("[{}] Post-exec trap consumed", self.run_id);
                    }
                    None
                }
                WaitStatus::Stopped(_, Signal::SIGXCPU) => {
                    log::warn!("[{}] Tracee received SIGXCPU", self.run_id);
                    run.result.mark(Verdict::TimeLimitExceeded);
                    return Ok(());
                }
                // Exit event: the sample above was the last one taken with
                // the address space intact.
                WaitStatus::PtraceEvent(..) => None,
                WaitStatus::Stopped(_, signal) if is_stop_signal(signal) => None,
                WaitStatus::Stopped(_, signal) => Some(signal),
                _ => None,
            };

            let resumed = if run.state.traces_syscalls() {
                ptrace::resume_to_syscall(tracee, inject)
            } else {
                ptrace::resume(tracee, inject)
            };
            if let Err(err) = resumed {
                if !vanished(&err) {
                    return Err(err);
                }
            }
        }
    }

    /// Handle one syscall stop. Returns `true` when the run must stop because
    /// of a security violation.
    fn on_syscall_stop(
        &self,
        run: &mut Run,
        engine: &PolicyEngine<'_>,
        access: &mut PtraceTracee,
    ) -> Result<bool> {
        match run.state.syscall_stop() {
            Some(SyscallEdge::Entry) => {
                if let Decision::Deny { errno, violation } = engine.on_entry(access)? {
                    if violation {
                        log::warn!("[{}] Security violation, killing tracee", self.run_id);
                        run.result.mark(Verdict::SecurityViolation);
                        return Ok(true);
                    }
                    run.state.deny_current(errno);
                }
            }
            Some(SyscallEdge::Exit(Some(errno))) => engine.on_exit(access, errno)?,
            Some(SyscallEdge::Exit(None)) | None => {}
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_keeps_maxima() {
        let mut peak = Peak::default();
        peak.observe(Usage { cpu_time: 0.5 });
        peak.observe(Usage { cpu_time: 0.25 });
        peak.observe_rss(Some(8192));
        peak.observe_rss(None);
        peak.observe_rss(Some(4096));
        assert_eq!(peak.cpu_time, 0.5);
        assert_eq!(peak.max_rss, 8192);
    }

    #[test]
    fn test_stop_signals_are_suppressed() {
        assert!(is_stop_signal(Signal::SIGTSTP));
        assert!(!is_stop_signal(Signal::SIGSEGV));
        assert!(!is_stop_signal(Signal::SIGXCPU));
    }

    #[test]
    fn test_terminate_all_without_children_is_noop() {
        let mut children = Children::default();
        assert!(children.terminate_all().is_none());
    }

    #[test]
    fn test_vanished_tracee_is_recognised() {
        assert!(vanished(&SandboxError::os("PTRACE_SYSCALL", Errno::ESRCH)));
        assert!(!vanished(&SandboxError::os("PTRACE_SYSCALL", Errno::EPERM)));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_missing_workdir_reports_os_errno() {
        use crate::config::profile::{PathAccess, Profile, SyscallAction};
        use crate::kernel::arch::x86_64::X86_64;

        let profile = Profile::with_defaults("t", SyscallAction::Allow, PathAccess::ReadWrite);
        let request = ExecutionRequest::new("/bin/true", &profile)
            .with_workdir("/nonexistent/tracebox-workdir");
        let err = Supervisor::new(&request, &X86_64).resolve_workdir().unwrap_err();
        assert_eq!(err.code(), libc::ENOENT);
        assert!(err.to_string().contains("/nonexistent/tracebox-workdir"));
    }
}
