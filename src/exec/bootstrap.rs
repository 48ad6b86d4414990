//! Tracee bootstrap.
//!
//! Runs in the forked child before the target program. The steps form a
//! consuming type-state chain, so the order is fixed at compile time:
//!
//! `Parked -> Released -> InWorkdir -> Redirected -> Limited -> exec`
//!
//! Only `Bootstrap<Limited>` can exec. Skipping a step does not compile:
//!
//! ```compile_fail
//! use tracebox::exec::bootstrap::{Bootstrap, Parked};
//!
//! fn skip_everything(bootstrap: Bootstrap<'_, Parked>) {
//!     bootstrap.exec();
//! }
//! ```
//!
//! Everything the child needs is prepared in the parent as an [`ExecPlan`].
//! Between fork and exec the child only issues raw system calls: no
//! allocation, no logging.

use crate::config::types::{ExecutionRequest, Limits, Result, SandboxError, StdioTarget};
use crate::exec::handshake::TraceeChannel;
use nix::errno::Errno;
use std::ffi::CString;
use std::marker::PhantomData;
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;

type ChildResult<T> = std::result::Result<T, Errno>;

fn to_cstring(what: &str, value: &[u8]) -> Result<CString> {
    CString::new(value).map_err(|_| SandboxError::Config(format!("{what} contains NUL byte")))
}

/// NULL-terminated pointer array over owned C strings.
struct CStringArray {
    _owned: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CStringArray {
    fn new(what: &str, items: &[String]) -> Result<Self> {
        let owned = items
            .iter()
            .map(|item| to_cstring(what, item.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        // CString contents live on the heap, so these pointers stay valid
        // when `owned` is moved into the struct.
        let mut ptrs: Vec<*const c_char> = owned.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        Ok(Self {
            _owned: owned,
            ptrs,
        })
    }

    fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

/// Everything the child needs, converted before the fork.
pub struct ExecPlan {
    exe: CString,
    argv: CStringArray,
    /// `None` inherits the supervisor's environment
    envp: Option<CStringArray>,
    workdir: Option<CString>,
    stdio: [StdioTarget; 3],
    limits: Limits,
}

impl ExecPlan {
    pub fn from_request(request: &ExecutionRequest<'_>) -> Result<Self> {
        let exe = to_cstring("executable path", request.exe.as_os_str().as_bytes())?;
        let argv = CStringArray::new("argument", &request.args)?;
        let envp = if request.inherit_environment {
            None
        } else {
            Some(CStringArray::new("environment entry", &request.env)?)
        };
        let workdir = request
            .workdir
            .as_ref()
            .map(|dir| to_cstring("working directory", dir.as_os_str().as_bytes()))
            .transpose()?;

        Ok(Self {
            exe,
            argv,
            envp,
            workdir,
            stdio: [request.stdin, request.stdout, request.stderr],
            limits: request.limits,
        })
    }
}

/// Waiting on the release pipe
pub struct Parked;
/// Attached and released by the supervisor
pub struct Released;
/// Working directory entered
pub struct InWorkdir;
/// Standard streams redirected
pub struct Redirected;
/// Resource limits applied, ready to exec
pub struct Limited;

pub struct Bootstrap<'a, S> {
    plan: &'a ExecPlan,
    _state: PhantomData<S>,
}

impl<'a, S> Bootstrap<'a, S> {
    fn advance<T>(self) -> Bootstrap<'a, T> {
        Bootstrap {
            plan: self.plan,
            _state: PhantomData,
        }
    }
}

impl<'a> Bootstrap<'a, Parked> {
    pub fn new(plan: &'a ExecPlan) -> Self {
        Self {
            plan,
            _state: PhantomData,
        }
    }

    pub fn wait_for_release(
        self,
        channel: &mut TraceeChannel,
    ) -> ChildResult<Bootstrap<'a, Released>> {
        channel.wait_for_release()?;
        Ok(self.advance())
    }
}

impl<'a> Bootstrap<'a, Released> {
    pub fn enter_workdir(self) -> ChildResult<Bootstrap<'a, InWorkdir>> {
        if let Some(dir) = &self.plan.workdir {
            // SAFETY: `dir` is a valid NUL-terminated string owned by the plan.
            if unsafe { libc::chdir(dir.as_ptr()) } != 0 {
                return Err(Errno::last());
            }
        }
        Ok(self.advance())
    }
}

fn dup_onto(source: RawFd, target: RawFd) -> ChildResult<()> {
    if source == target {
        return Ok(());
    }
    // SAFETY: dup2 only manipulates the descriptor table.
    if unsafe { libc::dup2(source, target) } < 0 {
        return Err(Errno::last());
    }
    Ok(())
}

impl<'a> Bootstrap<'a, InWorkdir> {
    /// dup2 every `Fd` target onto its standard stream first, then close
    /// `Close` targets and the now-redundant source descriptors. Two streams
    /// may share one source.
    pub fn redirect_stdio(self) -> ChildResult<Bootstrap<'a, Redirected>> {
        for (stream, target) in self.plan.stdio.iter().enumerate() {
            if let StdioTarget::Fd(fd) = *target {
                dup_onto(fd, stream as RawFd)?;
            }
        }

        for (stream, target) in self.plan.stdio.iter().enumerate() {
            match *target {
                StdioTarget::Close => {
                    // SAFETY: closing a standard stream of this process only.
                    unsafe { libc::close(stream as RawFd) };
                }
                StdioTarget::Fd(fd) if fd > 2 => {
                    // SAFETY: the source was duplicated above; a second close of a
                    // shared source fails with EBADF, which is harmless.
                    unsafe { libc::close(fd) };
                }
                _ => {}
            }
        }
        Ok(self.advance())
    }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, soft: u64, hard: u64) -> ChildResult<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call.
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(Errno::last());
    }
    Ok(())
}

/// RLIMIT_CPU soft bound in whole seconds, rounded up.
pub(crate) fn cpu_rlimit_secs(cpu_time: f64) -> u64 {
    cpu_time.ceil().max(1.0) as u64
}

/// RLIMIT_AS: twice the memory limit, so the supervisor judges memory from
/// observed RSS before the kernel refuses allocations.
pub(crate) fn address_space_limit(memory: u64) -> u64 {
    memory.saturating_mul(2)
}

impl<'a> Bootstrap<'a, Redirected> {
    pub fn apply_limits(self) -> ChildResult<Bootstrap<'a, Limited>> {
        let limits = &self.plan.limits;
        if let Some(cpu) = limits.cpu_time {
            // Infinite hard bound: SIGXCPU is delivered instead of SIGKILL.
            set_rlimit(libc::RLIMIT_CPU, cpu_rlimit_secs(cpu), libc::RLIM_INFINITY)?;
        }
        if let Some(memory) = limits.memory {
            let bound = address_space_limit(memory);
            set_rlimit(libc::RLIMIT_AS, bound, bound)?;
        }
        Ok(self.advance())
    }
}

impl<'a> Bootstrap<'a, Limited> {
    /// Exec the target. Only returns on failure.
    pub fn exec(self) -> Errno {
        let plan = self.plan;
        // SAFETY: every pointer array is NULL-terminated and backed by
        // CStrings owned by the plan, which outlives this call.
        unsafe {
            match &plan.envp {
                Some(envp) => libc::execve(plan.exe.as_ptr(), plan.argv.as_ptr(), envp.as_ptr()),
                None => libc::execv(plan.exe.as_ptr(), plan.argv.as_ptr()),
            };
        }
        Errno::last()
    }
}

/// Child entry point after fork. Never returns: either the target program
/// replaces this process, or the errno is sent to the supervisor and the
/// child exits with status 1.
pub fn run_tracee(plan: &ExecPlan, mut channel: TraceeChannel) -> ! {
    let errno = match Bootstrap::new(plan)
        .wait_for_release(&mut channel)
        .and_then(|released| released.enter_workdir())
        .and_then(|in_workdir| in_workdir.redirect_stdio())
        .and_then(|redirected| redirected.apply_limits())
    {
        Ok(ready) => ready.exec(),
        Err(errno) => errno,
    };

    channel.report_failure(errno);
    // SAFETY: _exit skips atexit handlers and stdio flushing of the copied
    // parent state.
    unsafe { libc::_exit(1) }
}
