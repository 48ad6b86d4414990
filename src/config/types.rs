/// Core types shared by the supervisor, the bootstrap chain and the CLI
use crate::config::profile::Profile;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use thiserror::Error;

/// Resource limits for one supervised run.
///
/// A limit that is `None` is not enforced. Values coming from the command line
/// or from callers that use "zero or negative means unlimited" should go
/// through [`Limits::new`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// CPU time limit in seconds
    pub cpu_time: Option<f64>,
    /// Wall clock limit in seconds
    pub wall_time: Option<f64>,
    /// Memory limit in bytes
    pub memory: Option<u64>,
}

impl Limits {
    pub fn new(cpu_time: f64, wall_time: f64, memory: i64) -> Self {
        Self {
            cpu_time: (cpu_time > 0.0).then_some(cpu_time),
            wall_time: (wall_time > 0.0).then_some(wall_time),
            memory: (memory > 0).then_some(memory as u64),
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// What a standard stream of the tracee is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StdioTarget {
    /// Keep the descriptor inherited from the supervisor
    Inherit,
    /// dup2 this descriptor over the standard stream, then close it
    Fd(RawFd),
    /// Close the standard stream
    Close,
}

impl StdioTarget {
    /// Negative descriptors mean "close".
    pub fn from_raw(fd: RawFd) -> Self {
        if fd < 0 {
            StdioTarget::Close
        } else {
            StdioTarget::Fd(fd)
        }
    }
}

/// One-shot parameters for a supervised run.
///
/// The request borrows its [`Profile`]; profiles live in the process-wide
/// registry and outlive every request.
#[derive(Clone, Debug)]
pub struct ExecutionRequest<'p> {
    pub limits: Limits,
    /// Path handed to execve (no PATH lookup)
    pub exe: PathBuf,
    /// Full argv, including argv[0]
    pub args: Vec<String>,
    /// `KEY=VALUE` entries used when the environment is not inherited
    pub env: Vec<String>,
    /// Directory the tracee changes into; the supervisor's cwd when unset
    pub workdir: Option<PathBuf>,
    pub stdin: StdioTarget,
    pub stdout: StdioTarget,
    pub stderr: StdioTarget,
    /// File names inside the working directory the tracee may open for writing
    pub writable_files: Vec<String>,
    pub inherit_environment: bool,
    pub profile: &'p Profile,
}

impl<'p> ExecutionRequest<'p> {
    /// Request running `exe` with argv `[exe]` under `profile`, no limits and
    /// inherited standard streams.
    pub fn new(exe: impl Into<PathBuf>, profile: &'p Profile) -> Self {
        let exe = exe.into();
        let argv0 = exe.to_string_lossy().to_string();
        Self {
            limits: Limits::unlimited(),
            exe,
            args: vec![argv0],
            env: Vec::new(),
            workdir: None,
            stdin: StdioTarget::Inherit,
            stdout: StdioTarget::Inherit,
            stderr: StdioTarget::Inherit,
            writable_files: Vec::new(),
            inherit_environment: false,
            profile,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_stdio(mut self, stdin: StdioTarget, stdout: StdioTarget, stderr: StdioTarget) -> Self {
        self.stdin = stdin;
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn with_writable_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writable_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn inherit_environment(mut self, inherit: bool) -> Self {
        self.inherit_environment = inherit;
        self
    }
}

/// Outcome of a supervised run.
///
/// `exit_code` is the exit status when the tracee exited, or the negated
/// signal number when it was killed. `error`/`error_message` are only set when
/// the engine itself failed; verdict flags are independent of each other.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub error: i32,
    pub error_message: String,

    /// Peak CPU time in seconds
    pub cpu_usage: f64,
    /// Elapsed wall clock in seconds
    pub wall_clock: f64,
    /// Peak resident memory in bytes
    pub memory_usage: u64,

    pub time_limit_exceeded: bool,
    pub wall_limit_exceeded: bool,
    pub memory_limit_exceeded: bool,
    pub security_violation: bool,
}

impl ExecutionResult {
    pub fn has_error(&self) -> bool {
        self.error != 0
    }

    pub(crate) fn record_error(&mut self, err: &SandboxError) {
        self.error = err.code();
        self.error_message = err.to_string();
    }
}

/// Errors raised by the engine itself (never by the sandboxed program).
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{context}: {errno}")]
    Os { context: String, errno: Errno },

    #[error("Failed to attach to tracee: {0}")]
    Attach(String),

    #[error("execve() failed: {0}")]
    ExecFailed(Errno),
}

impl SandboxError {
    pub(crate) fn os(context: impl Into<String>, errno: Errno) -> Self {
        SandboxError::Os {
            context: context.into(),
            errno,
        }
    }

    /// Integer stored in [`ExecutionResult::error`]: the errno when one is
    /// known, otherwise -1.
    pub fn code(&self) -> i32 {
        match self {
            SandboxError::Io(err) => err.raw_os_error().unwrap_or(-1),
            SandboxError::Config(_) => libc::EINVAL,
            SandboxError::Os { errno, .. } => *errno as i32,
            SandboxError::Attach(_) => -1,
            SandboxError::ExecFailed(errno) => *errno as i32,
        }
    }
}

impl From<Errno> for SandboxError {
    fn from(err: Errno) -> Self {
        SandboxError::os("system call failed", err)
    }
}

/// Result type alias for tracebox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
