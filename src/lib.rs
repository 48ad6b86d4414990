//! tracebox: run an untrusted program under ptrace supervision
//!
//! A supervisor forks the program, attaches to it before it can execute a
//! single instruction of the target, and then decides on every syscall
//! whether it may proceed. CPU time, wall clock and memory are bounded, and
//! every run ends in one [`ExecutionResult`] with four independent verdicts.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: requests, limits, results and the error type
//! - [`config::profile`]: security profiles and the process-wide registry
//! - [`config::validator`]: request validation before anything is spawned
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::arch`]: architecture adapters and the tracer registry
//! - [`kernel::ptrace`]: register and memory access to a stopped tracee
//! - [`kernel::process`]: waiting with resource usage, kill-and-reap
//!
//! ## Child Processes ([`exec`])
//! - [`exec::handshake`]: attach rendezvous pipes
//! - [`exec::bootstrap`]: type-state tracee bootstrap
//! - [`exec::watchdog`]: wall-clock watchdog
//!
//! ## Tracing Engine ([`core`])
//! - [`core::state`]: per-run trace state machine
//! - [`core::policy`]: syscall decision table and path policy
//! - [`core::supervisor`]: the event loop
//!
//! ## Verdicts ([`verdict`])
//! - [`verdict::verdict`]: limit verdicts
//! - [`verdict::report`]: text and JSON reports
//!
//! # Example
//!
//! ```no_run
//! use tracebox::config::profile::get_profile;
//! use tracebox::{execute, ExecutionRequest, Limits};
//!
//! # fn main() -> tracebox::Result<()> {
//! let profile = get_profile("linux_native")?;
//! let request = ExecutionRequest::new("/usr/bin/python3", profile)
//!     .with_args(["python3", "solution.py"])
//!     .with_limits(Limits::new(1.0, 3.0, 256 << 20))
//!     .with_workdir("/tmp/submission");
//! let result = execute(&request, "ptrace", "x86_64")?;
//! println!("exit code {}, verdicts {:?}", result.exit_code, result.verdicts());
//! # Ok(())
//! # }
//! ```

// Kernel Primitives
pub mod kernel;

// Child processes
pub mod exec;

// Tracing engine
pub mod core;

// Verdicts and reports
pub mod verdict;

// Configuration & Policy
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the tracebox binary.
pub mod cli;

pub use config::types::*;

/// Resolve the tracer, validate `request` and supervise one run.
///
/// Unknown tracers and invalid requests are rejected here, before any
/// process exists. Failures during the run are reported inside the result.
///
/// The supervisor waits for *any* child of the calling process, so a caller
/// that has other children of its own must not run them concurrently with
/// `execute`: their exit statuses may be consumed and discarded. Runs must
/// not overlap either.
pub fn execute(request: &ExecutionRequest<'_>, technique: &str, arch: &str) -> Result<ExecutionResult> {
    let adapter = crate::kernel::arch::adapter_for(technique, arch)?;
    crate::config::validator::validate_request(request)?;
    Ok(crate::core::supervisor::Supervisor::new(request, adapter.as_ref()).run())
}
