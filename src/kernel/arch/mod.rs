//! Architecture adapters and the tracer registry.
//!
//! An adapter is the only architecture-specific piece of the engine: it tells
//! the policy engine where the syscall number, return value and first three
//! arguments live in the tracee's user area, and how syscall names map to
//! numbers. Supporting another architecture means adding an adapter here, the
//! supervisor does not change.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

use crate::config::types::{Result, SandboxError};

/// Byte offsets into the tracee's user area (`PTRACE_PEEKUSER` addresses).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterLayout {
    /// Syscall number as seen on syscall entry
    pub syscall: u64,
    /// Syscall return value
    pub result: u64,
    /// First three syscall arguments
    pub args: [u64; 3],
}

/// Architecture capability injected into the supervisor and policy engine.
pub trait ArchAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn registers(&self) -> RegisterLayout;

    /// Exclusive upper bound of syscall numbers covered by the decision table.
    fn syscall_ceiling(&self) -> usize;

    /// Resolve a syscall name; `None` when the architecture has no such call.
    fn syscall_number(&self, name: &str) -> Option<usize>;

    /// Reverse lookup, used for diagnostics only.
    fn syscall_name(&self, number: usize) -> Option<&'static str>;
}

/// A tracing technique and the architectures it can trace.
#[derive(Clone, Copy, Debug)]
pub struct TracerEntry {
    pub technique: &'static str,
    pub architectures: &'static [&'static str],
}

/// Catalog of (technique, architecture) pairs; the first pair is the default.
pub const AVAILABLE_TRACERS: &[TracerEntry] = &[TracerEntry {
    technique: "ptrace",
    architectures: &["x86_64"],
}];

pub fn default_tracer() -> (&'static str, &'static str) {
    let entry = &AVAILABLE_TRACERS[0];
    (entry.technique, entry.architectures[0])
}

fn unknown_tracer(technique: &str, arch: &str) -> SandboxError {
    SandboxError::Config(format!(
        "Invoker '{technique}' with architecture '{arch}' does not exist."
    ))
}

/// Resolve a (technique, architecture) pair into an adapter.
pub fn adapter_for(technique: &str, arch: &str) -> Result<Box<dyn ArchAdapter>> {
    let known = AVAILABLE_TRACERS
        .iter()
        .any(|entry| entry.technique == technique && entry.architectures.contains(&arch));
    if !known {
        return Err(unknown_tracer(technique, arch));
    }

    if arch != std::env::consts::ARCH {
        return Err(SandboxError::Config(format!(
            "Invoker '{technique}' cannot trace '{arch}' programs on a '{}' host",
            std::env::consts::ARCH
        )));
    }

    match (technique, arch) {
        #[cfg(target_arch = "x86_64")]
        ("ptrace", "x86_64") => Ok(Box::new(x86_64::X86_64)),
        _ => Err(unknown_tracer(technique, arch)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_pairs_are_config_errors() {
        for (technique, arch) in [("ptrace", "sparc"), ("seccomp", "x86_64"), ("", "")] {
            match adapter_for(technique, arch) {
                Err(SandboxError::Config(msg)) => assert!(msg.contains(technique)),
                Err(other) => panic!("unexpected error {other}"),
                Ok(_) => panic!("{technique}/{arch} should not resolve"),
            }
        }
    }

    #[test]
    fn test_default_tracer_is_in_catalog() {
        let (technique, arch) = default_tracer();
        assert_eq!(technique, "ptrace");
        assert_eq!(arch, "x86_64");
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_catalog_pairs_resolve_on_native_host() {
        let adapter = adapter_for("ptrace", "x86_64").unwrap();
        assert_eq!(adapter.name(), "x86_64");
    }
}
