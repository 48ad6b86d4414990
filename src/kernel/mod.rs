//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here and in `exec` with explicit SAFETY
//! comments.

pub mod arch;
pub mod process;
pub mod ptrace;
