//! Process-tracing engine: the per-run state machine, the syscall policy
//! engine and the supervisor that drives both.

pub mod policy;
pub mod state;
pub mod supervisor;
