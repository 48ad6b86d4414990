//! Child processes: the tracee bootstrap, its rendezvous pipes and the
//! wall-clock watchdog.

pub mod bootstrap;
pub mod handshake;
pub mod watchdog;
