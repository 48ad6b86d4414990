//! Per-run trace state machine.
//!
//! `Attaching -> WaitingForExec -> Running { in_syscall } -> Terminated`
//!
//! Syscall stops strictly alternate between entry and exit for a
//! single-threaded tracee, so one toggle is enough to tell them apart.

use nix::errno::Errno;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceState {
    /// Tracee forked, attach not yet confirmed
    #[default]
    Attaching,
    /// Released; the post-exec trap has not been seen yet
    WaitingForExec,
    /// Target program running under syscall tracing
    Running {
        in_syscall: bool,
        /// Errno to inject when the current (denied) syscall exits
        pending: Option<Errno>,
    },
    Terminated,
}

/// Which side of a syscall a stop is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallEdge {
    Entry,
    /// Exit of a call; carries the errno chosen on entry, if the call was denied
    Exit(Option<Errno>),
}

impl TraceState {
    pub fn attached(&mut self) {
        if *self == TraceState::Attaching {
            *self = TraceState::WaitingForExec;
        }
    }

    /// Latch for the post-exec trap. Returns `true` when this trap was the
    /// first one after exec and has been consumed.
    pub fn exec_trap(&mut self) -> bool {
        if *self == TraceState::WaitingForExec {
            *self = TraceState::Running {
                in_syscall: false,
                pending: None,
            };
            true
        } else {
            false
        }
    }

    /// Toggle on a syscall stop. `None` outside `Running`.
    pub fn syscall_stop(&mut self) -> Option<SyscallEdge> {
        match *self {
            TraceState::Running {
                in_syscall: false, ..
            } => {
                *self = TraceState::Running {
                    in_syscall: true,
                    pending: None,
                };
                Some(SyscallEdge::Entry)
            }
            TraceState::Running {
                in_syscall: true,
                pending,
            } => {
                *self = TraceState::Running {
                    in_syscall: false,
                    pending: None,
                };
                Some(SyscallEdge::Exit(pending))
            }
            _ => None,
        }
    }

    /// Remember the errno for the exit edge of the syscall being entered.
    pub fn deny_current(&mut self, errno: Errno) {
        if let TraceState::Running {
            in_syscall: true,
            pending,
        } = self
        {
            *pending = Some(errno);
        }
    }

    /// Syscall stops only happen once the tracee is past exec.
    pub fn traces_syscalls(&self) -> bool {
        matches!(self, TraceState::Running { .. })
    }

    pub fn terminate(&mut self) {
        *self = TraceState::Terminated;
    }
}
