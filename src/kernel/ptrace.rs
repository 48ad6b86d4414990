//! Thin ptrace wrappers.
//!
//! The policy engine talks to the tracee through [`TraceeAccess`], so decision
//! logic can be exercised against an in-memory tracee in tests while the
//! supervisor uses [`PtraceTracee`].

use crate::config::types::{Result, SandboxError};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

/// Longest path the engine will read out of the tracee.
pub const MAX_TRACEE_STRING: usize = 4096;

/// Register and memory access to a stopped tracee.
pub trait TraceeAccess {
    /// Read one word at a byte offset of the user area.
    fn peek_user(&mut self, offset: u64) -> Result<i64>;

    /// Write one word at a byte offset of the user area.
    fn poke_user(&mut self, offset: u64, value: i64) -> Result<()>;

    /// Read one machine word of tracee memory.
    fn peek_data(&mut self, addr: u64) -> Result<i64>;
}

/// A live tracee, accessed with `PTRACE_PEEKUSER`/`POKEUSER`/`PEEKDATA`.
#[derive(Debug, Clone, Copy)]
pub struct PtraceTracee {
    pid: Pid,
}

impl PtraceTracee {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }
}

impl TraceeAccess for PtraceTracee {
    fn peek_user(&mut self, offset: u64) -> Result<i64> {
        // PEEKUSER returns the word itself, so -1 is only an error when errno
        // was set by this call.
        Errno::clear();
        // SAFETY: PEEKUSER does not write through any pointer we pass; the
        // offset is interpreted by the kernel against the tracee's user area.
        let word = unsafe {
            libc::ptrace(
                libc::PTRACE_PEEKUSER,
                self.pid.as_raw(),
                offset as *mut libc::c_void,
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if word == -1 {
            let errno = Errno::last();
            if errno != Errno::UnknownErrno {
                return Err(SandboxError::os(format!("PTRACE_PEEKUSER at {offset:#x}"), errno));
            }
        }
        Ok(word as i64)
    }

    fn poke_user(&mut self, offset: u64, value: i64) -> Result<()> {
        // SAFETY: POKEUSER copies `value` into the tracee's user area; the
        // data argument is passed by value, not dereferenced.
        let rc = unsafe {
            libc::ptrace(
                libc::PTRACE_POKEUSER,
                self.pid.as_raw(),
                offset as *mut libc::c_void,
                value as *mut libc::c_void,
            )
        };
        if rc == -1 {
            return Err(SandboxError::os(
                format!("PTRACE_POKEUSER at {offset:#x}"),
                Errno::last(),
            ));
        }
        Ok(())
    }

    fn peek_data(&mut self, addr: u64) -> Result<i64> {
        ptrace::read(self.pid, addr as ptrace::AddressType)
            .map(|word| word as i64)
            .map_err(|e| SandboxError::os(format!("PTRACE_PEEKDATA at {addr:#x}"), e))
    }
}

/// Read a string out of tracee memory one word at a time.
///
/// Reading stops at the first byte outside the printable ASCII range (which
/// includes the terminating NUL), at the first unreadable word, or after
/// `max_len` bytes. A null pointer yields an empty string.
pub fn read_string(tracee: &mut impl TraceeAccess, addr: u64, max_len: usize) -> String {
    let mut out = String::new();
    if addr == 0 {
        return out;
    }

    let word_size = std::mem::size_of::<libc::c_long>() as u64;
    let mut cursor = addr;
    while out.len() < max_len {
        let word = match tracee.peek_data(cursor) {
            Ok(word) => word,
            Err(_) => break,
        };
        for byte in word.to_ne_bytes() {
            if !(32..=127).contains(&byte) || out.len() >= max_len {
                return out;
            }
            out.push(byte as char);
        }
        cursor = cursor.wrapping_add(word_size);
    }
    out
}

/// Attach to `pid` and wait for the attach stop.
pub fn attach(pid: Pid) -> Result<()> {
    ptrace::attach(pid).map_err(|e| SandboxError::Attach(format!("PTRACE_ATTACH: {e}")))?;

    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => return Ok(()),
            Ok(status) => {
                return Err(SandboxError::Attach(format!(
                    "waitpid() returned invalid status {:?}",
                    status
                )))
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(SandboxError::Attach(format!("waitpid(): {e}"))),
        }
    }
}

/// Kill the tracee if the supervisor dies, report syscall stops as
/// `SIGTRAP | 0x80` so they are never confused with real signals, and stop
/// the tracee once more when it exits, before its memory is released.
pub fn set_supervision_options(pid: Pid) -> Result<()> {
    ptrace::setoptions(
        pid,
        ptrace::Options::PTRACE_O_EXITKILL
            | ptrace::Options::PTRACE_O_TRACESYSGOOD
            | ptrace::Options::PTRACE_O_TRACEEXIT,
    )
    .map_err(|e| SandboxError::Attach(format!("PTRACE_SETOPTIONS: {e}")))
}

/// Resume until the next signal (no syscall stops).
pub fn resume(pid: Pid, signal: Option<Signal>) -> Result<()> {
    ptrace::cont(pid, signal).map_err(|e| SandboxError::os("PTRACE_CONT", e))
}

/// Resume until the next syscall boundary.
pub fn resume_to_syscall(pid: Pid, signal: Option<Signal>) -> Result<()> {
    ptrace::syscall(pid, signal).map_err(|e| SandboxError::os("PTRACE_SYSCALL", e))
}
