//! Attach rendezvous between the supervisor and the tracee.
//!
//! Two pipes: "release" (supervisor -> tracee) lets the tracee leave its
//! bootstrap once it is attached, "ready" (tracee -> supervisor) carries an
//! errno if the bootstrap or exec fails. All ends are close-on-exec, so a
//! successful exec shows up as EOF on the ready pipe.

use crate::config::types::{Result, SandboxError};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::FromRawFd;

const RELEASE_TOKEN: u64 = 0;

fn cloexec_pipe(name: &str) -> Result<(File, File)> {
    let (read_fd, write_fd) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| SandboxError::os(format!("pipe({name})"), e))?;
    // SAFETY: pipe2 just returned these descriptors; each File becomes their
    // sole owner.
    Ok(unsafe { (File::from_raw_fd(read_fd), File::from_raw_fd(write_fd)) })
}

/// Both pipes, created before the fork.
pub struct Handshake {
    release_read: File,
    release_write: File,
    ready_read: File,
    ready_write: File,
}

impl Handshake {
    pub fn new() -> Result<Self> {
        let (release_read, release_write) = cloexec_pipe("release")?;
        let (ready_read, ready_write) = cloexec_pipe("ready")?;
        Ok(Self {
            release_read,
            release_write,
            ready_read,
            ready_write,
        })
    }

    /// Keep the supervisor's ends; the child's ends are closed.
    pub fn into_supervisor(self) -> SupervisorChannel {
        SupervisorChannel {
            release: self.release_write,
            ready: self.ready_read,
        }
    }

    /// Keep the tracee's ends; the supervisor's ends are closed.
    pub fn into_tracee(self) -> TraceeChannel {
        TraceeChannel {
            release: self.release_read,
            ready: self.ready_write,
        }
    }
}

pub struct SupervisorChannel {
    release: File,
    ready: File,
}

impl SupervisorChannel {
    /// Let the tracee continue past its bootstrap rendezvous.
    pub fn release(&mut self) -> Result<()> {
        self.release
            .write_all(&RELEASE_TOKEN.to_ne_bytes())
            .map_err(SandboxError::Io)
    }

    /// Block until the tracee has exec'd (`Ok(())`) or reported a failure.
    pub fn wait_ready(mut self) -> Result<()> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.ready.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SandboxError::Io(e)),
            }
        }

        match filled {
            0 => Ok(()),
            4 => Err(SandboxError::ExecFailed(Errno::from_i32(i32::from_ne_bytes(buf)))),
            _ => Err(SandboxError::ExecFailed(Errno::EIO)),
        }
    }
}

/// Tracee side. Used between fork and exec: no allocation happens here.
pub struct TraceeChannel {
    release: File,
    ready: File,
}

impl TraceeChannel {
    /// Block until the supervisor has attached. EOF means the supervisor is
    /// gone, which is reported as `EPIPE`.
    pub fn wait_for_release(&mut self) -> std::result::Result<(), Errno> {
        let mut token = [0u8; 8];
        let mut filled = 0;
        while filled < token.len() {
            match self.release.read(&mut token[filled..]) {
                Ok(0) => return Err(Errno::EPIPE),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Errno::from_i32(e.raw_os_error().unwrap_or(libc::EIO))),
            }
        }
        Ok(())
    }

    pub fn report_failure(&mut self, errno: Errno) {
        let _ = self.ready.write_all(&(errno as i32).to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_ready_pipe_means_exec_succeeded() {
        let handshake = Handshake::new().unwrap();
        let Handshake {
            release_read,
            release_write,
            ready_read,
            ready_write,
        } = handshake;
        drop(ready_write);
        let channel = SupervisorChannel {
            release: release_write,
            ready: ready_read,
        };
        drop(release_read);
        assert!(channel.wait_ready().is_ok());
    }

    #[test]
    fn test_reported_errno_round_trips() {
        let Handshake {
            release_read,
            release_write,
            ready_read,
            ready_write,
        } = Handshake::new().unwrap();
        let mut tracee = TraceeChannel {
            release: release_read,
            ready: ready_write,
        };
        let mut supervisor = SupervisorChannel {
            release: release_write,
            ready: ready_read,
        };

        supervisor.release().unwrap();
        tracee.wait_for_release().unwrap();
        tracee.report_failure(Errno::ENOENT);
        drop(tracee);

        match supervisor.wait_ready() {
            Err(SandboxError::ExecFailed(errno)) => assert_eq!(errno, Errno::ENOENT),
            other => panic!("expected exec failure, got {:?}", other),
        }
    }

    #[test]
    fn test_release_eof_is_epipe() {
        let handshake = Handshake::new().unwrap();
        let mut tracee = handshake.into_tracee();
        assert_eq!(tracee.wait_for_release(), Err(Errno::EPIPE));
    }
}
