//! Syscall Policy Engine.
//!
//! Decides, on every syscall entry, whether the tracee may proceed. Syscall
//! actions come from a per-run [`SyscallTable`]; calls that carry a path are
//! additionally checked against the profile's path rules and the request's
//! writable-file allowlist.

use crate::config::profile::{PathAccess, Profile, SyscallAction};
use crate::config::types::{ExecutionRequest, Result};
use crate::kernel::arch::{ArchAdapter, RegisterLayout};
use crate::kernel::ptrace::{read_string, TraceeAccess, MAX_TRACEE_STRING};
use crate::utils::path;
use nix::errno::Errno;

/// Dense syscall-number -> action mapping, bounded by the architecture's
/// syscall ceiling. Entries the profile does not mention stay `None` and
/// fall back to the profile default at lookup time.
#[derive(Debug, Clone)]
pub struct SyscallTable {
    actions: Vec<Option<SyscallAction>>,
    default_action: SyscallAction,
}

impl SyscallTable {
    /// Resolve every rule of `profile` through `arch`. Later rules override
    /// earlier ones; names the architecture does not know are skipped.
    pub fn build(profile: &Profile, arch: &dyn ArchAdapter) -> Self {
        let mut actions = vec![None; arch.syscall_ceiling()];
        for rule in &profile.syscalls {
            match arch.syscall_number(&rule.syscall) {
                Some(nr) if nr < actions.len() => actions[nr] = Some(rule.action),
                _ => log::debug!(
                    "Profile {} names syscall '{}' unknown on {}, skipping",
                    profile.name,
                    rule.syscall,
                    arch.name()
                ),
            }
        }
        Self {
            actions,
            default_action: profile.default_syscall_action,
        }
    }

    /// Explicit entry for `nr`, if the profile named it.
    pub fn explicit(&self, nr: i64) -> Option<SyscallAction> {
        usize::try_from(nr)
            .ok()
            .and_then(|idx| self.actions.get(idx).copied().flatten())
    }

    /// Action for `nr`. Numbers outside the table get the profile default.
    pub fn action_for(&self, nr: i64) -> SyscallAction {
        self.explicit(nr).unwrap_or(self.default_action)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Access a normalised absolute `path` has under `profile`.
///
/// A file directly inside `workdir` is ReadWrite when its name is in
/// `writable`, ReadOnly otherwise, whatever the path rules say. Any other
/// path takes the last matching rule, or the profile default.
pub fn resolve_path_access(
    profile: &Profile,
    workdir: &str,
    writable: &[String],
    target: &str,
) -> PathAccess {
    let (parent, name) = path::split_parent(target);
    if parent == workdir {
        return if writable.iter().any(|w| w == name) {
            PathAccess::ReadWrite
        } else {
            PathAccess::ReadOnly
        };
    }

    profile
        .paths
        .iter()
        .rev()
        .find(|rule| {
            if rule.is_directory() {
                path::is_within(&rule.path, target)
            } else {
                rule.path == target
            }
        })
        .map(|rule| rule.access)
        .unwrap_or(profile.default_path_access)
}

/// Outcome of a syscall-entry decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Cancel the call and make it return `-errno`; `violation` kills the tracee.
    Deny { errno: Errno, violation: bool },
}

impl Decision {
    pub fn is_violation(&self) -> bool {
        matches!(self, Decision::Deny { violation: true, .. })
    }
}

/// Syscalls whose arguments the engine interprets specially.
#[derive(Clone, Copy, Debug, Default)]
struct KnownCalls {
    open: Option<i64>,
    openat: Option<i64>,
    creat: Option<i64>,
}

impl KnownCalls {
    fn resolve(arch: &dyn ArchAdapter) -> Self {
        let nr = |name| arch.syscall_number(name).map(|n| n as i64);
        Self {
            open: nr("open"),
            openat: nr("openat"),
            creat: nr("creat"),
        }
    }
}

/// Per-run policy engine.
pub struct PolicyEngine<'r> {
    table: SyscallTable,
    profile: &'r Profile,
    writable: &'r [String],
    workdir: String,
    arch: &'r dyn ArchAdapter,
    regs: RegisterLayout,
    calls: KnownCalls,
}

impl<'r> PolicyEngine<'r> {
    /// `workdir` must be absolute and normalised.
    pub fn new(request: &'r ExecutionRequest<'r>, arch: &'r dyn ArchAdapter, workdir: String) -> Self {
        Self {
            table: SyscallTable::build(request.profile, arch),
            profile: request.profile,
            writable: &request.writable_files,
            workdir,
            arch,
            regs: arch.registers(),
            calls: KnownCalls::resolve(arch),
        }
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// Entry edge: decide, and cancel the call when it is denied by replacing
    /// the syscall number with an invalid one.
    pub fn on_entry(&self, tracee: &mut impl TraceeAccess) -> Result<Decision> {
        let decision = self.decide(tracee)?;
        if let Decision::Deny { .. } = decision {
            tracee.poke_user(self.regs.syscall, -1)?;
        }
        Ok(decision)
    }

    /// Exit edge of a denied call: make it return `-errno`.
    pub fn on_exit(&self, tracee: &mut impl TraceeAccess, errno: Errno) -> Result<()> {
        tracee.poke_user(self.regs.result, -(errno as i64))
    }

    /// Decide without touching the tracee's registers.
    pub fn decide(&self, tracee: &mut impl TraceeAccess) -> Result<Decision> {
        let nr = tracee.peek_user(self.regs.syscall)?;
        let action = self.table.action_for(nr);

        let decision = match action {
            SyscallAction::Allow => Decision::Allow,
            SyscallAction::Deny | SyscallAction::Security => Decision::Deny {
                errno: Errno::EPERM,
                violation: action.is_security(),
            },
            SyscallAction::CheckPath | SyscallAction::CheckPathSecurity => {
                self.check_path(tracee, nr, action)?
            }
        };

        if let Decision::Deny { errno, violation } = decision {
            log::info!(
                "Denied syscall {} ({}) with {}{}",
                nr,
                self.syscall_label(nr),
                errno,
                if violation { ", security violation" } else { "" }
            );
        }
        Ok(decision)
    }

    fn syscall_label(&self, nr: i64) -> &'static str {
        usize::try_from(nr)
            .ok()
            .and_then(|nr| self.arch.syscall_name(nr))
            .unwrap_or("unknown")
    }

    fn check_path(
        &self,
        tracee: &mut impl TraceeAccess,
        nr: i64,
        action: SyscallAction,
    ) -> Result<Decision> {
        let is_openat = Some(nr) == self.calls.openat;
        let path_reg = if is_openat { self.regs.args[1] } else { self.regs.args[0] };
        let addr = tracee.peek_user(path_reg)? as u64;
        let raw = read_string(tracee, addr, MAX_TRACEE_STRING);
        let target = path::resolve(&self.workdir, &raw);

        let access = resolve_path_access(self.profile, &self.workdir, self.writable, &target);
        log::debug!("Path check {} -> {:?}", target, access);

        let mut violation = action.is_security();
        match access {
            PathAccess::ReadWrite => return Ok(Decision::Allow),
            PathAccess::ReadOnly | PathAccess::ReadOnlySecurity => {
                if !self.wants_write(tracee, nr)? {
                    return Ok(Decision::Allow);
                }
                violation |= access == PathAccess::ReadOnlySecurity;
            }
            PathAccess::Denied => {}
            PathAccess::Security => violation = true,
        }

        Ok(Decision::Deny {
            errno: Errno::EACCES,
            violation,
        })
    }

    /// Write intent of an open-family call. Other calls never count as writes.
    fn wants_write(&self, tracee: &mut impl TraceeAccess, nr: i64) -> Result<bool> {
        let flags_reg = if Some(nr) == self.calls.open {
            self.regs.args[1]
        } else if Some(nr) == self.calls.openat {
            self.regs.args[2]
        } else {
            return Ok(Some(nr) == self.calls.creat);
        };

        let flags = tracee.peek_user(flags_reg)? as libc::c_int;
        Ok(flags & libc::O_ACCMODE != libc::O_RDONLY)
    }
}
