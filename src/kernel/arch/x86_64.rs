use super::{ArchAdapter, RegisterLayout};
use std::collections::HashMap;
use std::sync::OnceLock;
use syscalls::x86_64::Sysno;

/// Word size of the user area slots.
const WORD: u64 = std::mem::size_of::<libc::c_long>() as u64;

// Slot indices in `struct user_regs_struct`.
const RAX: u64 = 10;
const RDX: u64 = 12;
const RSI: u64 = 13;
const RDI: u64 = 14;
const ORIG_RAX: u64 = 15;

/// Native x86_64 syscalls are numbered below 512. x32 calls carry bit 30
/// (`__X32_SYSCALL_BIT`) and land above the ceiling.
pub const SYSCALL_CEILING: usize = 512;

#[derive(Debug, Clone, Copy, Default)]
pub struct X86_64;

fn name_table() -> &'static HashMap<&'static str, usize> {
    static TABLE: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..SYSCALL_CEILING)
            .filter_map(|nr| Sysno::new(nr).map(|sysno| (sysno.name(), nr)))
            .collect()
    })
}

impl ArchAdapter for X86_64 {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn registers(&self) -> RegisterLayout {
        RegisterLayout {
            syscall: WORD * ORIG_RAX,
            result: WORD * RAX,
            args: [WORD * RDI, WORD * RSI, WORD * RDX],
        }
    }

    fn syscall_ceiling(&self) -> usize {
        SYSCALL_CEILING
    }

    fn syscall_number(&self, name: &str) -> Option<usize> {
        name_table().get(name).copied()
    }

    fn syscall_name(&self, number: usize) -> Option<&'static str> {
        Sysno::new(number).map(|sysno| sysno.name())
    }
}
