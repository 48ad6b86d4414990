/// Security profiles: default actions plus ordered syscall and path overrides.
///
/// Profiles are declarative data shipped under `profiles/` and embedded into
/// the binary. They are parsed once into a process-wide registry and handed out
/// by reference, so every run borrows the same immutable profile.
use crate::config::types::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// What to do when the tracee enters a syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallAction {
    Allow,
    /// Resolve the path argument and check it against the path rules
    CheckPath,
    /// Like `CheckPath`, but a rejected path is a security violation
    CheckPathSecurity,
    /// Fail the syscall with EPERM
    Deny,
    /// Fail the syscall and kill the tracee
    Security,
}

impl SyscallAction {
    pub fn is_security(self) -> bool {
        matches!(self, SyscallAction::Security | SyscallAction::CheckPathSecurity)
    }
}

/// Access granted to a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathAccess {
    ReadWrite,
    ReadOnly,
    /// Read-only; asking for write access is a security violation
    ReadOnlySecurity,
    Denied,
    /// Any access is a security violation
    Security,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallRule {
    pub syscall: String,
    pub action: SyscallAction,
}

/// A path override. A trailing `/` makes it a directory-prefix rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    pub path: String,
    pub access: PathAccess,
}

impl PathRule {
    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub name: String,
    pub default_syscall_action: SyscallAction,
    pub default_path_access: PathAccess,
    /// Syscall overrides in declaration order
    pub syscalls: Vec<SyscallRule>,
    /// Path overrides in declaration order; the last match wins
    pub paths: Vec<PathRule>,
}

#[derive(Deserialize)]
struct SyscallGroup {
    action: SyscallAction,
    names: Vec<String>,
}

#[derive(Deserialize)]
struct PathGroup {
    access: PathAccess,
    paths: Vec<String>,
}

/// On-disk layout: rules are grouped by action, groups keep their order.
#[derive(Deserialize)]
struct ProfileFile {
    name: String,
    default_syscall_action: SyscallAction,
    default_path_access: PathAccess,
    #[serde(default)]
    syscalls: Vec<SyscallGroup>,
    #[serde(default)]
    paths: Vec<PathGroup>,
}

impl From<ProfileFile> for Profile {
    fn from(file: ProfileFile) -> Self {
        let syscalls = file
            .syscalls
            .into_iter()
            .flat_map(|group| {
                let action = group.action;
                group
                    .names
                    .into_iter()
                    .map(move |syscall| SyscallRule { syscall, action })
            })
            .collect();

        let paths = file
            .paths
            .into_iter()
            .flat_map(|group| {
                let access = group.access;
                group
                    .paths
                    .into_iter()
                    .map(move |path| PathRule { path, access })
            })
            .collect();

        Profile {
            name: file.name,
            default_syscall_action: file.default_syscall_action,
            default_path_access: file.default_path_access,
            syscalls,
            paths,
        }
    }
}

impl Profile {
    pub fn from_json(data: &str) -> Result<Self> {
        let file: ProfileFile = serde_json::from_str(data)
            .map_err(|e| SandboxError::Config(format!("invalid profile: {e}")))?;
        Ok(file.into())
    }

    /// A profile with the given defaults and no overrides.
    pub fn with_defaults(
        name: impl Into<String>,
        default_syscall_action: SyscallAction,
        default_path_access: PathAccess,
    ) -> Self {
        Self {
            name: name.into(),
            default_syscall_action,
            default_path_access,
            syscalls: Vec::new(),
            paths: Vec::new(),
        }
    }

    pub fn syscall(mut self, syscall: impl Into<String>, action: SyscallAction) -> Self {
        self.syscalls.push(SyscallRule {
            syscall: syscall.into(),
            action,
        });
        self
    }

    pub fn path(mut self, path: impl Into<String>, access: PathAccess) -> Self {
        self.paths.push(PathRule {
            path: path.into(),
            access,
        });
        self
    }
}

/// Catalog of shipped profiles; the first entry is the default.
const PROFILE_CATALOG: &[(&str, &str)] = &[
    (
        "linux_native",
        include_str!("../../profiles/linux_native.json"),
    ),
    (
        "linux_nosecurity",
        include_str!("../../profiles/linux_nosecurity.json"),
    ),
];

/// Names of all shipped profiles, default first.
pub fn available_profiles() -> impl Iterator<Item = &'static str> {
    PROFILE_CATALOG.iter().map(|(name, _)| *name)
}

pub fn default_profile_name() -> &'static str {
    PROFILE_CATALOG[0].0
}

fn load_catalog() -> std::result::Result<Vec<Profile>, String> {
    PROFILE_CATALOG
        .iter()
        .map(|(name, data)| {
            let profile = Profile::from_json(data).map_err(|e| format!("{name}: {e}"))?;
            if profile.name != *name {
                return Err(format!(
                    "profile registered as '{}' declares name '{}'",
                    name, profile.name
                ));
            }
            log::debug!(
                "Loaded profile {}: {} syscall rules, {} path rules",
                profile.name,
                profile.syscalls.len(),
                profile.paths.len()
            );
            Ok(profile)
        })
        .collect()
}

/// Look up a shipped profile by exact name.
pub fn get_profile(name: &str) -> Result<&'static Profile> {
    static REGISTRY: OnceLock<std::result::Result<Vec<Profile>, String>> = OnceLock::new();

    let profiles = REGISTRY
        .get_or_init(load_catalog)
        .as_ref()
        .map_err(|e| SandboxError::Config(format!("profile catalog is corrupt: {e}")))?;

    profiles
        .iter()
        .find(|profile| profile.name == name)
        .ok_or_else(|| SandboxError::Config(format!("Invalid profile name '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_catalog_name_resolves_to_itself() {
        for name in available_profiles() {
            let profile = get_profile(name).expect("catalog profile must load");
            assert_eq!(profile.name, name);
        }
    }

    #[test]
    fn test_unknown_profile_is_config_error() {
        match get_profile("linux_unknown") {
            Err(SandboxError::Config(msg)) => assert!(msg.contains("linux_unknown")),
            other => panic!("expected config error, got {:?}", other.map(|p| &p.name)),
        }
    }

    #[test]
    fn test_default_profile_is_first_in_catalog() {
        assert_eq!(default_profile_name(), "linux_native");
        assert_eq!(available_profiles().next(), Some("linux_native"));
    }

    #[test]
    fn test_groups_flatten_in_declaration_order() {
        let profile = Profile::from_json(
            r#"{
                "name": "ordered",
                "default_syscall_action": "Deny",
                "default_path_access": "Denied",
                "syscalls": [
                    { "action": "Allow", "names": ["read", "write"] },
                    { "action": "CheckPath", "names": ["openat"] }
                ],
                "paths": [
                    { "access": "ReadOnly", "paths": ["/usr/"] },
                    { "access": "Security", "paths": ["/usr/secret"] },
                    { "access": "ReadWrite", "paths": ["/usr/secret/"] }
                ]
            }"#,
        )
        .unwrap();

        let names: Vec<_> = profile.syscalls.iter().map(|r| r.syscall.as_str()).collect();
        assert_eq!(names, ["read", "write", "openat"]);
        assert_eq!(profile.syscalls[2].action, SyscallAction::CheckPath);

        let accesses: Vec<_> = profile.paths.iter().map(|r| r.access).collect();
        assert_eq!(
            accesses,
            [PathAccess::ReadOnly, PathAccess::Security, PathAccess::ReadWrite]
        );
        assert!(profile.paths[0].is_directory());
        assert!(!profile.paths[1].is_directory());
    }

    #[test]
    fn test_invalid_action_is_rejected() {
        let err = Profile::from_json(
            r#"{ "name": "bad", "default_syscall_action": "Maybe", "default_path_access": "Denied" }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn test_nosecurity_profile_allows_everything() {
        let profile = get_profile("linux_nosecurity").unwrap();
        assert_eq!(profile.default_syscall_action, SyscallAction::Allow);
        assert_eq!(profile.default_path_access, PathAccess::ReadWrite);
    }

    #[test]
    fn test_native_profile_kills_on_process_creation() {
        let profile = get_profile("linux_native").unwrap();
        for name in ["fork", "vfork", "clone", "clone3"] {
            let action = profile
                .syscalls
                .iter()
                .rev()
                .find(|rule| rule.syscall == name)
                .map(|rule| rule.action)
                .unwrap_or(profile.default_syscall_action);
            assert_eq!(action, SyscallAction::Security, "{name}");
        }
    }
}
