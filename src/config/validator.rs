// Request validation
// Runs before any process is spawned so that malformed requests fail as
// configuration errors instead of surfacing as bootstrap failures.

use crate::config::types::{ExecutionRequest, Result, SandboxError};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a request; errors are fatal, warnings are logged.
pub fn validate_request(request: &ExecutionRequest<'_>) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_command(request, &mut result);
    validate_environment(request, &mut result);
    validate_writable_files(request, &mut result);
    validate_limits(request, &mut result);

    for warning in &result.warnings {
        log::warn!("{}", warning);
    }

    if !result.is_valid() {
        return Err(SandboxError::Config(format!(
            "Invalid execution request:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_command(request: &ExecutionRequest<'_>, result: &mut ValidationResult) {
    let exe = request.exe.as_os_str();
    if exe.is_empty() {
        result.add_error("executable path is empty".to_string());
    } else if exe.to_string_lossy().contains('\0') {
        result.add_error("executable path contains NUL byte".to_string());
    }

    if request.args.is_empty() {
        result.add_error("argument list must contain at least argv[0]".to_string());
    }
    for arg in &request.args {
        if arg.contains('\0') {
            result.add_error(format!("argument contains NUL byte: {:?}", arg));
        }
    }
}

fn validate_environment(request: &ExecutionRequest<'_>, result: &mut ValidationResult) {
    for entry in &request.env {
        if entry.contains('\0') {
            result.add_error(format!("environment entry contains NUL byte: {:?}", entry));
        } else if !entry.contains('=') {
            result.add_error(format!("environment entry is not KEY=VALUE: {}", entry));
        }
    }

    if request.inherit_environment && !request.env.is_empty() {
        result.add_warning(
            "environment entries are ignored when the environment is inherited".to_string(),
        );
    }
}

fn validate_writable_files(request: &ExecutionRequest<'_>, result: &mut ValidationResult) {
    for name in &request.writable_files {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            result.add_error(format!(
                "writable entry must be a plain file name inside the working directory: {:?}",
                name
            ));
        }
    }
}

fn validate_limits(request: &ExecutionRequest<'_>, result: &mut ValidationResult) {
    if let Some(memory) = request.limits.memory {
        if memory < 1024 * 1024 {
            result.add_warning(format!(
                "memory limit {} is very low (< 1MB), the program may not even start",
                memory
            ));
        }
    }

    if let Some(cpu) = request.limits.cpu_time {
        if !cpu.is_finite() {
            result.add_error(format!("CPU time limit is not finite: {}", cpu));
        }
    }

    if let Some(wall) = request.limits.wall_time {
        if !wall.is_finite() {
            result.add_error(format!("wall clock limit is not finite: {}", wall));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::profile::{PathAccess, Profile, SyscallAction};
    use crate::config::types::Limits;

    fn profile() -> Profile {
        Profile::with_defaults("test", SyscallAction::Allow, PathAccess::ReadWrite)
    }

    #[test]
    fn test_valid_request_passes() {
        let profile = profile();
        let request = ExecutionRequest::new("/bin/true", &profile)
            .with_env(["PATH=/usr/bin"])
            .with_writable_files(["output.txt"]);
        let result = validate_request(&request).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_empty_argv_rejected() {
        let profile = profile();
        let request = ExecutionRequest::new("/bin/true", &profile).with_args(Vec::<String>::new());
        assert!(matches!(
            validate_request(&request),
            Err(SandboxError::Config(_))
        ));
    }

    #[test]
    fn test_nul_bytes_rejected() {
        let profile = profile();
        let request = ExecutionRequest::new("/bin/true", &profile).with_args(["true", "a\0b"]);
        assert!(validate_request(&request).is_err());

        let request = ExecutionRequest::new("/bin/true", &profile).with_env(["A=\0"]);
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn test_env_entry_without_separator_rejected() {
        let profile = profile();
        let request = ExecutionRequest::new("/bin/true", &profile).with_env(["JUSTAKEY"]);
        let err = validate_request(&request).unwrap_err();
        assert!(err.to_string().contains("KEY=VALUE"));
    }

    #[test]
    fn test_writable_entries_must_be_plain_names() {
        let profile = profile();
        for bad in ["", "..", "sub/file", "/etc/passwd"] {
            let request = ExecutionRequest::new("/bin/true", &profile).with_writable_files([bad]);
            assert!(validate_request(&request).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_tiny_memory_limit_only_warns() {
        let profile = profile();
        let request = ExecutionRequest::new("/bin/true", &profile)
            .with_limits(Limits::new(0.0, 0.0, 4096));
        let result = validate_request(&request).unwrap();
        assert_eq!(result.warnings.len(), 1);
    }
}
