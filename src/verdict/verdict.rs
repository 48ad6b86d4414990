/// Verdict classification
///
/// Verdicts are pure functions of the observed usage and the configured
/// limits. Flags raised during the run (SIGXCPU, watchdog expiry) are kept;
/// finalisation only ever adds flags, so a limit crossed between two samples
/// is still reported.
use crate::config::types::{ExecutionResult, Limits};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Verdict {
    TimeLimitExceeded,
    MemoryLimitExceeded,
    WallLimitExceeded,
    SecurityViolation,
}

impl Verdict {
    /// Report order.
    pub const ALL: [Verdict; 4] = [
        Verdict::TimeLimitExceeded,
        Verdict::MemoryLimitExceeded,
        Verdict::WallLimitExceeded,
        Verdict::SecurityViolation,
    ];

    pub fn applies_to(self, result: &ExecutionResult) -> bool {
        match self {
            Verdict::TimeLimitExceeded => result.time_limit_exceeded,
            Verdict::MemoryLimitExceeded => result.memory_limit_exceeded,
            Verdict::WallLimitExceeded => result.wall_limit_exceeded,
            Verdict::SecurityViolation => result.security_violation,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::MemoryLimitExceeded => "Memory Limit Exceeded",
            Verdict::WallLimitExceeded => "Wall Clock Limit Exceeded",
            Verdict::SecurityViolation => "Security Violation",
        };
        f.write_str(text)
    }
}

impl ExecutionResult {
    /// Verdicts that apply, in report order.
    pub fn verdicts(&self) -> Vec<Verdict> {
        Verdict::ALL
            .into_iter()
            .filter(|verdict| verdict.applies_to(self))
            .collect()
    }

    pub(crate) fn mark(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::TimeLimitExceeded => self.time_limit_exceeded = true,
            Verdict::MemoryLimitExceeded => self.memory_limit_exceeded = true,
            Verdict::WallLimitExceeded => self.wall_limit_exceeded = true,
            Verdict::SecurityViolation => self.security_violation = true,
        }
    }
}

/// Usage-derived limit crossing, checked while the tracee is still running.
/// CPU is checked before memory.
pub fn crossed_limit(limits: &Limits, cpu_usage: f64, memory_usage: u64) -> Option<Verdict> {
    if limits.cpu_time.is_some_and(|limit| cpu_usage >= limit) {
        return Some(Verdict::TimeLimitExceeded);
    }
    if limits.memory.is_some_and(|limit| memory_usage >= limit) {
        return Some(Verdict::MemoryLimitExceeded);
    }
    None
}

/// Compare accumulated usage against the limits (`>=` triggers).
pub fn finalize_verdicts(result: &mut ExecutionResult, limits: &Limits) {
    if limits.cpu_time.is_some_and(|limit| result.cpu_usage >= limit) {
        result.time_limit_exceeded = true;
    }
    if limits.memory.is_some_and(|limit| result.memory_usage >= limit) {
        result.memory_limit_exceeded = true;
    }
    if limits.wall_time.is_some_and(|limit| result.wall_clock >= limit) {
        result.wall_limit_exceeded = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_run_has_no_verdicts() {
        let mut result = ExecutionResult {
            cpu_usage: 100.0,
            wall_clock: 100.0,
            memory_usage: u64::MAX,
            ..ExecutionResult::default()
        };
        finalize_verdicts(&mut result, &Limits::unlimited());
        assert!(result.verdicts().is_empty());
    }

    #[test]
    fn test_limits_trigger_at_equality() {
        let limits = Limits::new(1.0, 2.0, 1024);
        let mut result = ExecutionResult {
            cpu_usage: 1.0,
            wall_clock: 2.0,
            memory_usage: 1024,
            ..ExecutionResult::default()
        };
        finalize_verdicts(&mut result, &limits);
        assert_eq!(
            result.verdicts(),
            [
                Verdict::TimeLimitExceeded,
                Verdict::MemoryLimitExceeded,
                Verdict::WallLimitExceeded
            ]
        );
    }

    #[test]
    fn test_finalisation_keeps_signal_raised_flags() {
        let limits = Limits::new(5.0, 0.0, 0);
        let mut result = ExecutionResult {
            cpu_usage: 0.5,
            time_limit_exceeded: true,
            security_violation: true,
            ..ExecutionResult::default()
        };
        finalize_verdicts(&mut result, &limits);
        assert!(result.time_limit_exceeded);
        assert!(result.security_violation);
        assert!(!result.memory_limit_exceeded);
    }

    #[test]
    fn test_crossed_limit_prefers_cpu() {
        let limits = Limits::new(1.0, 0.0, 100);
        assert_eq!(crossed_limit(&limits, 0.5, 10), None);
        assert_eq!(crossed_limit(&limits, 0.5, 100), Some(Verdict::MemoryLimitExceeded));
        assert_eq!(crossed_limit(&limits, 1.5, 100), Some(Verdict::TimeLimitExceeded));
        assert_eq!(crossed_limit(&Limits::unlimited(), 1e9, u64::MAX), None);
    }
}
