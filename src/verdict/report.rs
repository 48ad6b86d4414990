//! Human-readable and JSON renderings of an [`ExecutionResult`].

use crate::config::types::ExecutionResult;
use std::fmt::Write as _;

/// Fixed-text report: an error block when the engine failed, the result
/// block, then the verdicts that apply.
pub fn render_text(result: &ExecutionResult) -> String {
    let mut out = String::new();
    if result.has_error() {
        let _ = writeln!(out, "--- Error ---");
        let _ = writeln!(out, "{} (code {})", result.error_message, result.error);
    }

    let _ = writeln!(out, "--- Result ---");
    let _ = writeln!(out, "Exit code: {}", result.exit_code);
    let _ = writeln!(out, "Wall clock: {:.3} sec", result.wall_clock);
    let _ = writeln!(out, "Cpu usage: {:.3} sec", result.cpu_usage);
    let _ = writeln!(out, "Memory usage: {} bytes", result.memory_usage);

    let _ = writeln!(out, "--- Verdicts ---");
    for verdict in result.verdicts() {
        let _ = writeln!(out, "{verdict}");
    }
    out
}

pub fn render_json(result: &ExecutionResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}
