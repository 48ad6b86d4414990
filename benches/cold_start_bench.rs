// Cold-start benchmark for supervised runs
// Measures end-to-end latency of one supervised /bin/true: fork, attach,
// exec, syscall tracing to exit, cleanup.

use std::time::{Duration, Instant};
use tracebox::config::profile::get_profile;
use tracebox::{execute, ExecutionRequest, Limits};

const RUNS: usize = 100;
const WARMUP_RUNS: usize = 10;

/// Sample at `fraction` of the sorted run times.
fn percentile(sorted: &[Duration], fraction: f64) -> Duration {
    let idx = ((sorted.len() - 1) as f64 * fraction).round() as usize;
    sorted[idx]
}

fn report(label: &str, mut samples: Vec<Duration>) {
    samples.sort_unstable();
    let total: Duration = samples.iter().sum();
    println!("\n{label}");
    println!(
        "  median {:?}  p95 {:?}  worst {:?}  avg {:?}",
        percentile(&samples, 0.5),
        percentile(&samples, 0.95),
        percentile(&samples, 1.0),
        total / samples.len() as u32
    );
}

fn time_runs(name: &str, limits: Limits) -> Option<Vec<Duration>> {
    let profile = get_profile(name).expect("shipped profile");
    let request = ExecutionRequest::new("/bin/true", profile).with_limits(limits);

    let mut samples = Vec::with_capacity(RUNS);
    for run in 0..WARMUP_RUNS + RUNS {
        let start = Instant::now();
        let result = execute(&request, "ptrace", "x86_64").expect("valid request");
        let elapsed = start.elapsed();

        if result.has_error() {
            eprintln!("{name}: run failed: {}", result.error_message);
            return None;
        }
        if run >= WARMUP_RUNS {
            samples.push(elapsed);
        }
    }
    Some(samples)
}

fn main() {
    println!("Supervised /bin/true, {RUNS} runs after {WARMUP_RUNS} warmup runs");

    let scenarios = [
        ("linux_nosecurity", Limits::unlimited(), "permissive, no limits"),
        ("linux_native", Limits::new(1.0, 2.0, 64 << 20), "native profile, all limits"),
    ];

    for (profile, limits, label) in scenarios {
        match time_runs(profile, limits) {
            Some(samples) => report(&format!("{profile} ({label})"), samples),
            None => println!("\n{profile}: skipped"),
        }
    }
}
