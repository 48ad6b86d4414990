use crate::config::profile::{available_profiles, default_profile_name, get_profile};
use crate::config::types::{ExecutionRequest, Limits, StdioTarget};
use crate::kernel::arch::{default_tracer, AVAILABLE_TRACERS};
use crate::verdict::report::{render_json, render_text};
use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run a program under ptrace supervision with resource limits and a syscall policy"
)]
struct Cli {
    /// Security profile
    #[arg(short = 'P', long, default_value_t = default_profile_name().to_string())]
    profile: String,

    /// Tracing technique
    #[arg(short = 'I', long, default_value_t = default_tracer().0.to_string())]
    invoker: String,

    /// Architecture of the traced program
    #[arg(short = 'a', long, default_value_t = default_tracer().1.to_string())]
    arch: String,

    /// Raise the log level to debug (unless RUST_LOG is set)
    #[arg(short, long)]
    verbose: bool,

    /// File connected to the program's stdin
    #[arg(short = 'i', long = "stdin", value_name = "FILE")]
    stdin: Option<PathBuf>,

    /// File receiving the program's stdout (created or truncated)
    #[arg(short = 'o', long = "stdout", value_name = "FILE")]
    stdout: Option<PathBuf>,

    /// File receiving the program's stderr; discarded when not given
    #[arg(short = 'e', long = "stderr", value_name = "FILE")]
    stderr: Option<PathBuf>,

    /// CPU time limit in seconds (0 = unlimited)
    #[arg(short = 't', long = "time-limit", default_value_t = 0.0)]
    time_limit: f64,

    /// Memory limit in MiB (0 = unlimited)
    #[arg(short = 'm', long = "memory-limit", default_value_t = 0)]
    memory_limit: i64,

    /// Wall clock limit in seconds (0 = unlimited)
    #[arg(short = 'w', long = "wall-limit", default_value_t = 0.0)]
    wall_limit: f64,

    /// Environment entry for the program (repeatable)
    #[arg(short = 'E', long = "environment", value_name = "KEY=VALUE")]
    environment: Vec<String>,

    /// Pass this process's environment to the program instead of -E entries
    #[arg(short = 'r', long = "inherit-environment")]
    inherit_environment: bool,

    /// Working directory of the program
    #[arg(short = 'd', long = "workdir", value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// File name inside the working directory the program may write (repeatable)
    #[arg(short = 'W', long = "writable", value_name = "NAME")]
    writable: Vec<String>,

    /// Also print the result as JSON on stdout
    #[arg(long)]
    json: bool,

    /// List available profiles and exit
    #[arg(long)]
    list_profiles: bool,

    /// List available tracing techniques and architectures and exit
    #[arg(long)]
    list_invokers: bool,

    /// Program to run, followed by its arguments
    #[arg(
        value_name = "PROGRAM",
        trailing_var_arg = true,
        required_unless_present_any = ["list_profiles", "list_invokers"]
    )]
    program: Vec<String>,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn open_for_reading(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open file '{}' for reading", path.display()))
}

fn open_for_writing(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o666)
        .open(path)
        .with_context(|| format!("Failed to open file '{}' for writing", path.display()))
}

/// Redirection files stay open until the run is over.
struct Redirections {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl Redirections {
    fn open(cli: &Cli) -> Result<Self> {
        Ok(Self {
            stdin: cli.stdin.as_deref().map(open_for_reading).transpose()?,
            stdout: cli.stdout.as_deref().map(open_for_writing).transpose()?,
            stderr: cli.stderr.as_deref().map(open_for_writing).transpose()?,
        })
    }

    fn targets(&self) -> (StdioTarget, StdioTarget, StdioTarget) {
        let fd = |file: &Option<File>, unset: StdioTarget| {
            file.as_ref()
                .map(|f| StdioTarget::Fd(f.as_raw_fd()))
                .unwrap_or(unset)
        };
        (
            fd(&self.stdin, StdioTarget::Inherit),
            fd(&self.stdout, StdioTarget::Inherit),
            fd(&self.stderr, StdioTarget::Close),
        )
    }
}

fn list_profiles() {
    for name in available_profiles() {
        println!("{name}");
    }
}

fn list_invokers() {
    for entry in AVAILABLE_TRACERS {
        println!("{}: {}", entry.technique, entry.architectures.join(", "));
    }
}

/// Exit status for a command line clap refused: help and version output are
/// successful, everything else is a usage failure.
fn parse_failure_status(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        _ => 1,
    }
}

/// Entry point of the `tracebox` binary. Returns the process exit status.
pub fn run() -> Result<i32> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print()?;
            return Ok(parse_failure_status(&err));
        }
    };
    init_logging(cli.verbose);

    if cli.list_profiles || cli.list_invokers {
        if cli.list_profiles {
            list_profiles();
        }
        if cli.list_invokers {
            list_invokers();
        }
        return Ok(0);
    }

    let profile = get_profile(&cli.profile)?;
    let redirections = Redirections::open(&cli)?;
    let (stdin, stdout, stderr) = redirections.targets();

    let memory = cli.memory_limit.saturating_mul(1024 * 1024);
    let exe = cli.program.first().cloned().unwrap_or_default();
    let mut request = ExecutionRequest::new(exe, profile)
        .with_args(cli.program.iter().cloned())
        .with_env(cli.environment.iter().cloned())
        .with_limits(Limits::new(cli.time_limit, cli.wall_limit, memory))
        .with_stdio(stdin, stdout, stderr)
        .with_writable_files(cli.writable.iter().cloned())
        .inherit_environment(cli.inherit_environment);
    if let Some(dir) = &cli.workdir {
        request = request.with_workdir(dir);
    }

    let result = crate::execute(&request, &cli.invoker, &cli.arch)?;
    drop(redirections);

    eprint!("{}", render_text(&result));
    if cli.json {
        println!("{}", render_json(&result)?);
    }

    Ok(if result.has_error() { 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_program_arguments_are_passed_through() {
        let cli = Cli::try_parse_from([
            "tracebox", "-t", "1.5", "-m", "64", "-W", "out.txt", "/bin/echo", "-n", "hi",
        ])
        .unwrap();
        assert_eq!(cli.time_limit, 1.5);
        assert_eq!(cli.memory_limit, 64);
        assert_eq!(cli.writable, ["out.txt"]);
        assert_eq!(cli.program, ["/bin/echo", "-n", "hi"]);
        assert_eq!(cli.profile, "linux_native");
        assert_eq!(cli.invoker, "ptrace");
    }

    #[test]
    fn test_program_is_required_unless_listing() {
        assert!(Cli::try_parse_from(["tracebox"]).is_err());
        assert!(Cli::try_parse_from(["tracebox", "--list-profiles"]).is_ok());
    }

    #[test]
    fn test_usage_errors_exit_with_one() {
        let status = |args: &[&str]| match Cli::try_parse_from(args) {
            Ok(_) => panic!("{args:?} should not parse"),
            Err(err) => parse_failure_status(&err),
        };
        assert_eq!(status(&["tracebox", "--time-limit", "notanumber", "/bin/true"]), 1);
        assert_eq!(status(&["tracebox"]), 1);
        assert_eq!(status(&["tracebox", "--no-such-flag", "/bin/true"]), 1);
        assert_eq!(status(&["tracebox", "--help"]), 0);
        assert_eq!(status(&["tracebox", "--version"]), 0);
    }

    #[test]
    fn test_stderr_is_closed_by_default() {
        let cli = Cli::try_parse_from(["tracebox", "/bin/true"]).unwrap();
        let redirections = Redirections::open(&cli).unwrap();
        assert_eq!(
            redirections.targets(),
            (StdioTarget::Inherit, StdioTarget::Inherit, StdioTarget::Close)
        );
    }
}
