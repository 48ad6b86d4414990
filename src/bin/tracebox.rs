use anyhow::Result;

fn main() -> Result<()> {
    let code = tracebox::cli::run()?;
    std::process::exit(code)
}
