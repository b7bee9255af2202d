/// Command-line entry point for the sandbox binary
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::judge;

#[derive(Parser)]
#[command(
    name = "sandbox",
    version,
    about = "Single-shot online-judge execution sandbox"
)]
struct Cli {
    /// JSON file with the resource limits for this run
    limits_file: PathBuf,
    /// Source file to compile and judge
    source_file: PathBuf,
    /// File served to the program as standard input
    input_file: PathBuf,
}

/// Parse arguments, judge, print the verdict JSON on stdout. The process
/// exits 0 whenever a verdict was produced, whatever the verdict says;
/// usage errors exit 1.
pub fn run() -> Result<()> {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap's default exit code for usage errors is 2; the contract
            // here is 1, with 0 reserved for --help/--version
            let _ = e.print();
            let code = if e.use_stderr() { 1 } else { 0 };
            std::process::exit(code);
        }
    };

    let verdict = judge::judge(&cli.limits_file, &cli.source_file, &cli.input_file);
    let json = serde_json::to_string_pretty(&verdict).context("failed to serialize verdict")?;
    println!("{}", json);
    Ok(())
}
