//! repolines CLI: count lines per language in a remote repository.

use anyhow::Result;
use clap::Parser;
use repolines::engine::arg_parser::Cli;
use repolines::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    let code = handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    std::process::exit(code);
}
