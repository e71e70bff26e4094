//! CLI command handler: one request (optionally repeated) through the orchestrator.

use anyhow::{Context, Result};
use log::debug;
use std::time::{Duration, Instant};

use crate::engine::analyze::Analyzer;
use crate::engine::arg_parser::Cli;
use crate::types::Response;
use crate::utils::config::Config;
use crate::utils::setup_logging;

fn setup_config(cli: &Cli) -> Result<Config> {
    setup_logging(cli.verbose);
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(secs) = cli.timeout {
        config.analysis_timeout = Duration::from_secs(secs);
    }
    if cli.no_cache {
        config.disable_cache = true;
    }
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        config
    );
    Ok(config)
}

/// Process exit code for a response status.
pub fn exit_code(response: &Response) -> i32 {
    match response.status() {
        200 => 0,
        400 => 2,
        408 => 3,
        _ => 1,
    }
}

/// Run the request `cli.repeat` times and print each JSON body. Returns the exit code of the
/// last response.
pub fn handle_run(cli: &Cli) -> Result<i32> {
    let config = setup_config(cli)?;
    let analyzer = Analyzer::from_config(config).context("initialize analyzer")?;

    let mut code = 0;
    for attempt in 1..=cli.repeat {
        let start = Instant::now();
        let response = analyzer.analyze(&cli.repo_url);
        log::info!(
            "Request {}/{}: HTTP {} in {:?}",
            attempt,
            cli.repeat,
            response.status(),
            start.elapsed()
        );
        let body = serde_json::to_string_pretty(&response.body()).context("serialize response")?;
        println!("{}", body);
        code = exit_code(&response);
    }
    Ok(code)
}
