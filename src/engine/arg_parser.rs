use clap::Parser;
use std::path::PathBuf;

/// Count lines per language in a remote repository.
#[derive(Clone, Parser)]
#[command(name = "repolines")]
#[command(about = "Fetch a repository snapshot and count lines per language; results are cached.")]
pub struct Cli {
    /// Repository URL (http or https, host must be on the allow-list).
    #[arg(value_name = "REPO_URL")]
    pub repo_url: String,

    /// TOML config file with a [settings] table. Environment variables override it.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Analysis deadline in seconds (overrides ANALYSIS_TIMEOUT).
    #[arg(long, short)]
    pub timeout: Option<u64>,

    /// Bypass the cache entirely.
    #[arg(long)]
    pub no_cache: bool,

    /// Run the same request this many times against one cache instance.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Debug logging.
    #[arg(long, short)]
    pub verbose: bool,
}
