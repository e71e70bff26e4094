//! Request-level machinery: fetch, cache, orchestration and the command line.

pub mod analyze;
pub mod arg_parser;
pub mod cache;
pub mod cli;
pub mod fetch;

pub use analyze::Analyzer;
pub use arg_parser::Cli;
pub use cache::{Cache, DisabledCache, MemoryCache, RedisCache, SqliteCache, build_cache};
pub use cli::{exit_code, handle_run};
pub use fetch::{ArchiveFetcher, CountingReader, Fetch, archive_url, unpack_archive};
