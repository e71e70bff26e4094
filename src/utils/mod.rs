pub mod config;
pub mod fd_limit;
pub mod logger;
pub mod tempfiles;

pub use config::*;
pub use fd_limit::{is_descriptor_exhaustion, limiter_capacity, max_open_fds};
pub use logger::setup_logging;
pub use tempfiles::WorkDir;
