//! Traversal core: cancellation, admission control, retry, file operations and the walk itself.

pub mod cancel;
pub mod context;
pub mod error_handler;
pub mod fs;
pub mod languages;
pub mod limiter;
pub mod lines;
pub mod retry;
pub mod walk;

pub use cancel::{CancellationToken, DeadlineTimer};
pub use context::{LineTally, WalkContext};
pub use error_handler::finish_walk;
pub use fs::{EntryKind, FileOps, RequestFs, StdFs};
pub use languages::classify;
pub use limiter::ConcurrencyLimiter;
pub use lines::count_lines;
pub use retry::RetryPolicy;
pub use walk::traverse;
