mod cache;
mod error;
mod manager;
mod map;
mod retry;

pub use cache::FilterCache;
pub use error::Error;
pub use manager::FilterManager;
pub use map::{FilterMap, PinnedFilterMap};
pub use retry::{RetryPolicy, retry_with_backoff};

pub type Result<T, E = Error> = std::result::Result<T, E>;
