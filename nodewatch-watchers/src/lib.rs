pub mod apiserver;
mod error;
mod manager;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use error::Error;
pub use manager::WatcherManager;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A source of IPs that need filtering.
///
/// `start` runs until `cancel` fires or the watcher fails. Every method must
/// tolerate repeated calls, and `stop` must be safe without a prior `start`.
#[async_trait]
pub trait Watcher: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self, cancel: CancellationToken) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}
