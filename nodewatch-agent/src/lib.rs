pub mod agent;
pub mod config;
pub mod http;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to infer kube config: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),

    #[error("filter error: {0}")]
    Filter(#[from] nodewatch_filter::Error),

    #[error("watcher error: {0}")]
    Watcher(#[from] nodewatch_watchers::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
