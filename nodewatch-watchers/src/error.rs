use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("filter manager error: {0}")]
    Filter(#[from] nodewatch_filter::Error),

    #[error("invalid apiserver url {0:?}")]
    InvalidUrl(String),

    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("no addresses found for host {0}")]
    NoAddresses(String),

    #[error("watchers failed: {}", describe(.0))]
    WatchersFailed(Vec<(String, Error)>),

    #[error("task failed: {0}")]
    Task(String),
}

fn describe(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("{name}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}
