use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{Error, Result, Watcher};

/// Runs a fixed set of watchers as one group.
///
/// The agent must never run with only part of its discovery sources active,
/// so the first failure cancels every sibling and the group reports failure
/// once all of them have returned.
pub struct WatcherManager {
    watchers: Vec<Arc<dyn Watcher>>,
}

impl WatcherManager {
    pub fn new(watchers: Vec<Arc<dyn Watcher>>) -> Self {
        Self { watchers }
    }

    pub fn names(&self) -> Vec<&str> {
        self.watchers.iter().map(|w| w.name()).collect()
    }

    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let group = cancel.child_token();
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for watcher in &self.watchers {
            let watcher = Arc::clone(watcher);
            let token = group.clone();
            let name = watcher.name().to_owned();
            info!(watcher = %name, "starting watcher");
            let handle = tasks.spawn(async move { watcher.start(token).await });
            names.insert(handle.id(), name);
        }

        let mut failures = vec![];
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, res) = match joined {
                Ok((id, res)) => (id, res),
                Err(e) => (e.id(), Err(Error::Task(e.to_string()))),
            };
            let name = names.remove(&id).unwrap_or_default();
            match res {
                Ok(()) => info!(watcher = %name, "watcher exited"),
                Err(e) => {
                    error!(watcher = %name, %e, "watcher failed, stopping remaining watchers");
                    group.cancel();
                    failures.push((name, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::WatchersFailed(failures))
        }
    }

    // watchers shut down through the token handed to `start`
    pub async fn stop(&self) -> Result<()> {
        info!("stopping watcher manager");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    enum Behaviour {
        RunUntilCancelled,
        FailAfter(Duration),
        Panic,
    }

    struct ScriptedWatcher {
        name: String,
        behaviour: Behaviour,
        started: AtomicUsize,
    }

    impl ScriptedWatcher {
        fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                behaviour,
                started: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Watcher for ScriptedWatcher {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self, cancel: CancellationToken) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::RunUntilCancelled => {
                    cancel.cancelled().await;
                    Ok(())
                }
                Behaviour::FailAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    Err(Error::NoAddresses(self.name.clone()))
                }
                Behaviour::Panic => panic!("watcher blew up"),
            }
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_until_cancelled() {
        let a = ScriptedWatcher::new("a", Behaviour::RunUntilCancelled);
        let b = ScriptedWatcher::new("b", Behaviour::RunUntilCancelled);
        let manager = WatcherManager::new(vec![a.clone() as Arc<dyn Watcher>, b.clone()]);
        assert_eq!(manager.names(), vec!["a", "b"]);

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { manager.start(cancel).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(a.started.load(Ordering::SeqCst), 1);
        assert_eq!(b.started.load(Ordering::SeqCst), 1);

        cancel.cancel();
        run.await.expect("join").expect("clean exit");
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_stops_the_group() {
        let healthy = ScriptedWatcher::new("healthy", Behaviour::RunUntilCancelled);
        let failing = ScriptedWatcher::new("failing", Behaviour::FailAfter(Duration::from_secs(5)));
        let manager = WatcherManager::new(vec![healthy.clone() as Arc<dyn Watcher>, failing]);

        let cancel = CancellationToken::new();
        let err = manager.start(cancel.clone()).await.unwrap_err();
        match err {
            Error::WatchersFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "failing");
            }
            e => panic!("unexpected error {e}"),
        }
        // the parent token belongs to the caller and is left alone
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_watcher_is_reported() {
        let healthy = ScriptedWatcher::new("healthy", Behaviour::RunUntilCancelled);
        let panicking = ScriptedWatcher::new("panicking", Behaviour::Panic);
        let manager = WatcherManager::new(vec![healthy as Arc<dyn Watcher>, panicking]);

        let err = manager.start(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("panicking"));
    }

    #[tokio::test]
    async fn test_empty_manager() {
        let manager = WatcherManager::new(vec![]);
        manager.start(CancellationToken::new()).await.expect("no watchers");
        manager.stop().await.expect("stop");
    }
}
