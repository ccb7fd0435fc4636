use std::sync::Arc;
use std::time::Duration;

use nodewatch_common::pubsub::BroadcastPubSub;
use nodewatch_filter::{FilterManager, RetryPolicy};
use nodewatch_watchers::apiserver::{self, ApiServerWatcher, SystemResolver};
use nodewatch_watchers::{Watcher, WatcherManager};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;
use crate::config::AgentArgs;

pub async fn start(
    args: AgentArgs,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    info!("initializing filter manager");
    let policy = RetryPolicy::with_backoff(
        args.filter_retries,
        Duration::from_millis(args.filter_backoff_ms),
        args.filter_backoff_multiplier,
    )?;
    let filter_manager = FilterManager::open(args.filter_map_path(), policy)?;

    let url = apiserver_url(args.apiserver_url.clone()).await?;
    info!(%url, "watching apiserver");
    let mut config = apiserver::Config::new(url);
    config.refresh_interval = Duration::from_secs(args.apiserver_refresh_secs);
    config.max_resolve_failures = args.apiserver_max_resolve_failures;

    let pubsub = Arc::new(BroadcastPubSub::new());
    let apiserver_watcher = ApiServerWatcher::new(
        config,
        Arc::new(SystemResolver),
        pubsub,
        filter_manager.clone(),
    );
    let watchers: Vec<Arc<dyn Watcher>> = vec![Arc::new(apiserver_watcher)];
    let watcher_manager = WatcherManager::new(watchers);

    info!(watchers = ?watcher_manager.names(), "starting watchers");
    // TODO: flip readiness after the first successful refresh of every watcher
    ready.cancel();
    let run = watcher_manager.start(cancel.child_token()).await;

    watcher_manager.stop().await?;
    if let Err(e) = filter_manager.stop().await {
        error!(%e, "failed to clean up filter map");
    }
    run?;
    Ok(())
}

async fn apiserver_url(configured: Option<String>) -> Result<String> {
    if let Some(url) = configured {
        return Ok(url);
    }
    let config = kube::Config::infer().await?;
    Ok(config.cluster_url.to_string())
}
