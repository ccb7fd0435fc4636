mod resolver;

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::Uri;
use nodewatch_common::pubsub::{CacheEvent, EventType, PubSub, Topic};
use nodewatch_common::{RequestMetadata, Requestor, normalize};
use nodewatch_filter::{FilterManager, FilterMap};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use resolver::{HostResolver, SystemResolver};

use crate::{Error, Result, Watcher};

pub const WATCHER_NAME: &str = "apiserver-watcher";

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RESOLVE_FAILURES: u32 = 3;

#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the Kubernetes API server.
    pub url: String,
    pub refresh_interval: Duration,
    /// Consecutive resolution failures tolerated before the watcher gives up.
    pub max_resolve_failures: u32,
}

impl Config {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            max_resolve_failures: DEFAULT_MAX_RESOLVE_FAILURES,
        }
    }
}

/// Keeps the API server's addresses in the kernel filter.
///
/// Each refresh resolves the API server hostname, diffs the result against
/// the last committed set and pushes only the difference to the filter
/// manager. `refresh` is not reentrant: the baseline stays locked for the
/// whole refresh, so overlapping calls run one after the other.
pub struct ApiServerWatcher<M> {
    config: Config,
    resolver: Arc<dyn HostResolver>,
    pubsub: Arc<dyn PubSub>,
    filter_manager: FilterManager<M>,
    requestor: Requestor,
    metadata: RequestMetadata,
    running: AtomicBool,
    current: Mutex<HashSet<IpAddr>>,
}

impl<M> ApiServerWatcher<M>
where
    M: FilterMap + Send + 'static,
{
    pub fn new(
        config: Config,
        resolver: Arc<dyn HostResolver>,
        pubsub: Arc<dyn PubSub>,
        filter_manager: FilterManager<M>,
    ) -> Self {
        Self {
            config,
            resolver,
            pubsub,
            filter_manager,
            requestor: Requestor::from(WATCHER_NAME),
            metadata: RequestMetadata::new(WATCHER_NAME),
            running: AtomicBool::new(false),
            current: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Last committed set of API server IPs, sorted.
    pub async fn current(&self) -> Vec<IpAddr> {
        let mut ips: Vec<IpAddr> = self.current.lock().await.iter().copied().collect();
        ips.sort();
        ips
    }

    pub async fn init(&self) -> Result<()> {
        if self.is_running() {
            info!("apiserver watcher is already running");
            return Ok(());
        }
        let host = hostname(&self.config.url)?;
        info!(%host, "initialized apiserver watcher");
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Resolves, diffs and applies one round of changes.
    ///
    /// The committed baseline is the resolved set minus IPs the filter
    /// manager failed to add, plus IPs it failed to delete, so the next
    /// refresh retries both.
    pub async fn refresh(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        let new = self.resolve().await?;
        let (created, deleted) = diff_cache(&current, &new);

        let mut baseline = new;
        if !created.is_empty() {
            info!(ips = ?created, "new apiserver ips");
            self.publish(EventType::AddApiServerIps, &created);
            if let Err(e) = self
                .filter_manager
                .add_ips(&created, &self.requestor, &self.metadata)
                .await
            {
                error!(%e, "failed to add ips to filter manager");
                // left out of the baseline so the next refresh adds them again
                for ip in &created {
                    baseline.remove(ip);
                }
            }
        }
        if !deleted.is_empty() {
            info!(ips = ?deleted, "deleted apiserver ips");
            self.publish(EventType::DeleteApiServerIps, &deleted);
            if let Err(e) = self
                .filter_manager
                .delete_ips(&deleted, &self.requestor, &self.metadata)
                .await
            {
                error!(%e, "failed to delete ips from filter manager");
                baseline.extend(deleted.iter().copied());
            }
        }

        *current = baseline;
        Ok(())
    }

    async fn resolve(&self) -> Result<HashSet<IpAddr>> {
        let host = hostname(&self.config.url)?;
        let resolved = self
            .resolver
            .lookup_host(&host)
            .await
            .map_err(|e| Error::Resolve {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let ips: HashSet<IpAddr> = resolved
            .iter()
            .filter_map(|raw| match raw.parse::<IpAddr>().map(normalize) {
                Ok(ip @ IpAddr::V4(_)) => Some(ip),
                Ok(ip) => {
                    warn!(%ip, %host, "skipping non-ipv4 apiserver address");
                    None
                }
                Err(e) => {
                    warn!(%e, %host, "skipping unparsable address {raw:?}");
                    None
                }
            })
            .collect();
        if ips.is_empty() {
            return Err(Error::NoAddresses(host));
        }
        Ok(ips)
    }

    fn publish(&self, event_type: EventType, ips: &[IpAddr]) {
        let ips: Vec<String> = ips.iter().map(|ip| ip.to_string()).collect();
        debug!(?event_type, ?ips, "publishing apiserver event");
        self.pubsub
            .publish(Topic::ApiServer, CacheEvent::new(event_type, ips));
    }
}

#[async_trait]
impl<M> Watcher for ApiServerWatcher<M>
where
    M: FilterMap + Send + 'static,
{
    fn name(&self) -> &str {
        WATCHER_NAME
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        self.init().await?;

        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0;
        loop {
            let res = tokio::select! {
                _ = cancel.cancelled() => break,
                res = async {
                    ticker.tick().await;
                    self.refresh().await
                } => res,
            };
            match res {
                Ok(()) => failures = 0,
                Err(e) if failures >= self.config.max_resolve_failures => {
                    error!(%e, failures, "giving up on apiserver refresh");
                    self.stop().await?;
                    return Err(e);
                }
                Err(e) => {
                    failures += 1;
                    warn!(%e, failures, "failed to refresh apiserver ips");
                }
            }
        }

        self.stop().await
    }

    async fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("apiserver watcher is not running");
        }
        Ok(())
    }
}

/// Reduces an API server URL to a bare hostname: no scheme, no port and no
/// leading `www.`.
fn hostname(url: &str) -> Result<String> {
    let uri: Uri = url
        .parse()
        .map_err(|_| Error::InvalidUrl(url.to_owned()))?;
    let host = uri
        .host()
        .ok_or_else(|| Error::InvalidUrl(url.to_owned()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        return Err(Error::InvalidUrl(url.to_owned()));
    }
    Ok(host.to_owned())
}

/// Returns `(created, deleted)`: addresses only in `new`, and addresses only
/// in `current`, each sorted.
fn diff_cache(current: &HashSet<IpAddr>, new: &HashSet<IpAddr>) -> (Vec<IpAddr>, Vec<IpAddr>) {
    let mut created: Vec<IpAddr> = new.difference(current).copied().collect();
    let mut deleted: Vec<IpAddr> = current.difference(new).copied().collect();
    created.sort();
    deleted.sort();
    (created, deleted)
}
