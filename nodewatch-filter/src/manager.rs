use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use nodewatch_common::{RequestMetadata, Requestor, normalize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::cache::FilterCache;
use crate::map::{FilterMap, PinnedFilterMap};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::{Error, Result};

struct State<M> {
    cache: FilterCache,
    map: M,
}

struct Shared<M> {
    // None once the manager has been stopped
    state: Mutex<Option<State<M>>>,
    policy: RetryPolicy,
}

/// Keeps the reference-counted cache and the kernel filter map in step.
///
/// Every operation holds one manager-wide lock for its whole duration,
/// including kernel calls and backoff sleeps, so a concurrent caller can never
/// observe the cache and the kernel map disagreeing. The kernel map is only
/// touched for IPs entering or leaving the cache; the cache is only updated
/// after the kernel call succeeds.
pub struct FilterManager<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for FilterManager<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl FilterManager<PinnedFilterMap> {
    /// Opens the pinned filter map at `path`.
    pub fn open(path: impl AsRef<Path>, policy: RetryPolicy) -> Result<Self> {
        let map = PinnedFilterMap::from_pin(path)?;
        Ok(Self::new(map, policy))
    }
}

impl<M: FilterMap> FilterManager<M> {
    pub fn new(map: M, policy: RetryPolicy) -> Self {
        let state = State {
            cache: FilterCache::new(),
            map,
        };
        let shared = Shared {
            state: Mutex::new(Some(state)),
            policy,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn try_new(map: M, retry: u32) -> Result<Self> {
        Ok(Self::new(map, RetryPolicy::new(retry)?))
    }

    pub async fn add_ips(
        &self,
        ips: &[IpAddr],
        requestor: &Requestor,
        metadata: &RequestMetadata,
    ) -> Result<()> {
        let mut guard = self.shared.state.lock().await;
        let State { cache, map } = guard.as_mut().ok_or(Error::Stopped)?;

        let mut to_add: Vec<IpAddr> = Vec::new();
        for ip in ips.iter().map(|ip| normalize(*ip)) {
            if cache.has_key(ip) {
                // already in the kernel map, only the association is new
                cache.add_ip(ip, requestor, metadata);
            } else if !to_add.contains(&ip) {
                to_add.push(ip);
            }
        }
        if to_add.is_empty() {
            return Ok(());
        }

        if let Err(e) =
            retry_with_backoff(&self.shared.policy, "filter map add", || map.add(&to_add)).await
        {
            error!(%e, %requestor, "failed to add {} ips to filter map", to_add.len());
            return Err(e);
        }
        for ip in &to_add {
            cache.add_ip(*ip, requestor, metadata);
        }
        debug!(%requestor, rule = %metadata.rule_id, ips = ?to_add, "added ips to filter map");
        Ok(())
    }

    pub async fn delete_ips(
        &self,
        ips: &[IpAddr],
        requestor: &Requestor,
        metadata: &RequestMetadata,
    ) -> Result<()> {
        let mut guard = self.shared.state.lock().await;
        let State { cache, map } = guard.as_mut().ok_or(Error::Stopped)?;

        let to_delete: Vec<IpAddr> = ips
            .iter()
            .map(|ip| normalize(*ip))
            .filter(|ip| cache.delete_ip(*ip, requestor, metadata))
            .collect();
        if to_delete.is_empty() {
            return Ok(());
        }

        if let Err(e) = retry_with_backoff(&self.shared.policy, "filter map delete", || {
            map.delete(&to_delete)
        })
        .await
        {
            error!(%e, %requestor, "failed to delete {} ips from filter map", to_delete.len());
            // still in the kernel map, so the cache has to keep claiming them
            for ip in &to_delete {
                cache.add_ip(*ip, requestor, metadata);
            }
            return Err(e);
        }
        debug!(%requestor, rule = %metadata.rule_id, ips = ?to_delete, "deleted ips from filter map");
        Ok(())
    }

    pub async fn has_ip(&self, ip: IpAddr) -> bool {
        let guard = self.shared.state.lock().await;
        guard.as_ref().is_some_and(|state| state.cache.has_key(ip))
    }

    /// Sorted snapshot of every IP currently in the filter.
    pub async fn ips(&self) -> Vec<IpAddr> {
        let guard = self.shared.state.lock().await;
        let mut ips = guard
            .as_ref()
            .map(|state| state.cache.ips())
            .unwrap_or_default();
        ips.sort();
        ips
    }

    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.shared.state.lock().await;
        let state = guard.as_mut().ok_or(Error::Stopped)?;
        reset_state(state)
    }

    /// Removes every tracked IP from the kernel map, closes the map and drops
    /// the cache. The map is closed even when the reset fails; the reset error
    /// is still returned. Calling it again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.shared.state.lock().await;
        let Some(mut state) = guard.take() else {
            info!("filter manager already stopped");
            return Ok(());
        };
        let reset = reset_state(&mut state);
        if let Err(e) = &reset {
            error!(%e, "failed to reset filter map while stopping");
        }
        state.map.close();
        info!("filter manager stopped");
        reset
    }
}

fn reset_state<M: FilterMap>(state: &mut State<M>) -> Result<()> {
    let ips = state.cache.ips();
    if ips.is_empty() {
        return Ok(());
    }
    if let Err(e) = state.map.delete(&ips) {
        error!(%e, "failed to reset filter map");
        return Err(e);
    }
    state.cache.reset();
    info!("removed {} ips from filter map", ips.len());
    Ok(())
}
