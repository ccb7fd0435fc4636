use std::collections::HashSet;
use std::net::IpAddr;

use ahash::{HashMap, HashMapExt};
use nodewatch_common::{RequestMetadata, Requestor, normalize};

type Requests = HashMap<Requestor, HashSet<RequestMetadata>>;

/// Reference-counted record of who wants which IP filtered.
///
/// An IP stays present while at least one (requestor, metadata) pair is
/// attached to it. Empty metadata sets and empty requestor maps are pruned
/// eagerly, so `has_key` answers "is this IP still needed by anyone".
///
/// The cache does no locking of its own; the filter manager owns it behind
/// its lock.
#[derive(Debug, Default)]
pub struct FilterCache {
    data: HashMap<IpAddr, Requests>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    pub fn ips(&self) -> Vec<IpAddr> {
        self.data.keys().copied().collect()
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn has_key(&self, ip: IpAddr) -> bool {
        self.data.contains_key(&normalize(ip))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn add_ip(&mut self, ip: IpAddr, requestor: &Requestor, metadata: &RequestMetadata) {
        self.data
            .entry(normalize(ip))
            .or_default()
            .entry(requestor.clone())
            .or_default()
            .insert(metadata.clone());
    }

    /// Drops the association and returns true only when it was the last one
    /// holding the IP, i.e. the IP has left the cache.
    pub fn delete_ip(
        &mut self,
        ip: IpAddr,
        requestor: &Requestor,
        metadata: &RequestMetadata,
    ) -> bool {
        let key = normalize(ip);
        let Some(requests) = self.data.get_mut(&key) else {
            return false;
        };
        let Some(metadatas) = requests.get_mut(requestor) else {
            return false;
        };
        if !metadatas.remove(metadata) {
            return false;
        }
        if metadatas.is_empty() {
            requests.remove(requestor);
        }
        if requests.is_empty() {
            self.data.remove(&key);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use super::*;

    fn ip(a: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, a, a, a))
    }

    fn populated() -> FilterCache {
        let mut cache = FilterCache::new();
        let trace1 = Requestor::from("trace1");
        let trace2 = Requestor::from("trace2");
        cache.add_ip(ip(1), &trace1, &RequestMetadata::new("task1"));
        cache.add_ip(ip(1), &trace1, &RequestMetadata::new("task2"));
        cache.add_ip(ip(1), &trace2, &RequestMetadata::new("task3"));
        cache.add_ip(ip(2), &trace1, &RequestMetadata::new("task1"));
        cache
    }

    #[test]
    fn test_ips_and_reset() {
        let mut cache = populated();
        let mut ips = cache.ips();
        ips.sort();
        assert_eq!(ips, vec![ip(1), ip(2)]);

        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.ips().is_empty());
    }

    #[test]
    fn test_has_key() {
        let cache = populated();
        assert!(cache.has_key(ip(1)));
        assert!(!cache.has_key(ip(3)));
        let mapped = IpAddr::V6(Ipv4Addr::new(1, 1, 1, 1).to_ipv6_mapped());
        assert!(cache.has_key(mapped));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut cache = populated();
        cache.add_ip(ip(1), &"trace1".into(), &RequestMetadata::new("task1"));
        assert_eq!(cache.len(), 2);
        let requests = cache.data.get(&ip(1)).expect("entry");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[&Requestor::from("trace1")].len(), 2);
    }

    #[test]
    fn test_delete_cascades() {
        let mut cache = populated();
        let trace1 = Requestor::from("trace1");
        let trace2 = Requestor::from("trace2");

        // unknown ip
        assert!(!cache.delete_ip(ip(3), &trace1, &RequestMetadata::new("task1")));
        assert_eq!(cache.len(), 2);

        assert!(!cache.delete_ip(ip(1), &trace1, &RequestMetadata::new("task1")));
        assert!(cache.delete_ip(ip(2), &trace1, &RequestMetadata::new("task1")));
        assert!(!cache.has_key(ip(2)));

        // trace1 loses its last rule on ip(1), trace2 still holds it
        assert!(!cache.delete_ip(ip(1), &trace1, &RequestMetadata::new("task2")));
        assert!(!cache.data[&ip(1)].contains_key(&trace1));

        // unknown rule for a known requestor
        assert!(!cache.delete_ip(ip(1), &trace2, &RequestMetadata::new("task2")));
        assert!(cache.has_key(ip(1)));

        assert!(cache.delete_ip(ip(1), &trace2, &RequestMetadata::new("task3")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_many_requestors() {
        let mut cache = FilterCache::new();
        let meta = RequestMetadata::new("task1");
        for i in 0..100u8 {
            cache.add_ip(ip(i), &Requestor::new(format!("trace-{i}")), &meta);
        }
        assert_eq!(cache.len(), 100);
        for i in 0..100u8 {
            assert!(cache.delete_ip(ip(i), &Requestor::new(format!("trace-{i}")), &meta));
        }
        assert!(cache.is_empty());
    }
}
