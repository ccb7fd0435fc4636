use std::collections::BTreeSet;
use std::io;

use async_trait::async_trait;

#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup_host(&self, host: &str) -> io::Result<Vec<String>>;
}

/// Resolves through the system resolver (`getaddrinfo`).
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup_host(&self, host: &str) -> io::Result<Vec<String>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        let ips: BTreeSet<String> = addrs.map(|addr| addr.ip().to_string()).collect();
        Ok(ips.into_iter().collect())
    }
}
