use std::net::IpAddr;
use std::path::{Path, PathBuf};

use aya::maps::lpm_trie::Key as LpmKey;
use aya::maps::{LpmTrie, Map, MapData, MapError};
use tracing::{info, warn};

use crate::{Error, Result};

const FILTERED: u8 = 1;

/// Bulk view of the kernel filter consulted by the dataplane programs.
pub trait FilterMap {
    fn add(&mut self, ips: &[IpAddr]) -> Result<()>;
    fn delete(&mut self, ips: &[IpAddr]) -> Result<()>;
    fn close(&mut self);
}

/// Filter backed by a pinned `LPM_TRIE` with `/32` IPv4 keys.
pub struct PinnedFilterMap {
    path: PathBuf,
    map: Option<LpmTrie<MapData, u32, u8>>,
}

impl PinnedFilterMap {
    pub fn from_pin(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::MapNotFound { path });
        }
        info!("loading filter map from {}", path.display());
        let map = MapData::from_pin(&path)?;
        let map: LpmTrie<MapData, u32, u8> = Map::LpmTrie(map).try_into()?;
        Ok(Self {
            path,
            map: Some(map),
        })
    }

    fn map_mut(&mut self) -> Result<&mut LpmTrie<MapData, u32, u8>> {
        self.map
            .as_mut()
            .ok_or_else(|| Error::Map(format!("{} is closed", self.path.display())))
    }
}

// LpmTrie expects big endian order for comparisons
fn lpm_key(ip: IpAddr) -> Result<LpmKey<u32>> {
    match ip {
        IpAddr::V4(ipv4_addr) => Ok(LpmKey::new(32, ipv4_addr.to_bits().to_be())),
        IpAddr::V6(_) => Err(Error::UnsupportedAddress(ip)),
    }
}

impl FilterMap for PinnedFilterMap {
    // a failed insert rolls back the keys written by this call so the bulk
    // add is all or nothing
    fn add(&mut self, ips: &[IpAddr]) -> Result<()> {
        let keys = ips.iter().map(|ip| lpm_key(*ip)).collect::<Result<Vec<_>>>()?;
        let map = self.map_mut()?;
        for (idx, key) in keys.iter().enumerate() {
            if let Err(e) = map.insert(key, FILTERED, 0) {
                for written in &keys[..idx] {
                    if let Err(e) = map.remove(written) {
                        warn!(%e, "failed to roll back filter map insert");
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn delete(&mut self, ips: &[IpAddr]) -> Result<()> {
        let keys = ips.iter().map(|ip| lpm_key(*ip)).collect::<Result<Vec<_>>>()?;
        let map = self.map_mut()?;
        for (idx, key) in keys.iter().enumerate() {
            match map.remove(key) {
                Ok(_) | Err(MapError::KeyNotFound) => {}
                Err(e) => {
                    for removed in &keys[..idx] {
                        if let Err(e) = map.insert(removed, FILTERED, 0) {
                            warn!(%e, "failed to roll back filter map delete");
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.map.take().is_some() {
            info!("closed filter map {}", self.path.display());
        }
    }
}
