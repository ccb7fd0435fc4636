#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nodewatch_common::pubsub::{CacheEvent, PubSub, Topic};
use nodewatch_filter::{Error as FilterError, FilterMap, Result as FilterResult};
use nodewatch_watchers::apiserver::HostResolver;

#[derive(Default)]
pub struct MapState {
    pub ips: BTreeSet<IpAddr>,
    pub adds: Vec<Vec<IpAddr>>,
    pub deletes: Vec<Vec<IpAddr>>,
    pub fail_adds: u32,
    pub fail_deletes: u32,
    // reject IPv6 keys the way the pinned LPM map does
    pub v4_only: bool,
    pub closed: bool,
}

impl MapState {
    fn check_keys(&self, ips: &[IpAddr]) -> FilterResult<()> {
        match ips.iter().find(|ip| self.v4_only && ip.is_ipv6()) {
            Some(ip) => Err(FilterError::UnsupportedAddress(*ip)),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeMap {
    pub state: Arc<Mutex<MapState>>,
}

impl FakeMap {
    pub fn with<T>(&self, f: impl FnOnce(&mut MapState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn ips(&self) -> Vec<IpAddr> {
        self.with(|s| s.ips.iter().copied().collect())
    }
}

impl FilterMap for FakeMap {
    fn add(&mut self, ips: &[IpAddr]) -> FilterResult<()> {
        self.with(|s| {
            s.adds.push(ips.to_vec());
            s.check_keys(ips)?;
            if s.fail_adds > 0 {
                s.fail_adds -= 1;
                return Err(FilterError::Map("add failed".into()));
            }
            s.ips.extend(ips);
            Ok(())
        })
    }

    fn delete(&mut self, ips: &[IpAddr]) -> FilterResult<()> {
        self.with(|s| {
            s.deletes.push(ips.to_vec());
            s.check_keys(ips)?;
            if s.fail_deletes > 0 {
                s.fail_deletes -= 1;
                return Err(FilterError::Map("delete failed".into()));
            }
            for ip in ips {
                s.ips.remove(ip);
            }
            Ok(())
        })
    }

    fn close(&mut self) {
        self.with(|s| s.closed = true);
    }
}

/// Replays queued answers; once the queue is drained the last answer repeats.
#[derive(Default)]
pub struct ScriptedResolver {
    answers: Mutex<VecDeque<io::Result<Vec<String>>>>,
    last: Mutex<Option<Vec<String>>>,
    pub hosts: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    pub fn push_ok(&self, ips: &[&str]) {
        let ips = ips.iter().map(|s| s.to_string()).collect();
        self.answers.lock().unwrap().push_back(Ok(ips));
    }

    pub fn push_err(&self) {
        self.answers
            .lock()
            .unwrap()
            .push_back(Err(io::Error::other("simulated dns error")));
    }
}

#[async_trait]
impl HostResolver for ScriptedResolver {
    async fn lookup_host(&self, host: &str) -> io::Result<Vec<String>> {
        self.hosts.lock().unwrap().push(host.to_owned());
        let next = self.answers.lock().unwrap().pop_front();
        match next {
            Some(Ok(ips)) => {
                *self.last.lock().unwrap() = Some(ips.clone());
                Ok(ips)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| io::Error::other("no scripted answer")),
        }
    }
}

#[derive(Default)]
pub struct RecordingPubSub {
    pub events: Mutex<Vec<(Topic, CacheEvent)>>,
}

impl PubSub for RecordingPubSub {
    fn publish(&self, topic: Topic, event: CacheEvent) {
        self.events.lock().unwrap().push((topic, event));
    }
}
