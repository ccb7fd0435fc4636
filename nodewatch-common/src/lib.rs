pub mod pubsub;

use std::fmt::Display;
use std::net::IpAddr;

/// Identifies the subsystem asking for an IP to be filtered.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Requestor(String);

impl Requestor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Requestor {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Requestor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for Requestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Second-level discriminator for independent reasons a single requestor
/// wants the same IP filtered.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestMetadata {
    pub rule_id: String,
}

impl RequestMetadata {
    pub fn new(rule_id: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
        }
    }
}

/// IPv4-mapped IPv6 addresses are folded into their IPv4 form so both
/// spellings land on the same key.
pub fn normalize(ip: IpAddr) -> IpAddr {
    ip.to_canonical()
}
