use std::net::IpAddr;

use ipnet::IpNet;
use tracing::warn;

use super::{first_report, ValueMatcher};

const MAX_PREFIX_LEN: u8 = 32;

/// CIDR range as delivered by the control plane: an address prefix plus an
/// optional prefix length. Without a length the range is a single address.
/// Prefix lengths are bounded to `0..=32` for both address families.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CidrRange {
    prefix: String,
    prefix_len: Option<u32>,
}

impl CidrRange {
    pub fn new(prefix: impl Into<String>, prefix_len: Option<u32>) -> Self {
        Self {
            prefix: prefix.into(),
            prefix_len,
        }
    }

    /// Exact single-address range
    pub fn host(address: impl Into<String>) -> Self {
        Self::new(address, None)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn prefix_len(&self) -> Option<u32> {
        self.prefix_len
    }

    /// Match an address. Malformed addresses or prefix lengths outside
    /// `0..=32` are a no-match.
    pub fn matches_addr(&self, address: &str) -> bool {
        if address.is_empty() {
            return false;
        }

        let Some(prefix) = parse_addr(&self.prefix) else {
            return false;
        };
        let Some(addr) = parse_addr(address) else {
            return false;
        };

        let network = match self.prefix_len {
            None => return prefix == addr,
            Some(len) => match u8::try_from(len)
                .ok()
                .filter(|l| *l <= MAX_PREFIX_LEN)
                .and_then(|l| IpNet::new(prefix, l).ok())
            {
                Some(net) => net,
                None => {
                    if first_report(&format!("cidr-len:{}/{}", self.prefix, len)) {
                        warn!(prefix = %self.prefix, prefix_len = len, "Invalid CIDR prefix length, treating as no-match");
                    }
                    return false;
                }
            },
        };

        // Mixed address families never match
        network.contains(&addr)
    }
}

impl ValueMatcher<str> for CidrRange {
    fn matches(&self, value: &str) -> bool {
        self.matches_addr(value)
    }
}

impl ValueMatcher<String> for CidrRange {
    fn matches(&self, value: &String) -> bool {
        self.matches_addr(value)
    }
}

fn parse_addr(address: &str) -> Option<IpAddr> {
    match address.trim().parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            if first_report(&format!("cidr-addr:{}", address)) {
                warn!(address = %address, "Malformed IP address in CIDR match, treating as no-match");
            }
            None
        }
    }
}
