use super::RuleMatch;
use crate::matcher::{AndRule, CidrRange};

/// Network addresses of a request
#[derive(Debug, Clone, Copy, Default)]
pub struct IpBlockRequest<'a> {
    pub source_ip: &'a str,
    pub dest_ip: &'a str,
    pub remote_ip: &'a str,
}

impl<'a> IpBlockRequest<'a> {
    pub fn new(source_ip: &'a str, dest_ip: &'a str, remote_ip: &'a str) -> Self {
        Self {
            source_ip,
            dest_ip,
            remote_ip,
        }
    }
}

/// CIDR constraints on the direct peer, destination and original client addresses
#[derive(Debug, Clone, Default)]
pub struct IpBlockRule {
    pub source_ips: AndRule<CidrRange>,
    pub dest_ips: AndRule<CidrRange>,
    pub remote_ips: AndRule<CidrRange>,
}

impl IpBlockRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.source_ips.is_empty() && self.dest_ips.is_empty() && self.remote_ips.is_empty()
    }
}

impl RuleMatch<IpBlockRequest<'_>> for IpBlockRule {
    fn matches(&self, request: &IpBlockRequest<'_>) -> bool {
        self.source_ips.matches(request.source_ip)
            && self.dest_ips.matches(request.dest_ip)
            && self.remote_ips.matches(request.remote_ip)
    }
}
