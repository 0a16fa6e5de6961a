use super::RuleMatch;
use crate::matcher::{AndRule, PortMatcher, StringMatcher};

/// Destination attributes of a request
#[derive(Debug, Clone, Copy)]
pub struct TargetRequest<'a> {
    pub host: &'a str,
    pub port: u16,
    pub method: &'a str,
    pub path: &'a str,
}

impl<'a> TargetRequest<'a> {
    pub fn new(host: &'a str, port: u16, method: &'a str, path: &'a str) -> Self {
        Self {
            host,
            port,
            method,
            path,
        }
    }
}

/// Destination rule: host, port, method and path constraints
#[derive(Debug, Clone, Default)]
pub struct TargetRule {
    pub hosts: AndRule<StringMatcher>,
    pub ports: AndRule<PortMatcher>,
    pub methods: AndRule<StringMatcher>,
    pub paths: AndRule<StringMatcher>,
}

impl TargetRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.ports.is_empty() && self.methods.is_empty() && self.paths.is_empty()
    }
}

impl RuleMatch<TargetRequest<'_>> for TargetRule {
    fn matches(&self, request: &TargetRequest<'_>) -> bool {
        self.hosts.matches(request.host)
            && self.ports.matches(&request.port)
            && self.methods.matches(request.method)
            && self.paths.matches(request.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::OrGroup;

    #[test]
    fn test_target_rule_all_dimensions() {
        let rule = TargetRule {
            hosts: AndRule::new().with(OrGroup::of(StringMatcher::exact("svc.ns"))),
            ports: AndRule::new().with(OrGroup::new(vec![PortMatcher(80), PortMatcher(8080)], false)),
            methods: AndRule::new().with(OrGroup::of(StringMatcher::prefix("GET"))),
            paths: AndRule::new().with(OrGroup::of(StringMatcher::prefix("/api"))),
        };
        assert!(rule.matches(&TargetRequest::new("svc.ns", 80, "GET", "/api/v1")));
        assert!(!rule.matches(&TargetRequest::new("svc.ns", 81, "GET", "/api/v1")));
        assert!(!rule.matches(&TargetRequest::new("other", 80, "GET", "/api/v1")));
        assert!(!rule.matches(&TargetRequest::new("svc.ns", 80, "POST", "/api/v1")));
        assert!(!rule.matches(&TargetRequest::new("svc.ns", 80, "GET", "/v1")));
    }

    #[test]
    fn test_empty_target_rule_matches() {
        let rule = TargetRule::new();
        assert!(rule.is_empty());
        assert!(rule.matches(&TargetRequest::new("", 0, "", "")));
    }
}
