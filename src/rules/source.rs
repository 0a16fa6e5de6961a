use once_cell::sync::Lazy;
use regex::Regex;

use super::{JwtAuthRule, RuleMatch};
use crate::jwt::Claims;
use crate::matcher::{AndRule, CidrRange, StringMatcher};
use crate::types::SourceRequest;

static NAMESPACE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // Safe: hardcoded regex pattern that is known to be valid
    Regex::new(r"/ns/([^/]+)/").expect("NAMESPACE_PATTERN hardcoded regex is invalid")
});

/// Namespace embedded in an mTLS principal (`<domain>/ns/<ns>/sa/<sa>`)
pub fn namespace_of(principal: &str) -> Option<&str> {
    NAMESPACE_PATTERN
        .captures(principal)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Source identity plus the verified claims, if the request carried a token
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub source: &'a SourceRequest,
    pub claims: Option<&'a Claims>,
}

impl<'a> SourceContext<'a> {
    pub fn new(source: &'a SourceRequest, claims: Option<&'a Claims>) -> Self {
        Self { source, claims }
    }

    /// Explicit namespace, else the one derived from the principal
    pub fn namespace(&self) -> Option<&'a str> {
        if self.source.namespace.is_empty() {
            namespace_of(self.source.principal.as_str())
        } else {
            Some(self.source.namespace.as_str())
        }
    }
}

/// Caller identity rule: principal, namespace, peer addresses and optional
/// nested JWT constraints.
#[derive(Debug, Clone, Default)]
pub struct SourceRule {
    pub principals: AndRule<StringMatcher>,
    pub namespaces: AndRule<StringMatcher>,
    pub ip_blocks: AndRule<CidrRange>,
    pub remote_ip_blocks: AndRule<CidrRange>,
    pub jwt: JwtAuthRule,
}

impl SourceRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
            && self.namespaces.is_empty()
            && self.ip_blocks.is_empty()
            && self.remote_ip_blocks.is_empty()
            && self.jwt.is_empty()
    }
}

impl RuleMatch<SourceContext<'_>> for SourceRule {
    fn matches(&self, request: &SourceContext<'_>) -> bool {
        let namespace = request.namespace();
        let jwt_ok = self.jwt.is_empty()
            || request.claims.is_some_and(|claims| self.jwt.matches(claims));

        self.principals.matches(request.source.principal.as_str())
            && self
                .namespaces
                .all_groups(|g| g.is_satisfied_by(|m| m.matches_opt(namespace)))
            && self.ip_blocks.matches(request.source.source_ip.as_str())
            && self.remote_ip_blocks.matches(request.source.remote_ip.as_str())
            && jwt_ok
    }
}

impl RuleMatch<SourceRequest> for SourceRule {
    fn matches(&self, request: &SourceRequest) -> bool {
        RuleMatch::<SourceContext<'_>>::matches(self, &SourceContext::new(request, None))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::matcher::OrGroup;

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("cluster.local/ns/default/sa/sleep"), Some("default"));
        assert_eq!(namespace_of("spiffe://cluster.local/ns/prod/sa/x"), Some("prod"));
        assert_eq!(namespace_of("no-namespace"), None);
    }

    #[test]
    fn test_namespace_derived_from_principal() {
        let rule = SourceRule {
            namespaces: AndRule::new().with(OrGroup::of(StringMatcher::exact("default"))),
            ..Default::default()
        };
        let request = SourceRequest::new("cluster.local/ns/default/sa/sleep");
        assert!(RuleMatch::<SourceRequest>::matches(&rule, &request));

        let request = SourceRequest::new("cluster.local/ns/default/sa/sleep").with_namespace("other");
        assert!(!RuleMatch::<SourceRequest>::matches(&rule, &request));

        let request = SourceRequest::new("plain");
        assert!(!RuleMatch::<SourceRequest>::matches(&rule, &request));
    }

    #[test]
    fn test_principal_and_ips() {
        let rule = SourceRule {
            principals: AndRule::new().with(OrGroup::of(StringMatcher::suffix("/sa/sleep"))),
            ip_blocks: AndRule::new().with(OrGroup::of(CidrRange::new("10.0.0.0", Some(8)))),
            ..Default::default()
        };
        let ok = SourceRequest::new("cluster.local/ns/default/sa/sleep").with_ips("10.0.0.5", "", "");
        assert!(RuleMatch::<SourceRequest>::matches(&rule, &ok));
        let bad_ip = SourceRequest::new("cluster.local/ns/default/sa/sleep").with_ips("11.0.0.5", "", "");
        assert!(!RuleMatch::<SourceRequest>::matches(&rule, &bad_ip));
    }

    #[test]
    fn test_nested_jwt_requires_claims() {
        let rule = SourceRule {
            jwt: JwtAuthRule {
                presenters: AndRule::new().with(OrGroup::of(StringMatcher::exact("web"))),
                ..Default::default()
            },
            ..Default::default()
        };
        let source = SourceRequest::new("p");
        assert!(!rule.matches(&SourceContext::new(&source, None)));

        let claims = match json!({"azp": "web"}) {
            serde_json::Value::Object(map) => Claims::new(map),
            _ => unreachable!(),
        };
        assert!(rule.matches(&SourceContext::new(&source, Some(&claims))));
    }
}
