use std::collections::BTreeMap;

use super::{PolicyRegistry, RuleMatch};
use crate::jwt::Claims;
use crate::matcher::{AndRule, StringMatcher};

/// Constraints on a verified JWT: request principal (`iss/sub`), audiences,
/// presenter (`azp`) and arbitrary claims.
#[derive(Debug, Clone, Default)]
pub struct JwtAuthRule {
    pub request_principals: AndRule<StringMatcher>,
    pub audiences: AndRule<StringMatcher>,
    pub presenters: AndRule<StringMatcher>,
    pub claims: BTreeMap<String, AndRule<StringMatcher>>,
}

impl JwtAuthRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claim(mut self, key: impl Into<String>, rule: AndRule<StringMatcher>) -> Self {
        self.claims.insert(key.into(), rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.request_principals.is_empty()
            && self.audiences.is_empty()
            && self.presenters.is_empty()
            && self.claims.is_empty()
    }

    fn matches_audiences(&self, claims: &Claims) -> bool {
        let audiences = claims.audiences();
        if audiences.is_empty() {
            return self.audiences.is_empty();
        }
        self.audiences.all_groups(|group| {
            group.is_satisfied_by(|m| audiences.iter().any(|aud| m.matches_str(aud)))
        })
    }

    /// For every claim key, some value of that claim must satisfy the whole rule
    fn matches_claims(&self, claims: &Claims) -> bool {
        self.claims.iter().all(|(key, rule)| {
            claims
                .claim_strings(key)
                .iter()
                .any(|value| rule.matches(value.as_str()))
        })
    }
}

impl RuleMatch<Claims> for JwtAuthRule {
    fn matches(&self, claims: &Claims) -> bool {
        let principal = claims.request_principal();
        self.presenters
            .all_groups(|g| g.is_satisfied_by(|m| m.matches_opt(claims.presenter())))
            && self.request_principals.matches(principal.as_str())
            && self.matches_audiences(claims)
            && self.matches_claims(claims)
    }
}

impl PolicyRegistry<JwtAuthRule> {
    /// Evaluate against an optional claim set; a request without verified
    /// claims is always rejected.
    pub fn is_valid_claims(&self, claims: Option<&Claims>) -> bool {
        match claims {
            Some(claims) => self.is_valid(claims),
            None => false,
        }
    }
}
