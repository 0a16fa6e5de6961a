//! Name-keyed policy registries, one per rule family.
//!
//! Every registry holds an allow map and a deny map. A request is rejected
//! when it satisfies every deny policy, accepted when there are no allow
//! policies, and otherwise accepted only if it satisfies every allow policy.

mod header;
mod ip_block;
mod jwt_auth;
mod source;
mod target;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::jwt::JwtRule;

pub use header::HeaderRule;
pub use ip_block::{IpBlockRequest, IpBlockRule};
pub use jwt_auth::JwtAuthRule;
pub use source::{namespace_of, SourceContext, SourceRule};
pub use target::{TargetRequest, TargetRule};

/// Trait implemented by every rule family for the request view it inspects
pub trait RuleMatch<Req: ?Sized>: Send + Sync {
    fn matches(&self, request: &Req) -> bool;
}

/// A rule registered under a policy name with its action
#[derive(Debug, Clone)]
pub struct NamedPolicy<R> {
    name: String,
    rule: R,
    allowed: bool,
}

impl<R> NamedPolicy<R> {
    pub fn new(name: impl Into<String>, rule: R, allowed: bool) -> Self {
        Self {
            name: name.into(),
            rule,
            allowed,
        }
    }

    pub fn allow(name: impl Into<String>, rule: R) -> Self {
        Self::new(name, rule, true)
    }

    pub fn deny(name: impl Into<String>, rule: R) -> Self {
        Self::new(name, rule, false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Concurrent allow/deny registry for one rule family.
///
/// Stored policies are immutable `Arc` snapshots: updates replace the whole
/// entry so readers always see a complete policy.
#[derive(Debug)]
pub struct PolicyRegistry<R> {
    allow: DashMap<String, Arc<NamedPolicy<R>>>,
    deny: DashMap<String, Arc<NamedPolicy<R>>>,
}

impl<R> Default for PolicyRegistry<R> {
    fn default() -> Self {
        Self {
            allow: DashMap::new(),
            deny: DashMap::new(),
        }
    }
}

impl<R> PolicyRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or overwrite a policy; the name is removed from the opposite map.
    pub fn add(&self, policy: NamedPolicy<R>) {
        let name = policy.name.clone();
        let policy = Arc::new(policy);
        if policy.allowed {
            self.allow.insert(name.clone(), policy);
            self.deny.remove(&name);
        } else {
            self.deny.insert(name.clone(), policy);
            self.allow.remove(&name);
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<NamedPolicy<R>>> {
        let allowed = self.allow.remove(name).map(|(_, p)| p);
        let denied = self.deny.remove(name).map(|(_, p)| p);
        allowed.or(denied)
    }

    pub fn get(&self, name: &str) -> Option<Arc<NamedPolicy<R>>> {
        self.allow
            .get(name)
            .or_else(|| self.deny.get(name))
            .map(|p| Arc::clone(p.value()))
    }

    pub fn clear(&self) {
        self.allow.clear();
        self.deny.clear();
    }

    /// Swap in a complete policy set. New entries are written before stale
    /// names are dropped, so concurrent readers never see an empty registry
    /// in the middle of a rebuild.
    pub fn replace_all(&self, policies: impl IntoIterator<Item = NamedPolicy<R>>) {
        let mut allow_names = HashSet::new();
        let mut deny_names = HashSet::new();
        for policy in policies {
            if policy.allowed {
                deny_names.remove(&policy.name);
                allow_names.insert(policy.name.clone());
            } else {
                allow_names.remove(&policy.name);
                deny_names.insert(policy.name.clone());
            }
            self.add(policy);
        }
        self.allow.retain(|name, _| allow_names.contains(name));
        self.deny.retain(|name, _| deny_names.contains(name));
    }

    pub fn len(&self) -> usize {
        self.allow.len() + self.deny.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    pub fn allow_len(&self) -> usize {
        self.allow.len()
    }

    pub fn deny_len(&self) -> usize {
        self.deny.len()
    }

    /// Policy names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .allow
            .iter()
            .chain(self.deny.iter())
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Deny-overrides-allow evaluation
    pub fn is_valid<Req: ?Sized>(&self, request: &Req) -> bool
    where
        R: RuleMatch<Req>,
    {
        if Self::all_match(&self.deny, request) == Some(true) {
            return false;
        }
        Self::all_match(&self.allow, request).unwrap_or(true)
    }

    /// `None` for an empty map, else whether every policy matches. Emptiness
    /// is decided by the same pass so a concurrent clear cannot flip a verdict.
    fn all_match<Req: ?Sized>(
        map: &DashMap<String, Arc<NamedPolicy<R>>>,
        request: &Req,
    ) -> Option<bool>
    where
        R: RuleMatch<Req>,
    {
        let mut seen = false;
        let all = map.iter().all(|entry| {
            seen = true;
            entry.value().rule.matches(request)
        });
        seen.then_some(all)
    }
}

/// Complete set of rules produced by one listener resolution
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    pub targets: Vec<NamedPolicy<TargetRule>>,
    pub sources: Vec<NamedPolicy<SourceRule>>,
    pub jwt_auth: Vec<NamedPolicy<JwtAuthRule>>,
    pub ip_blocks: Vec<NamedPolicy<IpBlockRule>>,
    pub headers: Vec<NamedPolicy<HeaderRule>>,
    pub jwt_rules: Vec<JwtRule>,
}

impl PolicySnapshot {
    pub fn policy_count(&self) -> usize {
        self.targets.len()
            + self.sources.len()
            + self.jwt_auth.len()
            + self.ip_blocks.len()
            + self.headers.len()
    }
}

/// All registries plus the JWT providers, shared between the discovery
/// client (writer) and the authorization engine (reader).
#[derive(Debug, Default)]
pub struct PolicyStore {
    target: PolicyRegistry<TargetRule>,
    source: PolicyRegistry<SourceRule>,
    jwt_auth: PolicyRegistry<JwtAuthRule>,
    ip_block: PolicyRegistry<IpBlockRule>,
    header: PolicyRegistry<HeaderRule>,
    jwt_rules: DashMap<String, Arc<JwtRule>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> &PolicyRegistry<TargetRule> {
        &self.target
    }

    pub fn source(&self) -> &PolicyRegistry<SourceRule> {
        &self.source
    }

    pub fn jwt_auth(&self) -> &PolicyRegistry<JwtAuthRule> {
        &self.jwt_auth
    }

    pub fn ip_block(&self) -> &PolicyRegistry<IpBlockRule> {
        &self.ip_block
    }

    pub fn header(&self) -> &PolicyRegistry<HeaderRule> {
        &self.header
    }

    pub fn add_jwt_rule(&self, rule: JwtRule) {
        self.jwt_rules.insert(rule.name().to_string(), Arc::new(rule));
    }

    pub fn remove_jwt_rule(&self, name: &str) -> Option<Arc<JwtRule>> {
        self.jwt_rules.remove(name).map(|(_, r)| r)
    }

    /// JWT providers sorted by name
    pub fn jwt_rules(&self) -> Vec<Arc<JwtRule>> {
        let mut rules: Vec<Arc<JwtRule>> =
            self.jwt_rules.iter().map(|e| Arc::clone(e.value())).collect();
        rules.sort_by(|a, b| a.name().cmp(b.name()));
        rules
    }

    /// Replace every registry with the contents of `snapshot`
    pub fn apply(&self, snapshot: PolicySnapshot) {
        self.target.replace_all(snapshot.targets);
        self.source.replace_all(snapshot.sources);
        self.jwt_auth.replace_all(snapshot.jwt_auth);
        self.ip_block.replace_all(snapshot.ip_blocks);
        self.header.replace_all(snapshot.headers);

        let names: HashSet<String> = snapshot
            .jwt_rules
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        for rule in snapshot.jwt_rules {
            self.add_jwt_rule(rule);
        }
        self.jwt_rules.retain(|name, _| names.contains(name));
    }

    pub fn clear(&self) {
        self.target.clear();
        self.source.clear();
        self.jwt_auth.clear();
        self.ip_block.clear();
        self.header.clear();
        self.jwt_rules.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
            && self.source.is_empty()
            && self.jwt_auth.is_empty()
            && self.ip_block.is_empty()
            && self.header.is_empty()
            && self.jwt_rules.is_empty()
    }
}
