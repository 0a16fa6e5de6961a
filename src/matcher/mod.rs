//! Matching primitives shared by every rule family.
//!
//! A rule is an [`AndRule`] of [`OrGroup`]s: every group must hold, and a group
//! holds when any of its matchers matches (inverted when the group is negated).

mod header;
mod ip;
mod string;

use std::num::NonZeroUsize;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub use header::{HeaderMatch, HeaderMatcher};
pub use ip::CidrRange;
pub use string::{MatchKind, StringMatcher, REGEX_CACHE_SIZE};

/// Trait for matchers over a single request attribute
pub trait ValueMatcher<T: ?Sized>: Send + Sync {
    /// Check if the value matches this matcher
    fn matches(&self, value: &T) -> bool;
}

/// Port matcher - exact integer equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMatcher(pub u32);

impl ValueMatcher<u32> for PortMatcher {
    fn matches(&self, value: &u32) -> bool {
        self.0 == *value
    }
}

impl ValueMatcher<u16> for PortMatcher {
    fn matches(&self, value: &u16) -> bool {
        self.0 == u32::from(*value)
    }
}

/// Disjunction of matchers with an optional negation
#[derive(Debug, Clone)]
pub struct OrGroup<M> {
    matchers: Vec<M>,
    negate: bool,
}

impl<M> OrGroup<M> {
    pub fn new(matchers: Vec<M>, negate: bool) -> Self {
        Self { matchers, negate }
    }

    /// Group with a single matcher
    pub fn of(matcher: M) -> Self {
        Self::new(vec![matcher], false)
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn matchers(&self) -> &[M] {
        &self.matchers
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// `(any matcher satisfies pred) XOR negate`
    pub fn is_satisfied_by(&self, pred: impl Fn(&M) -> bool) -> bool {
        self.matchers.iter().any(pred) != self.negate
    }

    pub fn matches<T: ?Sized>(&self, value: &T) -> bool
    where
        M: ValueMatcher<T>,
    {
        self.is_satisfied_by(|m| m.matches(value))
    }
}

/// Conjunction of [`OrGroup`]s. An empty rule imposes no constraint.
#[derive(Debug, Clone)]
pub struct AndRule<M> {
    groups: Vec<OrGroup<M>>,
}

impl<M> Default for AndRule<M> {
    fn default() -> Self {
        Self { groups: Vec::new() }
    }
}

impl<M> AndRule<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups(groups: Vec<OrGroup<M>>) -> Self {
        Self { groups }
    }

    /// Append a group; empty groups are ignored.
    pub fn push(&mut self, group: OrGroup<M>) {
        if !group.is_empty() {
            self.groups.push(group);
        }
    }

    pub fn with(mut self, group: OrGroup<M>) -> Self {
        self.push(group);
        self
    }

    pub fn groups(&self) -> &[OrGroup<M>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Every group satisfied under `pred`
    pub fn all_groups(&self, pred: impl Fn(&OrGroup<M>) -> bool) -> bool {
        self.groups.iter().all(pred)
    }

    pub fn matches<T: ?Sized>(&self, value: &T) -> bool
    where
        M: ValueMatcher<T>,
    {
        self.all_groups(|g| g.matches(value))
    }
}

const REPORTED_CACHE_SIZE: usize = 256;

static REPORTED: Lazy<Mutex<LruCache<String, ()>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(REPORTED_CACHE_SIZE).expect("REPORTED_CACHE_SIZE is non-zero"),
    ))
});

/// Returns true the first time `key` is seen (while it stays in the LRU window).
pub(crate) fn first_report(key: &str) -> bool {
    let mut reported = REPORTED.lock();
    if reported.contains(key) {
        return false;
    }
    reported.put(key.to_string(), ());
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_group_any_match() {
        let group = OrGroup::new(vec![PortMatcher(80), PortMatcher(443)], false);
        assert!(group.matches(&80u32));
        assert!(group.matches(&443u32));
        assert!(!group.matches(&8080u32));
    }

    #[test]
    fn test_or_group_negated() {
        let group = OrGroup::new(vec![PortMatcher(80), PortMatcher(443)], true);
        assert!(!group.matches(&80u32));
        assert!(group.matches(&8080u32));
    }

    #[test]
    fn test_and_rule_all_groups() {
        let rule = AndRule::new()
            .with(OrGroup::new(vec![PortMatcher(80), PortMatcher(8080)], false))
            .with(OrGroup::of(PortMatcher(80)).negated());
        assert!(rule.matches(&8080u32));
        assert!(!rule.matches(&80u32));
        assert!(!rule.matches(&443u32));
    }

    #[test]
    fn test_empty_and_rule_matches_everything() {
        let rule: AndRule<PortMatcher> = AndRule::new();
        assert!(rule.is_empty());
        assert!(rule.matches(&1u32));
    }

    #[test]
    fn test_empty_group_is_ignored() {
        let rule: AndRule<PortMatcher> = AndRule::new().with(OrGroup::new(vec![], false));
        assert!(rule.is_empty());
    }

    #[test]
    fn test_port_matcher_u16() {
        assert!(PortMatcher(8080).matches(&8080u16));
        assert!(!PortMatcher(8080).matches(&8081u16));
    }

    #[test]
    fn test_first_report() {
        assert!(first_report("matcher-test-key"));
        assert!(!first_report("matcher-test-key"));
    }
}
