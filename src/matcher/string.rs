use std::num::NonZeroUsize;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::{first_report, ValueMatcher};

/// Capacity of the compiled-regex cache
pub const REGEX_CACHE_SIZE: usize = 1024;

/// Compiled patterns keyed by (pattern, ignore_case). `None` records a pattern
/// that failed to compile so it is not retried on every request.
static REGEX_CACHE: Lazy<Mutex<LruCache<(String, bool), Option<Regex>>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_SIZE).expect("REGEX_CACHE_SIZE is non-zero"),
    ))
});

/// String matching mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Exact,
    Prefix,
    Suffix,
    Contains,
    /// Full-string match against a regular expression
    Regex,
}

/// String matcher with optional case folding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StringMatcher {
    kind: MatchKind,
    pattern: String,
    ignore_case: bool,
}

impl StringMatcher {
    pub fn new(kind: MatchKind, pattern: impl Into<String>, ignore_case: bool) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            ignore_case,
        }
    }

    pub fn exact(pattern: impl Into<String>) -> Self {
        Self::new(MatchKind::Exact, pattern, false)
    }

    pub fn prefix(pattern: impl Into<String>) -> Self {
        Self::new(MatchKind::Prefix, pattern, false)
    }

    pub fn suffix(pattern: impl Into<String>) -> Self {
        Self::new(MatchKind::Suffix, pattern, false)
    }

    pub fn contains(pattern: impl Into<String>) -> Self {
        Self::new(MatchKind::Contains, pattern, false)
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(MatchKind::Regex, pattern, false)
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Match a possibly absent value; absent and empty values never match.
    pub fn matches_opt(&self, value: Option<&str>) -> bool {
        value.is_some_and(|v| self.matches_str(v))
    }

    pub fn matches_str(&self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }

        if self.kind == MatchKind::Regex {
            return match compiled_regex(&self.pattern, self.ignore_case) {
                Some(re) => re.is_match(value),
                None => false,
            };
        }

        if self.ignore_case {
            let value = value.to_lowercase();
            let pattern = self.pattern.to_lowercase();
            Self::apply(self.kind, &value, &pattern)
        } else {
            Self::apply(self.kind, value, &self.pattern)
        }
    }

    fn apply(kind: MatchKind, value: &str, pattern: &str) -> bool {
        match kind {
            MatchKind::Exact => value == pattern,
            MatchKind::Prefix => value.starts_with(pattern),
            MatchKind::Suffix => value.ends_with(pattern),
            MatchKind::Contains => value.contains(pattern),
            MatchKind::Regex => false,
        }
    }
}

impl ValueMatcher<str> for StringMatcher {
    fn matches(&self, value: &str) -> bool {
        self.matches_str(value)
    }
}

impl ValueMatcher<String> for StringMatcher {
    fn matches(&self, value: &String) -> bool {
        self.matches_str(value)
    }
}

/// Look up or compile an anchored regex. Compilation failures are cached as
/// `None` and reported once.
fn compiled_regex(pattern: &str, ignore_case: bool) -> Option<Regex> {
    let key = (pattern.to_string(), ignore_case);
    let mut cache = REGEX_CACHE.lock();
    if let Some(cached) = cache.get(&key) {
        return cached.clone();
    }

    // CPU-only work; compiling under the lock keeps concurrent callers from
    // compiling the same pattern twice.
    let compiled = match RegexBuilder::new(&format!("^(?:{})$", pattern))
        .case_insensitive(ignore_case)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            if first_report(&format!("regex:{}", pattern)) {
                warn!(pattern = %pattern, error = %e, "Invalid regex in string matcher, treating as no-match");
            }
            None
        }
    };
    cache.put(key, compiled.clone());
    compiled
}
