use super::{StringMatcher, ValueMatcher};
use http::HeaderMap;

use crate::types::header_values;

/// How a header value is tested
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeaderMatch {
    /// Header only needs to be present
    Present,
    Value(StringMatcher),
}

/// Header matcher; any value of a repeated header may satisfy it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderMatcher {
    name: String,
    rule: HeaderMatch,
    invert: bool,
}

impl HeaderMatcher {
    pub fn new(name: impl Into<String>, rule: HeaderMatch) -> Self {
        Self {
            name: name.into(),
            rule,
            invert: false,
        }
    }

    pub fn present(name: impl Into<String>) -> Self {
        Self::new(name, HeaderMatch::Present)
    }

    pub fn value(name: impl Into<String>, matcher: StringMatcher) -> Self {
        Self::new(name, HeaderMatch::Value(matcher))
    }

    pub fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &HeaderMatch {
        &self.rule
    }

    pub fn matches_headers(&self, headers: &HeaderMap) -> bool {
        let matched = match &self.rule {
            HeaderMatch::Present => headers.contains_key(self.name.as_str()),
            HeaderMatch::Value(m) => header_values(headers, &self.name).any(|v| m.matches_str(v)),
        };
        matched != self.invert
    }
}

impl ValueMatcher<HeaderMap> for HeaderMatcher {
    fn matches(&self, value: &HeaderMap) -> bool {
        self.matches_headers(value)
    }
}
