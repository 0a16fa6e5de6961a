use http::HeaderMap;

use super::RuleMatch;
use crate::matcher::{AndRule, HeaderMatcher};

/// Header constraints. Each group tests one header name.
#[derive(Debug, Clone, Default)]
pub struct HeaderRule {
    pub headers: AndRule<HeaderMatcher>,
}

impl HeaderRule {
    pub fn new(headers: AndRule<HeaderMatcher>) -> Self {
        Self { headers }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl RuleMatch<HeaderMap> for HeaderRule {
    fn matches(&self, request: &HeaderMap) -> bool {
        self.headers.matches(request)
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;
    use crate::matcher::{OrGroup, StringMatcher};

    #[test]
    fn test_header_rule() {
        let rule = HeaderRule::new(
            AndRule::new()
                .with(OrGroup::of(HeaderMatcher::value("x-env", StringMatcher::exact("prod"))))
                .with(OrGroup::of(HeaderMatcher::present("x-debug")).negated()),
        );
        let mut headers = HeaderMap::new();
        headers.insert("x-env", HeaderValue::from_static("prod"));
        assert!(rule.matches(&headers));
        headers.insert("x-debug", HeaderValue::from_static("1"));
        assert!(!rule.matches(&headers));
        assert!(!rule.matches(&HeaderMap::new()));
    }
}
