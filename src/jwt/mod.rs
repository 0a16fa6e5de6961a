//! JWT provider rules, token extraction and signature verification.

mod claims;
mod verify;

use std::collections::HashSet;
use std::sync::Arc;

use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::jwk::JwkSet;
use tracing::warn;

use crate::types::{header_value, QueryParams};

pub use claims::Claims;
pub use verify::verify_and_extract_claims;

/// Default prefix stripped from header-carried tokens
pub const BEARER_PREFIX: &str = "Bearer ";

/// Where a provider looks for its token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLocation {
    /// Header whose value must start with `value_prefix`
    Header { name: String, value_prefix: String },
    /// Query parameter carrying the raw token
    Param { name: String },
}

impl TokenLocation {
    /// Header location; an empty prefix falls back to `"Bearer "`.
    pub fn header(name: impl Into<String>, value_prefix: impl Into<String>) -> Self {
        let value_prefix = value_prefix.into();
        TokenLocation::Header {
            name: name.into(),
            value_prefix: if value_prefix.is_empty() {
                BEARER_PREFIX.to_string()
            } else {
                value_prefix
            },
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        TokenLocation::Param { name: name.into() }
    }
}

/// A JWT provider: key set, expected issuer/audiences and token locations.
#[derive(Debug, Clone, Default)]
pub struct JwtRule {
    name: String,
    jwks: String,
    keys: Option<Arc<JwkSet>>,
    issuer: String,
    audiences: HashSet<String>,
    locations: Vec<TokenLocation>,
    forward_payload_header: String,
    forward: bool,
}

impl JwtRule {
    /// Create a rule from an inline JWKS document. A JWKS that fails to parse
    /// is kept as text but no token will ever verify against it.
    pub fn new(name: impl Into<String>, jwks: impl Into<String>) -> Self {
        let name = name.into();
        let jwks = jwks.into();
        let keys = if jwks.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<JwkSet>(&jwks) {
                Ok(set) => Some(Arc::new(set)),
                Err(e) => {
                    warn!(rule = %name, error = %e, "Invalid JWKS in JWT rule");
                    None
                }
            }
        };

        Self {
            name,
            jwks,
            keys,
            ..Default::default()
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_location(mut self, location: TokenLocation) -> Self {
        self.locations.push(location);
        self
    }

    pub fn with_forward(mut self, forward_payload_header: impl Into<String>, forward: bool) -> Self {
        self.forward_payload_header = forward_payload_header.into();
        self.forward = forward;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn jwks(&self) -> &str {
        &self.jwks
    }

    pub(crate) fn key_set(&self) -> Option<&JwkSet> {
        self.keys.as_deref()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audiences(&self) -> &HashSet<String> {
        &self.audiences
    }

    pub fn locations(&self) -> &[TokenLocation] {
        &self.locations
    }

    /// Header the verified payload should be forwarded in, if any
    pub fn forward_payload_header(&self) -> Option<&str> {
        if self.forward_payload_header.is_empty() {
            None
        } else {
            Some(&self.forward_payload_header)
        }
    }

    /// Whether the original token should be forwarded upstream
    pub fn forward(&self) -> bool {
        self.forward
    }

    /// Pull this provider's token out of a request.
    ///
    /// Header locations are tried first (first value only, prefix stripped),
    /// then query parameters, then the `Authorization` header.
    pub fn extract_token(&self, headers: &HeaderMap, params: &QueryParams) -> Option<String> {
        for location in &self.locations {
            if let TokenLocation::Header { name, value_prefix } = location {
                if let Some(token) = header_value(headers, name)
                    .filter(|v| !v.is_empty())
                    .and_then(|v| v.strip_prefix(value_prefix.as_str()))
                {
                    return Some(token.to_string());
                }
            }
        }

        for location in &self.locations {
            if let TokenLocation::Param { name } = location {
                if let Some(token) = params.first(name) {
                    return non_empty(token);
                }
            }
        }

        let token = headers.get(AUTHORIZATION)?.to_str().ok()?;
        non_empty(token.strip_prefix(BEARER_PREFIX).unwrap_or(token))
    }

    /// Verify `token` against this provider, see [`verify_and_extract_claims`].
    pub fn verify(&self, token: &str) -> Option<Claims> {
        verify_and_extract_claims(token, self)
    }
}

fn non_empty(token: &str) -> Option<String> {
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> JwtRule {
        JwtRule::new("provider", "")
            .with_location(TokenLocation::header("x-jwt", "Token "))
            .with_location(TokenLocation::param("access_token"))
    }

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(name, value)| (name.parse().unwrap(), value.parse().unwrap()))
            .collect()
    }

    #[test]
    fn test_extract_from_header_location() {
        let headers = header_map(&[("X-JWT", "Token abc.def.ghi")]);
        let token = rule().extract_token(&headers, &QueryParams::new());
        assert_eq!(token.as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_header_without_prefix_is_skipped() {
        let headers = header_map(&[("x-jwt", "abc.def.ghi")]);
        let params = QueryParams::new().with("access_token", "from.param.x");
        let token = rule().extract_token(&headers, &params);
        assert_eq!(token.as_deref(), Some("from.param.x"));
    }

    #[test]
    fn test_param_token_is_percent_decoded() {
        let params = QueryParams::parse("access_token=abc%2Edef.ghi");
        let token = rule().extract_token(&HeaderMap::new(), &params);
        assert_eq!(token.as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_fallback_to_authorization_header() {
        let headers = header_map(&[("Authorization", "Bearer a.b.c")]);
        let token = rule().extract_token(&headers, &QueryParams::new());
        assert_eq!(token.as_deref(), Some("a.b.c"));

        let headers = header_map(&[("Authorization", "a.b.c")]);
        let token = rule().extract_token(&headers, &QueryParams::new());
        assert_eq!(token.as_deref(), Some("a.b.c"));
    }

    #[test]
    fn test_no_token() {
        assert!(rule().extract_token(&HeaderMap::new(), &QueryParams::new()).is_none());
        let headers = header_map(&[("Authorization", "Bearer ")]);
        assert!(rule().extract_token(&headers, &QueryParams::new()).is_none());
    }

    #[test]
    fn test_default_header_prefix() {
        let location = TokenLocation::header("x-auth", "");
        assert_eq!(
            location,
            TokenLocation::Header {
                name: "x-auth".into(),
                value_prefix: "Bearer ".into()
            }
        );
    }

    #[test]
    fn test_invalid_jwks_has_no_keys() {
        let rule = JwtRule::new("bad", "{not json");
        assert!(rule.key_set().is_none());
        assert_eq!(rule.jwks(), "{not json");
    }

    #[test]
    fn test_forward_metadata() {
        let rule = JwtRule::new("p", "").with_forward("x-jwt-payload", true);
        assert_eq!(rule.forward_payload_header(), Some("x-jwt-payload"));
        assert!(rule.forward());
        assert!(JwtRule::new("p", "").forward_payload_header().is_none());
    }
}
