//! Request-time authorization over a shared [`PolicyStore`].

use std::fmt;
use std::sync::Arc;

use http::HeaderMap;
use thiserror::Error;
use tracing::debug;

use crate::jwt::{Claims, JwtRule};
use crate::rules::{IpBlockRequest, PolicyStore, SourceContext, TargetRequest};
use crate::types::{HttpRequest, QueryParams, SourceRequest, Verdict};

/// A token was found for a provider but failed verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("JWT rejected by provider {provider}")]
pub struct Denied {
    pub provider: String,
}

/// Claims together with the provider that verified them
#[derive(Debug, Clone)]
pub struct VerifiedJwt {
    pub claims: Claims,
    pub rule: Arc<JwtRule>,
}

impl VerifiedJwt {
    /// `(header, base64url payload)` when the provider forwards its payload
    pub fn forward_header(&self) -> Option<(String, String)> {
        self.rule
            .forward_payload_header()
            .map(|header| (header.to_string(), self.claims.forward_payload()))
    }
}

/// Which check rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    Jwt,
    IpBlock,
    Target,
    Source,
    JwtClaims,
    Header,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenyReason::Jwt => "jwt",
            DenyReason::IpBlock => "ip_block",
            DenyReason::Target => "target",
            DenyReason::Source => "source",
            DenyReason::JwtClaims => "jwt_claims",
            DenyReason::Header => "header",
        };
        f.write_str(s)
    }
}

/// Outcome of [`AuthEngine::authorize`]
#[derive(Debug, Clone)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: Option<DenyReason>,
    pub jwt: Option<VerifiedJwt>,
}

impl Decision {
    fn allow(jwt: Option<VerifiedJwt>) -> Self {
        Self {
            verdict: Verdict::Allow,
            reason: None,
            jwt,
        }
    }

    fn deny(reason: DenyReason) -> Self {
        Self {
            verdict: Verdict::Deny,
            reason: Some(reason),
            jwt: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict.is_allowed()
    }
}

/// Stateless evaluator; every call reads the current registry contents.
#[derive(Debug, Clone)]
pub struct AuthEngine {
    store: Arc<PolicyStore>,
}

impl AuthEngine {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn evaluate_target(&self, host: &str, port: u16, method: &str, path: &str) -> Verdict {
        let request = TargetRequest::new(host, port, method, path);
        Verdict::from_allowed(self.store.target().is_valid(&request))
    }

    pub fn evaluate_source(&self, source: &SourceRequest) -> Verdict {
        self.evaluate_source_with_claims(source, None)
    }

    /// Source evaluation with claims available to nested JWT constraints
    pub fn evaluate_source_with_claims(
        &self,
        source: &SourceRequest,
        claims: Option<&Claims>,
    ) -> Verdict {
        let request = SourceContext::new(source, claims);
        Verdict::from_allowed(self.store.source().is_valid(&request))
    }

    /// Find and verify the request's JWT.
    ///
    /// Providers are tried in name order; the first one that finds a token
    /// decides. `Ok(None)` means no provider found a token.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        params: &QueryParams,
    ) -> Result<Option<VerifiedJwt>, Denied> {
        for rule in self.store.jwt_rules() {
            let Some(token) = rule.extract_token(headers, params) else {
                continue;
            };
            return match rule.verify(&token) {
                Some(claims) => Ok(Some(VerifiedJwt { claims, rule })),
                None => {
                    debug!(provider = %rule.name(), "JWT verification failed");
                    Err(Denied {
                        provider: rule.name().to_string(),
                    })
                }
            };
        }
        Ok(None)
    }

    pub fn evaluate_jwt(
        &self,
        headers: &HeaderMap,
        params: &QueryParams,
    ) -> Result<Option<Claims>, Denied> {
        self.authenticate(headers, params)
            .map(|jwt| jwt.map(|jwt| jwt.claims))
    }

    /// JWT-claim policies; absent claims are always denied
    pub fn evaluate_jwt_claims(&self, claims: Option<&Claims>) -> Verdict {
        Verdict::from_allowed(self.store.jwt_auth().is_valid_claims(claims))
    }

    pub fn evaluate_ip_block(&self, source_ip: &str, dest_ip: &str, remote_ip: &str) -> Verdict {
        let request = IpBlockRequest::new(source_ip, dest_ip, remote_ip);
        Verdict::from_allowed(self.store.ip_block().is_valid(&request))
    }

    pub fn evaluate_headers(&self, headers: &HeaderMap) -> Verdict {
        Verdict::from_allowed(self.store.header().is_valid(headers))
    }

    /// Run every check against one inbound request
    pub fn authorize(&self, request: &HttpRequest) -> Decision {
        let jwt = match self.authenticate(&request.headers, &request.params) {
            Ok(jwt) => jwt,
            Err(_) => return self.denied(request, DenyReason::Jwt),
        };
        let claims = jwt.as_ref().map(|jwt| &jwt.claims);
        let source = &request.source;

        if !self
            .evaluate_ip_block(&source.source_ip, &source.dest_ip, &source.remote_ip)
            .is_allowed()
        {
            return self.denied(request, DenyReason::IpBlock);
        }

        if !self
            .evaluate_target(&request.host, request.port, &request.method, &request.path)
            .is_allowed()
        {
            return self.denied(request, DenyReason::Target);
        }

        if !self.evaluate_source_with_claims(source, claims).is_allowed() {
            return self.denied(request, DenyReason::Source);
        }

        // Claim policies only apply once a token was verified or policies exist
        let claims_checked = claims.is_some() || !self.store.jwt_auth().is_empty();
        if claims_checked && !self.evaluate_jwt_claims(claims).is_allowed() {
            return self.denied(request, DenyReason::JwtClaims);
        }

        if !self.evaluate_headers(&request.headers).is_allowed() {
            return self.denied(request, DenyReason::Header);
        }

        Decision::allow(jwt)
    }

    fn denied(&self, request: &HttpRequest, reason: DenyReason) -> Decision {
        debug!(
            host = %request.host,
            port = request.port,
            method = %request.method,
            path = %request.path,
            reason = %reason,
            "Request denied"
        );
        Decision::deny(reason)
    }
}
