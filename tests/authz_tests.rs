//! Authorization engine tests through the public API.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderName, HeaderValue};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use xds_authz_r::matcher::{
    AndRule, CidrRange, HeaderMatcher, OrGroup, PortMatcher, StringMatcher, ValueMatcher,
};
use xds_authz_r::rules::{
    HeaderRule, IpBlockRule, JwtAuthRule, NamedPolicy, PolicySnapshot, PolicyStore, SourceRule,
    TargetRule,
};
use xds_authz_r::{
    AuthEngine, DenyReason, HttpRequest, JwtRule, QueryParams, SourceRequest, TokenLocation,
    Verdict,
};

const SECRET: &[u8] = b"xds-authz-test-signing-key-0123456789ab";
const ISSUER: &str = "https://issuer.example";

fn engine() -> AuthEngine {
    AuthEngine::new(Arc::new(PolicyStore::new()))
}

fn jwks() -> String {
    json!({
        "keys": [{"kty": "oct", "kid": "k1", "alg": "HS256", "k": URL_SAFE_NO_PAD.encode(SECRET)}]
    })
    .to_string()
}

fn sign(claims: Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".into());
    encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
    headers
}

fn port_rule(ports: &[u32]) -> TargetRule {
    TargetRule {
        ports: AndRule::new().with(OrGroup::new(
            ports.iter().copied().map(PortMatcher).collect(),
            false,
        )),
        ..Default::default()
    }
}

mod matcher_tests {
    use super::*;

    #[test]
    fn test_cidr_zero_prefix_matches_every_ipv4() {
        let range = CidrRange::new("0.0.0.0", Some(0));
        for addr in ["1.2.3.4", "10.0.0.1", "255.255.255.255", "0.0.0.0"] {
            assert!(range.matches(addr), "{}", addr);
        }
    }

    #[test]
    fn test_cidr_full_prefix_matches_only_itself() {
        let range = CidrRange::new("10.1.2.3", Some(32));
        assert!(range.matches("10.1.2.3"));
        assert!(!range.matches("10.1.2.4"));
        assert!(!range.matches("not-an-ip"));
    }

    #[test]
    fn test_exact_matcher_is_reflexive() {
        for value in ["svc.ns.svc.cluster.local", "GET", "/api/v1", "ünï"] {
            assert!(StringMatcher::exact(value).matches(value));
        }
    }

    #[test]
    fn test_header_matcher_any_value() {
        let matcher = HeaderMatcher::value("x-env", StringMatcher::exact("prod"));
        let mut headers = HeaderMap::new();
        headers.append(HeaderName::from_bytes(b"X-Env").unwrap(), HeaderValue::from_static("dev"));
        headers.append("x-env", HeaderValue::from_static("prod"));
        assert!(matcher.matches(&headers));
    }
}

mod registry_tests {
    use super::*;

    #[test]
    fn test_reregistration_is_idempotent() {
        let engine = engine();
        let policy = || NamedPolicy::allow("web", port_rule(&[8080]));
        engine.store().target().add(policy());
        let first = engine.evaluate_target("h", 8080, "GET", "/");
        engine.store().target().add(policy());
        assert_eq!(engine.store().target().len(), 1);
        assert_eq!(engine.evaluate_target("h", 8080, "GET", "/"), first);
    }

    #[test]
    fn test_deny_overrides_allow() {
        let engine = engine();
        engine
            .store()
            .target()
            .add(NamedPolicy::allow("allow-8080", port_rule(&[8080])));
        engine
            .store()
            .target()
            .add(NamedPolicy::deny("deny-8080", port_rule(&[8080])));
        assert_eq!(engine.evaluate_target("h", 8080, "GET", "/"), Verdict::Deny);
    }

    #[test]
    fn test_renaming_action_moves_policy() {
        let engine = engine();
        let target = engine.store().target();
        target.add(NamedPolicy::deny("p", port_rule(&[80])));
        target.add(NamedPolicy::allow("p", port_rule(&[80])));
        assert_eq!(target.allow_len(), 1);
        assert_eq!(target.deny_len(), 0);
    }

    #[test]
    fn test_fail_open_everywhere() {
        let engine = engine();
        let request = HttpRequest::new("anything", 1, "PATCH", "/x")
            .with_source(SourceRequest::new("").with_ips("1.1.1.1", "2.2.2.2", "3.3.3.3"));
        assert!(engine.authorize(&request).is_allowed());
        assert_eq!(engine.evaluate_source(&request.source), Verdict::Allow);
        assert_eq!(engine.evaluate_headers(&HeaderMap::new()), Verdict::Allow);
        assert_eq!(
            engine.evaluate_ip_block("1.1.1.1", "2.2.2.2", "3.3.3.3"),
            Verdict::Allow
        );
    }

    #[test]
    fn test_snapshot_apply_drops_stale_policies() {
        let store = Arc::new(PolicyStore::new());
        store.target().add(NamedPolicy::allow("old", port_rule(&[1])));
        store.apply(PolicySnapshot {
            targets: vec![NamedPolicy::allow("new", port_rule(&[2]))],
            ..Default::default()
        });
        assert_eq!(store.target().names(), vec!["new".to_string()]);
    }
}

mod engine_tests {
    use super::*;

    #[test]
    fn test_target_scenario() {
        let engine = engine();
        let rule = TargetRule {
            hosts: AndRule::new().with(OrGroup::of(StringMatcher::exact("svc.ns"))),
            ports: AndRule::new().with(OrGroup::new(vec![PortMatcher(80), PortMatcher(8080)], false)),
            methods: AndRule::new().with(OrGroup::of(StringMatcher::prefix("GET"))),
            paths: AndRule::new(),
        };
        engine.store().target().add(NamedPolicy::allow("svc", rule));

        assert_eq!(engine.evaluate_target("svc.ns", 80, "GET", "/"), Verdict::Allow);
        assert_eq!(engine.evaluate_target("svc.ns", 8080, "GET", "/"), Verdict::Allow);
        assert_eq!(engine.evaluate_target("svc.ns", 81, "GET", "/"), Verdict::Deny);
        assert_eq!(engine.evaluate_target("svc.ns", 80, "POST", "/"), Verdict::Deny);
        assert_eq!(engine.evaluate_target("other.ns", 80, "GET", "/"), Verdict::Deny);
    }

    #[test]
    fn test_health_check_rule() {
        let engine = engine();
        let r1 = TargetRule {
            ports: AndRule::new().with(OrGroup::of(PortMatcher(8080))),
            methods: AndRule::new().with(OrGroup::of(StringMatcher::prefix("GET"))),
            paths: AndRule::new().with(OrGroup::of(StringMatcher::exact("/health"))),
            ..Default::default()
        };
        engine.store().target().add(NamedPolicy::allow("r1", r1));

        assert_eq!(engine.evaluate_target("any.host", 8080, "GET", "/health"), Verdict::Allow);
        assert_eq!(engine.evaluate_target("any.host", 8080, "POST", "/health"), Verdict::Deny);
        assert_eq!(engine.evaluate_target("any.host", 8080, "GET", "/other"), Verdict::Deny);
        assert_eq!(engine.evaluate_target("any.host", 9090, "GET", "/health"), Verdict::Deny);
    }

    #[test]
    fn test_source_namespace_from_principal() {
        let engine = engine();
        engine.store().source().add(NamedPolicy::allow(
            "ns",
            SourceRule {
                namespaces: AndRule::new().with(OrGroup::of(StringMatcher::exact("default"))),
                ..Default::default()
            },
        ));
        assert_eq!(
            engine.evaluate_source(&SourceRequest::new("cluster.local/ns/default/sa/sleep")),
            Verdict::Allow
        );
        assert_eq!(
            engine.evaluate_source(&SourceRequest::new("cluster.local/ns/other/sa/sleep")),
            Verdict::Deny
        );
        assert_eq!(
            engine.evaluate_source(
                &SourceRequest::new("cluster.local/ns/other/sa/sleep").with_namespace("default")
            ),
            Verdict::Allow
        );
    }

    #[test]
    fn test_negated_ip_block() {
        let engine = engine();
        engine.store().ip_block().add(NamedPolicy::allow(
            "not-internal",
            IpBlockRule {
                remote_ips: AndRule::new()
                    .with(OrGroup::of(CidrRange::new("10.0.0.0", Some(8))).negated()),
                ..Default::default()
            },
        ));
        assert_eq!(engine.evaluate_ip_block("", "", "192.168.0.1"), Verdict::Allow);
        assert_eq!(engine.evaluate_ip_block("", "", "10.9.9.9"), Verdict::Deny);
    }

    #[test]
    fn test_jwt_issuer_round_trip() {
        let engine = engine();
        engine
            .store()
            .add_jwt_rule(JwtRule::new("origins-0", jwks()).with_issuer(ISSUER));

        let token = sign(json!({"iss": ISSUER, "sub": "alice"}));
        let headers = bearer(&token);
        let claims = engine
            .evaluate_jwt(&headers, &QueryParams::new())
            .unwrap()
            .expect("claims");
        assert_eq!(claims.issuer(), Some(ISSUER));
        assert_eq!(claims.subject(), Some("alice"));

        let wrong = sign(json!({"iss": "https://evil.example", "sub": "alice"}));
        let headers = bearer(&wrong);
        let denied = engine.evaluate_jwt(&headers, &QueryParams::new()).unwrap_err();
        assert_eq!(denied.provider, "origins-0");
    }

    #[test]
    fn test_jwt_issuer_and_audience() {
        let engine = engine();
        engine.store().add_jwt_rule(
            JwtRule::new("p", jwks())
                .with_issuer("iss1")
                .with_audiences(["aud1"]),
        );
        let evaluate = |claims: Value| {
            engine.evaluate_jwt(&bearer(&sign(claims)), &QueryParams::new())
        };

        let claims = evaluate(json!({"iss": "iss1", "aud": "aud1"})).unwrap().unwrap();
        assert_eq!(claims.issuer(), Some("iss1"));
        assert!(evaluate(json!({"iss": "iss1", "aud": ["other", "aud1"]})).unwrap().is_some());

        assert!(evaluate(json!({"iss": "iss2", "aud": "aud1"})).is_err());
        assert!(evaluate(json!({"iss": "iss1", "aud": "aud2"})).is_err());
        assert!(evaluate(json!({"iss": "iss1"})).is_err());
    }

    #[test]
    fn test_jwt_from_query_param() {
        let engine = engine();
        engine.store().add_jwt_rule(
            JwtRule::new("p", jwks()).with_location(TokenLocation::param("access_token")),
        );
        let token = sign(json!({"iss": ISSUER}));
        let params = QueryParams::parse(&format!("access_token={}", token));
        assert!(engine.evaluate_jwt(&HeaderMap::new(), &params).unwrap().is_some());

        // Percent-encoded dots decode back to the compact token
        let encoded = token.replace('.', "%2E");
        let params = QueryParams::parse(&format!("?access_token={}", encoded));
        assert!(engine.evaluate_jwt(&HeaderMap::new(), &params).unwrap().is_some());
    }

    #[test]
    fn test_authorize_with_claim_policy_and_forwarding() {
        let engine = engine();
        engine.store().add_jwt_rule(
            JwtRule::new("p", jwks())
                .with_issuer(ISSUER)
                .with_forward("x-jwt-payload", false),
        );
        engine.store().jwt_auth().add(NamedPolicy::allow(
            "admins",
            JwtAuthRule::new().with_claim(
                "groups",
                AndRule::new().with(OrGroup::of(StringMatcher::exact("admin"))),
            ),
        ));

        let admin = sign(json!({"iss": ISSUER, "sub": "alice", "groups": ["dev", "admin"]}));
        let request = HttpRequest::new("h", 80, "GET", "/")
            .with_headers(bearer(&admin));
        let decision = engine.authorize(&request);
        assert!(decision.is_allowed());
        let (header, payload) = decision.jwt.unwrap().forward_header().unwrap();
        assert_eq!(header, "x-jwt-payload");
        let decoded: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert_eq!(decoded["sub"], "alice");

        let dev = sign(json!({"iss": ISSUER, "sub": "bob", "groups": ["dev"]}));
        let request = HttpRequest::new("h", 80, "GET", "/")
            .with_headers(bearer(&dev));
        assert_eq!(engine.authorize(&request).reason, Some(DenyReason::JwtClaims));

        // No token while claim policies exist
        let anonymous = HttpRequest::new("h", 80, "GET", "/");
        assert_eq!(engine.authorize(&anonymous).reason, Some(DenyReason::JwtClaims));
    }

    #[test]
    fn test_header_rule() {
        let engine = engine();
        engine.store().header().add(NamedPolicy::deny(
            "no-debug",
            HeaderRule::new(AndRule::new().with(OrGroup::of(HeaderMatcher::present("x-debug")))),
        ));
        let mut debug = HeaderMap::new();
        debug.insert("x-debug", HeaderValue::from_static("1"));
        assert_eq!(engine.evaluate_headers(&debug), Verdict::Deny);
        let mut trace = HeaderMap::new();
        trace.insert("x-trace", HeaderValue::from_static("1"));
        assert_eq!(engine.evaluate_headers(&trace), Verdict::Allow);
    }
}
