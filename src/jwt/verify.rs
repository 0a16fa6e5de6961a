use std::collections::HashSet;

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Claims, JwtRule};

/// Verify a compact JWT against the rule's key set and return its claims.
///
/// Only the signature, issuer and audiences are checked; expiry and
/// not-before are left to the caller. Any failure yields `None`.
pub fn verify_and_extract_claims(token: &str, rule: &JwtRule) -> Option<Claims> {
    let Some(keys) = rule.key_set() else {
        debug!(rule = %rule.name(), "JWT rule has no usable keys");
        return None;
    };

    let header = match decode_header(token) {
        Ok(header) => header,
        Err(e) => {
            warn!(rule = %rule.name(), error = %e, "Malformed JWT");
            return None;
        }
    };

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let candidates: Vec<&Jwk> = match header.kid.as_deref().and_then(|kid| keys.find(kid)) {
        Some(jwk) => vec![jwk],
        None => keys.keys.iter().collect(),
    };

    let claims = candidates.into_iter().find_map(|jwk| {
        let key = DecodingKey::from_jwk(jwk).ok()?;
        decode::<Value>(token, &key, &validation).ok()
    });

    let claims = match claims.map(|data| data.claims) {
        Some(Value::Object(map)) => Claims::new(map),
        Some(_) => {
            warn!(rule = %rule.name(), "JWT payload is not a JSON object");
            return None;
        }
        None => {
            warn!(rule = %rule.name(), "JWT signature verification failed");
            return None;
        }
    };

    if !rule.issuer().is_empty() && claims.issuer() != Some(rule.issuer()) {
        debug!(rule = %rule.name(), issuer = ?claims.issuer(), "JWT issuer mismatch");
        return None;
    }

    if !rule.audiences().is_empty()
        && !claims
            .audiences()
            .iter()
            .any(|aud| rule.audiences().contains(aud))
    {
        debug!(rule = %rule.name(), "JWT audience mismatch");
        return None;
    }

    Some(claims)
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;

    use super::*;

    const SECRET: &[u8] = b"xds-authz-test-signing-key-0123456789ab";

    fn jwks(kid: &str) -> String {
        json!({
            "keys": [{"kty": "oct", "kid": kid, "alg": "HS256", "k": URL_SAFE_NO_PAD.encode(SECRET)}]
        })
        .to_string()
    }

    fn sign(kid: Option<&str>, claims: Value) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(String::from);
        encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[test]
    fn test_issuer_round_trip() {
        let rule = JwtRule::new("p", jwks("k1")).with_issuer("https://issuer.example");
        let token = sign(Some("k1"), json!({"iss": "https://issuer.example", "sub": "alice"}));
        let claims = verify_and_extract_claims(&token, &rule).unwrap();
        assert_eq!(claims.issuer(), Some("https://issuer.example"));
        assert_eq!(claims.subject(), Some("alice"));
    }

    #[test]
    fn test_issuer_mismatch() {
        let rule = JwtRule::new("p", jwks("k1")).with_issuer("https://issuer.example");
        let token = sign(Some("k1"), json!({"iss": "https://other.example", "sub": "alice"}));
        assert!(verify_and_extract_claims(&token, &rule).is_none());
    }

    #[test]
    fn test_expired_token_still_verifies() {
        let rule = JwtRule::new("p", jwks("k1"));
        let token = sign(Some("k1"), json!({"iss": "i", "exp": 1}));
        assert!(verify_and_extract_claims(&token, &rule).is_some());
    }

    #[test]
    fn test_unknown_kid_tries_all_keys() {
        let rule = JwtRule::new("p", jwks("k1"));
        let token = sign(Some("other"), json!({"iss": "i"}));
        assert!(verify_and_extract_claims(&token, &rule).is_some());
        let token = sign(None, json!({"iss": "i"}));
        assert!(verify_and_extract_claims(&token, &rule).is_some());
    }

    #[test]
    fn test_audience_intersection() {
        let rule = JwtRule::new("p", jwks("k1")).with_audiences(["api", "web"]);
        let token = sign(Some("k1"), json!({"aud": ["mobile", "web"]}));
        assert!(verify_and_extract_claims(&token, &rule).is_some());
        let token = sign(Some("k1"), json!({"aud": "api"}));
        assert!(verify_and_extract_claims(&token, &rule).is_some());
        let token = sign(Some("k1"), json!({"aud": "mobile"}));
        assert!(verify_and_extract_claims(&token, &rule).is_none());
        let token = sign(Some("k1"), json!({"sub": "no-aud"}));
        assert!(verify_and_extract_claims(&token, &rule).is_none());
    }

    #[test]
    fn test_bad_signature() {
        let rule = JwtRule::new("p", jwks("k1"));
        let header = Header::new(Algorithm::HS256);
        let token = encode(&header, &json!({"iss": "i"}), &EncodingKey::from_secret(b"wrong-key")).unwrap();
        assert!(verify_and_extract_claims(&token, &rule).is_none());
    }

    #[test]
    fn test_garbage_token() {
        let rule = JwtRule::new("p", jwks("k1"));
        assert!(verify_and_extract_claims("not-a-jwt", &rule).is_none());
        assert!(verify_and_extract_claims("a.b.c", &rule).is_none());
    }

    #[test]
    fn test_rule_without_keys() {
        let rule = JwtRule::new("p", "");
        let token = sign(Some("k1"), json!({"iss": "i"}));
        assert!(verify_and_extract_claims(&token, &rule).is_none());
    }
}
