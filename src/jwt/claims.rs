use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Verified JWT claim set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.str_claim("iss")
    }

    pub fn subject(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    /// Authorized party (`azp`)
    pub fn presenter(&self) -> Option<&str> {
        self.str_claim("azp")
    }

    /// `iss/sub`, the request principal used by identity rules
    pub fn request_principal(&self) -> String {
        format!(
            "{}/{}",
            self.issuer().unwrap_or_default(),
            self.subject().unwrap_or_default()
        )
    }

    /// Audience claim; a single string is treated as a one-element list
    pub fn audiences(&self) -> Vec<String> {
        self.claim_strings("aud")
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String values of a claim that is either a string or a string array
    pub fn claim_strings(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Base64url (unpadded) JSON payload, as forwarded to upstreams
    pub fn forward_payload(&self) -> String {
        let json = Value::Object(self.0.clone()).to_string();
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    fn str_claim(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(claims: Map<String, Value>) -> Self {
        Self(claims)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn claims(value: Value) -> Claims {
        match value {
            Value::Object(map) => Claims::new(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_standard_claims() {
        let c = claims(json!({"iss": "issuer", "sub": "user", "azp": "web", "aud": "api"}));
        assert_eq!(c.issuer(), Some("issuer"));
        assert_eq!(c.subject(), Some("user"));
        assert_eq!(c.presenter(), Some("web"));
        assert_eq!(c.request_principal(), "issuer/user");
        assert_eq!(c.audiences(), vec!["api"]);
    }

    #[test]
    fn test_claim_strings() {
        let c = claims(json!({"groups": ["a", "b", 3], "role": "admin", "n": 1}));
        assert_eq!(c.claim_strings("groups"), vec!["a", "b"]);
        assert_eq!(c.claim_strings("role"), vec!["admin"]);
        assert!(c.claim_strings("n").is_empty());
        assert!(c.claim_strings("missing").is_empty());
    }

    #[test]
    fn test_forward_payload_decodes_to_claims() {
        let c = claims(json!({"iss": "issuer", "sub": "user"}));
        let decoded = URL_SAFE_NO_PAD.decode(c.forward_payload()).unwrap();
        let back: Claims = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(back, c);
    }
}
