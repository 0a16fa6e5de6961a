use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue, Uri};

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Verdict::Allow
        } else {
            Verdict::Deny
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => f.write_str("allow"),
            Verdict::Deny => f.write_str("deny"),
        }
    }
}

/// Values of header `name` that are visible ASCII, in insertion order.
/// Lookup is case-insensitive; an invalid name yields nothing.
pub fn header_values<'a>(headers: &'a HeaderMap, name: &str) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .get_all(name)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
}

/// First readable value of header `name`
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    header_values(headers, name).next()
}

/// Multi-valued, percent-decoded query parameters (names are case-sensitive).
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parse a raw `application/x-www-form-urlencoded` query (`a=1&b=2`),
    /// with or without the leading `?`.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        form_urlencoded::parse(query.as_bytes()).collect()
    }

    /// Query parameters of a request URI
    pub fn from_uri(uri: &Uri) -> Self {
        uri.query().map(Self::parse).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Identity attributes of the calling workload
#[derive(Debug, Clone, Default)]
pub struct SourceRequest {
    /// mTLS principal, e.g. `cluster.local/ns/default/sa/sleep`
    pub principal: String,
    /// Namespace; derived from the principal when empty
    pub namespace: String,
    pub source_ip: String,
    pub dest_ip: String,
    pub remote_ip: String,
}

impl SourceRequest {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_ips(
        mut self,
        source_ip: impl Into<String>,
        dest_ip: impl Into<String>,
        remote_ip: impl Into<String>,
    ) -> Self {
        self.source_ip = source_ip.into();
        self.dest_ip = dest_ip.into();
        self.remote_ip = remote_ip.into();
        self
    }
}

/// Everything the HTTP layer knows about an inbound request
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub host: String,
    pub port: u16,
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub params: QueryParams,
    pub source: SourceRequest,
}

impl HttpRequest {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Append one header value
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_source(mut self, source: SourceRequest) -> Self {
        self.source = source;
        self
    }
}
