use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XdsError};

/// Default control-plane address (istiod inside the mesh)
pub const DEFAULT_HOST: &str = "istiod.istio-system.svc";
/// istiod secure xDS port
pub const DEFAULT_PORT: u16 = 15012;
pub const DEFAULT_CA_CERT_PATH: &str = "/var/run/secrets/istio/root-cert.pem";
pub const FIRST_PARTY_JWT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const THIRD_PARTY_JWT_PATH: &str = "/var/run/secrets/tokens/istio-token";
pub const NAMESPACE_FILE_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_POD_NAME: &str = "sidecar";
pub const DEFAULT_CLUSTER_ID: &str = "Kubernetes";

pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 3;
pub const DEFAULT_BOOTSTRAP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Which mounted service-account token authenticates to the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JwtPolicy {
    #[default]
    FirstPartyJwt,
    ThirdPartyJwt,
}

impl JwtPolicy {
    pub fn token_path(&self) -> &'static str {
        match self {
            JwtPolicy::FirstPartyJwt => FIRST_PARTY_JWT_PATH,
            JwtPolicy::ThirdPartyJwt => THIRD_PARTY_JWT_PATH,
        }
    }
}

/// Discovery client configuration.
///
/// Empty identity fields are filled from the environment by [`XdsConfig::resolve_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XdsConfig {
    pub host: String,
    pub port: u16,
    /// Inline bearer token; takes precedence over `token_path` / `jwt_policy`
    pub token: Option<String>,
    pub token_path: Option<PathBuf>,
    pub jwt_policy: JwtPolicy,
    pub tls: bool,
    pub ca_cert_path: PathBuf,
    /// Re-subscription interval; 0 disables polling
    pub polling_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub bootstrap_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pod_name: String,
    pub namespace: String,
    pub pod_ip: String,
    pub cluster_id: String,
    /// Log every accepted push at info level
    pub log_xds: bool,
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            token: None,
            token_path: None,
            jwt_policy: JwtPolicy::default(),
            tls: true,
            ca_cert_path: PathBuf::from(DEFAULT_CA_CERT_PATH),
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            bootstrap_timeout_secs: DEFAULT_BOOTSTRAP_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            pod_name: String::new(),
            namespace: String::new(),
            pod_ip: String::new(),
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            log_xds: true,
        }
    }
}

impl XdsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: XdsConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    pub fn with_jwt_policy(mut self, policy: JwtPolicy) -> Self {
        self.jwt_policy = policy;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = path.into();
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval_secs = interval.as_secs();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_secs = delay.as_secs();
        self
    }

    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_identity(
        mut self,
        pod_name: impl Into<String>,
        namespace: impl Into<String>,
        pod_ip: impl Into<String>,
    ) -> Self {
        self.pod_name = pod_name.into();
        self.namespace = namespace.into();
        self.pod_ip = pod_ip.into();
        self
    }

    pub fn with_cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    pub fn with_log_xds(mut self, log_xds: bool) -> Self {
        self.log_xds = log_xds;
        self
    }

    /// `None` when polling is disabled
    pub fn polling_interval(&self) -> Option<Duration> {
        (self.polling_interval_secs > 0).then(|| Duration::from_secs(self.polling_interval_secs))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Fill empty identity fields from `POD_NAME`, `POD_NAMESPACE`,
    /// `INSTANCE_IP` and the service-account namespace file.
    pub fn resolve_env(mut self) -> Self {
        if self.pod_name.is_empty() {
            self.pod_name = env_or("POD_NAME", DEFAULT_POD_NAME);
        }
        if self.namespace.is_empty() {
            self.namespace = std::env::var("POD_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty())
                .or_else(|| read_trimmed(Path::new(NAMESPACE_FILE_PATH)))
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        }
        if self.pod_ip.is_empty() {
            self.pod_ip = env_or("INSTANCE_IP", "127.0.0.1");
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(XdsError::ConfigError("control plane host is empty".into()));
        }
        if self.port == 0 {
            return Err(XdsError::ConfigError("control plane port must be in 1..=65535".into()));
        }
        Ok(())
    }

    /// `scheme://host:port` for the control plane
    pub fn endpoint_uri(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Token file consulted when no inline token is configured
    pub fn effective_token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.jwt_policy.token_path()))
    }

    /// Current bearer token. Re-read from disk on every call so rotated
    /// tokens are picked up on reconnect.
    pub fn load_token(&self) -> Result<String> {
        if let Some(token) = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        let path = self.effective_token_path();
        match read_trimmed(&path) {
            Some(token) => Ok(token),
            None => Err(XdsError::ConfigError(format!(
                "no control plane token configured and none readable at {}",
                path.display()
            ))),
        }
    }

    /// Envoy node id: `sidecar~<ip>~<pod>.<ns>~<ns>.svc.cluster.local`
    pub fn node_id(&self) -> String {
        format!(
            "sidecar~{}~{}.{}~{}.svc.cluster.local",
            self.pod_ip, self.pod_name, self.namespace, self.namespace
        )
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
