//! Per-kind subscription state and typed decoding of discovery responses.

use std::collections::BTreeSet;
use std::fmt;

use prost::Message;
use prost_types::Any;
use tracing::warn;

use super::proto::{
    self, Cluster, ClusterLoadAssignment, DiscoveryRequest, DiscoveryResponse, HttpConnectionManager,
    Listener, Node, RouteConfiguration, Status,
};

/// The four resource kinds fetched over the aggregated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Cluster,
    Endpoint,
    Listener,
    Route,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Cluster,
        ResourceKind::Endpoint,
        ResourceKind::Listener,
        ResourceKind::Route,
    ];

    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => proto::CLUSTER_TYPE_URL,
            ResourceKind::Endpoint => proto::ENDPOINT_TYPE_URL,
            ResourceKind::Listener => proto::LISTENER_TYPE_URL,
            ResourceKind::Route => proto::ROUTE_TYPE_URL,
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_url() == type_url)
    }

    /// Short discovery service name (CDS, EDS, LDS, RDS)
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "CDS",
            ResourceKind::Endpoint => "EDS",
            ResourceKind::Listener => "LDS",
            ResourceKind::Route => "RDS",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A typed xDS resource
pub trait XdsResource: Message + Default + Sized {
    const KIND: ResourceKind;

    fn resource_name(&self) -> &str;

    /// Names of the resources this batch makes necessary in the next kind
    /// (clusters → endpoint service names, listeners → route configs).
    fn dependent_names(_resources: &[Self]) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

impl XdsResource for Cluster {
    const KIND: ResourceKind = ResourceKind::Cluster;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn dependent_names(resources: &[Self]) -> BTreeSet<String> {
        resources
            .iter()
            .filter_map(|cluster| {
                let is_eds = cluster.r#type == Some(proto::DiscoveryType::Eds as i32);
                match &cluster.eds_cluster_config {
                    Some(eds) if !eds.service_name.is_empty() => Some(eds.service_name.clone()),
                    Some(_) => Some(cluster.name.clone()),
                    None if is_eds => Some(cluster.name.clone()),
                    None => None,
                }
            })
            .filter(|name| !name.is_empty())
            .collect()
    }
}

impl XdsResource for ClusterLoadAssignment {
    const KIND: ResourceKind = ResourceKind::Endpoint;

    fn resource_name(&self) -> &str {
        &self.cluster_name
    }
}

impl XdsResource for Listener {
    const KIND: ResourceKind = ResourceKind::Listener;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn dependent_names(resources: &[Self]) -> BTreeSet<String> {
        resources
            .iter()
            .flat_map(|listener| listener.filter_chains.iter())
            .flat_map(|chain| chain.filters.iter())
            .filter_map(|filter| filter.typed_config.as_ref())
            .filter(|any| any.type_url == proto::HTTP_CONNECTION_MANAGER_TYPE_URL)
            .filter_map(|any| HttpConnectionManager::decode(any.value.as_slice()).ok())
            .filter_map(|hcm| hcm.rds)
            .map(|rds| rds.route_config_name)
            .filter(|name| !name.is_empty())
            .collect()
    }
}

impl XdsResource for RouteConfiguration {
    const KIND: ResourceKind = ResourceKind::Route;

    fn resource_name(&self) -> &str {
        &self.name
    }
}

/// Decode every `Any` of the expected kind; resources that fail to decode are
/// logged and skipped.
pub fn decode_resources<R: XdsResource>(resources: &[Any]) -> Vec<R> {
    resources
        .iter()
        .filter_map(|any| {
            if any.type_url != R::KIND.type_url() {
                warn!(
                    kind = %R::KIND,
                    type_url = %any.type_url,
                    "Skipping resource with unexpected type"
                );
                return None;
            }
            match R::decode(any.value.as_slice()) {
                Ok(resource) => Some(resource),
                Err(e) => {
                    warn!(kind = %R::KIND, error = %e, "Failed to decode resource, skipping");
                    None
                }
            }
        })
        .collect()
}

/// Subscription lifecycle of one kind on the current stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unsubscribed,
    /// Request sent, no response accepted yet
    Subscribing,
    /// At least one response accepted; counts later pushes
    Synced { updates: u64 },
}

/// Names, version and nonce last exchanged for one resource kind
#[derive(Debug, Clone)]
pub struct SubscriptionState {
    kind: ResourceKind,
    resource_names: BTreeSet<String>,
    version_info: String,
    nonce: String,
    phase: Phase,
}

impl SubscriptionState {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            resource_names: BTreeSet::new(),
            version_info: String::new(),
            nonce: String::new(),
            phase: Phase::Unsubscribed,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn type_url(&self) -> &'static str {
        self.kind.type_url()
    }

    pub fn resource_names(&self) -> &BTreeSet<String> {
        &self.resource_names
    }

    pub fn version_info(&self) -> &str {
        &self.version_info
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_subscribed(&self) -> bool {
        self.phase != Phase::Unsubscribed
    }

    pub fn is_synced(&self) -> bool {
        matches!(self.phase, Phase::Synced { .. })
    }

    /// Request for `names`. Version and nonce are carried over so an already
    /// synced subscription only changes its name set.
    pub fn subscribe(&mut self, names: BTreeSet<String>, node: &Node) -> DiscoveryRequest {
        self.resource_names = names;
        if self.phase == Phase::Unsubscribed {
            self.phase = Phase::Subscribing;
        }
        self.request(node, self.version_info.clone(), self.nonce.clone(), None)
    }

    /// Accept a response: record its version/nonce and build the ACK.
    pub fn ack(&mut self, response: &DiscoveryResponse, node: &Node) -> DiscoveryRequest {
        self.version_info = response.version_info.clone();
        self.nonce = response.nonce.clone();
        self.phase = match self.phase {
            Phase::Synced { updates } => Phase::Synced {
                updates: updates + 1,
            },
            _ => Phase::Synced { updates: 0 },
        };
        self.request(node, self.version_info.clone(), self.nonce.clone(), None)
    }

    /// Reject a response. The last accepted version is kept; the nonce is
    /// the rejected response's.
    pub fn nack(
        &mut self,
        response: &DiscoveryResponse,
        message: impl Into<String>,
        node: &Node,
    ) -> DiscoveryRequest {
        self.nonce = response.nonce.clone();
        let status = Status {
            code: INVALID_ARGUMENT,
            message: message.into(),
        };
        self.request(node, self.version_info.clone(), self.nonce.clone(), Some(status))
    }

    /// Fresh request for the current names, asking for a full push
    pub fn poll(&self, node: &Node) -> DiscoveryRequest {
        self.request(node, String::new(), String::new(), None)
    }

    /// Forget everything; used when the stream is re-established.
    pub fn reset(&mut self) {
        self.resource_names.clear();
        self.version_info.clear();
        self.nonce.clear();
        self.phase = Phase::Unsubscribed;
    }

    fn request(
        &self,
        node: &Node,
        version_info: String,
        response_nonce: String,
        error_detail: Option<Status>,
    ) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info,
            node: Some(node.clone()),
            resource_names: self.resource_names.iter().cloned().collect(),
            type_url: self.kind.type_url().to_string(),
            response_nonce,
            error_detail,
        }
    }
}

/// google.rpc.Code.INVALID_ARGUMENT
const INVALID_ARGUMENT: i32 = 3;

/// NACK that leaves every subscription untouched: the rejected response's
/// type URL and nonce, no names and no version.
pub fn reject(
    response: &DiscoveryResponse,
    message: impl Into<String>,
    node: &Node,
) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: String::new(),
        node: Some(node.clone()),
        resource_names: Vec::new(),
        type_url: response.type_url.clone(),
        response_nonce: response.nonce.clone(),
        error_detail: Some(Status {
            code: INVALID_ARGUMENT,
            message: message.into(),
        }),
    }
}

/// NACK for a response whose type URL is not one of the subscribed kinds
pub fn reject_unknown(response: &DiscoveryResponse, node: &Node) -> DiscoveryRequest {
    reject(
        response,
        format!("unsupported type url {}", response.type_url),
        node,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::proto::{
        to_any, EdsClusterConfig, Filter, FilterChain, Rds, HTTP_CONNECTION_MANAGER_TYPE_URL,
    };

    fn node() -> Node {
        Node {
            id: "sidecar~10.0.0.1~p.ns~ns.svc.cluster.local".into(),
            ..Default::default()
        }
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_kind_type_urls() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_type_url(kind.type_url()), Some(kind));
        }
        assert_eq!(ResourceKind::from_type_url("type.googleapis.com/foo"), None);
        assert_eq!(ResourceKind::Listener.to_string(), "LDS");
    }

    #[test]
    fn test_first_subscribe_has_empty_version_and_nonce() {
        let mut state = SubscriptionState::new(ResourceKind::Cluster);
        let request = state.subscribe(BTreeSet::new(), &node());
        assert!(request.version_info.is_empty());
        assert!(request.response_nonce.is_empty());
        assert!(request.resource_names.is_empty());
        assert_eq!(request.type_url, proto::CLUSTER_TYPE_URL);
        assert_eq!(state.phase(), Phase::Subscribing);
    }

    #[test]
    fn test_ack_echoes_version_nonce_and_names() {
        let mut state = SubscriptionState::new(ResourceKind::Endpoint);
        state.subscribe(names(&["a", "b"]), &node());
        let response = DiscoveryResponse {
            version_info: "v7".into(),
            type_url: proto::ENDPOINT_TYPE_URL.into(),
            nonce: "n7".into(),
            ..Default::default()
        };
        let ack = state.ack(&response, &node());
        assert_eq!(ack.version_info, "v7");
        assert_eq!(ack.response_nonce, "n7");
        assert_eq!(ack.resource_names, vec!["a".to_string(), "b".to_string()]);
        assert!(ack.error_detail.is_none());
        assert_eq!(state.phase(), Phase::Synced { updates: 0 });

        state.ack(&response, &node());
        assert_eq!(state.phase(), Phase::Synced { updates: 1 });
    }

    #[test]
    fn test_nack_keeps_accepted_version() {
        let mut state = SubscriptionState::new(ResourceKind::Listener);
        state.subscribe(BTreeSet::new(), &node());
        let good = DiscoveryResponse {
            version_info: "v1".into(),
            nonce: "n1".into(),
            ..Default::default()
        };
        state.ack(&good, &node());
        let bad = DiscoveryResponse {
            version_info: "v2".into(),
            nonce: "n2".into(),
            ..Default::default()
        };
        let nack = state.nack(&bad, "broken", &node());
        assert_eq!(nack.version_info, "v1");
        assert_eq!(nack.response_nonce, "n2");
        assert_eq!(nack.error_detail.unwrap().message, "broken");
    }

    #[test]
    fn test_reset_returns_to_unsubscribed() {
        let mut state = SubscriptionState::new(ResourceKind::Route);
        state.subscribe(names(&["r"]), &node());
        state.reset();
        assert!(!state.is_subscribed());
        assert!(state.resource_names().is_empty());
    }

    #[test]
    fn test_reject_unknown_type() {
        let response = DiscoveryResponse {
            type_url: "type.googleapis.com/envoy.config.core.v3.Secret".into(),
            nonce: "n".into(),
            ..Default::default()
        };
        let nack = reject_unknown(&response, &node());
        assert_eq!(nack.type_url, response.type_url);
        assert_eq!(nack.response_nonce, "n");
        assert!(nack.error_detail.is_some());
    }

    #[test]
    fn test_reject_leaves_subscription_untouched() {
        let mut state = SubscriptionState::new(ResourceKind::Route);
        let response = DiscoveryResponse {
            type_url: ResourceKind::Route.type_url().into(),
            version_info: "7".into(),
            nonce: "stale".into(),
            ..Default::default()
        };
        let nack = reject(&response, "not requested", &node());
        assert_eq!(nack.response_nonce, "stale");
        assert!(nack.version_info.is_empty());
        assert_eq!(nack.error_detail.unwrap().message, "not requested");

        let request = state.subscribe(names(&["r"]), &node());
        assert!(request.response_nonce.is_empty());
        assert!(state.nonce().is_empty());
    }

    #[test]
    fn test_cluster_dependent_names() {
        let clusters = vec![
            Cluster {
                name: "outbound|80||a.ns.svc.cluster.local".into(),
                r#type: Some(proto::DiscoveryType::Eds as i32),
                eds_cluster_config: Some(EdsClusterConfig {
                    service_name: "outbound|80||a.ns.svc.cluster.local".into(),
                }),
            },
            Cluster {
                name: "eds-no-service-name".into(),
                r#type: Some(proto::DiscoveryType::Eds as i32),
                eds_cluster_config: None,
            },
            Cluster {
                name: "PassthroughCluster".into(),
                r#type: Some(proto::DiscoveryType::OriginalDst as i32),
                eds_cluster_config: None,
            },
        ];
        assert_eq!(
            Cluster::dependent_names(&clusters),
            names(&["eds-no-service-name", "outbound|80||a.ns.svc.cluster.local"])
        );
    }

    #[test]
    fn test_listener_dependent_names() {
        let hcm = HttpConnectionManager {
            rds: Some(Rds {
                route_config_name: "8080".into(),
            }),
            ..Default::default()
        };
        let listener = Listener {
            name: "0.0.0.0_8080".into(),
            filter_chains: vec![FilterChain {
                filters: vec![Filter {
                    name: "envoy.filters.network.http_connection_manager".into(),
                    typed_config: Some(to_any(HTTP_CONNECTION_MANAGER_TYPE_URL, &hcm)),
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(Listener::dependent_names(&[listener]), names(&["8080"]));
    }

    #[test]
    fn test_decode_skips_bad_resources() {
        let good = Cluster {
            name: "c1".into(),
            ..Default::default()
        };
        let resources = vec![
            to_any(proto::CLUSTER_TYPE_URL, &good),
            Any {
                type_url: proto::CLUSTER_TYPE_URL.into(),
                value: vec![0xff, 0xff, 0xff],
            },
            to_any(proto::LISTENER_TYPE_URL, &Listener::default()),
        ];
        let decoded: Vec<Cluster> = decode_resources(&resources);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].resource_name(), "c1");
    }
}
