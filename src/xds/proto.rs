//! Subset of the Envoy v3 API consumed by the discovery client.
//!
//! Messages are declared with prost derives and keep the upstream field
//! numbers, so they decode the control plane's payloads directly. Fields the
//! client never reads are left out and skipped as unknown on decode.

use std::collections::BTreeMap;

use prost_types::{Any, Struct};

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const HTTP_CONNECTION_MANAGER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const RBAC_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.rbac.v3.RBAC";
pub const JWT_AUTHN_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.jwt_authn.v3.JwtAuthentication";

/// gRPC method of the aggregated discovery service
pub const ADS_PATH: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources";

// --- discovery service ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoveryRequest {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, optional, tag = "2")]
    pub node: Option<Node>,
    #[prost(string, repeated, tag = "3")]
    pub resource_names: Vec<String>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub response_nonce: String,
    #[prost(message, optional, tag = "6")]
    pub error_detail: Option<Status>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoveryResponse {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, repeated, tag = "2")]
    pub resources: Vec<Any>,
    #[prost(bool, tag = "3")]
    pub canary: bool,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub nonce: String,
}

/// google.rpc.Status
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

// --- core ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub cluster: String,
    #[prost(message, optional, tag = "3")]
    pub metadata: Option<Struct>,
    #[prost(string, tag = "6")]
    pub user_agent_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CidrRange {
    #[prost(string, tag = "1")]
    pub address_prefix: String,
    /// google.protobuf.UInt32Value
    #[prost(message, optional, tag = "2")]
    pub prefix_len: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataSource {
    #[prost(oneof = "data_source::Specifier", tags = "1, 2, 3")]
    pub specifier: Option<data_source::Specifier>,
}

pub mod data_source {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Specifier {
        #[prost(string, tag = "1")]
        Filename(String),
        #[prost(bytes, tag = "2")]
        InlineBytes(Vec<u8>),
        #[prost(string, tag = "3")]
        InlineString(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Address {
    #[prost(message, optional, tag = "1")]
    pub socket_address: Option<SocketAddress>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SocketAddress {
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(uint32, tag = "3")]
    pub port_value: u32,
}

// --- cluster / endpoint ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DiscoveryType {
    Static = 0,
    StrictDns = 1,
    LogicalDns = 2,
    Eds = 3,
    OriginalDst = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Cluster {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "DiscoveryType", optional, tag = "2")]
    pub r#type: Option<i32>,
    #[prost(message, optional, tag = "3")]
    pub eds_cluster_config: Option<EdsClusterConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EdsClusterConfig {
    #[prost(string, tag = "2")]
    pub service_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusterLoadAssignment {
    #[prost(string, tag = "1")]
    pub cluster_name: String,
    #[prost(message, repeated, tag = "2")]
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocalityLbEndpoints {
    #[prost(message, repeated, tag = "2")]
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LbEndpoint {
    #[prost(message, optional, tag = "1")]
    pub endpoint: Option<Endpoint>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Endpoint {
    #[prost(message, optional, tag = "1")]
    pub address: Option<Address>,
}

// --- listener ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Listener {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub address: Option<Address>,
    #[prost(message, repeated, tag = "3")]
    pub filter_chains: Vec<FilterChain>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FilterChain {
    #[prost(message, repeated, tag = "3")]
    pub filters: Vec<Filter>,
    #[prost(string, tag = "7")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Filter {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "4")]
    pub typed_config: Option<Any>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpConnectionManager {
    #[prost(string, tag = "2")]
    pub stat_prefix: String,
    #[prost(message, optional, tag = "3")]
    pub rds: Option<Rds>,
    #[prost(message, repeated, tag = "5")]
    pub http_filters: Vec<HttpFilter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Rds {
    #[prost(string, tag = "2")]
    pub route_config_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpFilter {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "4")]
    pub typed_config: Option<Any>,
}

// --- matchers ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringMatcher {
    #[prost(oneof = "string_matcher::MatchPattern", tags = "1, 2, 3, 5, 7")]
    pub match_pattern: Option<string_matcher::MatchPattern>,
    #[prost(bool, tag = "6")]
    pub ignore_case: bool,
}

pub mod string_matcher {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum MatchPattern {
        #[prost(string, tag = "1")]
        Exact(String),
        #[prost(string, tag = "2")]
        Prefix(String),
        #[prost(string, tag = "3")]
        Suffix(String),
        #[prost(message, tag = "5")]
        SafeRegex(super::RegexMatcher),
        #[prost(string, tag = "7")]
        Contains(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegexMatcher {
    #[prost(string, tag = "2")]
    pub regex: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderMatcher {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "8")]
    pub invert_match: bool,
    #[prost(
        oneof = "header_matcher::HeaderMatchSpecifier",
        tags = "4, 7, 9, 10, 11, 12, 13"
    )]
    pub header_match_specifier: Option<header_matcher::HeaderMatchSpecifier>,
}

pub mod header_matcher {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum HeaderMatchSpecifier {
        #[prost(string, tag = "4")]
        ExactMatch(String),
        #[prost(bool, tag = "7")]
        PresentMatch(bool),
        #[prost(string, tag = "9")]
        PrefixMatch(String),
        #[prost(string, tag = "10")]
        SuffixMatch(String),
        #[prost(message, tag = "11")]
        SafeRegexMatch(super::RegexMatcher),
        #[prost(string, tag = "12")]
        ContainsMatch(String),
        #[prost(message, tag = "13")]
        StringMatch(super::StringMatcher),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PathMatcher {
    #[prost(message, optional, tag = "1")]
    pub path: Option<StringMatcher>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetadataMatcher {
    #[prost(string, tag = "1")]
    pub filter: String,
    #[prost(message, repeated, tag = "2")]
    pub path: Vec<PathSegment>,
    #[prost(message, optional, tag = "3")]
    pub value: Option<ValueMatcher>,
    #[prost(bool, tag = "4")]
    pub invert: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PathSegment {
    #[prost(string, tag = "1")]
    pub key: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueMatcher {
    #[prost(oneof = "value_matcher::MatchPattern", tags = "3, 5, 6")]
    pub match_pattern: Option<value_matcher::MatchPattern>,
}

pub mod value_matcher {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum MatchPattern {
        #[prost(message, tag = "3")]
        StringMatch(super::StringMatcher),
        #[prost(bool, tag = "5")]
        PresentMatch(bool),
        #[prost(message, tag = "6")]
        ListMatch(super::ListMatcher),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListMatcher {
    #[prost(oneof = "list_matcher::MatchPattern", tags = "1")]
    pub match_pattern: Option<list_matcher::MatchPattern>,
}

pub mod list_matcher {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum MatchPattern {
        #[prost(message, tag = "1")]
        OneOf(Box<super::ValueMatcher>),
    }
}

// --- RBAC ---

/// envoy.extensions.filters.http.rbac.v3.RBAC
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RbacFilter {
    #[prost(message, optional, tag = "1")]
    pub rules: Option<Rbac>,
}

/// envoy.config.rbac.v3.RBAC
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Rbac {
    #[prost(enumeration = "rbac::Action", tag = "1")]
    pub action: i32,
    #[prost(btree_map = "string, message", tag = "2")]
    pub policies: BTreeMap<String, Policy>,
}

pub mod rbac {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Action {
        Allow = 0,
        Deny = 1,
        Log = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Policy {
    #[prost(message, repeated, tag = "1")]
    pub permissions: Vec<Permission>,
    #[prost(message, repeated, tag = "2")]
    pub principals: Vec<Principal>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Permission {
    #[prost(oneof = "permission::Rule", tags = "1, 2, 3, 4, 5, 6, 8, 10")]
    pub rule: Option<permission::Rule>,
}

pub mod permission {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Set {
        #[prost(message, repeated, tag = "1")]
        pub rules: Vec<super::Permission>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Rule {
        #[prost(message, tag = "1")]
        AndRules(Set),
        #[prost(message, tag = "2")]
        OrRules(Set),
        #[prost(bool, tag = "3")]
        Any(bool),
        #[prost(message, tag = "4")]
        Header(super::HeaderMatcher),
        #[prost(message, tag = "5")]
        DestinationIp(super::CidrRange),
        #[prost(uint32, tag = "6")]
        DestinationPort(u32),
        #[prost(message, tag = "8")]
        NotRule(Box<super::Permission>),
        #[prost(message, tag = "10")]
        UrlPath(super::PathMatcher),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Principal {
    #[prost(oneof = "principal::Identifier", tags = "1, 2, 3, 4, 6, 7, 8, 10, 11")]
    pub identifier: Option<principal::Identifier>,
}

pub mod principal {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Set {
        #[prost(message, repeated, tag = "1")]
        pub ids: Vec<super::Principal>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Authenticated {
        #[prost(message, optional, tag = "2")]
        pub principal_name: Option<super::StringMatcher>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Identifier {
        #[prost(message, tag = "1")]
        AndIds(Set),
        #[prost(message, tag = "2")]
        OrIds(Set),
        #[prost(bool, tag = "3")]
        Any(bool),
        #[prost(message, tag = "4")]
        Authenticated(Authenticated),
        #[prost(message, tag = "6")]
        Header(super::HeaderMatcher),
        #[prost(message, tag = "7")]
        Metadata(super::MetadataMatcher),
        #[prost(message, tag = "8")]
        NotId(Box<super::Principal>),
        #[prost(message, tag = "10")]
        DirectRemoteIp(super::CidrRange),
        #[prost(message, tag = "11")]
        RemoteIp(super::CidrRange),
    }
}

// --- JWT authn ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JwtAuthentication {
    #[prost(btree_map = "string, message", tag = "1")]
    pub providers: BTreeMap<String, JwtProvider>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JwtProvider {
    #[prost(string, tag = "1")]
    pub issuer: String,
    #[prost(string, repeated, tag = "2")]
    pub audiences: Vec<String>,
    #[prost(message, optional, tag = "4")]
    pub local_jwks: Option<DataSource>,
    #[prost(bool, tag = "5")]
    pub forward: bool,
    #[prost(message, repeated, tag = "6")]
    pub from_headers: Vec<JwtHeader>,
    #[prost(string, repeated, tag = "7")]
    pub from_params: Vec<String>,
    #[prost(string, tag = "8")]
    pub forward_payload_header: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JwtHeader {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value_prefix: String,
}

// --- route ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteConfiguration {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VirtualHost {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub domains: Vec<String>,
    #[prost(message, repeated, tag = "3")]
    pub routes: Vec<Route>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Route {
    #[prost(message, optional, tag = "1")]
    pub r#match: Option<RouteMatch>,
    #[prost(message, optional, tag = "2")]
    pub route: Option<RouteAction>,
    #[prost(string, tag = "14")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteMatch {
    #[prost(oneof = "route_match::PathSpecifier", tags = "1, 2, 10")]
    pub path_specifier: Option<route_match::PathSpecifier>,
    #[prost(message, repeated, tag = "6")]
    pub headers: Vec<HeaderMatcher>,
}

pub mod route_match {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PathSpecifier {
        #[prost(string, tag = "1")]
        Prefix(String),
        #[prost(string, tag = "2")]
        Path(String),
        #[prost(message, tag = "10")]
        SafeRegex(super::RegexMatcher),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteAction {
    #[prost(oneof = "route_action::ClusterSpecifier", tags = "1, 3")]
    pub cluster_specifier: Option<route_action::ClusterSpecifier>,
}

pub mod route_action {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum ClusterSpecifier {
        #[prost(string, tag = "1")]
        Cluster(String),
        #[prost(message, tag = "3")]
        WeightedClusters(super::WeightedCluster),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WeightedCluster {
    #[prost(message, repeated, tag = "1")]
    pub clusters: Vec<ClusterWeight>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusterWeight {
    #[prost(string, tag = "1")]
    pub name: String,
    /// google.protobuf.UInt32Value
    #[prost(message, optional, tag = "3")]
    pub weight: Option<u32>,
}

/// Wrap a message into an `Any` with the given type URL
pub fn to_any<M: prost::Message>(type_url: &str, message: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}
