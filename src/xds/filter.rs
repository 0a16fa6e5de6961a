//! Resolve filters turn decoded xDS resources into runtime state: listener
//! RBAC/JWT filters into the [`PolicyStore`], route configurations into a
//! [`RouteTable`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prost::Message;
use regex::Regex;
use tracing::{debug, warn};

use super::proto::{
    self, data_source, header_matcher::HeaderMatchSpecifier, list_matcher, permission,
    principal, rbac, route_action::ClusterSpecifier, route_match::PathSpecifier,
    string_matcher::MatchPattern, value_matcher, HttpConnectionManager, JwtAuthentication,
    JwtProvider, Listener, Permission, Policy, Principal, RbacFilter, RouteConfiguration,
};
use super::protocol::XdsResource;
use crate::jwt::{JwtRule, TokenLocation};
use crate::matcher::{
    AndRule, CidrRange, HeaderMatch, HeaderMatcher, MatchKind, OrGroup, PortMatcher,
    StringMatcher,
};
use crate::rules::{
    HeaderRule, IpBlockRule, JwtAuthRule, NamedPolicy, PolicySnapshot, PolicyStore, SourceRule,
    TargetRule,
};

/// Inbound listener carrying the workload's HTTP filters
pub const VIRTUAL_INBOUND: &str = "virtualInbound";
pub const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
pub const RBAC_FILTER: &str = "envoy.filters.http.rbac";
pub const JWT_AUTHN_FILTER: &str = "envoy.filters.http.jwt_authn";

const ISTIO_AUTHN: &str = "istio_authn";
const AUTH_PRINCIPAL: &str = "request.auth.principal";
const AUTH_AUDIENCES: &str = "request.auth.audiences";
const AUTH_PRESENTER: &str = "request.auth.presenter";
const AUTH_CLAIMS: &str = "request.auth.claims";
const HEADER_AUTHORITY: &str = ":authority";
const HEADER_METHOD: &str = ":method";
const ALLOW_ANY: &str = "allow_any";

static NAMESPACE_PRINCIPAL: Lazy<Regex> = Lazy::new(|| {
    // Safe: hardcoded regex pattern that is known to be valid
    Regex::new(r"^\.\*/ns/([^/]+)/\.\*$").expect("NAMESPACE_PRINCIPAL hardcoded regex is invalid")
});

/// Consumer of one resource kind's decoded push
pub trait ResolveFilter<R: XdsResource>: Send + Sync {
    fn resolve(&self, resources: &[R]);
}

// --- matcher conversion ---

/// Envoy string matcher → [`StringMatcher`]; `None` when no pattern is set.
pub fn convert_string_matcher(matcher: &proto::StringMatcher) -> Option<StringMatcher> {
    let converted = match matcher.match_pattern.as_ref()? {
        MatchPattern::Exact(s) => StringMatcher::exact(s),
        MatchPattern::Prefix(s) => StringMatcher::prefix(s),
        MatchPattern::Suffix(s) => StringMatcher::suffix(s),
        MatchPattern::Contains(s) => StringMatcher::contains(s),
        MatchPattern::SafeRegex(re) => StringMatcher::regex(&re.regex),
    };
    if converted.pattern().trim().is_empty() {
        return None;
    }
    Some(converted.ignore_case(matcher.ignore_case))
}

/// Header value constraint as a string matcher. The legacy header forms
/// compare case-insensitively.
fn header_string_matcher(specifier: &HeaderMatchSpecifier) -> Option<StringMatcher> {
    let converted = match specifier {
        HeaderMatchSpecifier::StringMatch(m) => return convert_string_matcher(m),
        HeaderMatchSpecifier::ExactMatch(s) => StringMatcher::exact(s),
        HeaderMatchSpecifier::PrefixMatch(s) => StringMatcher::prefix(s),
        HeaderMatchSpecifier::SuffixMatch(s) => StringMatcher::suffix(s),
        HeaderMatchSpecifier::ContainsMatch(s) => StringMatcher::contains(s),
        HeaderMatchSpecifier::SafeRegexMatch(re) => StringMatcher::regex(&re.regex),
        HeaderMatchSpecifier::PresentMatch(_) => return None,
    };
    if converted.pattern().trim().is_empty() {
        return None;
    }
    Some(converted.ignore_case(true))
}

pub fn convert_header_matcher(matcher: &proto::HeaderMatcher) -> Option<HeaderMatcher> {
    if matcher.name.is_empty() {
        return None;
    }
    let rule = match matcher.header_match_specifier.as_ref()? {
        HeaderMatchSpecifier::PresentMatch(true) => HeaderMatch::Present,
        HeaderMatchSpecifier::PresentMatch(false) => return None,
        other => HeaderMatch::Value(header_string_matcher(other)?),
    };
    Some(HeaderMatcher::new(&matcher.name, rule).inverted(matcher.invert_match))
}

pub fn convert_cidr(range: &proto::CidrRange) -> CidrRange {
    CidrRange::new(&range.address_prefix, range.prefix_len)
}

// --- RBAC translation ---

/// Matchers collected from one `and_ids` / `and_rules` entry, one list per
/// rule family. Each list becomes one [`OrGroup`].
#[derive(Default)]
struct PrincipalGroups {
    principals: Vec<StringMatcher>,
    namespaces: Vec<StringMatcher>,
    source_ips: Vec<CidrRange>,
    remote_ips: Vec<CidrRange>,
    request_principals: Vec<StringMatcher>,
    audiences: Vec<StringMatcher>,
    presenters: Vec<StringMatcher>,
    claims: BTreeMap<String, Vec<StringMatcher>>,
    headers: Vec<HeaderMatcher>,
}

/// Rules built from one RBAC principal
#[derive(Default)]
struct PrincipalRules {
    source: SourceRule,
    ip_block: IpBlockRule,
    jwt: JwtAuthRule,
    header: AndRule<HeaderMatcher>,
}

impl PrincipalRules {
    fn push(&mut self, groups: PrincipalGroups, negate: bool) {
        self.source.principals.push(OrGroup::new(groups.principals, negate));
        self.source.namespaces.push(OrGroup::new(groups.namespaces, negate));
        self.ip_block.source_ips.push(OrGroup::new(groups.source_ips, negate));
        self.ip_block.remote_ips.push(OrGroup::new(groups.remote_ips, negate));
        self.jwt
            .request_principals
            .push(OrGroup::new(groups.request_principals, negate));
        self.jwt.audiences.push(OrGroup::new(groups.audiences, negate));
        self.jwt.presenters.push(OrGroup::new(groups.presenters, negate));
        for (key, matchers) in groups.claims {
            let rule = self.jwt.claims.entry(key).or_default();
            rule.push(OrGroup::new(matchers, negate));
        }
        self.header.push(OrGroup::new(groups.headers, negate));
    }
}

#[derive(Default)]
struct PermissionGroups {
    hosts: Vec<StringMatcher>,
    ports: Vec<PortMatcher>,
    methods: Vec<StringMatcher>,
    paths: Vec<StringMatcher>,
    dest_ips: Vec<CidrRange>,
}

/// Outcome of walking a principal or permission list
enum Walk<T> {
    Rules(T),
    /// An `any` entry, which constrains nothing
    MatchesAny,
}

/// `not_id` / `not_rule` unwrapping: returns the inner node and whether the
/// resulting group is negated.
fn unwrap_not_id(id: &Principal) -> (&Principal, bool) {
    match &id.identifier {
        Some(principal::Identifier::NotId(inner)) => (inner.as_ref(), true),
        _ => (id, false),
    }
}

fn unwrap_not_rule(rule: &Permission) -> (&Permission, bool) {
    match &rule.rule {
        Some(permission::Rule::NotRule(inner)) => (inner.as_ref(), true),
        _ => (rule, false),
    }
}

fn walk_principal(root: &Principal) -> Walk<PrincipalRules> {
    let and_ids: Vec<&Principal> = match &root.identifier {
        Some(principal::Identifier::AndIds(set)) => set.ids.iter().collect(),
        Some(principal::Identifier::Any(true)) => return Walk::MatchesAny,
        Some(_) => vec![root],
        None => Vec::new(),
    };

    let mut rules = PrincipalRules::default();
    for and_id in and_ids {
        if matches!(and_id.identifier, Some(principal::Identifier::Any(true))) {
            return Walk::MatchesAny;
        }
        let (id, negate) = unwrap_not_id(and_id);
        let or_ids: Vec<&Principal> = match &id.identifier {
            Some(principal::Identifier::OrIds(set)) => set.ids.iter().collect(),
            _ => vec![id],
        };
        let mut groups = PrincipalGroups::default();
        for or_id in or_ids {
            collect_principal(or_id, &mut groups);
        }
        rules.push(groups, negate);
    }
    Walk::Rules(rules)
}

fn collect_principal(id: &Principal, groups: &mut PrincipalGroups) {
    let Some(identifier) = &id.identifier else {
        return;
    };
    match identifier {
        principal::Identifier::Authenticated(auth) => {
            let Some(matcher) = auth.principal_name.as_ref().and_then(convert_string_matcher) else {
                return;
            };
            let namespace = (matcher.kind() == MatchKind::Regex)
                .then(|| NAMESPACE_PRINCIPAL.captures(matcher.pattern()))
                .flatten()
                .and_then(|caps| caps.get(1))
                .map(|ns| ns.as_str().to_string());
            if let Some(ns) = namespace {
                groups.namespaces.push(StringMatcher::exact(ns));
            } else {
                groups.principals.push(matcher);
            }
        }
        principal::Identifier::DirectRemoteIp(range) => groups.source_ips.push(convert_cidr(range)),
        principal::Identifier::RemoteIp(range) => groups.remote_ips.push(convert_cidr(range)),
        principal::Identifier::Header(header) => {
            if let Some(matcher) = convert_header_matcher(header) {
                groups.headers.push(matcher);
            }
        }
        principal::Identifier::Metadata(metadata) => collect_metadata(metadata, groups),
        other => debug!(identifier = ?other, "Unsupported principal identifier, ignoring"),
    }
}

fn collect_metadata(metadata: &proto::MetadataMatcher, groups: &mut PrincipalGroups) {
    if metadata.filter != ISTIO_AUTHN {
        return;
    }
    let Some(first) = metadata.path.first() else {
        return;
    };
    let Some(pattern) = metadata.value.as_ref().and_then(|v| v.match_pattern.as_ref()) else {
        return;
    };

    match first.key.as_str() {
        AUTH_CLAIMS => {
            let Some(claim) = metadata.path.get(1).map(|seg| seg.key.clone()) else {
                return;
            };
            // Claims arrive as list_match.one_of.string_match
            let value_matcher::MatchPattern::ListMatch(list) = pattern else {
                return;
            };
            let Some(list_matcher::MatchPattern::OneOf(inner)) = &list.match_pattern else {
                return;
            };
            if let Some(value_matcher::MatchPattern::StringMatch(m)) = &inner.match_pattern {
                if let Some(matcher) = convert_string_matcher(m) {
                    groups.claims.entry(claim).or_default().push(matcher);
                }
            }
        }
        key => {
            let value_matcher::MatchPattern::StringMatch(m) = pattern else {
                return;
            };
            let Some(matcher) = convert_string_matcher(m) else {
                return;
            };
            match key {
                AUTH_PRINCIPAL => groups.request_principals.push(matcher),
                AUTH_AUDIENCES => groups.audiences.push(matcher),
                AUTH_PRESENTER => groups.presenters.push(matcher),
                _ => {}
            }
        }
    }
}

/// Fold one permission into `target` / `dest_ips`. An `any` permission
/// leaves both untouched.
fn walk_permission(
    entry: &Permission,
    target: &mut TargetRule,
    dest_ips: &mut AndRule<CidrRange>,
) -> Walk<()> {
    let and_rules: Vec<&Permission> = match &entry.rule {
        Some(permission::Rule::AndRules(set)) => set.rules.iter().collect(),
        Some(permission::Rule::Any(true)) => return Walk::MatchesAny,
        Some(_) => vec![entry],
        None => Vec::new(),
    };
    if and_rules
        .iter()
        .any(|rule| matches!(rule.rule, Some(permission::Rule::Any(true))))
    {
        return Walk::MatchesAny;
    }

    for and_rule in and_rules {
        let (rule, negate) = unwrap_not_rule(and_rule);
        let or_rules: Vec<&Permission> = match &rule.rule {
            Some(permission::Rule::OrRules(set)) => set.rules.iter().collect(),
            _ => vec![rule],
        };
        let mut groups = PermissionGroups::default();
        for or_rule in or_rules {
            collect_permission(or_rule, &mut groups);
        }
        target.hosts.push(OrGroup::new(groups.hosts, negate));
        target.ports.push(OrGroup::new(groups.ports, negate));
        target.methods.push(OrGroup::new(groups.methods, negate));
        target.paths.push(OrGroup::new(groups.paths, negate));
        dest_ips.push(OrGroup::new(groups.dest_ips, negate));
    }
    Walk::Rules(())
}

fn collect_permission(rule: &Permission, groups: &mut PermissionGroups) {
    let Some(rule) = &rule.rule else {
        return;
    };
    match rule {
        permission::Rule::DestinationPort(port) => {
            if (1..=65535).contains(port) {
                groups.ports.push(PortMatcher(*port));
            }
        }
        permission::Rule::Header(header) => {
            let Some(matcher) = header
                .header_match_specifier
                .as_ref()
                .and_then(header_string_matcher)
            else {
                return;
            };
            match header.name.as_str() {
                HEADER_AUTHORITY => groups.hosts.push(matcher),
                HEADER_METHOD => groups.methods.push(matcher),
                _ => {}
            }
        }
        permission::Rule::UrlPath(path) => {
            if let Some(matcher) = path.path.as_ref().and_then(convert_string_matcher) {
                groups.paths.push(matcher);
            }
        }
        permission::Rule::DestinationIp(range) => groups.dest_ips.push(convert_cidr(range)),
        other => debug!(rule = ?other, "Unsupported permission rule, ignoring"),
    }
}

/// Translate one RBAC policy into `snapshot`. An `any` principal or
/// permission places no constraint: it is skipped while the rest of the
/// policy is still registered.
fn resolve_policy(name: &str, policy: &Policy, allowed: bool, snapshot: &mut PolicySnapshot) {
    let mut target = TargetRule::new();
    let mut dest_ips = AndRule::new();
    for entry in &policy.permissions {
        if let Walk::MatchesAny = walk_permission(entry, &mut target, &mut dest_ips) {
            debug!(policy = %name, "Skipping any-permission");
        }
    }

    let mut principal_rules = Vec::with_capacity(policy.principals.len());
    for root in &policy.principals {
        match walk_principal(root) {
            Walk::Rules(rules) => principal_rules.push(rules),
            Walk::MatchesAny => debug!(policy = %name, "Skipping any-principal"),
        }
    }

    if !target.is_empty() {
        snapshot.targets.push(NamedPolicy::new(name, target, allowed));
    }

    let mut ip_block_registered = false;
    // Later principals overwrite earlier ones under the same policy name
    for rules in principal_rules {
        if !rules.source.is_empty() {
            snapshot.sources.push(NamedPolicy::new(name, rules.source, allowed));
        }
        if !rules.ip_block.is_empty() {
            let mut ip_block = rules.ip_block;
            ip_block.dest_ips = dest_ips.clone();
            snapshot.ip_blocks.push(NamedPolicy::new(name, ip_block, allowed));
            ip_block_registered = true;
        }
        if !rules.jwt.is_empty() {
            snapshot.jwt_auth.push(NamedPolicy::new(name, rules.jwt, allowed));
        }
        if !rules.header.is_empty() {
            snapshot
                .headers
                .push(NamedPolicy::new(name, HeaderRule::new(rules.header), allowed));
        }
    }

    if !ip_block_registered && !dest_ips.is_empty() {
        let ip_block = IpBlockRule {
            dest_ips,
            ..Default::default()
        };
        snapshot.ip_blocks.push(NamedPolicy::new(name, ip_block, allowed));
    }
}

fn resolve_rbac(rbac: &proto::Rbac, snapshot: &mut PolicySnapshot) {
    let allowed = match rbac::Action::try_from(rbac.action) {
        Ok(rbac::Action::Allow) | Err(_) => true,
        Ok(rbac::Action::Deny) => false,
        Ok(rbac::Action::Log) => return,
    };
    for (name, policy) in &rbac.policies {
        resolve_policy(name, policy, allowed, snapshot);
    }
}

fn resolve_jwt_provider(name: &str, provider: &JwtProvider) -> JwtRule {
    let jwks = match provider
        .local_jwks
        .as_ref()
        .and_then(|source| source.specifier.as_ref())
    {
        Some(data_source::Specifier::InlineString(jwks)) => jwks.clone(),
        Some(data_source::Specifier::InlineBytes(bytes)) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        _ => String::new(),
    };

    let mut rule = JwtRule::new(name, jwks)
        .with_issuer(&provider.issuer)
        .with_audiences(provider.audiences.iter().cloned())
        .with_forward(&provider.forward_payload_header, provider.forward);
    for header in &provider.from_headers {
        rule = rule.with_location(TokenLocation::header(&header.name, &header.value_prefix));
    }
    for param in &provider.from_params {
        rule = rule.with_location(TokenLocation::param(param));
    }
    rule
}

/// Build the complete policy set from a listener push.
pub fn resolve_listeners(listeners: &[Listener]) -> PolicySnapshot {
    let mut snapshot = PolicySnapshot::default();
    let http_filters = listeners
        .iter()
        .filter(|listener| listener.name == VIRTUAL_INBOUND)
        .flat_map(|listener| listener.filter_chains.iter())
        .flat_map(|chain| chain.filters.iter())
        .filter(|filter| filter.name == HTTP_CONNECTION_MANAGER)
        .filter_map(|filter| filter.typed_config.as_ref())
        .filter_map(|any| match HttpConnectionManager::decode(any.value.as_slice()) {
            Ok(hcm) => Some(hcm),
            Err(e) => {
                warn!(error = %e, "Failed to decode HTTP connection manager, skipping");
                None
            }
        })
        .flat_map(|hcm| hcm.http_filters.into_iter());

    for http_filter in http_filters {
        let Some(config) = &http_filter.typed_config else {
            continue;
        };
        match http_filter.name.as_str() {
            RBAC_FILTER => match RbacFilter::decode(config.value.as_slice()) {
                Ok(RbacFilter { rules: Some(rbac) }) => resolve_rbac(&rbac, &mut snapshot),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to decode RBAC filter, skipping"),
            },
            JWT_AUTHN_FILTER => match JwtAuthentication::decode(config.value.as_slice()) {
                Ok(authn) => snapshot.jwt_rules.extend(
                    authn
                        .providers
                        .iter()
                        .map(|(name, provider)| resolve_jwt_provider(name, provider)),
                ),
                Err(e) => warn!(error = %e, "Failed to decode JWT authn filter, skipping"),
            },
            _ => {}
        }
    }
    snapshot
}

/// Replaces the policy store contents on every listener push
#[derive(Debug, Clone)]
pub struct AuthResolveFilter {
    store: Arc<PolicyStore>,
}

impl AuthResolveFilter {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }
}

impl ResolveFilter<Listener> for AuthResolveFilter {
    fn resolve(&self, resources: &[Listener]) {
        let snapshot = resolve_listeners(resources);
        debug!(
            policies = snapshot.policy_count(),
            providers = snapshot.jwt_rules.len(),
            "Applying authorization policies"
        );
        self.store.apply(snapshot);
    }
}

// --- routes ---

/// One weighted upstream of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedVersion {
    pub cluster: String,
    /// Subset segment of an `outbound|port|subset|host` cluster name
    pub version: String,
    pub weight: u32,
}

/// Match conditions and destinations of one route entry
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub name: String,
    pub path: Option<StringMatcher>,
    pub headers: Vec<HeaderMatcher>,
    pub destinations: Vec<WeightedVersion>,
}

/// Routes of one target service
#[derive(Debug, Clone)]
pub struct ServiceRoutes {
    pub service: String,
    pub rules: Vec<RouteRule>,
    /// Version of the last route entry, used when nothing else matches
    pub default_version: Option<String>,
}

/// Read-only view of the latest route configurations, keyed by service name
#[derive(Debug, Default)]
pub struct RouteTable {
    services: RwLock<Arc<HashMap<String, Arc<ServiceRoutes>>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service: &str) -> Option<Arc<ServiceRoutes>> {
        self.services.read().get(service).cloned()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<ServiceRoutes>>> {
        Arc::clone(&self.services.read())
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    fn replace(&self, services: HashMap<String, Arc<ServiceRoutes>>) {
        *self.services.write() = Arc::new(services);
    }
}

/// `reviews.default.svc.cluster.local:9080` → `reviews`
pub fn target_service(virtual_host: &str) -> &str {
    let host = virtual_host.split(':').next().unwrap_or(virtual_host);
    host.split('.').next().unwrap_or(host)
}

fn cluster_version(cluster: &str) -> String {
    cluster.split('|').nth(2).unwrap_or_default().to_string()
}

fn resolve_route(route: &proto::Route) -> Option<RouteRule> {
    let destinations = match route.route.as_ref()?.cluster_specifier.as_ref()? {
        ClusterSpecifier::Cluster(cluster) => vec![WeightedVersion {
            cluster: cluster.clone(),
            version: cluster_version(cluster),
            weight: 100,
        }],
        ClusterSpecifier::WeightedClusters(weighted) => weighted
            .clusters
            .iter()
            .map(|c| WeightedVersion {
                cluster: c.name.clone(),
                version: cluster_version(&c.name),
                weight: c.weight.unwrap_or_default(),
            })
            .collect(),
    };

    let route_match = route.r#match.as_ref();
    let path = route_match
        .and_then(|m| m.path_specifier.as_ref())
        .and_then(|spec| match spec {
            PathSpecifier::Prefix(p) if !p.is_empty() => Some(StringMatcher::prefix(p)),
            PathSpecifier::Path(p) if !p.is_empty() => Some(StringMatcher::exact(p)),
            PathSpecifier::SafeRegex(re) if !re.regex.is_empty() => {
                Some(StringMatcher::regex(&re.regex))
            }
            _ => None,
        });
    let headers = route_match
        .map(|m| m.headers.iter().filter_map(convert_header_matcher).collect())
        .unwrap_or_default();

    Some(RouteRule {
        name: route.name.clone(),
        path,
        headers,
        destinations,
    })
}

/// Build per-service routes from a route configuration push.
pub fn resolve_routes(configs: &[RouteConfiguration]) -> HashMap<String, Arc<ServiceRoutes>> {
    let mut services = HashMap::new();
    for virtual_host in configs.iter().flat_map(|c| c.virtual_hosts.iter()) {
        if virtual_host.name == ALLOW_ANY {
            continue;
        }
        let service = target_service(&virtual_host.name).to_string();
        let rules: Vec<RouteRule> = virtual_host.routes.iter().filter_map(resolve_route).collect();
        if rules.is_empty() {
            continue;
        }
        let default_version = rules
            .last()
            .and_then(|rule| rule.destinations.first())
            .map(|dest| dest.version.clone());
        services.insert(
            service.clone(),
            Arc::new(ServiceRoutes {
                service,
                rules,
                default_version,
            }),
        );
    }
    services
}

#[derive(Debug, Clone)]
pub struct RouteResolveFilter {
    table: Arc<RouteTable>,
}

impl RouteResolveFilter {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }
}

impl ResolveFilter<RouteConfiguration> for RouteResolveFilter {
    fn resolve(&self, resources: &[RouteConfiguration]) {
        let services = resolve_routes(resources);
        debug!(services = services.len(), "Applying route configurations");
        self.table.replace(services);
    }
}
