//! xDS Authz - control-plane driven request authorization for Rust services
//!
//! This library keeps a workload's authorization policies in sync with an
//! Istio/Envoy control plane and evaluates inbound requests against them:
//! - String, CIDR and header matchers composed as AND-of-OR rules
//! - Allow/deny policy registries per rule family (target, source, IP block,
//!   JWT claims, headers)
//! - JWT extraction and signature verification against inline JWKS
//! - Aggregated discovery (CDS → EDS → LDS → RDS) with ACK/NACK, reconnect
//!   and polling
//! - Envoy RBAC and JWT-authn filter translation into policies
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use xds_authz_r::matcher::{AndRule, OrGroup, PortMatcher, StringMatcher};
//! use xds_authz_r::rules::{NamedPolicy, PolicyStore, TargetRule};
//! use xds_authz_r::{AuthEngine, Verdict};
//!
//! let store = Arc::new(PolicyStore::new());
//! let engine = AuthEngine::new(Arc::clone(&store));
//!
//! // No policies: everything is allowed
//! assert_eq!(engine.evaluate_target("svc.ns", 80, "GET", "/"), Verdict::Allow);
//!
//! store.target().add(NamedPolicy::allow(
//!     "web",
//!     TargetRule {
//!         hosts: AndRule::new().with(OrGroup::of(StringMatcher::exact("svc.ns"))),
//!         ports: AndRule::new().with(OrGroup::new(vec![PortMatcher(80), PortMatcher(8080)], false)),
//!         ..Default::default()
//!     },
//! ));
//!
//! assert_eq!(engine.evaluate_target("svc.ns", 8080, "GET", "/"), Verdict::Allow);
//! assert_eq!(engine.evaluate_target("svc.ns", 81, "GET", "/"), Verdict::Deny);
//! ```
//!
//! # Discovery
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xds_authz_r::{AuthEngine, DiscoveryClient, PolicyStore, XdsConfig};
//!
//! # async fn run() -> xds_authz_r::Result<()> {
//! let store = Arc::new(PolicyStore::new());
//! let client = DiscoveryClient::connect_grpc(XdsConfig::new(), Arc::clone(&store))?;
//! client.init_and_observe().await?;
//!
//! let engine = AuthEngine::new(store);
//! # let _ = engine;
//! # Ok(())
//! # }
//! ```
//!
//! # Evaluation
//!
//! Each registry denies a request that matches every deny policy, allows it
//! when there are no allow policies, and otherwise allows it only if it
//! matches every allow policy. Malformed patterns never match and never fail
//! a request.

pub mod config;
pub mod engine;
pub mod error;
pub mod jwt;
pub mod matcher;
pub mod rules;
pub mod types;
pub mod xds;

// Re-export commonly used items
pub use config::{JwtPolicy, XdsConfig};
pub use engine::{AuthEngine, Decision, DenyReason, Denied, VerifiedJwt};
pub use error::{Result, TransportErrorKind, XdsError};
pub use jwt::{Claims, JwtRule, TokenLocation};
pub use rules::{NamedPolicy, PolicyRegistry, PolicySnapshot, PolicyStore};
pub use types::{header_value, header_values, HttpRequest, QueryParams, SourceRequest, Verdict};

// Re-export discovery types
pub use xds::{ChannelTransport, DiscoveryClient, DiscoveryTransport, RouteTable};

#[cfg(feature = "grpc")]
pub use xds::GrpcTransport;
