//! Control-plane client over the aggregated discovery service.

pub mod discovery;
pub mod filter;
pub mod proto;
pub mod protocol;
pub mod transport;

pub use discovery::{build_node, DiscoveryClient};
pub use filter::{
    resolve_listeners, resolve_routes, AuthResolveFilter, ResolveFilter, RouteResolveFilter,
    RouteRule, RouteTable, ServiceRoutes, WeightedVersion,
};
pub use protocol::{Phase, ResourceKind, SubscriptionState, XdsResource};
pub use transport::{ChannelTransport, DiscoveryStream, DiscoveryTransport, ServerStream};

#[cfg(feature = "grpc")]
pub use transport::GrpcTransport;
