//! Discovery client: one dispatch task drives the aggregated stream.
//!
//! Fetch order on every (re)connect is CDS with a wildcard subscription, then
//! EDS for the clusters' service names, then LDS once endpoints arrived (or
//! straight after CDS when no cluster uses EDS), then RDS for the route
//! configurations referenced by the listeners.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use prost_types::{value::Kind, Struct, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval};
use tracing::{debug, info, warn};

use super::filter::{AuthResolveFilter, ResolveFilter, RouteResolveFilter, RouteTable};
use super::proto::{
    Cluster, ClusterLoadAssignment, DiscoveryRequest, DiscoveryResponse, Listener, Node,
    RouteConfiguration,
};
use super::protocol::{
    decode_resources, reject, reject_unknown, ResourceKind, SubscriptionState, XdsResource,
};
use super::transport::{DiscoveryStream, DiscoveryTransport};
use crate::config::XdsConfig;
use crate::error::{Result, TransportErrorKind, XdsError};
use crate::rules::PolicyStore;

/// Envoy node sent with every request
pub fn build_node(config: &XdsConfig) -> Node {
    let string = |s: &str| Value {
        kind: Some(Kind::StringValue(s.to_string())),
    };
    let mut metadata = Struct::default();
    metadata.fields.insert("NAMESPACE".into(), string(&config.namespace));
    metadata.fields.insert("INSTANCE_IPS".into(), string(&config.pod_ip));
    metadata.fields.insert("POD_NAME".into(), string(&config.pod_name));
    metadata.fields.insert("CLUSTER_ID".into(), string(&config.cluster_id));

    Node {
        id: config.node_id(),
        cluster: format!("{}.{}", config.pod_name, config.namespace),
        metadata: Some(metadata),
        user_agent_name: env!("CARGO_PKG_NAME").to_string(),
    }
}

/// Keeps the policy store and route table in sync with the control plane.
pub struct DiscoveryClient {
    config: Arc<XdsConfig>,
    transport: Arc<dyn DiscoveryTransport>,
    store: Arc<PolicyStore>,
    routes: Arc<RouteTable>,
    listener_filters: Vec<Arc<dyn ResolveFilter<Listener>>>,
    route_filters: Vec<Arc<dyn ResolveFilter<RouteConfiguration>>>,
    synced: Arc<watch::Sender<bool>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryClient {
    /// Client writing into `store`. Empty identity fields are resolved from
    /// the environment.
    pub fn new(
        config: XdsConfig,
        transport: Arc<dyn DiscoveryTransport>,
        store: Arc<PolicyStore>,
    ) -> Self {
        let routes = Arc::new(RouteTable::new());
        let listener_filters: Vec<Arc<dyn ResolveFilter<Listener>>> =
            vec![Arc::new(AuthResolveFilter::new(Arc::clone(&store)))];
        let route_filters: Vec<Arc<dyn ResolveFilter<RouteConfiguration>>> =
            vec![Arc::new(RouteResolveFilter::new(Arc::clone(&routes)))];
        let (synced, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);

        Self {
            config: Arc::new(config.resolve_env()),
            transport,
            store,
            routes,
            listener_filters,
            route_filters,
            synced: Arc::new(synced),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Client over the gRPC transport described by `config`
    #[cfg(feature = "grpc")]
    pub fn connect_grpc(config: XdsConfig, store: Arc<PolicyStore>) -> Result<Self> {
        let config = config.resolve_env();
        let transport = super::transport::GrpcTransport::new(Arc::new(config.clone()))?;
        Ok(Self::new(config, Arc::new(transport), store))
    }

    /// Additional consumer of listener pushes; must be added before `start`.
    pub fn with_listener_filter(mut self, filter: Arc<dyn ResolveFilter<Listener>>) -> Self {
        self.listener_filters.push(filter);
        self
    }

    /// Additional consumer of route pushes; must be added before `start`.
    pub fn with_route_filter(mut self, filter: Arc<dyn ResolveFilter<RouteConfiguration>>) -> Self {
        self.route_filters.push(filter);
        self
    }

    pub fn config(&self) -> &XdsConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Whether the first listener push has been applied
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Spawn the dispatch task; later calls are no-ops.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let dispatcher = Dispatcher {
            node: build_node(&self.config),
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
            states: ResourceKind::ALL.map(SubscriptionState::new),
            listener_filters: self.listener_filters.clone(),
            route_filters: self.route_filters.clone(),
            synced: Arc::clone(&self.synced),
            shutdown: self.shutdown.subscribe(),
        };
        *task = Some(tokio::spawn(dispatcher.run()));
    }

    /// Start the client and wait for the first sync.
    ///
    /// Returns [`XdsError::BootstrapTimeout`] when nothing is synchronized
    /// within the configured bootstrap timeout; the client keeps running.
    pub async fn init_and_observe(&self) -> Result<()> {
        self.start();
        let timeout = self.config.bootstrap_timeout();
        let mut synced = self.synced.subscribe();
        let outcome = time::timeout(timeout, synced.wait_for(|synced| *synced))
            .await
            .map(|ready| ready.is_ok());
        match outcome {
            Ok(true) => {
                info!("Initial policies synchronized from control plane");
                Ok(())
            }
            Ok(false) => Err(XdsError::Shutdown),
            Err(_) => Err(XdsError::BootstrapTimeout(timeout)),
        }
    }

    /// Stop the dispatch task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// State owned by the dispatch task
struct Dispatcher {
    config: Arc<XdsConfig>,
    transport: Arc<dyn DiscoveryTransport>,
    node: Node,
    states: [SubscriptionState; 4],
    listener_filters: Vec<Arc<dyn ResolveFilter<Listener>>>,
    route_filters: Vec<Arc<dyn ResolveFilter<RouteConfiguration>>>,
    synced: Arc<watch::Sender<bool>>,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.transport.connect().await {
                Ok(stream) => match self.serve(stream).await {
                    Ok(()) => break,
                    Err(e) => warn!(error = %e, "Discovery stream failed"),
                },
                Err(e) => warn!(error = %e, "Failed to open discovery stream"),
            }
            self.reset();

            let delay = self.config.reconnect_delay();
            if self.config.log_xds {
                info!(delay = ?delay, "Reconnecting to control plane");
            }
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!("Discovery dispatch loop stopped");
    }

    /// Drive one stream until it fails (`Err`) or shutdown is requested (`Ok`).
    async fn serve(&mut self, stream: DiscoveryStream) -> Result<()> {
        let DiscoveryStream {
            requests,
            mut responses,
        } = stream;
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Ok(());
        }

        self.reset();
        self.subscribe(&requests, ResourceKind::Cluster, BTreeSet::new())
            .await?;

        let mut polling = self
            .config
            .polling_interval()
            .map(|period| time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                message = responses.recv() => match message {
                    Some(Ok(response)) => self.handle_response(&requests, response).await?,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(XdsError::transport(
                            TransportErrorKind::Closed,
                            "response stream ended",
                        ))
                    }
                },
                _ = tick(&mut polling) => self.poll(&requests).await?,
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    async fn handle_response(
        &mut self,
        requests: &mpsc::Sender<DiscoveryRequest>,
        response: DiscoveryResponse,
    ) -> Result<()> {
        let Some(kind) = ResourceKind::from_type_url(&response.type_url) else {
            warn!(type_url = %response.type_url, "Rejecting response with unsupported type");
            return send(requests, reject_unknown(&response, &self.node)).await;
        };
        if !self.state(kind).is_subscribed() {
            warn!(kind = %kind, "Rejecting response for a kind that was not requested");
            let nack = reject(
                &response,
                format!("{} was not requested on this stream", kind),
                &self.node,
            );
            return send(requests, nack).await;
        }

        match kind {
            ResourceKind::Cluster => {
                let clusters: Vec<Cluster> = self.decode(&response);
                self.ack(requests, kind, &response).await?;

                let service_names = Cluster::dependent_names(&clusters);
                if !service_names.is_empty() {
                    let endpoints = self.state(ResourceKind::Endpoint);
                    if !endpoints.is_subscribed() || endpoints.resource_names() != &service_names {
                        self.subscribe(requests, ResourceKind::Endpoint, service_names)
                            .await?;
                    }
                } else if !self.state(ResourceKind::Listener).is_subscribed() {
                    self.subscribe(requests, ResourceKind::Listener, BTreeSet::new())
                        .await?;
                }
            }
            ResourceKind::Endpoint => {
                let _: Vec<ClusterLoadAssignment> = self.decode(&response);
                self.ack(requests, kind, &response).await?;

                if !self.state(ResourceKind::Listener).is_subscribed() {
                    self.subscribe(requests, ResourceKind::Listener, BTreeSet::new())
                        .await?;
                }
            }
            ResourceKind::Listener => {
                let listeners: Vec<Listener> = self.decode(&response);
                for filter in &self.listener_filters {
                    filter.resolve(&listeners);
                }
                self.ack(requests, kind, &response).await?;
                self.synced.send_if_modified(|synced| !std::mem::replace(synced, true));

                let route_names = Listener::dependent_names(&listeners);
                let routes = self.state(ResourceKind::Route);
                if !route_names.is_empty()
                    && (!routes.is_subscribed() || routes.resource_names() != &route_names)
                {
                    self.subscribe(requests, ResourceKind::Route, route_names)
                        .await?;
                }
            }
            ResourceKind::Route => {
                let configs: Vec<RouteConfiguration> = self.decode(&response);
                for filter in &self.route_filters {
                    filter.resolve(&configs);
                }
                self.ack(requests, kind, &response).await?;
            }
        }
        Ok(())
    }

    fn decode<R: XdsResource>(&self, response: &DiscoveryResponse) -> Vec<R> {
        let resources: Vec<R> = decode_resources(&response.resources);
        if self.config.log_xds {
            info!(
                kind = %R::KIND,
                version = %response.version_info,
                resources = resources.len(),
                "Received xDS push"
            );
        } else {
            debug!(
                kind = %R::KIND,
                version = %response.version_info,
                resources = resources.len(),
                "Received xDS push"
            );
        }
        resources
    }

    async fn ack(
        &mut self,
        requests: &mpsc::Sender<DiscoveryRequest>,
        kind: ResourceKind,
        response: &DiscoveryResponse,
    ) -> Result<()> {
        let ack = self.states[kind as usize].ack(response, &self.node);
        send(requests, ack).await
    }

    async fn subscribe(
        &mut self,
        requests: &mpsc::Sender<DiscoveryRequest>,
        kind: ResourceKind,
        names: BTreeSet<String>,
    ) -> Result<()> {
        debug!(kind = %kind, names = ?names, "Subscribing");
        let request = self.states[kind as usize].subscribe(names, &self.node);
        send(requests, request).await
    }

    async fn poll(&mut self, requests: &mpsc::Sender<DiscoveryRequest>) -> Result<()> {
        for state in self.states.iter().filter(|s| s.is_subscribed()) {
            debug!(kind = %state.kind(), "Polling subscription");
            send(requests, state.poll(&self.node)).await?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }

    fn state(&self, kind: ResourceKind) -> &SubscriptionState {
        &self.states[kind as usize]
    }
}

async fn send(requests: &mpsc::Sender<DiscoveryRequest>, request: DiscoveryRequest) -> Result<()> {
    requests
        .send(request)
        .await
        .map_err(|_| XdsError::transport(TransportErrorKind::Closed, "request channel closed"))
}

async fn tick(polling: &mut Option<Interval>) {
    match polling {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
