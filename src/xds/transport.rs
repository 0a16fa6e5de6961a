//! Bidirectional discovery stream to the control plane.
//!
//! A transport yields a [`DiscoveryStream`]: an outbound request sender and an
//! inbound response receiver. The dispatch loop is the single consumer of the
//! receiver; a transport reports stream failure by sending an `Err` and then
//! closing the channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::proto::{DiscoveryRequest, DiscoveryResponse};
use crate::error::{Result, TransportErrorKind, XdsError};

/// Buffered requests/responses per stream
pub const STREAM_BUFFER: usize = 32;

/// Client side of one discovery stream
#[derive(Debug)]
pub struct DiscoveryStream {
    pub requests: mpsc::Sender<DiscoveryRequest>,
    pub responses: mpsc::Receiver<Result<DiscoveryResponse>>,
}

/// Opens discovery streams. Called again after every stream failure.
#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    async fn connect(&self) -> Result<DiscoveryStream>;
}

/// Server side of a stream opened through [`ChannelTransport`]
#[derive(Debug)]
pub struct ServerStream {
    pub requests: mpsc::Receiver<DiscoveryRequest>,
    pub responses: mpsc::Sender<Result<DiscoveryResponse>>,
}

/// In-process transport: every `connect` hands the server half of a fresh
/// channel pair to whoever holds the acceptor.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    accepted: mpsc::UnboundedSender<ServerStream>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerStream>) {
        let (accepted, acceptor) = mpsc::unbounded_channel();
        (Self { accepted }, acceptor)
    }
}

#[async_trait]
impl DiscoveryTransport for ChannelTransport {
    async fn connect(&self) -> Result<DiscoveryStream> {
        let (request_tx, request_rx) = mpsc::channel(STREAM_BUFFER);
        let (response_tx, response_rx) = mpsc::channel(STREAM_BUFFER);
        self.accepted
            .send(ServerStream {
                requests: request_rx,
                responses: response_tx,
            })
            .map_err(|_| {
                XdsError::transport(TransportErrorKind::ConnectionFailed, "acceptor dropped")
            })?;
        Ok(DiscoveryStream {
            requests: request_tx,
            responses: response_rx,
        })
    }
}

#[cfg(feature = "grpc")]
pub use self::grpc::GrpcTransport;

#[cfg(feature = "grpc")]
mod grpc {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::metadata::AsciiMetadataValue;
    use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
    use tonic_prost::ProstCodec;
    use tracing::{debug, info};

    use super::{DiscoveryStream, DiscoveryTransport, STREAM_BUFFER};
    use crate::config::XdsConfig;
    use crate::error::{Result, TransportErrorKind, XdsError};
    use crate::xds::proto::{DiscoveryRequest, DiscoveryResponse, ADS_PATH};

    /// Aggregated discovery stream over gRPC, authenticated with the
    /// service-account bearer token.
    #[derive(Debug, Clone)]
    pub struct GrpcTransport {
        config: Arc<XdsConfig>,
    }

    impl GrpcTransport {
        /// Fails when the configuration is invalid or no token can be found.
        pub fn new(config: Arc<XdsConfig>) -> Result<Self> {
            config.validate()?;
            config.load_token()?;
            Ok(Self { config })
        }

        async fn channel(&self) -> Result<Channel> {
            let mut endpoint = Endpoint::from_shared(self.config.endpoint_uri())
                .map_err(|e| XdsError::transport(TransportErrorKind::ConnectionFailed, e.to_string()))?
                .connect_timeout(self.config.connect_timeout());

            if self.config.tls {
                let pem = std::fs::read(&self.config.ca_cert_path).map_err(|e| {
                    XdsError::transport(
                        TransportErrorKind::Tls,
                        format!("reading CA {}: {}", self.config.ca_cert_path.display(), e),
                    )
                })?;
                let tls = ClientTlsConfig::new()
                    .ca_certificate(Certificate::from_pem(pem))
                    .domain_name(self.config.host.clone());
                endpoint = endpoint
                    .tls_config(tls)
                    .map_err(|e| XdsError::transport(TransportErrorKind::Tls, e.to_string()))?;
            }

            endpoint
                .connect()
                .await
                .map_err(|e| XdsError::transport(TransportErrorKind::ConnectionFailed, e.to_string()))
        }
    }

    #[async_trait]
    impl DiscoveryTransport for GrpcTransport {
        async fn connect(&self) -> Result<DiscoveryStream> {
            // Re-read on every connect so a rotated token is picked up
            let token = self
                .config
                .load_token()
                .map_err(|e| XdsError::transport(TransportErrorKind::Auth, e.to_string()))?;
            let authorization: AsciiMetadataValue = format!("Bearer {}", token)
                .parse()
                .map_err(|_| XdsError::transport(TransportErrorKind::Auth, "token is not valid ASCII"))?;

            let channel = self.channel().await?;
            info!(endpoint = %self.config.endpoint_uri(), "Connected to control plane");

            let (request_tx, request_rx) = mpsc::channel::<DiscoveryRequest>(STREAM_BUFFER);
            let (response_tx, response_rx) = mpsc::channel(STREAM_BUFFER);

            // The control plane only answers once it has a request, so the call
            // is opened in the background while the caller queues its first
            // subscription.
            tokio::spawn(async move {
                let mut grpc = tonic::client::Grpc::new(channel);
                if let Err(e) = grpc.ready().await {
                    let e: tonic::codegen::StdError = e.into();
                    let _ = response_tx
                        .send(Err(XdsError::transport(
                            TransportErrorKind::ConnectionFailed,
                            format!("service not ready: {}", e),
                        )))
                        .await;
                    return;
                }

                let mut request = tonic::Request::new(ReceiverStream::new(request_rx));
                request.metadata_mut().insert("authorization", authorization);
                let codec: ProstCodec<DiscoveryRequest, DiscoveryResponse> = ProstCodec::default();
                let mut inbound = match grpc
                    .streaming(request, PathAndQuery::from_static(ADS_PATH), codec)
                    .await
                {
                    Ok(response) => response.into_inner(),
                    Err(status) => {
                        let _ = response_tx
                            .send(Err(XdsError::transport(
                                TransportErrorKind::StreamFailed,
                                status.to_string(),
                            )))
                            .await;
                        return;
                    }
                };

                loop {
                    tokio::select! {
                        message = inbound.message() => {
                            let item = match message {
                                Ok(Some(response)) => Ok(response),
                                Ok(None) => Err(XdsError::transport(
                                    TransportErrorKind::Closed,
                                    "stream closed by control plane",
                                )),
                                Err(status) => Err(XdsError::transport(
                                    TransportErrorKind::StreamFailed,
                                    status.to_string(),
                                )),
                            };
                            let done = item.is_err();
                            if response_tx.send(item).await.is_err() || done {
                                break;
                            }
                        }
                        _ = response_tx.closed() => break,
                    }
                }
                debug!("Discovery stream reader stopped");
            });

            Ok(DiscoveryStream {
                requests: request_tx,
                responses: response_rx,
            })
        }
    }

}
