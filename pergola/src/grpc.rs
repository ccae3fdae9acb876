//! The production engine: lazily connected tonic [`Channel`]s, one per peer, dialed either in
//! plaintext or through a [`TlsDialer`].

use crate::{
    engine::{Engine, EngineConfig, Lifecycle, LifecycleState, StreamOutbound, UnaryOutbound},
    peer::{PeerIdentifier, PeerTransport, RoundRobin},
    BufferedBody, BytesCodec, CallContext, ClientStream, ConfigError, Headers, RequestMeta,
    SecureChannel, TransportError, WireRequest, WireResponse, WireStreamRequest,
};
use futures::StreamExt;
use http::{uri::PathAndQuery, Uri};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    client::Grpc,
    metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue},
    transport::{Channel, Endpoint},
};
use tracing_futures::{Instrument, WithSubscriber};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Messages a caller can queue on a stream before `send` waits for the peer.
const STREAM_SEND_BUFFER: usize = 16;

/// Transport metadata attached to every call.
pub mod header {
    pub const CALLER: &str = "rpc-caller";
    pub const SERVICE: &str = "rpc-service";
    pub const ENCODING: &str = "rpc-encoding";
    pub const SHARD_KEY: &str = "rpc-shard-key";
    pub const ROUTING_KEY: &str = "rpc-routing-key";
    pub const ROUTING_DELEGATE: &str = "rpc-routing-delegate";
}

/// A bound peer: its identifier and the channel that reaches it.
#[derive(Debug, Clone)]
pub struct GrpcPeer {
    id: PeerIdentifier,
    channel: Channel,
}

impl GrpcPeer {
    pub fn id(&self) -> &PeerIdentifier {
        &self.id
    }
}

fn endpoint(id: &PeerIdentifier) -> Result<Endpoint, ConfigError> {
    Endpoint::from_shared(format!("http://{}", id.address())).map_err(|err| {
        ConfigError::InvalidAddress {
            address: id.to_string(),
            source: err.into(),
        }
    })
}

/// tonic-backed engine. Peers it retains connect lazily and in plaintext.
#[derive(Debug)]
pub struct GrpcEngine {
    config: EngineConfig,
    state: Arc<LifecycleState>,
}

impl GrpcEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Arc::new(LifecycleState::new("grpc transport")),
        }
    }
}

impl PeerTransport for GrpcEngine {
    type Peer = GrpcPeer;

    fn retain_peer(&self, id: &PeerIdentifier) -> Result<GrpcPeer, ConfigError> {
        let channel = endpoint(id)?.connect_lazy();
        Ok(GrpcPeer {
            id: id.clone(),
            channel,
        })
    }
}

#[async_trait::async_trait]
impl Lifecycle for GrpcEngine {
    async fn start(&self) -> Result<(), TransportError> {
        self.state.start()?;
        tracing::debug!("grpc transport started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.state.stop();
        tracing::debug!("grpc transport stopped");
        Ok(())
    }
}

impl Engine for GrpcEngine {
    type Dialer = TlsDialer;
    type Outbound = GrpcOutbound;

    fn new_dialer(&self, secure: SecureChannel) -> TlsDialer {
        TlsDialer {
            connector: TlsConnector::from(secure.client_config()),
        }
    }

    fn new_outbound(&self, chooser: RoundRobin<GrpcPeer>) -> GrpcOutbound {
        GrpcOutbound {
            peers: RwLock::new(Some(chooser)),
            config: self.config.clone(),
            engine: Arc::clone(&self.state),
            state: LifecycleState::new("grpc outbound"),
        }
    }
}

/// Retains peers whose connections are wrapped in TLS.
#[derive(Clone)]
pub struct TlsDialer {
    connector: TlsConnector,
}

impl PeerTransport for TlsDialer {
    type Peer = GrpcPeer;

    fn retain_peer(&self, id: &PeerIdentifier) -> Result<GrpcPeer, ConfigError> {
        let connector = self.connector.clone();
        let channel = endpoint(id)?.connect_with_connector_lazy(tower::service_fn(
            move |uri: Uri| dial_tls(connector.clone(), uri),
        ));
        Ok(GrpcPeer {
            id: id.clone(),
            channel,
        })
    }
}

#[tracing::instrument(level = "debug", skip(connector))]
async fn dial_tls(
    connector: TlsConnector,
    uri: Uri,
) -> Result<TokioIo<TlsStream<TcpStream>>, BoxError> {
    let host = uri
        .host()
        .ok_or("peer uri has no host")?
        .trim_start_matches('[')
        .trim_end_matches(']');
    let port = uri.port_u16().unwrap_or(80);

    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;

    let server_name = ServerName::try_from(host)?.to_owned();
    let tls = connector.connect(server_name, tcp).await?;

    Ok(TokioIo::new(tls))
}

/// Issues unary and stream calls to the peers of a [`RoundRobin`] chooser.
///
/// Stopping the outbound releases the bound peers, closing their connections once no call
/// holds them any more.
pub struct GrpcOutbound {
    peers: RwLock<Option<RoundRobin<GrpcPeer>>>,
    config: EngineConfig,
    engine: Arc<LifecycleState>,
    state: LifecycleState,
}

impl GrpcOutbound {
    fn ensure_running(&self) -> Result<(), TransportError> {
        self.engine.ensure_running()?;
        self.state.ensure_running()
    }

    /// Next peer in rotation. The lock is released before the call goes out.
    fn choose(&self) -> Result<GrpcPeer, TransportError> {
        self.ensure_running()?;
        let peers = self.peers.read();
        let chooser = peers
            .as_ref()
            .ok_or(TransportError::NotRunning("grpc outbound"))?;
        chooser.choose().cloned().ok_or(TransportError::NoPeers)
    }

    fn client(&self, peer: &GrpcPeer) -> Grpc<Channel> {
        let client = Grpc::new(peer.channel.clone());
        match self.config.max_recv_msg_size {
            Some(limit) => client.max_decoding_message_size(limit),
            None => client,
        }
    }

    fn span(&self, meta: &RequestMeta, peer: &GrpcPeer) -> tracing::Span {
        tracing::dispatcher::with_default(&self.config.tracer, || {
            tracing::info_span!(
                "grpc.call",
                caller = %meta.caller,
                service = %meta.service,
                procedure = %meta.procedure,
                peer = %peer.id,
            )
        })
    }
}

#[async_trait::async_trait]
impl Lifecycle for GrpcOutbound {
    async fn start(&self) -> Result<(), TransportError> {
        self.engine.ensure_running()?;
        self.state.start()?;
        let peers = self.peers.read().as_ref().map_or(0, RoundRobin::len);
        tracing::debug!(peers, "grpc outbound started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.state.stop();
        let released = self.peers.write().take();
        tracing::debug!(
            peers = released.as_ref().map_or(0, RoundRobin::len),
            "grpc outbound stopped"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl UnaryOutbound for GrpcOutbound {
    async fn call(
        &self,
        ctx: &CallContext,
        request: WireRequest,
    ) -> Result<WireResponse, TransportError> {
        let peer = self.choose()?;
        let path = procedure_path(&request.meta.service, &request.meta.procedure)?;
        let span = self.span(&request.meta, &peer);

        let mut grpc_request = tonic::Request::new(request.body);
        apply_meta(grpc_request.metadata_mut(), &request.meta)?;
        if let Some(remaining) = ctx.remaining() {
            grpc_request.set_timeout(remaining);
        }

        let mut client = self.client(&peer);
        let response = async move {
            client.ready().await?;
            let response = client.unary(grpc_request, path, BytesCodec).await?;
            Ok::<_, TransportError>(response)
        }
        .instrument(span)
        .with_subscriber(self.config.tracer.clone())
        .await?;

        let (metadata, body, _) = response.into_parts();
        Ok(WireResponse {
            headers: response_headers(&metadata),
            body: Some(Box::new(BufferedBody::new(body))),
        })
    }
}

#[async_trait::async_trait]
impl StreamOutbound for GrpcOutbound {
    async fn call_stream(
        &self,
        ctx: &CallContext,
        request: WireStreamRequest,
    ) -> Result<ClientStream, TransportError> {
        self.ensure_running()?;
        let meta = request.meta.ok_or(TransportError::MissingStreamMeta)?;
        let peer = self.choose()?;
        let path = procedure_path(&meta.service, &meta.procedure)?;
        let span = self.span(&meta, &peer);

        let (sender, receiver) = mpsc::channel(STREAM_SEND_BUFFER);
        let mut grpc_request = tonic::Request::new(ReceiverStream::new(receiver));
        apply_meta(grpc_request.metadata_mut(), &meta)?;
        if let Some(remaining) = ctx.remaining() {
            grpc_request.set_timeout(remaining);
        }

        // Peers may hold their response headers until the first message arrives, so the
        // stream is handed back before it is open.
        let mut client = self.client(&peer);
        let open = async move {
            client.ready().await?;
            let response = client.streaming(grpc_request, path, BytesCodec).await?;

            let (metadata, messages, _) = response.into_parts();
            let responses = messages
                .map(|message| message.map_err(TransportError::from))
                .boxed();
            Ok::<_, TransportError>((response_headers(&metadata).into_items(), responses))
        }
        .instrument(span)
        .with_subscriber(self.config.tracer.clone());

        let ctx = *ctx;
        Ok(ClientStream::opening(sender, async move {
            ctx.run(open).await
        }))
    }
}

/// Map a procedure onto a gRPC path.
///
/// `pkg.Service::Method` and `pkg.Service/Method` name their own service; a bare method is
/// resolved against `service`.
pub(crate) fn procedure_path(service: &str, procedure: &str) -> Result<PathAndQuery, TransportError> {
    let path = if let Some((service, method)) = procedure.split_once("::") {
        format!("/{service}/{method}")
    } else if procedure.contains('/') {
        format!("/{}", procedure.trim_start_matches('/'))
    } else {
        format!("/{service}/{procedure}")
    };

    PathAndQuery::try_from(path.as_str()).map_err(|_| TransportError::InvalidPath(path))
}

fn apply_meta(metadata: &mut MetadataMap, meta: &RequestMeta) -> Result<(), TransportError> {
    let transport_headers = [
        (header::CALLER, &meta.caller),
        (header::SERVICE, &meta.service),
        (header::ENCODING, &meta.encoding),
        (header::SHARD_KEY, &meta.shard_key),
        (header::ROUTING_KEY, &meta.routing_key),
        (header::ROUTING_DELEGATE, &meta.routing_delegate),
    ];
    for (name, value) in transport_headers {
        if !value.is_empty() {
            append(metadata, name, value)?;
        }
    }

    for (name, value) in meta.headers.items() {
        append(metadata, name, value)?;
    }
    Ok(())
}

fn append(metadata: &mut MetadataMap, name: &str, value: &str) -> Result<(), TransportError> {
    let invalid = |source: BoxError| TransportError::InvalidHeader {
        name: name.to_string(),
        source,
    };
    let key: MetadataKey<Ascii> =
        MetadataKey::from_bytes(name.as_bytes()).map_err(|err| invalid(err.into()))?;
    let value: MetadataValue<Ascii> =
        MetadataValue::try_from(value).map_err(|err| invalid(err.into()))?;

    metadata.append(key, value);
    Ok(())
}

fn is_reserved(key: &str) -> bool {
    key.starts_with("grpc-") || key.starts_with("rpc-") || key == "content-type"
}

/// Copy response metadata in wire order, minus reserved entries.
///
/// Values that are not visible ASCII are carried lossily; binary values keep their base64
/// wire encoding.
fn response_headers(metadata: &MetadataMap) -> Headers {
    metadata
        .iter()
        .map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => (key.as_str(), value.as_encoded_bytes()),
            KeyAndValueRef::Binary(key, value) => (key.as_str(), value.as_encoded_bytes()),
        })
        .filter(|(key, _)| !is_reserved(key))
        .map(|(key, value)| (key.to_string(), String::from_utf8_lossy(value).into_owned()))
        .collect()
}
