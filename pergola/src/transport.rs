//! [`GrpcTransport`] owns the engine and its outbound, and dispatches calls through them.

use crate::{
    engine::{Engine, EngineConfig, Lifecycle, StreamOutbound, UnaryOutbound},
    peer::{self, RoundRobin},
    CallContext, ClientStream, ConfigError, Error, GrpcEngine, Headers, Options, Request,
    RequestMeta, Response, SecureChannel, ShutdownError, StreamRequest, TransportError,
    ValidationError, WireRequest, WireStreamRequest,
};
use std::fmt;
use tracing::Dispatch;

/// Wire protocol spoken by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Grpc,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Grpc => f.write_str("grpc"),
        }
    }
}

/// A transport that issues unary calls.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, ctx: &CallContext, request: &Request) -> Result<Response, Error>;

    fn protocol(&self) -> Protocol;

    fn tracer(&self) -> &Dispatch;
}

/// A [`Transport`] that holds resources which must be released.
#[async_trait::async_trait]
pub trait TransportCloser: Transport {
    async fn close(&self) -> Result<(), Error>;
}

/// Per-transport call settings. Fixed at construction and shared read-only by every call.
#[derive(Debug, Clone)]
struct CallConfig {
    caller: String,
    encoding: String,
    routing_key: String,
    routing_delegate: String,
}

impl CallConfig {
    fn meta(&self, request: &Request) -> RequestMeta {
        RequestMeta {
            caller: self.caller.clone(),
            service: request.target_service.clone(),
            encoding: self.encoding.clone(),
            procedure: request.method.clone(),
            headers: Headers::from_map(&request.headers),
            shard_key: request.shard_key.clone(),
            routing_key: self.routing_key.clone(),
            routing_delegate: self.routing_delegate.clone(),
        }
    }

    fn wire_request(&self, request: &Request) -> WireRequest {
        WireRequest {
            meta: self.meta(request),
            body: request.body.clone(),
        }
    }

    fn wire_stream_request(&self, request: &StreamRequest) -> WireStreamRequest {
        WireStreamRequest {
            meta: request.request.as_ref().map(|request| self.meta(request)),
        }
    }
}

/// A started gRPC transport balancing calls over a fixed set of peers.
///
/// ```rust,no_run
/// # async fn run() -> Result<(), pergola::Error> {
/// use pergola::{CallContext, GrpcTransport, Options, Request};
///
/// let transport = GrpcTransport::new(
///     Options::new(["127.0.0.1:5000"])
///         .tracer(tracing::Dispatch::none())
///         .caller("my-service"),
/// )
/// .await?;
///
/// let response = transport
///     .call(
///         &CallContext::background(),
///         &Request::new("echo", "pkg.Echo::Say").body("hello"),
///     )
///     .await?;
/// println!("{} bytes", response.body.len());
///
/// transport.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct GrpcTransport<E: Engine = GrpcEngine> {
    engine: E,
    outbound: E::Outbound,
    config: CallConfig,
    tracer: Dispatch,
}

impl<E: Engine> fmt::Debug for GrpcTransport<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("config", &self.config)
            .finish()
    }
}

impl GrpcTransport<GrpcEngine> {
    /// Validate `options`, bind the peers and start a tonic-backed transport.
    pub async fn new(options: Options) -> Result<Self, Error> {
        Self::with_engine(options, GrpcEngine::new).await
    }
}

impl<E: Engine> GrpcTransport<E> {
    /// Like [`GrpcTransport::new`], with the engine built by `new_engine`.
    ///
    /// Nothing is started unless every required option is present. If the outbound fails to
    /// start, the already started engine is stopped again before returning.
    #[tracing::instrument(level = "debug", skip_all, fields(addresses = options.addresses.len()))]
    pub async fn with_engine<F>(options: Options, new_engine: F) -> Result<Self, Error>
    where
        F: FnOnce(EngineConfig) -> E,
    {
        if options.addresses.is_empty() {
            return Err(ConfigError::NoAddresses.into());
        }
        let tracer = options.tracer.clone().ok_or(ConfigError::NoTracer)?;
        if options.caller.is_empty() {
            return Err(ConfigError::NoCaller.into());
        }

        let engine = new_engine(EngineConfig {
            tracer: tracer.clone(),
            max_recv_msg_size: Some(options.max_response_size).filter(|size| *size > 0),
        });

        let ids = peer::identify_all(&options.addresses);
        let chooser = match options.tls_paths() {
            Some((ca, cert, key)) => {
                let secure = SecureChannel::from_pem_files(ca, cert, key)?;
                RoundRobin::bind(&engine.new_dialer(secure), &ids)?
            }
            None => {
                if options.has_partial_tls() {
                    tracing::warn!("ignoring incomplete tls configuration, dialing in plaintext");
                }
                RoundRobin::bind(&engine, &ids)?
            }
        };
        let outbound = engine.new_outbound(chooser);

        engine.start().await?;
        if let Err(err) = outbound.start().await {
            if let Err(stop_err) = engine.stop().await {
                tracing::debug!(error = %stop_err, "failed to stop transport after outbound start failure");
            }
            return Err(err.into());
        }

        Ok(Self {
            engine,
            outbound,
            config: CallConfig {
                caller: options.caller,
                encoding: options.encoding,
                routing_key: options.routing_key,
                routing_delegate: options.routing_delegate,
            },
            tracer,
        })
    }

    /// Issue one unary call.
    ///
    /// The call is bounded by the deadline of `ctx` or, without one, by the request timeout
    /// (one second when unset). Engine errors are returned as is.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(service = %request.target_service, procedure = %request.method)
    )]
    pub async fn call(&self, ctx: &CallContext, request: &Request) -> Result<Response, Error> {
        if request.target_service.is_empty() {
            return Err(ValidationError::NoService.into());
        }
        if request.method.is_empty() {
            return Err(ValidationError::NoProcedure.into());
        }

        let ctx = ctx.derive(request.timeout);
        let response = ctx
            .run(self.outbound.call(&ctx, self.config.wire_request(request)))
            .await?;

        Ok(Response::from_wire(response).await?)
    }

    /// Open a stream. Whatever the outbound returns is passed back unchanged.
    ///
    /// Unlike [`call`](Self::call), service and method are not checked here; a stream request
    /// without an inner request is forwarded with no metadata.
    pub async fn call_stream(
        &self,
        ctx: &CallContext,
        request: &StreamRequest,
    ) -> Result<ClientStream, Error> {
        let stream = self
            .outbound
            .call_stream(ctx, self.config.wire_stream_request(request))
            .await?;
        Ok(stream)
    }

    /// Stop the engine and the outbound. Both are always attempted.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn close(&self) -> Result<(), Error> {
        let engine = self.engine.stop().await;
        let outbound = self.outbound.stop().await;

        match ShutdownError::combine([engine, outbound]) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }

    pub fn tracer(&self) -> &Dispatch {
        &self.tracer
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

#[async_trait::async_trait]
impl<E: Engine> Transport for GrpcTransport<E> {
    async fn call(&self, ctx: &CallContext, request: &Request) -> Result<Response, Error> {
        GrpcTransport::call(self, ctx, request).await
    }

    fn protocol(&self) -> Protocol {
        GrpcTransport::protocol(self)
    }

    fn tracer(&self) -> &Dispatch {
        GrpcTransport::tracer(self)
    }
}

#[async_trait::async_trait]
impl<E: Engine> TransportCloser for GrpcTransport<E> {
    async fn close(&self) -> Result<(), Error> {
        GrpcTransport::close(self).await
    }
}
