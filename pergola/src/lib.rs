//! `pergola` issues protocol-agnostic calls over gRPC to a fixed set of peers.
//!
//! A [`GrpcTransport`] is built once from [`Options`]: the peer addresses are bound to a
//! round-robin chooser, the channel is optionally secured with mutual TLS, and the underlying
//! engine and outbound are started. Calls then translate a generic [`Request`] into the wire
//! request the engine expects and materialize the wire response into a [`Response`].
//!
//! # Simple example
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), pergola::Error> {
//!     use pergola::{CallContext, GrpcTransport, Options, Request};
//!
//!     let transport = GrpcTransport::new(
//!         Options::new(["10.0.0.1:5000", "10.0.0.2:5000"])
//!             .tracer(tracing::Dispatch::none())
//!             .caller("my-service"),
//!     )
//!     .await?;
//!
//!     // Without a deadline on the context the request timeout applies, one second by default.
//!     let response = transport
//!         .call(
//!             &CallContext::background(),
//!             &Request::new("echo", "pkg.Echo::Say").body("hello"),
//!         )
//!         .await?;
//!
//!     println!("{:?}", response.headers);
//!     transport.close().await
//! }
//! ```
//!
//! # Mutual TLS
//!
//! Setting the CA bundle and the client key pair dials every peer over TLS. The server chain
//! must be signed by the CA, but its hostnames are not checked against the peer address.
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), pergola::Error> {
//! use pergola::{GrpcTransport, Options};
//!
//! let transport = GrpcTransport::new(
//!     Options::new(["10.0.0.1:5000"])
//!         .tracer(tracing::Dispatch::none())
//!         .caller("my-service")
//!         .with_tls("ca.pem", "client.pem", "client.key"),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Internals
//! The engine is abstracted behind [`Engine`] so that [`GrpcTransport::with_engine`] can run
//! against a deterministic test double. [`GrpcEngine`] is the tonic implementation: one lazily
//! connected channel per peer, raw bodies framed by [`BytesCodec`].

mod codec;
mod context;
mod descriptor;
mod engine;
mod error;
mod grpc;
mod options;
pub mod peer;
mod request;
mod secure;
mod stream;
mod transport;

pub use codec::*;
pub use context::*;
pub use descriptor::*;
pub use engine::*;
pub use error::*;
pub use grpc::{header, GrpcEngine, GrpcOutbound, GrpcPeer, TlsDialer};
pub use options::*;
pub use request::*;
pub use secure::*;
pub use stream::*;
pub use transport::*;

const _: () = {
    const fn assert_is_send_sync<T: Send + Sync>() {}
    assert_is_send_sync::<GrpcTransport<GrpcEngine>>();
    assert_is_send_sync::<Options>();
};
