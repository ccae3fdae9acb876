//! Error taxonomy of the adapter.
//!
//! Construction failures surface as [`ConfigError`], missing per-call fields as
//! [`ValidationError`], anything produced by the underlying engine as [`TransportError`]
//! and a failed [`close`](crate::GrpcTransport::close) as [`ShutdownError`].

use std::{fmt, path::PathBuf};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error returned by [`GrpcTransport`](crate::GrpcTransport).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Missing or invalid construction-time input.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("must specify at least one grpc address")]
    NoAddresses,
    #[error("must specify grpc tracer")]
    NoTracer,
    #[error("must specify grpc caller")]
    NoCaller,
    #[error("invalid peer address '{address}'")]
    InvalidAddress {
        address: String,
        #[source]
        source: BoxError,
    },
    #[error("could not load ca from '{}'", path.display())]
    ReadCa {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append ca to the certificate pool: no trusted certificate found")]
    AppendCa,
    #[error("failed to load X509 keypair: {reason}")]
    LoadKeyPair {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("failed to build tls client configuration")]
    Tls(#[source] rustls::Error),
}

/// Missing per-call required fields. No network attempt is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("must specify grpc service")]
    NoService,
    #[error("must specify grpc procedure")]
    NoProcedure,
}

/// Failure reported by the underlying engine.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Status(#[from] tonic::Status),
    #[error(transparent)]
    Connect(#[from] tonic::transport::Error),
    #[error("deadline exceeded before the call completed")]
    DeadlineExceeded,
    #[error("no peers available")]
    NoPeers,
    #[error("{0} is not running")]
    NotRunning(&'static str),
    #[error("{0} was stopped and cannot be restarted")]
    AlreadyStopped(&'static str),
    #[error("stream request carries no metadata")]
    MissingStreamMeta,
    #[error("invalid header '{name}'")]
    InvalidHeader {
        name: String,
        #[source]
        source: BoxError,
    },
    #[error("invalid procedure path '{0}'")]
    InvalidPath(String),
    #[error("failed to read response body")]
    BodyRead(#[source] BoxError),
    #[error("failed to close response body")]
    BodyClose(#[source] BoxError),
    #[error("stream closed for sending")]
    StreamClosed,
    #[error(transparent)]
    Other(BoxError),
}

/// Aggregate of the failures seen while stopping the engine and the outbound.
///
/// Both stops are always attempted; every failure is kept in the order it happened.
#[derive(Debug)]
pub struct ShutdownError {
    errors: Vec<TransportError>,
}

impl ShutdownError {
    /// Combine the outcome of each stop, returning `None` when all of them succeeded.
    pub fn combine<I>(results: I) -> Option<Self>
    where
        I: IntoIterator<Item = Result<(), TransportError>>,
    {
        let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    /// The individual stop failures.
    pub fn errors(&self) -> &[TransportError] {
        &self.errors
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport shutdown failed")?;
        for (i, err) in self.errors.iter().enumerate() {
            let separator = if i == 0 { ": " } else { "; " };
            write!(f, "{separator}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Failures of a [`DescriptorProvider`](crate::DescriptorProvider).
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("could not read descriptor set from '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not decode descriptor set")]
    Decode(#[from] prost_reflect::DescriptorError),
    #[error("service '{0}' not found")]
    ServiceNotFound(String),
    #[error("descriptor provider is closed")]
    Closed,
}
