use std::path::{Path, PathBuf};
use tracing::Dispatch;

/// Encoding advertised when none is configured.
pub const DEFAULT_ENCODING: &str = "proto";

/// Construction-time configuration of a [`GrpcTransport`](crate::GrpcTransport).
///
/// ```rust
/// use pergola::Options;
///
/// let options = Options::new(["127.0.0.1:5000", "127.0.0.1:5001"])
///     .tracer(tracing::Dispatch::none())
///     .caller("my-service")
///     .max_response_size(4 * 1024 * 1024);
///
/// assert_eq!(options.addresses.len(), 2);
/// assert!(options.tls_paths().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// `host:port` addresses of the peers. Must not be empty.
    pub addresses: Vec<String>,
    /// Dispatcher the engine reports spans and events to. Required.
    pub tracer: Option<Dispatch>,
    /// Name of the calling service. Required.
    pub caller: String,
    pub encoding: String,
    pub routing_key: String,
    pub routing_delegate: String,
    /// Upper bound for a decoded response message. `0` keeps the engine default.
    pub max_response_size: usize,
    pub ca_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            tracer: None,
            caller: String::new(),
            encoding: DEFAULT_ENCODING.to_string(),
            routing_key: String::new(),
            routing_delegate: String::new(),
            max_response_size: 0,
            ca_path: None,
            cert_path: None,
            private_key_path: None,
        }
    }
}

impl Options {
    /// Start configuring a transport for the given peer addresses.
    pub fn new<I, A>(addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn tracer(self, tracer: impl Into<Dispatch>) -> Self {
        Self {
            tracer: Some(tracer.into()),
            ..self
        }
    }

    pub fn caller(self, caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            ..self
        }
    }

    pub fn encoding(self, encoding: impl Into<String>) -> Self {
        Self {
            encoding: encoding.into(),
            ..self
        }
    }

    /// Routing key sent with every call. Not overridable per call.
    pub fn routing_key(self, routing_key: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            ..self
        }
    }

    /// Routing delegate sent with every call. Not overridable per call.
    pub fn routing_delegate(self, routing_delegate: impl Into<String>) -> Self {
        Self {
            routing_delegate: routing_delegate.into(),
            ..self
        }
    }

    pub fn max_response_size(self, max_response_size: usize) -> Self {
        Self {
            max_response_size,
            ..self
        }
    }

    /// Enable mutual TLS with a CA bundle and a client certificate/key pair.
    pub fn with_tls(
        self,
        ca_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ca_path: Some(ca_path.into()),
            cert_path: Some(cert_path.into()),
            private_key_path: Some(private_key_path.into()),
            ..self
        }
    }

    /// The `(ca, cert, key)` triple, when all three paths are set and non-empty.
    ///
    /// A partially configured triple does not enable TLS.
    pub fn tls_paths(&self) -> Option<(&Path, &Path, &Path)> {
        fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
            path.as_deref().filter(|p| !p.as_os_str().is_empty())
        }

        Some((
            non_empty(&self.ca_path)?,
            non_empty(&self.cert_path)?,
            non_empty(&self.private_key_path)?,
        ))
    }

    /// Whether some, but not all, of the TLS paths are set.
    pub(crate) fn has_partial_tls(&self) -> bool {
        let set = [&self.ca_path, &self.cert_path, &self.private_key_path]
            .iter()
            .filter(|p| p.as_deref().map_or(false, |p| !p.as_os_str().is_empty()))
            .count();
        set > 0 && set < 3
    }
}
