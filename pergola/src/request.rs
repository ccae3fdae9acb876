//! The protocol-agnostic request model and the wire-level shapes the engine consumes.

use crate::TransportError;
use bytes::Bytes;
use std::{collections::HashMap, time::Duration};

/// A unary call to `method` on `target_service`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub target_service: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub shard_key: String,
    /// Per-call timeout. `None` or zero falls back to the default.
    pub timeout: Option<Duration>,
    pub body: Bytes,
}

impl Request {
    pub fn new(target_service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target_service: target_service.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn shard_key(self, shard_key: impl Into<String>) -> Self {
        Self {
            shard_key: shard_key.into(),
            ..self
        }
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    pub fn body(self, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..self
        }
    }
}

/// Opens a stream. Message bodies travel over the returned
/// [`ClientStream`](crate::ClientStream), so only the metadata of `request` is used.
///
/// A missing `request` is tolerated: it translates into a stream request without metadata
/// and the outbound decides what to do with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRequest {
    pub request: Option<Request>,
}

impl From<Request> for StreamRequest {
    fn from(request: Request) -> Self {
        Self {
            request: Some(request),
        }
    }
}

/// Result of a unary call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Headers in the order the wire layer returned them.
    pub headers: Vec<(String, String)>,
    /// Fully read body, empty when the wire response had none.
    pub body: Bytes,
}

impl Response {
    /// Materialize a wire response: copy its headers, then read and close its body.
    ///
    /// Partial body data is dropped when reading or closing fails.
    pub(crate) async fn from_wire(response: WireResponse) -> Result<Self, TransportError> {
        let headers = response.headers.into_items();
        let body = match response.body {
            Some(mut body) => {
                let bytes = body.read_all().await?;
                body.close().await?;
                bytes
            }
            None => Bytes::new(),
        };

        Ok(Self { headers, body })
    }
}

/// Header list with lower-cased keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an unordered map. Keys are lower-cased and sorted so the wire order is
    /// deterministic.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut items: Vec<_> = map
            .iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value.clone()))
            .collect();
        items.sort();
        Self(items)
    }

    /// Append a header, keeping it after any already present.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn items(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn into_items(self) -> Vec<(String, String)> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |headers, (k, v)| headers.with(k, v))
    }
}

/// Metadata shared by unary and stream wire requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub caller: String,
    pub service: String,
    pub encoding: String,
    pub procedure: String,
    pub headers: Headers,
    pub shard_key: String,
    pub routing_key: String,
    pub routing_delegate: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireRequest {
    pub meta: RequestMeta,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireStreamRequest {
    pub meta: Option<RequestMeta>,
}

/// Response body handed back by an outbound. It must be read and then closed.
#[async_trait::async_trait]
pub trait ResponseBody: Send {
    async fn read_all(&mut self) -> Result<Bytes, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A body that is already in memory.
#[derive(Debug, Clone, Default)]
pub struct BufferedBody(Option<Bytes>);

impl BufferedBody {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(Some(bytes.into()))
    }
}

#[async_trait::async_trait]
impl ResponseBody for BufferedBody {
    async fn read_all(&mut self) -> Result<Bytes, TransportError> {
        Ok(self.0.take().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct WireResponse {
    pub headers: Headers,
    pub body: Option<Box<dyn ResponseBody>>,
}

impl std::fmt::Debug for WireResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireResponse")
            .field("headers", &self.headers)
            .field("body", &self.body.is_some())
            .finish()
    }
}
