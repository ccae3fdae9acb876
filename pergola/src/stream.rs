use crate::TransportError;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use std::{fmt, future::Future};
use tokio::{sync::mpsc, task::JoinHandle};

/// Messages received from the peer.
pub type Responses = BoxStream<'static, Result<Bytes, TransportError>>;

/// Response headers and messages of a stream the peer has answered.
pub type Opened = (Vec<(String, String)>, Responses);

enum Inbound {
    Opening(JoinHandle<Result<Opened, TransportError>>),
    Open {
        headers: Vec<(String, String)>,
        responses: Responses,
    },
    Failed,
}

/// Handle to a stream. Reads and writes on it happen after
/// [`call_stream`](crate::GrpcTransport::call_stream) has returned.
///
/// A stream may still be opening when the handle is returned: messages can be sent right
/// away, while [`headers`](Self::headers) and [`receive`](Self::receive) wait for the peer
/// to answer. Dropping the handle abandons a pending open.
pub struct ClientStream {
    sender: Option<mpsc::Sender<Bytes>>,
    inbound: Inbound,
}

impl ClientStream {
    /// A stream the peer has already answered.
    pub fn new(
        headers: Vec<(String, String)>,
        sender: mpsc::Sender<Bytes>,
        responses: Responses,
    ) -> Self {
        Self {
            sender: Some(sender),
            inbound: Inbound::Open { headers, responses },
        }
    }

    /// A stream whose open completes in the background. Must be called within a tokio
    /// runtime.
    pub fn opening<F>(sender: mpsc::Sender<Bytes>, open: F) -> Self
    where
        F: Future<Output = Result<Opened, TransportError>> + Send + 'static,
    {
        Self {
            sender: Some(sender),
            inbound: Inbound::Opening(tokio::spawn(open)),
        }
    }

    /// Wait for the peer to answer. A failed open is reported once, then as
    /// [`TransportError::StreamClosed`].
    async fn open(&mut self) -> Result<(), TransportError> {
        if let Inbound::Opening(handle) = &mut self.inbound {
            let opened = match handle.await {
                Ok(opened) => opened,
                Err(err) => Err(TransportError::Other(err.into())),
            };
            match opened {
                Ok((headers, responses)) => {
                    self.inbound = Inbound::Open { headers, responses };
                }
                Err(err) => {
                    self.inbound = Inbound::Failed;
                    return Err(err);
                }
            }
        }

        match self.inbound {
            Inbound::Failed => Err(TransportError::StreamClosed),
            _ => Ok(()),
        }
    }

    /// Response headers sent by the peer, waiting for them if the stream is still opening.
    pub async fn headers(&mut self) -> Result<&[(String, String)], TransportError> {
        self.open().await?;
        match &self.inbound {
            Inbound::Open { headers, .. } => Ok(headers),
            _ => Err(TransportError::StreamClosed),
        }
    }

    /// Send one message to the peer.
    pub async fn send(&self, message: impl Into<Bytes>) -> Result<(), TransportError> {
        let sender = self.sender.as_ref().ok_or(TransportError::StreamClosed)?;
        sender
            .send(message.into())
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    /// Signal that no more messages will be sent. Receiving stays possible.
    pub fn close_send(&mut self) {
        self.sender.take();
    }

    /// The next message from the peer, `None` once the peer finished the stream.
    ///
    /// If the stream fails to open, the error is returned by the first call only.
    pub async fn receive(&mut self) -> Option<Result<Bytes, TransportError>> {
        if matches!(self.inbound, Inbound::Failed) {
            return None;
        }
        if let Err(err) = self.open().await {
            return Some(Err(err));
        }
        match &mut self.inbound {
            Inbound::Open { responses, .. } => responses.next().await,
            _ => None,
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if let Inbound::Opening(handle) = &self.inbound {
            handle.abort();
        }
    }
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inbound = match &self.inbound {
            Inbound::Opening(_) => "opening",
            Inbound::Open { .. } => "open",
            Inbound::Failed => "failed",
        };
        f.debug_struct("ClientStream")
            .field("inbound", &inbound)
            .field("send_open", &self.sender.is_some())
            .finish()
    }
}
