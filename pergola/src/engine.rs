//! Capabilities the adapter needs from the underlying call engine.
//!
//! [`GrpcEngine`](crate::GrpcEngine) implements them over tonic; tests swap in a
//! deterministic fake.

use crate::{
    peer::{PeerTransport, RoundRobin},
    CallContext, ClientStream, SecureChannel, TransportError, WireRequest, WireResponse,
    WireStreamRequest,
};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::Dispatch;

/// Settings handed to an engine when it is constructed.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tracer: Dispatch,
    /// Bound for inbound messages, `None` keeps the engine default.
    pub max_recv_msg_size: Option<usize>,
}

#[async_trait::async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
pub trait UnaryOutbound: Lifecycle {
    async fn call(
        &self,
        ctx: &CallContext,
        request: WireRequest,
    ) -> Result<WireResponse, TransportError>;
}

#[async_trait::async_trait]
pub trait StreamOutbound: Lifecycle {
    async fn call_stream(
        &self,
        ctx: &CallContext,
        request: WireStreamRequest,
    ) -> Result<ClientStream, TransportError>;
}

/// The underlying transport: a peer transport in its own right that can also produce a TLS
/// dialer and bind outbounds.
pub trait Engine: PeerTransport + Lifecycle + Sized + 'static {
    type Dialer: PeerTransport<Peer = Self::Peer>;
    type Outbound: UnaryOutbound + StreamOutbound + 'static;

    /// A peer transport that dials peers over `secure`.
    fn new_dialer(&self, secure: SecureChannel) -> Self::Dialer;

    /// An outbound issuing calls to the peers of `chooser`.
    fn new_outbound(&self, chooser: RoundRobin<Self::Peer>) -> Self::Outbound;
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// `Idle -> Running -> Stopped` state shared by engines and outbounds.
///
/// Starting twice is a no-op, stopping twice is a no-op, starting after a stop fails.
#[derive(Debug)]
pub struct LifecycleState {
    name: &'static str,
    state: AtomicU8,
}

impl LifecycleState {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn start(&self) -> Result<(), TransportError> {
        match self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(RUNNING) => Ok(()),
            Err(_) => Err(TransportError::AlreadyStopped(self.name)),
        }
    }

    pub fn stop(&self) {
        self.state.store(STOPPED, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Fail with [`TransportError::NotRunning`] unless started and not yet stopped.
    pub fn ensure_running(&self) -> Result<(), TransportError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(TransportError::NotRunning(self.name))
        }
    }
}
