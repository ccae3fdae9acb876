//! Peer identifiers and the round-robin chooser that the outbound draws peers from.

use crate::ConfigError;
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

/// An opaque, routable `host:port` handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentifier(String);

impl PeerIdentifier {
    /// The textual `host:port` of the peer.
    pub fn address(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identify a single `host:port` address. The address is taken as is.
pub fn identify(address: impl Into<String>) -> PeerIdentifier {
    PeerIdentifier(address.into())
}

/// Identify every address, keeping order and duplicates.
pub fn identify_all<S: AsRef<str>>(addresses: &[S]) -> Vec<PeerIdentifier> {
    addresses
        .iter()
        .map(|address| identify(address.as_ref()))
        .collect()
}

/// Something that can turn a [`PeerIdentifier`] into a peer usable by an outbound.
pub trait PeerTransport {
    type Peer: Send + Sync + 'static;

    /// Acquire a peer for `id`. Called once per identifier when the pool is bound.
    fn retain_peer(&self, id: &PeerIdentifier) -> Result<Self::Peer, ConfigError>;
}

/// Cycles through a fixed list of peers in order, one step per [`choose`](RoundRobin::choose).
///
/// The peer list is bound once and never changes. Selection does not depend on
/// whether previous calls succeeded.
pub struct RoundRobin<P> {
    peers: Vec<P>,
    next: AtomicUsize,
}

impl<P> RoundRobin<P> {
    /// Build a chooser over already retained peers.
    pub fn new(peers: Vec<P>) -> Self {
        Self {
            peers,
            next: AtomicUsize::new(0),
        }
    }

    /// Retain every identifier against `transport` and bind the results in order.
    #[tracing::instrument(level = "debug", skip(transport))]
    pub fn bind<T>(transport: &T, ids: &[PeerIdentifier]) -> Result<Self, ConfigError>
    where
        T: PeerTransport<Peer = P>,
    {
        let peers = ids
            .iter()
            .map(|id| transport.retain_peer(id))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!("bound {} peers", peers.len());

        Ok(Self::new(peers))
    }

    /// The next peer in round-robin order, or `None` when no peers are bound.
    pub fn choose(&self) -> Option<&P> {
        if self.peers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.peers.len();
        self.peers.get(index)
    }

    pub fn peers(&self) -> &[P] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl<P> fmt::Debug for RoundRobin<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobin")
            .field("peers", &self.peers.len())
            .finish()
    }
}
