use super::error::SocketError;
use std::sync::Arc;

/// Connection state of a [`PersistentSocket`](super::PersistentSocket).
/// Exactly one state holds at a time and only the owning socket writes it.
#[derive(Debug, Clone)]
pub enum SocketState<E> {
    NotConnected,
    Connecting,
    /// Connected and authenticated; carries the protocol's connected event.
    Connected(E),
    /// The OS reported the network as gone while we were connected or
    /// connecting. The transport is left to fail on its own.
    NetworkDisconnected,
    /// A transient failure; a background reconnect is in flight.
    DisconnectedTemporarily(Arc<SocketError>),
    /// A permanent failure; the socket stops retrying.
    DisconnectedPermanently(Arc<SocketError>),
    DisconnectedByRequest,
}

/// Tag-only view of [`SocketState`]. State comparisons go through this (or
/// `matches!`), never through payload equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStateKind {
    NotConnected,
    Connecting,
    Connected,
    NetworkDisconnected,
    DisconnectedTemporarily,
    DisconnectedPermanently,
    DisconnectedByRequest,
}

impl<E> SocketState<E> {
    pub fn kind(&self) -> SocketStateKind {
        match self {
            SocketState::NotConnected => SocketStateKind::NotConnected,
            SocketState::Connecting => SocketStateKind::Connecting,
            SocketState::Connected(_) => SocketStateKind::Connected,
            SocketState::NetworkDisconnected => SocketStateKind::NetworkDisconnected,
            SocketState::DisconnectedTemporarily(_) => SocketStateKind::DisconnectedTemporarily,
            SocketState::DisconnectedPermanently(_) => SocketStateKind::DisconnectedPermanently,
            SocketState::DisconnectedByRequest => SocketStateKind::DisconnectedByRequest,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SocketState::Connected(_))
    }
}

/// Why a socket was torn down. Used to pick the terminal state and to
/// suppress reconnection.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    ByRequest,
    PermanentError(Arc<SocketError>),
}
