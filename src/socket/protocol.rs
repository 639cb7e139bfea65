use super::error::Result;
use crate::transport::{Transport, WireMessage};
use async_trait::async_trait;

/// Outcome of decoding one inbound frame.
#[derive(Debug)]
pub enum Decoded<E> {
    /// The server acknowledged the connection. Carries the server-assigned
    /// connection id and the decoded event.
    Connected { connection_id: String, event: E },
    /// A regular protocol event.
    Event(E),
    /// The server sent a structured error payload.
    Error(super::error::SocketError),
}

/// Protocol specialization point of [`PersistentSocket`](super::PersistentSocket).
///
/// A concrete protocol supplies the post-open authentication handshake and the
/// wire codec; connection lifecycle, reconnection and error classification all
/// live in the generic socket. Adding a new signaling protocol means
/// implementing this trait and nothing else.
#[async_trait]
pub trait SocketProtocol: Send + Sync + 'static {
    /// Decoded event type surfaced on the socket's event stream.
    type Event: Clone + Send + Sync + 'static;

    /// Sends the protocol's authentication envelope. Invoked right after the
    /// transport opens; runs concurrently with the connect call, which keeps
    /// waiting until the server answers with its connected event.
    async fn authenticate(&self, transport: &dyn Transport) -> Result<()>;

    /// Decodes one inbound frame.
    fn decode(&self, message: WireMessage) -> Result<Decoded<Self::Event>>;

    /// The frame sent as a periodic liveness ping.
    fn health_check_frame(&self) -> WireMessage;
}
