use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Structured error payload returned by the server over the socket.
///
/// Shared by the JSON and bincode protocols; the optional fields must always
/// be written, since bincode is not self-describing and cannot decode a
/// struct with fields conditionally left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub more_info: Option<String>,
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connect attempt timed out")]
    ConnectTimeout,
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("failed to decode event: {0}")]
    Decode(String),
    #[error("socket closed by server (code {code}): {reason}")]
    ClosedByServer { code: u16, reason: String },
    #[error("server error {}: {}", .0.code, .0.message)]
    Server(ErrorResponse),
    /// A permanent error raised before the initial connect completed. Lets
    /// callers tell "never connected" apart from "connected then died".
    #[error("connection could not be established: {0}")]
    ConnectionFailed(Arc<SocketError>),
}

impl SocketError {
    /// Classifies every inbound failure. Network-shaped errors (DNS lookup,
    /// connect timeout, plain I/O) are transient and worth retrying; anything
    /// else, including structured server errors, stops the reconnect loop.
    pub fn is_permanent(&self) -> bool {
        match self {
            SocketError::Io(_) | SocketError::ConnectTimeout => false,
            SocketError::WebSocket(ws) => !matches!(
                ws,
                tungstenite::Error::Io(_)
                    | tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
            ),
            SocketError::ConnectionFailed(inner) => inner.is_permanent(),
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, SocketError>;
