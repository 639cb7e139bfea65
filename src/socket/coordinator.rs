//! Coordinator signaling protocol: JSON over the persistent socket.
//!
//! The coordinator speaks internally-tagged JSON events. Authentication is a
//! single envelope sent right after the transport opens; the server answers
//! with a `connection.ok` event carrying the session's connection id.

use super::error::{ErrorResponse, Result, SocketError};
use super::persistent::{PersistentSocket, SocketConfig};
use super::protocol::{Decoded, SocketProtocol};
use crate::network::NetworkStateProvider;
use crate::transport::{Transport, TransportFactory, WireMessage};
use async_trait::async_trait;
use log::trace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity attached to the authentication envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl UserDetails {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            image: None,
        }
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    token: &'a str,
    user_details: &'a UserDetails,
}

/// Events the coordinator pushes down the socket.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CoordinatorEvent {
    #[serde(rename = "connection.ok")]
    ConnectionOk { connection_id: String },
    #[serde(rename = "health.check")]
    HealthCheck {
        #[serde(default)]
        connection_id: Option<String>,
    },
    #[serde(rename = "error")]
    Error { error: ErrorResponse },
    #[serde(rename = "call.ring")]
    CallRing { call_cid: String },
    #[serde(rename = "call.ended")]
    CallEnded { call_cid: String },
    /// Any event type this client does not model; surfaced so callers can log
    /// or ignore it instead of killing the connection.
    #[serde(other)]
    Unknown,
}

pub struct CoordinatorProtocol {
    token: String,
    user: UserDetails,
}

impl CoordinatorProtocol {
    pub fn new(token: impl Into<String>, user: UserDetails) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }
}

#[async_trait]
impl SocketProtocol for CoordinatorProtocol {
    type Event = CoordinatorEvent;

    async fn authenticate(&self, transport: &dyn Transport) -> Result<()> {
        let envelope = serde_json::to_string(&AuthRequest {
            token: &self.token,
            user_details: &self.user,
        })
        .map_err(|e| SocketError::Decode(e.to_string()))?;
        transport.send(WireMessage::Text(envelope)).await
    }

    fn decode(&self, message: WireMessage) -> Result<Decoded<CoordinatorEvent>> {
        let text = match message {
            WireMessage::Text(text) => text,
            WireMessage::Binary(_) => {
                return Err(SocketError::Decode(
                    "coordinator sent an unexpected binary frame".into(),
                ));
            }
        };
        trace!(target: "Socket/Coordinator", "<-- {text}");
        let event: CoordinatorEvent =
            serde_json::from_str(&text).map_err(|e| SocketError::Decode(e.to_string()))?;
        Ok(match event {
            CoordinatorEvent::ConnectionOk { ref connection_id } => Decoded::Connected {
                connection_id: connection_id.clone(),
                event,
            },
            CoordinatorEvent::Error { error } => Decoded::Error(SocketError::Server(error)),
            event => Decoded::Event(event),
        })
    }

    fn health_check_frame(&self) -> WireMessage {
        WireMessage::Text(r#"{"type":"health.check"}"#.to_owned())
    }
}

/// Persistent socket speaking the coordinator protocol.
pub type CoordinatorSocket = PersistentSocket<CoordinatorProtocol>;

impl CoordinatorSocket {
    pub fn coordinator(
        config: SocketConfig,
        token: impl Into<String>,
        user: UserDetails,
        factory: Arc<dyn TransportFactory>,
        network: Arc<dyn NetworkStateProvider>,
    ) -> Arc<Self> {
        PersistentSocket::new(
            CoordinatorProtocol::new(token, user),
            config,
            factory,
            network,
        )
    }
}
