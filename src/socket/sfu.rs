//! SFU signaling protocol: bincode-framed binary messages.
//!
//! The selective forwarding unit speaks a compact binary protocol. The first
//! frame after the transport opens is a join request; the SFU answers with a
//! join response whose session id doubles as the socket's connection id.

use super::error::{ErrorResponse, Result, SocketError};
use super::persistent::{PersistentSocket, SocketConfig};
use super::protocol::{Decoded, SocketProtocol};
use crate::network::NetworkStateProvider;
use crate::transport::{Transport, TransportFactory, WireMessage};
use async_trait::async_trait;
use bytes::Bytes;
use log::trace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Client-to-SFU envelope.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum SfuRequest {
    Join {
        session_id: String,
        token: String,
        subscriber_sdp: String,
    },
    HealthCheck,
}

/// SFU-to-client envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum SfuEvent {
    JoinResponse {
        session_id: String,
        participant_count: u32,
    },
    HealthCheckResponse,
    ParticipantJoined {
        session_id: String,
        user_id: String,
    },
    ParticipantLeft {
        session_id: String,
        user_id: String,
    },
    IceTrickle {
        candidate: String,
    },
    Error {
        error: ErrorResponse,
    },
}

pub struct SfuProtocol {
    session_id: String,
    token: String,
    subscriber_sdp: String,
}

impl SfuProtocol {
    pub fn new(
        session_id: impl Into<String>,
        token: impl Into<String>,
        subscriber_sdp: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            token: token.into(),
            subscriber_sdp: subscriber_sdp.into(),
        }
    }

    fn encode(request: &SfuRequest) -> Result<Bytes> {
        bincode::serde::encode_to_vec(request, bincode::config::standard())
            .map(Bytes::from)
            .map_err(|e| SocketError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SocketProtocol for SfuProtocol {
    type Event = SfuEvent;

    async fn authenticate(&self, transport: &dyn Transport) -> Result<()> {
        let join = SfuRequest::Join {
            session_id: self.session_id.clone(),
            token: self.token.clone(),
            subscriber_sdp: self.subscriber_sdp.clone(),
        };
        transport.send(WireMessage::Binary(Self::encode(&join)?)).await
    }

    fn decode(&self, message: WireMessage) -> Result<Decoded<SfuEvent>> {
        let data = match message {
            WireMessage::Binary(data) => data,
            WireMessage::Text(_) => {
                return Err(SocketError::Decode(
                    "sfu sent an unexpected text frame".into(),
                ));
            }
        };
        let (event, _): (SfuEvent, usize) =
            bincode::serde::decode_from_slice(&data, bincode::config::standard())
                .map_err(|e| SocketError::Decode(e.to_string()))?;
        trace!(target: "Socket/Sfu", "<-- {event:?}");
        Ok(match event {
            SfuEvent::JoinResponse { ref session_id, .. } => Decoded::Connected {
                connection_id: session_id.clone(),
                event,
            },
            SfuEvent::Error { error } => Decoded::Error(SocketError::Server(error)),
            event => Decoded::Event(event),
        })
    }

    fn health_check_frame(&self) -> WireMessage {
        // Encoding a field-free variant cannot fail; fall back to an empty
        // frame rather than panicking if it ever does.
        WireMessage::Binary(Self::encode(&SfuRequest::HealthCheck).unwrap_or_default())
    }
}

/// Persistent socket speaking the SFU protocol.
pub type SfuSocket = PersistentSocket<SfuProtocol>;

impl SfuSocket {
    pub fn sfu(
        config: SocketConfig,
        protocol: SfuProtocol,
        factory: Arc<dyn TransportFactory>,
        network: Arc<dyn NetworkStateProvider>,
    ) -> Arc<Self> {
        PersistentSocket::new(protocol, config, factory, network)
    }
}
