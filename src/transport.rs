//! WebSocket transport seam used by the persistent sockets.
//!
//! `PersistentSocket` never touches tokio-tungstenite directly; it talks to a
//! [`Transport`] created by a [`TransportFactory`] and consumes the stream of
//! [`TransportEvent`]s the factory hands back. Tests swap in the channel-backed
//! mock below.

use crate::socket::error::{Result, SocketError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code used when no close frame was received (RFC 6455 reserved value).
const CODE_NO_STATUS: u16 = 1005;

/// A single inbound or outbound WebSocket payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

/// An event produced by the transport layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport finished its handshake.
    Opened,
    /// A frame arrived from the server.
    Message(WireMessage),
    /// The server sent a close frame.
    Closed { code: u16, reason: String },
    /// Reading from or writing to the network failed.
    Failed(SocketError),
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a frame to the server.
    async fn send(&self, message: WireMessage) -> Result<()>;

    /// Closes the connection with the given close code.
    async fn close(&self, code: u16, reason: &str);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Opens a connection and returns it along with its event stream.
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// tokio-tungstenite backed [`Transport`].
pub struct WsTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, message: WireMessage) -> Result<()> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or_else(|| {
            SocketError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "socket is closed",
            ))
        })?;

        let frame = match message {
            WireMessage::Text(text) => {
                debug!(target: "Socket", "--> sending text frame: {} bytes", text.len());
                Message::Text(text.into())
            }
            WireMessage::Binary(data) => {
                debug!(target: "Socket", "--> sending binary frame: {} bytes", data.len());
                Message::Binary(data)
            }
        };
        sink.send(frame).await?;
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_owned().into(),
            };
            // Best effort; the peer may already be gone.
            let _ = sink.send(Message::Close(Some(frame))).await;
        }
    }
}

/// Factory dialing real WebSocket connections.
#[derive(Default)]
pub struct WsTransportFactory;

impl WsTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        debug!(target: "Socket", "dialing {url}");
        let (client, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| SocketError::ConnectTimeout)??;

        let (sink, stream) = client.split();
        let transport = Arc::new(WsTransport {
            ws_sink: Mutex::new(Some(sink)),
        });

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Opened).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                let event = match msg {
                    Message::Text(text) => {
                        debug!(target: "Socket", "<-- received text frame: {} bytes", text.len());
                        TransportEvent::Message(WireMessage::Text(text.as_str().to_owned()))
                    }
                    Message::Binary(data) => {
                        debug!(target: "Socket", "<-- received binary frame: {} bytes", data.len());
                        TransportEvent::Message(WireMessage::Binary(data))
                    }
                    Message::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                            .unwrap_or((CODE_NO_STATUS, String::new()));
                        trace!(target: "Socket", "received close frame: code={code}");
                        let _ = event_tx.send(TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                };
                if event_tx.send(event).await.is_err() {
                    trace!(target: "Socket", "event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Err(e)) => {
                error!(target: "Socket", "error reading from websocket: {e}");
                let _ = event_tx
                    .send(TransportEvent::Failed(SocketError::WebSocket(e)))
                    .await;
                break;
            }
            None => {
                trace!(target: "Socket", "websocket stream ended");
                break;
            }
        }
    }
}
