//! Core connection and audio-routing layer for a real-time calling client.
//!
//! Two subsystems live here:
//!
//! - [`socket`]: a persistent, reconnecting WebSocket ([`socket::PersistentSocket`])
//!   with two protocol specializations, the JSON coordinator socket and the
//!   binary SFU socket. Temporary network failures retry with backoff;
//!   permanent failures park the socket in a terminal state.
//! - [`audio`]: the Bluetooth headset state machine and SCO audio-route
//!   control behind a small `activate()`/`deactivate()` surface.
//!
//! Platform integration happens through traits: [`transport::TransportFactory`]
//! for the wire, [`network::NetworkStateProvider`] for connectivity signals,
//! [`audio::AudioRouter`] and [`audio::bluetooth::device::HeadsetProxy`] for
//! the audio and Bluetooth stacks.

pub mod audio;
pub mod network;
pub mod socket;
pub mod transport;

pub use network::{AlwaysOnline, NetworkStateListener, NetworkStateProvider};
pub use socket::{
    CoordinatorSocket, DisconnectReason, PersistentSocket, SfuSocket, SocketConfig, SocketError,
    SocketState, SocketStateKind,
};
pub use transport::{Transport, TransportFactory, WireMessage, WsTransportFactory};
