//! Connection layer: the generic reconnecting socket plus the two concrete
//! signaling protocols built on it.

pub mod coordinator;
pub mod error;
mod health;
pub mod persistent;
pub mod protocol;
pub mod sfu;
pub mod state;

pub use coordinator::{CoordinatorEvent, CoordinatorProtocol, CoordinatorSocket, UserDetails};
pub use error::{ErrorResponse, Result, SocketError};
pub use persistent::{CODE_CLOSE_SOCKET_FROM_CLIENT, PersistentSocket, SocketConfig};
pub use protocol::{Decoded, SocketProtocol};
pub use sfu::{SfuEvent, SfuProtocol, SfuRequest, SfuSocket};
pub use state::{DisconnectReason, SocketState, SocketStateKind};
