//! Network connectivity seam.
//!
//! The platform layer (Android's ConnectivityManager, or anything else) feeds
//! connectivity changes through [`NetworkStateProvider`]; the sockets use it
//! to fast-path reconnects when the network comes back.

use std::sync::Arc;

pub trait NetworkStateListener: Send + Sync {
    fn on_network_connected(&self);
    fn on_network_disconnected(&self);
}

pub trait NetworkStateProvider: Send + Sync {
    fn subscribe(&self, listener: Arc<dyn NetworkStateListener>);
    /// Removal is by pointer identity: pass the same `Arc` that was
    /// subscribed.
    fn unsubscribe(&self, listener: &Arc<dyn NetworkStateListener>);
    fn is_connected(&self) -> bool;
}

/// Provider for environments without connectivity signals: always reports
/// online and never notifies.
#[derive(Default)]
pub struct AlwaysOnline;

impl NetworkStateProvider for AlwaysOnline {
    fn subscribe(&self, _listener: Arc<dyn NetworkStateListener>) {}

    fn unsubscribe(&self, _listener: &Arc<dyn NetworkStateListener>) {}

    fn is_connected(&self) -> bool {
        true
    }
}
