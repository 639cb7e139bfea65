//! Bluetooth headset state machine.
//!
//! Tracks headset hardware connection and the SCO audio link, exposing a
//! simple `activate()`/`deactivate()` surface. All transitions run on one
//! event loop ([`BluetoothHeadsetManager::run`]) that interleaves platform
//! events with SCO job ticks, so they are never concurrent with each other.

pub mod device;
pub mod sco;

pub use device::{
    BluetoothDevice, BluetoothEvent, BluetoothHeadsetConnectionListener, DeviceClass,
    HeadsetProxy, ScoAudioState,
};
pub use sco::{ScoJobKind, ScoTick};

use crate::audio::AudioRouter;
use log::{debug, info, warn};
use sco::{BluetoothScoJob, SCO_JOB_TIMEOUT};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadsetState {
    Disconnected,
    Connected,
    AudioActivating,
    AudioActivationError,
    AudioActivated,
}

/// External commands accepted by the manager's event loop.
pub enum BluetoothCommand {
    Start(Arc<dyn BluetoothHeadsetConnectionListener>),
    Event(BluetoothEvent),
    Activate,
    Deactivate,
    Stop,
}

pub struct BluetoothHeadsetManager {
    router: Arc<dyn AudioRouter>,
    listener: Option<Arc<dyn BluetoothHeadsetConnectionListener>>,
    proxy: Option<Arc<dyn HeadsetProxy>>,
    state_tx: watch::Sender<HeadsetState>,
    enable_job: BluetoothScoJob,
    disable_job: BluetoothScoJob,
    tick_rx: mpsc::Receiver<ScoTick>,
}

impl BluetoothHeadsetManager {
    pub fn new(router: Arc<dyn AudioRouter>) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(8);
        Self {
            router,
            listener: None,
            proxy: None,
            state_tx: watch::channel(HeadsetState::Disconnected).0,
            enable_job: BluetoothScoJob::new(ScoJobKind::Enable, tick_tx.clone()),
            disable_job: BluetoothScoJob::new(ScoJobKind::Disable, tick_tx),
            tick_rx,
        }
    }

    /// Drives the manager until [`BluetoothCommand::Stop`] or until every
    /// command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<BluetoothCommand>) {
        // The tick channel must be polled alongside the commands; detach the
        // receiver so both halves of the select can borrow the manager.
        let (_unused_tx, placeholder) = mpsc::channel(1);
        let mut tick_rx = std::mem::replace(&mut self.tick_rx, placeholder);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(BluetoothCommand::Start(listener)) => self.start(listener),
                    Some(BluetoothCommand::Event(event)) => self.handle_event(event),
                    Some(BluetoothCommand::Activate) => self.activate(),
                    Some(BluetoothCommand::Deactivate) => self.deactivate(),
                    Some(BluetoothCommand::Stop) | None => {
                        self.stop();
                        break;
                    }
                },
                Some(tick) = tick_rx.recv() => self.handle_sco_tick(tick),
            }
        }
    }

    pub fn start(&mut self, listener: Arc<dyn BluetoothHeadsetConnectionListener>) {
        info!(target: "Bluetooth", "[start]");
        self.listener = Some(listener);
    }

    /// Releases the listener, the proxy handle and any polling in flight.
    pub fn stop(&mut self) {
        info!(target: "Bluetooth", "[stop]");
        self.listener = None;
        self.enable_job.cancel();
        self.disable_job.cancel();
        self.proxy = None;
    }

    pub fn state(&self) -> HeadsetState {
        *self.state_tx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<HeadsetState> {
        self.state_tx.subscribe()
    }

    /// Requests SCO audio activation. Honored only from `Connected` or
    /// `AudioActivationError`.
    pub fn activate(&mut self) {
        match self.state() {
            HeadsetState::Connected | HeadsetState::AudioActivationError => {
                self.enable_job.execute();
            }
            state => {
                warn!(target: "Bluetooth", "[activate] cannot activate from {state:?}");
            }
        }
    }

    /// Requests SCO audio deactivation. Honored only from `AudioActivated`.
    pub fn deactivate(&mut self) {
        match self.state() {
            HeadsetState::AudioActivated => self.disable_job.execute(),
            state => {
                warn!(target: "Bluetooth", "[deactivate] cannot deactivate from {state:?}");
            }
        }
    }

    pub fn handle_event(&mut self, event: BluetoothEvent) {
        debug!(target: "Bluetooth", "[event] {event:?} (state: {:?})", self.state());
        match event {
            BluetoothEvent::ProfileServiceConnected(proxy) => {
                self.proxy = Some(proxy);
                if self.has_connected_device() {
                    self.connect();
                    self.notify_headset_changed();
                }
            }
            BluetoothEvent::ProfileServiceDisconnected => {
                self.proxy = None;
                self.set_state(HeadsetState::Disconnected);
                self.notify_headset_changed();
            }
            BluetoothEvent::HeadsetConnected(device) => {
                if device.is_headset() {
                    self.connect();
                    self.notify_headset_changed();
                }
            }
            BluetoothEvent::HeadsetDisconnected(device) => {
                if device.is_headset() {
                    self.disconnect();
                    self.notify_headset_changed();
                }
            }
            BluetoothEvent::HeadsetAudioConnected(device) => {
                if device.is_headset() {
                    // The platform confirmed the route; the enable job is done.
                    self.enable_job.cancel();
                    self.set_state(HeadsetState::AudioActivated);
                    self.notify_headset_changed();
                }
            }
            BluetoothEvent::HeadsetAudioDisconnected(device) => {
                if device.is_headset() {
                    self.disable_job.cancel();
                    if self.active_headset_changed() {
                        // The audio-active headset vanished mid-call but
                        // another one is still paired: re-route to it.
                        self.enable_job.execute();
                    }
                    self.notify_headset_changed();
                }
            }
            BluetoothEvent::ScoAudioStateChanged(state) => {
                if let Some(listener) = &self.listener {
                    listener.on_sco_state_changed(state);
                }
            }
        }
    }

    pub fn handle_sco_tick(&mut self, tick: ScoTick) {
        let job = match tick.kind {
            ScoJobKind::Enable => &mut self.enable_job,
            ScoJobKind::Disable => &mut self.disable_job,
        };
        if !job.accepts(&tick) {
            debug!(target: "Bluetooth", "[scoTick] ignoring stale tick for {:?}", tick.kind);
            return;
        }
        let timed_out = job.elapsed().is_some_and(|e| e >= SCO_JOB_TIMEOUT);
        if timed_out {
            warn!(target: "Bluetooth", "[scoTick] {:?} job timed out", tick.kind);
            job.cancel();
            self.set_state(HeadsetState::AudioActivationError);
            if tick.kind == ScoJobKind::Enable {
                if let Some(listener) = &self.listener {
                    listener.on_activation_error();
                }
            }
            return;
        }
        match tick.kind {
            ScoJobKind::Enable => {
                self.router.set_sco_enabled(true);
                self.set_state(HeadsetState::AudioActivating);
            }
            ScoJobKind::Disable => {
                self.router.set_sco_enabled(false);
                self.set_state(HeadsetState::Connected);
            }
        }
    }

    /// A headset appeared: audio-connected devices win, otherwise `Connected`.
    fn connect(&mut self) {
        if !self.has_active_headset() {
            self.set_state(HeadsetState::Connected);
        }
    }

    /// A headset went away: re-derive the state from what remains.
    fn disconnect(&mut self) {
        let state = if self.has_active_headset() {
            HeadsetState::AudioActivated
        } else if self.has_connected_device() {
            HeadsetState::Connected
        } else {
            HeadsetState::Disconnected
        };
        self.set_state(state);
    }

    /// Every state change funnels through here; entering `Disconnected`
    /// always cancels the enable job, regardless of entry path.
    fn set_state(&mut self, state: HeadsetState) {
        if self.state() == state {
            return;
        }
        debug!(target: "Bluetooth", "state -> {state:?}");
        if state == HeadsetState::Disconnected {
            self.enable_job.cancel();
        }
        self.state_tx.send_replace(state);
    }

    fn notify_headset_changed(&self) {
        if let Some(listener) = &self.listener {
            listener.on_headset_state_changed(self.headset_name(), self.state());
        }
    }

    fn connected_devices(&self) -> Vec<BluetoothDevice> {
        self.proxy
            .as_ref()
            .map(|proxy| {
                proxy
                    .connected_devices()
                    .into_iter()
                    .filter(BluetoothDevice::is_headset)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_connected_device(&self) -> bool {
        !self.connected_devices().is_empty()
    }

    fn has_active_headset(&self) -> bool {
        self.active_headset().is_some()
    }

    fn active_headset(&self) -> Option<BluetoothDevice> {
        let proxy = self.proxy.as_ref()?;
        self.connected_devices()
            .into_iter()
            .find(|device| proxy.is_audio_connected(device))
    }

    /// The audio-active headset disappeared while others remain paired.
    fn active_headset_changed(&self) -> bool {
        self.state() == HeadsetState::AudioActivated
            && self.has_connected_device()
            && !self.has_active_headset()
    }

    /// Which device name to surface: with several devices, only the
    /// audio-active one is unambiguous; with exactly one, use it.
    fn headset_name(&self) -> Option<String> {
        let devices = self.connected_devices();
        match devices.len() {
            0 => None,
            1 => devices.into_iter().next().map(|d| d.name),
            _ => self.active_headset().map(|d| d.name),
        }
    }
}
