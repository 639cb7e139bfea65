//! Bluetooth device model and the seams to the platform Bluetooth stack.

use super::HeadsetState;
use std::sync::Arc;

/// Bluetooth major/minor device class, reduced to the audio classes the
/// headset manager cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    AudioVideoHandsfree,
    AudioVideoWearableHeadset,
    AudioVideoCarAudio,
    AudioVideoHeadphones,
    Uncategorized,
    Other,
}

impl DeviceClass {
    /// Whether a device of this class can carry call audio.
    pub fn is_headset(self) -> bool {
        !matches!(self, DeviceClass::Other)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub name: String,
    pub device_class: DeviceClass,
}

impl BluetoothDevice {
    pub fn new(name: impl Into<String>, device_class: DeviceClass) -> Self {
        Self {
            name: name.into(),
            device_class,
        }
    }

    pub fn is_headset(&self) -> bool {
        self.device_class.is_headset()
    }
}

/// Handle to the platform's headset profile service, valid between the
/// profile-service-connected and -disconnected events.
pub trait HeadsetProxy: Send + Sync {
    /// Devices currently paired and connected on the headset profile.
    fn connected_devices(&self) -> Vec<BluetoothDevice>;

    /// Whether the given device currently carries active SCO audio.
    fn is_audio_connected(&self, device: &BluetoothDevice) -> bool;
}

/// State of the SCO audio link as reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoAudioState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Platform signals feeding the headset manager. These stand in for the
/// broadcast intents Android delivers to a registered receiver.
pub enum BluetoothEvent {
    ProfileServiceConnected(Arc<dyn HeadsetProxy>),
    ProfileServiceDisconnected,
    HeadsetConnected(BluetoothDevice),
    HeadsetDisconnected(BluetoothDevice),
    HeadsetAudioConnected(BluetoothDevice),
    HeadsetAudioDisconnected(BluetoothDevice),
    ScoAudioStateChanged(ScoAudioState),
}

impl std::fmt::Debug for BluetoothEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BluetoothEvent::ProfileServiceConnected(_) => f.write_str("ProfileServiceConnected"),
            BluetoothEvent::ProfileServiceDisconnected => f.write_str("ProfileServiceDisconnected"),
            BluetoothEvent::HeadsetConnected(d) => write!(f, "HeadsetConnected({})", d.name),
            BluetoothEvent::HeadsetDisconnected(d) => write!(f, "HeadsetDisconnected({})", d.name),
            BluetoothEvent::HeadsetAudioConnected(d) => {
                write!(f, "HeadsetAudioConnected({})", d.name)
            }
            BluetoothEvent::HeadsetAudioDisconnected(d) => {
                write!(f, "HeadsetAudioDisconnected({})", d.name)
            }
            BluetoothEvent::ScoAudioStateChanged(s) => write!(f, "ScoAudioStateChanged({s:?})"),
        }
    }
}

/// Notification surface to the enclosing SDK.
pub trait BluetoothHeadsetConnectionListener: Send + Sync {
    fn on_headset_state_changed(&self, headset_name: Option<String>, state: HeadsetState);
    fn on_sco_state_changed(&self, state: ScoAudioState);
    fn on_activation_error(&self);
}
