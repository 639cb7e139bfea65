//! Audio routing subsystem.
//!
//! [`bluetooth`] owns the headset state machine; [`AudioRouter`] is the seam
//! to the platform's audio hardware, the only thing the SCO polling jobs
//! actually touch.

pub mod bluetooth;

/// Controls the hardware SCO audio route. Implemented by the platform layer
/// (Android's AudioManager, a fake in tests).
pub trait AudioRouter: Send + Sync {
    fn set_sco_enabled(&self, enabled: bool);
}
