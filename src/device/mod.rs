//! Device transport seam
//!
//! The engine never discovers or connects devices. It consumes whatever set the
//! transport currently exposes, re-enumerated every tick, and writes normalized
//! intensities to each actuator.

pub mod simulated;

pub use simulated::{SimulatedDevice, SimulatedTransport};

use async_trait::async_trait;
use std::sync::Arc;

/// Per-device transport errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Write to actuator {actuator} failed: {reason}")]
    WriteFailed { actuator: usize, reason: String },

    #[error("Actuator index {0} out of range")]
    NoSuchActuator(usize),

    #[error("Stop command failed: {0}")]
    StopFailed(String),

    #[error("Device command timed out after {0}ms")]
    Timeout(u64),
}

/// A connected stimulation device
#[async_trait]
pub trait StimDevice: Send + Sync {
    fn id(&self) -> u32;

    fn name(&self) -> &str;

    fn actuator_count(&self) -> usize;

    /// Sets one actuator to a normalized intensity in [0, 1]
    async fn write(&self, actuator: usize, intensity: f64) -> Result<(), DeviceError>;

    /// Stops every actuator on the device
    async fn stop(&self) -> Result<(), DeviceError>;
}

/// Source of the currently connected device set
pub trait DeviceTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Snapshot of the devices connected right now
    fn devices(&self) -> Vec<Arc<dyn StimDevice>>;

    fn device_count(&self) -> usize {
        self.devices().len()
    }
}
