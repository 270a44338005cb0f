//! In-memory transport used by the console binary and the test suite

use super::{DeviceError, DeviceTransport, StimDevice};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Device whose actuators are plain numbers
#[derive(Debug)]
pub struct SimulatedDevice {
    id: u32,
    name: String,
    levels: Mutex<Vec<f64>>,
    writes: Mutex<Vec<f64>>,
    write_delay_ms: AtomicU64,
    fail_writes: AtomicBool,
    fail_stops: AtomicBool,
    stop_calls: AtomicUsize,
}

impl SimulatedDevice {
    pub fn new(id: u32, name: impl Into<String>, actuators: usize) -> Self {
        Self {
            id,
            name: name.into(),
            levels: Mutex::new(vec![0.0; actuators]),
            writes: Mutex::new(Vec::new()),
            write_delay_ms: AtomicU64::new(0),
            fail_writes: AtomicBool::new(false),
            fail_stops: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Last written intensity per actuator
    pub fn levels(&self) -> Vec<f64> {
        match self.levels.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Every intensity accepted by `write`, oldest first
    pub fn history(&self) -> Vec<f64> {
        match self.writes.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Makes each write hang for `delay` before it lands
    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stops(&self, fail: bool) {
        self.fail_stops.store(fail, Ordering::SeqCst);
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn with_levels<R>(&self, f: impl FnOnce(&mut Vec<f64>) -> R) -> R {
        match self.levels.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl StimDevice for SimulatedDevice {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn actuator_count(&self) -> usize {
        self.with_levels(|levels| levels.len())
    }

    async fn write(&self, actuator: usize, intensity: f64) -> Result<(), DeviceError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DeviceError::WriteFailed {
                actuator,
                reason: "simulated failure".to_string(),
            });
        }

        self.with_levels(|levels| match levels.get_mut(actuator) {
            Some(level) => {
                *level = intensity;
                match self.writes.lock() {
                    Ok(mut writes) => writes.push(intensity),
                    Err(poisoned) => poisoned.into_inner().push(intensity),
                }
                trace!("{} actuator {} -> {:.3}", self.name, actuator, intensity);
                Ok(())
            }
            None => Err(DeviceError::NoSuchActuator(actuator)),
        })
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(DeviceError::StopFailed("simulated failure".to_string()));
        }
        self.with_levels(|levels| levels.iter_mut().for_each(|level| *level = 0.0));
        debug!("{} stopped", self.name);
        Ok(())
    }
}

/// Cloneable handle over a shared, mutable device set
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    connected: Arc<AtomicBool>,
    devices: Arc<Mutex<Vec<Arc<SimulatedDevice>>>>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            devices: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = Arc<SimulatedDevice>>) -> Self {
        let transport = Self::default();
        for device in devices {
            transport.attach(device);
        }
        transport
    }

    pub fn attach(&self, device: Arc<SimulatedDevice>) {
        debug!("Attaching simulated device {}", device.name());
        self.with_devices_mut(|devices| devices.push(device));
    }

    pub fn detach(&self, id: u32) {
        self.with_devices_mut(|devices| devices.retain(|device| device.id() != id));
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn with_devices_mut<R>(&self, f: impl FnOnce(&mut Vec<Arc<SimulatedDevice>>) -> R) -> R {
        match self.devices.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl DeviceTransport for SimulatedTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn devices(&self) -> Vec<Arc<dyn StimDevice>> {
        if !self.is_connected() {
            return Vec::new();
        }
        self.with_devices_mut(|devices| {
            devices
                .iter()
                .map(|device| device.clone() as Arc<dyn StimDevice>)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_and_stop_update_levels() {
        let device = SimulatedDevice::new(1, "test", 2);
        device.write(1, 0.4).await.unwrap();
        assert_eq!(device.levels(), vec![0.0, 0.4]);
        assert_eq!(device.history(), vec![0.4]);
        device.stop().await.unwrap();
        assert_eq!(device.levels(), vec![0.0, 0.0]);
        assert_eq!(device.stop_calls(), 1);
    }

    #[tokio::test]
    async fn out_of_range_actuator_is_rejected() {
        let device = SimulatedDevice::new(1, "test", 1);
        assert!(matches!(
            device.write(3, 0.5).await,
            Err(DeviceError::NoSuchActuator(3))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_write_lands_after_the_delay() {
        let device = Arc::new(SimulatedDevice::new(1, "slow", 1));
        device.set_write_delay(Duration::from_millis(200));

        let writer = tokio::spawn({
            let device = device.clone();
            async move { device.write(0, 0.3).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(device.levels(), vec![0.0]);

        writer.await.unwrap().unwrap();
        assert_eq!(device.levels(), vec![0.3]);
    }

    #[test]
    fn disconnected_transport_exposes_no_devices() {
        let transport =
            SimulatedTransport::with_devices([Arc::new(SimulatedDevice::new(1, "a", 1))]);
        assert_eq!(transport.device_count(), 1);
        transport.set_connected(false);
        assert_eq!(transport.device_count(), 0);
        transport.set_connected(true);
        transport.detach(1);
        assert_eq!(transport.device_count(), 0);
    }
}
