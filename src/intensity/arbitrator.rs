//! Owner of the authoritative intensity value
//!
//! Applies signed deltas, quantizes and clamps the result, and fans the committed
//! value out to every actuator of every connected device.
//!
//! # Failure model
//!
//! ```text
//! apply_delta ──► transport check ──► accumulate ──► fan-out ──► observer
//!                      │                                 │
//!                 Err, no mutation             per-device isolation
//! ```
//!
//! An `Err` from [`IntensityArbitrator::apply_delta`] guarantees the running value was
//! not touched, so a caller may safely retry the same delta later. Device failures
//! after the value was accumulated are reported in the [`ApplyReport`] instead.

use super::{IntensityObserver, IntensityReading, IntensityState};
use crate::device::{DeviceError, DeviceTransport, StimDevice};
use crate::effects::EffectRegistry;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ArbitratorError {
    #[error("Device transport is not connected")]
    TransportUnavailable,

    #[error("Refusing non-finite intensity delta: {0}")]
    NonFiniteDelta(f64),
}

/// Outcome of a single apply
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// Unclamped running value after the delta
    pub value: f64,
    /// Clamped value written to the devices
    pub committed: f64,
    pub reading: IntensityReading,
    pub devices_ok: usize,
    pub devices_failed: usize,
    /// Running value went below zero, which means an inverse was applied twice somewhere
    pub negative_anomaly: bool,
}

/// Outcome of [`IntensityArbitrator::stop_all`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopReport {
    pub effects_dropped: usize,
    pub devices_stopped: usize,
    pub devices_failed: usize,
}

pub struct IntensityArbitrator {
    state: IntensityState,
    write_timeout: Duration,
    require_connection: bool,
    observer: Option<Box<dyn IntensityObserver>>,
}

impl IntensityArbitrator {
    pub fn new(step: f64, write_timeout: Duration, require_connection: bool) -> Self {
        Self {
            state: IntensityState::new(step),
            write_timeout,
            require_connection,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn IntensityObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> &IntensityState {
        &self.state
    }

    pub fn reading(&self) -> IntensityReading {
        self.state.reading()
    }

    /// Adds `amount` to the running value and pushes the committed result to all devices
    pub async fn apply_delta(
        &mut self,
        transport: &dyn DeviceTransport,
        amount: f64,
    ) -> Result<ApplyReport, ArbitratorError> {
        if !amount.is_finite() {
            return Err(ArbitratorError::NonFiniteDelta(amount));
        }
        if self.require_connection && !transport.is_connected() {
            return Err(ArbitratorError::TransportUnavailable);
        }

        let value = self.state.accumulate(amount);
        let committed = self.state.committed();
        let negative_anomaly = value < 0.0;

        if negative_anomaly {
            warn!(
                "Intensity fell to {} which is below 0, sending 0 instead. Effect bookkeeping is out of balance",
                value
            );
        }

        if committed == value {
            info!("Current intensity: {}", value);
        } else {
            info!("Current intensity: {} ({})", value, committed);
        }

        let (devices_ok, devices_failed) = self.fan_out(transport, committed).await;

        if let Some(observer) = self.observer.as_mut() {
            observer.observe(committed);
        }

        Ok(ApplyReport {
            value,
            committed,
            reading: self.state.reading(),
            devices_ok,
            devices_failed,
            negative_anomaly,
        })
    }

    /// Drops every pending effect, zeroes the running value and stops all devices
    ///
    /// Individual device failures are logged and do not abort the sweep.
    pub async fn stop_all(
        &mut self,
        transport: &dyn DeviceTransport,
        registry: &mut EffectRegistry,
    ) -> StopReport {
        let effects_dropped = registry.clear();
        if effects_dropped > 0 {
            debug!("Dropped {} pending timed effects", effects_dropped);
        }
        self.state.reset();

        let mut report = StopReport {
            effects_dropped,
            ..StopReport::default()
        };

        for device in transport.devices() {
            match self.stop_device(device.as_ref()).await {
                Ok(()) => report.devices_stopped += 1,
                Err(e) => {
                    error!("A device experienced an error while being stopped: {} ({})", device.name(), e);
                    report.devices_failed += 1;
                }
            }
        }

        info!(
            "Stopped all devices ({} ok, {} failed)",
            report.devices_stopped, report.devices_failed
        );
        report
    }

    async fn fan_out(&self, transport: &dyn DeviceTransport, committed: f64) -> (usize, usize) {
        let mut ok = 0;
        let mut failed = 0;

        for device in transport.devices() {
            match self.write_device(device.as_ref(), committed).await {
                Ok(()) => ok += 1,
                Err(e) => {
                    error!(
                        "An error occurred when altering the vibration of {}: {}",
                        device.name(),
                        e
                    );
                    if let Err(stop_err) = self.stop_device(device.as_ref()).await {
                        warn!("Could not stop {} after failed write: {}", device.name(), stop_err);
                    }
                    failed += 1;
                }
            }
        }

        (ok, failed)
    }

    async fn write_device(&self, device: &dyn StimDevice, level: f64) -> Result<(), DeviceError> {
        for actuator in 0..device.actuator_count() {
            timeout(self.write_timeout, device.write(actuator, level))
                .await
                .map_err(|_| DeviceError::Timeout(self.write_timeout.as_millis() as u64))??;
        }
        Ok(())
    }

    async fn stop_device(&self, device: &dyn StimDevice) -> Result<(), DeviceError> {
        timeout(self.write_timeout, device.stop())
            .await
            .map_err(|_| DeviceError::Timeout(self.write_timeout.as_millis() as u64))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedDevice, SimulatedTransport};
    use crate::effects::EventCategory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn arbitrator(step: f64) -> IntensityArbitrator {
        IntensityArbitrator::new(step, Duration::from_millis(50), true)
    }

    #[tokio::test]
    async fn fans_out_to_every_actuator() {
        let first = Arc::new(SimulatedDevice::new(1, "first", 2));
        let second = Arc::new(SimulatedDevice::new(2, "second", 1));
        let transport = SimulatedTransport::with_devices([first.clone(), second.clone()]);
        let mut arbitrator = arbitrator(0.05);

        let report = arbitrator.apply_delta(&transport, 0.05).await.unwrap();

        assert_eq!(report.committed, 0.05);
        assert_eq!(report.devices_ok, 2);
        assert_eq!(first.levels(), vec![0.05, 0.05]);
        assert_eq!(second.levels(), vec![0.05]);
    }

    #[tokio::test]
    async fn failing_device_is_isolated_and_stopped() {
        let healthy = Arc::new(SimulatedDevice::new(1, "healthy", 1));
        let broken = Arc::new(SimulatedDevice::new(2, "broken", 1));
        broken.set_fail_writes(true);
        let transport = SimulatedTransport::with_devices([broken.clone(), healthy.clone()]);
        let mut arbitrator = arbitrator(0.05);

        let report = arbitrator.apply_delta(&transport, 0.3).await.unwrap();

        assert_eq!(report.devices_ok, 1);
        assert_eq!(report.devices_failed, 1);
        assert_eq!(healthy.levels(), vec![0.3]);
        assert_eq!(broken.stop_calls(), 1);
        assert_eq!(arbitrator.state().value(), 0.3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_device_times_out_without_stalling_the_rest() {
        let slow = Arc::new(SimulatedDevice::new(1, "slow", 1));
        slow.set_write_delay(Duration::from_secs(10));
        let healthy = Arc::new(SimulatedDevice::new(2, "healthy", 1));
        let transport = SimulatedTransport::with_devices([slow.clone(), healthy.clone()]);
        let mut arbitrator = arbitrator(0.05);

        let started = tokio::time::Instant::now();
        let report = arbitrator.apply_delta(&transport, 0.25).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100));
        assert_eq!(report.devices_ok, 1);
        assert_eq!(report.devices_failed, 1);
        assert_eq!(healthy.levels(), vec![0.25]);
        assert_eq!(slow.stop_calls(), 1);
        assert_eq!(slow.levels(), vec![0.0]);
        assert!(slow.history().is_empty());
        assert_eq!(arbitrator.state().value(), 0.25);
    }

    #[tokio::test]
    async fn disconnected_transport_leaves_value_untouched() {
        let transport = SimulatedTransport::new();
        transport.set_connected(false);
        let mut arbitrator = arbitrator(0.05);

        let result = arbitrator.apply_delta(&transport, 0.5).await;

        assert!(matches!(result, Err(ArbitratorError::TransportUnavailable)));
        assert_eq!(arbitrator.state().value(), 0.0);
    }

    #[tokio::test]
    async fn connection_not_required_runs_without_devices() {
        let transport = SimulatedTransport::new();
        transport.set_connected(false);
        let mut arbitrator = IntensityArbitrator::new(0.05, Duration::from_millis(50), false);

        let report = arbitrator.apply_delta(&transport, 0.5).await.unwrap();
        assert_eq!(report.committed, 0.5);
        assert_eq!(report.devices_ok, 0);
    }

    #[tokio::test]
    async fn negative_running_value_is_clamped_and_flagged() {
        let device = Arc::new(SimulatedDevice::new(1, "dev", 1));
        let transport = SimulatedTransport::with_devices([device.clone()]);
        let mut arbitrator = arbitrator(0.05);

        let report = arbitrator.apply_delta(&transport, -0.1).await.unwrap();

        assert!(report.negative_anomaly);
        assert_eq!(report.committed, 0.0);
        assert_eq!(device.levels(), vec![0.0]);
    }

    #[tokio::test]
    async fn over_saturation_is_capped_silently() {
        let device = Arc::new(SimulatedDevice::new(1, "dev", 1));
        let transport = SimulatedTransport::with_devices([device.clone()]);
        let mut arbitrator = arbitrator(0.05);

        let report = arbitrator.apply_delta(&transport, 1.4).await.unwrap();

        assert!(!report.negative_anomaly);
        assert!(report.reading.capped);
        assert_eq!(device.levels(), vec![1.0]);
    }

    #[tokio::test]
    async fn stop_all_is_idempotent() {
        let device = Arc::new(SimulatedDevice::new(1, "dev", 1));
        let stubborn = Arc::new(SimulatedDevice::new(2, "stubborn", 1));
        stubborn.set_fail_stops(true);
        let transport = SimulatedTransport::with_devices([device.clone(), stubborn.clone()]);
        let mut arbitrator = arbitrator(0.05);
        let mut registry = EffectRegistry::new();
        registry.register(EventCategory::Elimination, 0.2, Duration::from_secs(5)).unwrap();
        arbitrator.apply_delta(&transport, 0.2).await.unwrap();

        let first = arbitrator.stop_all(&transport, &mut registry).await;
        assert_eq!(first.effects_dropped, 1);
        assert_eq!(first.devices_stopped, 1);
        assert_eq!(first.devices_failed, 1);
        assert_eq!(arbitrator.state().committed(), 0.0);
        assert_eq!(registry.total_len(), 0);

        let second = arbitrator.stop_all(&transport, &mut registry).await;
        assert_eq!(second.effects_dropped, 0);
        assert_eq!(arbitrator.state().value(), 0.0);
        assert_eq!(device.levels(), vec![0.0]);
    }

    struct Counting(Arc<AtomicUsize>);

    impl IntensityObserver for Counting {
        fn observe(&mut self, _committed: f64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn observer_sees_every_successful_apply() {
        let seen = Arc::new(AtomicUsize::new(0));
        let transport = SimulatedTransport::new();
        let mut arbitrator = arbitrator(0.05).with_observer(Box::new(Counting(seen.clone())));

        arbitrator.apply_delta(&transport, 0.1).await.unwrap();
        arbitrator.apply_delta(&transport, -0.1).await.unwrap();
        transport.set_connected(false);
        let _ = arbitrator.apply_delta(&transport, 0.1).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
