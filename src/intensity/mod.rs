//! Intensity arithmetic and arbitration
//!
//! All deltas flow into a single running value. What devices receive is always the
//! quantized running value clamped to [0, 1]; the running value itself may leave
//! that range so that overlapping effects unwind back to the right level.

pub mod arbitrator;
pub mod feedback;

pub use arbitrator::{ApplyReport, ArbitratorError, IntensityArbitrator, StopReport};
pub use feedback::{IntensityObserver, ToneFeedback};

use std::fmt::{self, Display};

/// Running intensity with its quantization grid
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityState {
    value: f64,
    step: f64,
    precision: i32,
}

impl IntensityState {
    /// `step` must be finite and in (0, 1]; config validation guarantees that
    pub fn new(step: f64) -> Self {
        Self {
            value: 0.0,
            step,
            precision: decimal_places(step),
        }
    }

    /// Unclamped running value
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Decimal places used when rounding, derived from the step
    pub fn precision(&self) -> i32 {
        self.precision
    }

    /// The value that is actually sent to hardware
    pub fn committed(&self) -> f64 {
        self.value.clamp(0.0, 1.0)
    }

    /// Snaps a raw value to the nearest multiple of the step
    pub fn quantize(&self, raw: f64) -> f64 {
        round_to(self.step * (raw / self.step).round(), self.precision)
    }

    /// Adds a delta and re-quantizes, returns the new running value
    pub fn accumulate(&mut self, amount: f64) -> f64 {
        self.value = self.quantize(self.value + amount);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }

    pub fn reading(&self) -> IntensityReading {
        IntensityReading {
            percent: (round_to(self.value * 100.0, 0) as i32).max(0),
            capped: self.value > 1.0,
        }
    }
}

/// Intensity as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntensityReading {
    /// Percent of the running value, floored at 0
    pub percent: i32,
    /// Running value is above full scale and devices are capped at 100%
    pub capped: bool,
}

impl Display for IntensityReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.capped {
            write!(f, "{}% (max 100%)", self.percent)
        } else {
            write!(f, "{}%", self.percent)
        }
    }
}

fn decimal_places(step: f64) -> i32 {
    let rendered = format!("{}", step);
    match rendered.split_once('.') {
        Some((_, fraction)) => fraction.len() as i32,
        None => 0,
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn precision_follows_step() {
        assert_eq!(IntensityState::new(0.05).precision(), 2);
        assert_eq!(IntensityState::new(0.1).precision(), 1);
        assert_eq!(IntensityState::new(0.005).precision(), 3);
        assert_eq!(IntensityState::new(1.0).precision(), 0);
    }

    #[test]
    fn delta_is_snapped_to_step() {
        let mut state = IntensityState::new(0.01);
        assert_eq!(state.accumulate(0.017), 0.02);
    }

    #[test]
    fn thousands_of_steps_do_not_drift() {
        let mut state = IntensityState::new(0.05);
        for _ in 0..5000 {
            state.accumulate(0.05);
            state.accumulate(0.1);
            state.accumulate(-0.15);
        }
        assert_eq!(state.value(), 0.0);
    }

    #[test]
    fn negative_value_reads_as_zero() {
        let mut state = IntensityState::new(0.05);
        state.accumulate(-0.1);
        assert_eq!(state.value(), -0.1);
        assert_eq!(state.reading().percent, 0);
        assert_eq!(state.reading().to_string(), "0%");
    }

    #[test]
    fn committed_is_clamped_but_value_is_kept() {
        let mut state = IntensityState::new(0.05);
        state.accumulate(1.2);
        assert_eq!(state.committed(), 1.0);
        assert_eq!(state.value(), 1.2);
        assert_eq!(state.reading().to_string(), "120% (max 100%)");

        state.accumulate(-1.5);
        assert_eq!(state.committed(), 0.0);
        assert!((state.value() + 0.3).abs() < 1e-9);
    }

    #[test]
    fn reading_rounds_to_whole_percent() {
        let mut state = IntensityState::new(0.01);
        state.accumulate(0.29);
        assert_eq!(state.reading(), IntensityReading { percent: 29, capped: false });
        assert_eq!(state.reading().to_string(), "29%");
    }

    proptest! {
        #[test]
        fn committed_matches_quantized_running_sum(
            deltas in prop::collection::vec(-0.5f64..0.5, 0..200)
        ) {
            let mut state = IntensityState::new(0.05);
            let mut grid_sum: i64 = 0;
            for delta in &deltas {
                state.accumulate(*delta);
                grid_sum += (delta / 0.05).round() as i64;
                prop_assert!((0.0..=1.0).contains(&state.committed()));
            }
            let expected = (grid_sum as f64 * 0.05).clamp(0.0, 1.0);
            prop_assert!((state.committed() - expected).abs() < 1e-9);
        }
    }
}
