//! Observational feedback on committed intensity changes

use std::io::Write;
use tracing::trace;

/// Receives every committed intensity after a successful apply
///
/// Observers must not influence engine state.
pub trait IntensityObserver: Send + Sync {
    fn observe(&mut self, committed: f64);
}

/// Short tone whose pitch rises with intensity
#[derive(Debug, Clone)]
pub struct ToneFeedback {
    base_hz: u32,
    span_hz: u32,
    duration_ms: u32,
}

impl Default for ToneFeedback {
    fn default() -> Self {
        Self {
            base_hz: 1000,
            span_hz: 5000,
            duration_ms: 20,
        }
    }
}

impl ToneFeedback {
    pub fn frequency_for(&self, committed: f64) -> u32 {
        self.base_hz + (committed.clamp(0.0, 1.0) * self.span_hz as f64) as u32
    }
}

impl IntensityObserver for ToneFeedback {
    fn observe(&mut self, committed: f64) {
        let frequency = self.frequency_for(committed);
        trace!(
            "Feedback tone {}Hz for {}ms (intensity {:.2})",
            frequency,
            self.duration_ms,
            committed
        );
        // Terminal bell; a failed write only loses the cue
        let _ = std::io::stderr().write_all(b"\x07");
    }
}
