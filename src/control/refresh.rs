use std::time::Duration;
use tokio::time::Instant;

/// Decides when the next game-state refresh is due
///
/// While the player can act the gate opens at most once per `min_interval`. After a
/// snapshot reported the player as not actionable it waits `dead_delay` instead.
#[derive(Debug, Clone)]
pub struct RefreshGate {
    min_interval: Duration,
    dead_delay: Duration,
    last_refresh: Option<Instant>,
    actionable: bool,
}

impl RefreshGate {
    pub fn new(min_interval: Duration, dead_delay: Duration) -> Self {
        Self {
            min_interval,
            dead_delay,
            last_refresh: None,
            actionable: true,
        }
    }

    /// Whether a refresh at `now` is allowed
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_refresh {
            None => true,
            Some(last) => now.duration_since(last) >= self.current_interval(),
        }
    }

    /// Records a refresh and whether its snapshot was actionable
    pub fn record(&mut self, now: Instant, actionable: bool) {
        self.last_refresh = Some(now);
        self.actionable = actionable;
    }

    pub fn current_interval(&self) -> Duration {
        if self.actionable {
            self.min_interval
        } else {
            self.dead_delay
        }
    }

    pub fn reset(&mut self) {
        self.last_refresh = None;
        self.actionable = true;
    }
}
