//! Per-category store of active timed effects

use super::{Effect, EventCategory};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("{category} effect lasting {duration:?} expires beyond the clock's range")]
    DeadlineOverflow {
        category: EventCategory,
        duration: Duration,
    },
}

/// Active timed effects, grouped by category
///
/// The registry is pure bookkeeping: it never touches devices. Whoever collects
/// expired effects owns the obligation to apply their inverse, and must hand an
/// effect back through [`EffectRegistry::requeue`] if that application fails.
#[derive(Debug, Default)]
pub struct EffectRegistry {
    active: HashMap<EventCategory, Vec<Effect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an effect that expires `duration` from now
    pub fn register(
        &mut self,
        category: EventCategory,
        magnitude: f64,
        duration: Duration,
    ) -> Result<Instant, RegistryError> {
        self.register_at(category, magnitude, duration, Instant::now())
    }

    /// Registers an effect that expires `duration` after `now`
    ///
    /// Repeated calls accumulate independent entries, each with its own expiry.
    pub fn register_at(
        &mut self,
        category: EventCategory,
        magnitude: f64,
        duration: Duration,
        now: Instant,
    ) -> Result<Instant, RegistryError> {
        let expires_at = now
            .checked_add(duration)
            .ok_or(RegistryError::DeadlineOverflow { category, duration })?;
        debug!(
            "Registering {} effect of {:+.3} for {:?}",
            category, magnitude, duration
        );
        self.active.entry(category).or_default().push(Effect {
            category,
            magnitude,
            expires_at,
        });
        Ok(expires_at)
    }

    /// Removes and returns every effect with `expires_at <= now`
    ///
    /// Nothing is allocated when no effect has lapsed.
    pub fn collect_expired(&mut self, now: Instant) -> Vec<Effect> {
        let mut expired = Vec::new();

        for effects in self.active.values_mut() {
            if !effects.iter().any(|effect| effect.is_expired(now)) {
                continue;
            }

            let (lapsed, pending): (Vec<Effect>, Vec<Effect>) =
                effects.drain(..).partition(|effect| effect.is_expired(now));
            *effects = pending;
            expired.extend(lapsed);
        }

        expired
    }

    /// Puts an expired effect back so the next sweep retries its inverse
    pub fn requeue(&mut self, effect: Effect) {
        debug!(
            "Requeueing {} effect of {:+.3} for retry",
            effect.category, effect.magnitude
        );
        self.active.entry(effect.category).or_default().push(effect);
    }

    pub fn len(&self, category: EventCategory) -> usize {
        self.active.get(&category).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, category: EventCategory) -> bool {
        self.len(category) == 0
    }

    pub fn total_len(&self) -> usize {
        self.active.values().map(Vec::len).sum()
    }

    /// Net delta still owed by all active effects
    pub fn outstanding(&self) -> f64 {
        self.active
            .values()
            .flat_map(|effects| effects.iter())
            .map(|effect| effect.magnitude)
            .sum()
    }

    /// Drops every active effect without applying inverses, returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.total_len();
        for effects in self.active.values_mut() {
            effects.clear();
        }
        dropped
    }
}
