//! Data-driven transition rules
//!
//! Each [`Rule`] binds an [`EventCategory`] to one of four behaviours:
//!
//! - `impulse`: counter occurrences produce a timed delta of `count * unit_intensity`
//! - `guarded_impulse`: a flag produces a timed delta, only while the category has no active effect
//! - `level`: a flag's rising edge applies the intensity, its falling edge removes it
//! - `exclusive_pair`: two flags that net against each other instead of stacking
//!
//! Rules only decide; the control loop applies the resulting [`RuleAction`]s.

pub mod engine;
pub mod error;

pub use engine::{LevelState, TransitionRules};
pub use error::RuleError;

use crate::effects::EventCategory;
use crate::tracker::{ContextId, CounterSignal, FlagSignal};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub category: EventCategory,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Only evaluated while this context is selected; `None` means always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextId>,
    #[serde(flatten)]
    pub kind: RuleKind,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    Impulse {
        counter: CounterSignal,
        unit_intensity: f64,
        duration_secs: f64,
        /// Skip the impulse while this flag is set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suppress_when: Option<FlagSignal>,
    },
    GuardedImpulse {
        guard: FlagSignal,
        intensity: f64,
        duration_secs: f64,
    },
    Level {
        signal: FlagSignal,
        intensity: f64,
    },
    ExclusivePair {
        first: FlagSignal,
        first_intensity: f64,
        second: FlagSignal,
        second_intensity: f64,
    },
}

impl Rule {
    pub fn applies_to(&self, context: &ContextId) -> bool {
        self.enabled && self.context.as_ref().map_or(true, |c| c == context)
    }
}

/// What the control loop has to do after a rule fired
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    /// Apply once; the delta persists until another action removes it
    Apply { category: EventCategory, delta: f64 },
    /// Apply now and register an effect that reverts it after `duration`
    ApplyTimed {
        category: EventCategory,
        delta: f64,
        duration: Duration,
    },
}

impl RuleAction {
    pub fn delta(&self) -> f64 {
        match self {
            RuleAction::Apply { delta, .. } | RuleAction::ApplyTimed { delta, .. } => *delta,
        }
    }
}
