//! Timed intensity effects
//!
//! An [`Effect`] is an intensity delta that is still "owed" to the devices: it was
//! applied when its rule fired and its inverse has to be applied exactly once when
//! it lapses. The [`EffectRegistry`] keeps them per [`EventCategory`].

pub mod registry;

pub use registry::{EffectRegistry, RegistryError};

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use tokio::time::Instant;

/// Event categories a rule can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Elimination,
    Assist,
    Save,
    Resurrect,
    BeingBeamed,
    MercyBeam,
    HarmonyOrb,
    DiscordOrb,
}

impl EventCategory {
    pub const ALL: [EventCategory; 8] = [
        EventCategory::Elimination,
        EventCategory::Assist,
        EventCategory::Save,
        EventCategory::Resurrect,
        EventCategory::BeingBeamed,
        EventCategory::MercyBeam,
        EventCategory::HarmonyOrb,
        EventCategory::DiscordOrb,
    ];
}

impl Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCategory::Elimination => write!(f, "Elimination"),
            EventCategory::Assist => write!(f, "Assist"),
            EventCategory::Save => write!(f, "Save"),
            EventCategory::Resurrect => write!(f, "Resurrect"),
            EventCategory::BeingBeamed => write!(f, "Being beamed"),
            EventCategory::MercyBeam => write!(f, "Mercy beam"),
            EventCategory::HarmonyOrb => write!(f, "Harmony orb"),
            EventCategory::DiscordOrb => write!(f, "Discord orb"),
        }
    }
}

/// A registered timed delta
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub category: EventCategory,
    /// Signed fraction of full scale that was applied on registration
    pub magnitude: f64,
    pub expires_at: Instant,
}

impl Effect {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// Delta that undoes this effect
    pub fn inverse(&self) -> f64 {
        -self.magnitude
    }
}
