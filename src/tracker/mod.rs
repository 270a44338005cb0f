//! Game-state acquisition seam
//!
//! The engine pulls one [`GameSnapshot`] per refresh from a [`StateSource`]. How the
//! source obtains it (screen capture or a recorded replay) is not
//! the engine's concern.

pub mod replay;

pub use replay::{ReplayFrame, ReplayStateSource};

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Selected role/kit that decides which context-bound rules are active
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new("Other")
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One pull of game state
///
/// Counters are occurrences since the previous snapshot, flags are current levels.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot {
    /// False while the tracked player cannot act (dead, spectating)
    pub is_actionable: bool,
    pub new_eliminations: u32,
    pub new_assists: u32,
    pub new_saves: u32,
    pub resurrecting: bool,
    pub being_beamed: bool,
    pub heal_beam: bool,
    pub damage_beam: bool,
    pub harmony_orb: bool,
    pub discord_orb: bool,
    pub context: ContextId,
}

impl Default for GameSnapshot {
    fn default() -> Self {
        Self {
            is_actionable: true,
            new_eliminations: 0,
            new_assists: 0,
            new_saves: 0,
            resurrecting: false,
            being_beamed: false,
            heal_beam: false,
            damage_beam: false,
            harmony_orb: false,
            discord_orb: false,
            context: ContextId::default(),
        }
    }
}

impl GameSnapshot {
    pub fn count(&self, signal: CounterSignal) -> u32 {
        match signal {
            CounterSignal::Eliminations => self.new_eliminations,
            CounterSignal::Assists => self.new_assists,
            CounterSignal::Saves => self.new_saves,
        }
    }

    pub fn flag(&self, signal: FlagSignal) -> bool {
        match signal {
            FlagSignal::Resurrecting => self.resurrecting,
            FlagSignal::BeingBeamed => self.being_beamed,
            FlagSignal::HealBeam => self.heal_beam,
            FlagSignal::DamageBeam => self.damage_beam,
            FlagSignal::HarmonyOrb => self.harmony_orb,
            FlagSignal::DiscordOrb => self.discord_orb,
        }
    }
}

/// Snapshot counters a rule can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterSignal {
    Eliminations,
    Assists,
    Saves,
}

/// Snapshot flags a rule can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSignal {
    Resurrecting,
    BeingBeamed,
    HealBeam,
    DamageBeam,
    HarmonyOrb,
    DiscordOrb,
}

/// Settings handed to the source when tracking starts
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub max_refresh_rate: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Negative confirmations needed before a mercy beam counts as disconnected
    pub mercy_beam_disconnect_buffer: u32,
    /// Negative confirmations needed before an orb counts as gone
    pub zen_orb_disconnect_buffer: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("State source is not tracking")]
    NotTracking,

    #[error("Failed to read replay: {0}")]
    Replay(String),
}

/// Pull-based provider of game snapshots
pub trait StateSource: Send {
    fn start_tracking(&mut self, settings: &TrackerSettings);

    fn refresh(&mut self) -> Result<GameSnapshot, SourceError>;

    fn stop_tracking(&mut self);

    fn select_context(&mut self, context: ContextId);
}
