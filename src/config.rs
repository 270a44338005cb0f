//! Engine configuration
//!
//! Loaded from `<config_dir>/overstim/config.toml` (or `$OVERSTIM_CONFIG`). The file
//! is written with defaults on first start. A config that fails to load or
//! validate does not stop the process; the session reports it and refuses to start.

use crate::effects::EventCategory;
use crate::rules::{Rule, RuleKind};
use crate::tracker::{ContextId, CounterSignal, FlagSignal, TrackerSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = "overstim";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "OVERSTIM_CONFIG";
/// Longest effect a rule may schedule
const MAX_EFFECT_SECS: f64 = 3600.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine a configuration directory")]
    NoConfigDir,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Smallest intensity change devices can express
    pub min_intensity_step: f64,
    /// Leave tracking when the device transport disconnects
    pub require_connection: bool,
    pub beep_enabled: bool,
    pub device_write_timeout_ms: u64,
    /// Upper bound on a single tracking tick
    pub tick_interval_ms: u64,
    /// How often the idle loop refreshes device count and connection state
    pub idle_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_intensity_step: 0.05,
            require_connection: true,
            beep_enabled: false,
            device_write_timeout_ms: 100,
            tick_interval_ms: 5,
            idle_poll_interval_ms: 500,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Snapshot refreshes per second while the player can act
    pub max_refresh_rate: u32,
    /// Seconds between refreshes while the player is dead
    pub dead_refresh_delay_secs: f64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_refresh_rate: 30,
            dead_refresh_delay_secs: 0.5,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    pub mercy_beam_disconnect_buffer: u32,
    pub zen_orb_disconnect_buffer: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            mercy_beam_disconnect_buffer: 3,
            zen_orb_disconnect_buffer: 3,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Replay file fed to the engine instead of live capture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_path: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StimConfig {
    pub engine: EngineConfig,
    pub refresh: RefreshConfig,
    pub tracker: TrackerConfig,
    pub source: SourceConfig,
    pub rules: Vec<Rule>,
}

impl Default for StimConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            refresh: RefreshConfig::default(),
            tracker: TrackerConfig::default(),
            source: SourceConfig::default(),
            rules: default_rules(),
        }
    }
}

impl StimConfig {
    /// Config file location, `$OVERSTIM_CONFIG` wins over the platform directory
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Writes the default config to `path` unless a file already exists there
    pub async fn ensure_default_config(path: &Path) -> Result<(), ConfigError> {
        let exists = tokio::fs::try_exists(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if exists {
            debug!("Config found at {}", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let content = toml::to_string_pretty(&StimConfig::default())?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Wrote default config to {}", path.display());
        Ok(())
    }

    /// Reads, parses and validates the config at `path`
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml(&content)?;
        info!(
            "Loaded config from {} with {} rules",
            path.display(),
            config.rules.len()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: StimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let step = self.engine.min_intensity_step;
        if !step.is_finite() || step <= 0.0 || step > 1.0 {
            return Err(ConfigError::invalid(
                "engine.min_intensity_step",
                format!("{} is not in (0, 1]", step),
            ));
        }
        if self.engine.device_write_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "engine.device_write_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.engine.tick_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "engine.tick_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.refresh.max_refresh_rate == 0 {
            return Err(ConfigError::invalid(
                "refresh.max_refresh_rate",
                "must be greater than 0",
            ));
        }
        let dead_delay = self.refresh.dead_refresh_delay_secs;
        if !dead_delay.is_finite() || dead_delay < 0.0 {
            return Err(ConfigError::invalid(
                "refresh.dead_refresh_delay_secs",
                format!("{} is not a valid delay", dead_delay),
            ));
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.category) {
                return Err(ConfigError::invalid(
                    format!("rules.{}", rule.category),
                    "category is configured more than once",
                ));
            }
            validate_rule(rule)?;
        }
        Ok(())
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.refresh.max_refresh_rate as f64).unwrap_or_default()
    }

    pub fn dead_refresh_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.refresh.dead_refresh_delay_secs).unwrap_or_default()
    }

    pub fn device_write_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.device_write_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.engine.tick_interval_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine.idle_poll_interval_ms.max(1))
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            max_refresh_rate: self.refresh.max_refresh_rate,
            screen_width: self.tracker.screen_width,
            screen_height: self.tracker.screen_height,
            mercy_beam_disconnect_buffer: self.tracker.mercy_beam_disconnect_buffer,
            zen_orb_disconnect_buffer: self.tracker.zen_orb_disconnect_buffer,
        }
    }
}

fn validate_rule(rule: &Rule) -> Result<(), ConfigError> {
    let field = |name: &str| format!("rules.{}.{}", rule.category, name);
    let check_intensity = |name: &str, value: f64| {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::invalid(field(name), format!("{} is not in [0, 1]", value)))
        }
    };
    let check_duration = |value: f64| {
        if value.is_finite() && value > 0.0 && value <= MAX_EFFECT_SECS {
            Ok(())
        } else {
            Err(ConfigError::invalid(
                field("duration_secs"),
                format!("{} is not in (0, {}] seconds", value, MAX_EFFECT_SECS),
            ))
        }
    };

    match &rule.kind {
        RuleKind::Impulse {
            unit_intensity,
            duration_secs,
            ..
        } => {
            check_intensity("unit_intensity", *unit_intensity)?;
            check_duration(*duration_secs)
        }
        RuleKind::GuardedImpulse {
            intensity,
            duration_secs,
            ..
        } => {
            check_intensity("intensity", *intensity)?;
            check_duration(*duration_secs)
        }
        RuleKind::Level { intensity, .. } => check_intensity("intensity", *intensity),
        RuleKind::ExclusivePair {
            first,
            first_intensity,
            second,
            second_intensity,
        } => {
            check_intensity("first_intensity", *first_intensity)?;
            check_intensity("second_intensity", *second_intensity)?;
            if first == second {
                return Err(ConfigError::invalid(
                    field("second"),
                    "an exclusive pair needs two different signals",
                ));
            }
            Ok(())
        }
    }
}

fn default_rules() -> Vec<Rule> {
    let mercy = Some(ContextId::new("Mercy"));
    let zenyatta = Some(ContextId::new("Zenyatta"));

    vec![
        Rule {
            category: EventCategory::Elimination,
            enabled: true,
            context: None,
            kind: RuleKind::Impulse {
                counter: CounterSignal::Eliminations,
                unit_intensity: 0.2,
                duration_secs: 4.0,
                suppress_when: None,
            },
        },
        Rule {
            category: EventCategory::Assist,
            enabled: true,
            context: None,
            kind: RuleKind::Impulse {
                counter: CounterSignal::Assists,
                unit_intensity: 0.1,
                duration_secs: 3.0,
                suppress_when: None,
            },
        },
        Rule {
            category: EventCategory::Save,
            enabled: true,
            context: None,
            kind: RuleKind::Impulse {
                counter: CounterSignal::Saves,
                unit_intensity: 0.2,
                duration_secs: 4.0,
                suppress_when: Some(FlagSignal::Resurrecting),
            },
        },
        Rule {
            category: EventCategory::BeingBeamed,
            enabled: true,
            context: None,
            kind: RuleKind::Level {
                signal: FlagSignal::BeingBeamed,
                intensity: 0.1,
            },
        },
        Rule {
            category: EventCategory::Resurrect,
            enabled: true,
            context: mercy.clone(),
            kind: RuleKind::GuardedImpulse {
                guard: FlagSignal::Resurrecting,
                intensity: 0.4,
                duration_secs: 2.0,
            },
        },
        Rule {
            category: EventCategory::MercyBeam,
            enabled: true,
            context: mercy,
            kind: RuleKind::ExclusivePair {
                first: FlagSignal::HealBeam,
                first_intensity: 0.1,
                second: FlagSignal::DamageBeam,
                second_intensity: 0.2,
            },
        },
        Rule {
            category: EventCategory::HarmonyOrb,
            enabled: true,
            context: zenyatta.clone(),
            kind: RuleKind::Level {
                signal: FlagSignal::HarmonyOrb,
                intensity: 0.1,
            },
        },
        Rule {
            category: EventCategory::DiscordOrb,
            enabled: true,
            context: zenyatta,
            kind: RuleKind::Level {
                signal: FlagSignal::DiscordOrb,
                intensity: 0.1,
            },
        },
    ]
}
