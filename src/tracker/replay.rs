//! Recorded game state played back against the wall clock
//!
//! A replay file is a list of frames. A frame becomes current once `at_secs` has
//! elapsed since tracking started. Counters of every frame passed since the last
//! refresh are summed and reported once; flags stay at the latest frame's levels.
//!
//! ```text
//! [[frames]]
//! at_secs = 1.5
//! new_eliminations = 1
//!
//! [[frames]]
//! at_secs = 3.0
//! heal_beam = true
//! ```

use super::{ContextId, GameSnapshot, SourceError, StateSource, TrackerSettings};
use serde::Deserialize;
use std::path::Path;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
struct ReplayFile {
    #[serde(default)]
    frames: Vec<ReplayFrame>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayFrame {
    pub at_secs: f64,
    pub dead: bool,
    pub new_eliminations: u32,
    pub new_assists: u32,
    pub new_saves: u32,
    pub resurrecting: bool,
    pub being_beamed: bool,
    pub heal_beam: bool,
    pub damage_beam: bool,
    pub harmony_orb: bool,
    pub discord_orb: bool,
}

#[derive(Debug, Clone)]
pub struct ReplayStateSource {
    frames: Vec<ReplayFrame>,
    cursor: usize,
    started: Option<Instant>,
    current: GameSnapshot,
    context: ContextId,
}

impl ReplayStateSource {
    pub fn from_frames(mut frames: Vec<ReplayFrame>) -> Self {
        frames.sort_by(|a, b| a.at_secs.total_cmp(&b.at_secs));
        Self {
            frames,
            cursor: 0,
            started: None,
            current: GameSnapshot::default(),
            context: ContextId::default(),
        }
    }

    /// Source that never reports anything
    pub fn idle() -> Self {
        Self::from_frames(Vec::new())
    }

    pub async fn load(path: &Path) -> Result<Self, SourceError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SourceError::Replay(format!("{}: {}", path.display(), e)))?;
        let file: ReplayFile =
            toml::from_str(&content).map_err(|e| SourceError::Replay(e.to_string()))?;
        info!("Loaded replay with {} frames from {}", file.frames.len(), path.display());
        Ok(Self::from_frames(file.frames))
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl StateSource for ReplayStateSource {
    fn start_tracking(&mut self, settings: &TrackerSettings) {
        debug!("Replay tracking started with {:?}", settings);
        self.cursor = 0;
        self.started = Some(Instant::now());
        self.current = GameSnapshot {
            context: self.context.clone(),
            ..GameSnapshot::default()
        };
    }

    fn refresh(&mut self) -> Result<GameSnapshot, SourceError> {
        let started = self.started.ok_or(SourceError::NotTracking)?;
        let elapsed = started.elapsed().as_secs_f64();

        let mut snapshot = GameSnapshot {
            new_eliminations: 0,
            new_assists: 0,
            new_saves: 0,
            context: self.context.clone(),
            ..self.current.clone()
        };

        while let Some(frame) = self.frames.get(self.cursor) {
            if frame.at_secs > elapsed {
                break;
            }
            snapshot.is_actionable = !frame.dead;
            snapshot.new_eliminations += frame.new_eliminations;
            snapshot.new_assists += frame.new_assists;
            snapshot.new_saves += frame.new_saves;
            snapshot.resurrecting = frame.resurrecting;
            snapshot.being_beamed = frame.being_beamed;
            snapshot.heal_beam = frame.heal_beam;
            snapshot.damage_beam = frame.damage_beam;
            snapshot.harmony_orb = frame.harmony_orb;
            snapshot.discord_orb = frame.discord_orb;
            self.cursor += 1;
        }

        self.current = snapshot.clone();
        Ok(snapshot)
    }

    fn stop_tracking(&mut self) {
        debug!("Replay tracking stopped at frame {}/{}", self.cursor, self.frames.len());
        self.started = None;
    }

    fn select_context(&mut self, context: ContextId) {
        self.context = context;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> TrackerSettings {
        TrackerSettings {
            max_refresh_rate: 10,
            screen_width: 1920,
            screen_height: 1080,
            mercy_beam_disconnect_buffer: 2,
            zen_orb_disconnect_buffer: 2,
        }
    }

    #[test]
    fn refresh_before_start_fails() {
        let mut source = ReplayStateSource::idle();
        assert!(matches!(source.refresh(), Err(SourceError::NotTracking)));
    }

    #[tokio::test(start_paused = true)]
    async fn counters_are_reported_once_and_flags_persist() {
        let mut source = ReplayStateSource::from_frames(vec![
            ReplayFrame {
                at_secs: 2.0,
                heal_beam: false,
                new_assists: 1,
                ..ReplayFrame::default()
            },
            ReplayFrame {
                at_secs: 1.0,
                new_eliminations: 2,
                heal_beam: true,
                ..ReplayFrame::default()
            },
        ]);
        source.select_context(ContextId::new("Mercy"));
        source.start_tracking(&settings());

        assert_eq!(source.refresh().unwrap().new_eliminations, 0);

        tokio::time::advance(Duration::from_millis(1100)).await;
        let snapshot = source.refresh().unwrap();
        assert_eq!(snapshot.new_eliminations, 2);
        assert!(snapshot.heal_beam);
        assert_eq!(snapshot.context, ContextId::new("Mercy"));

        let again = source.refresh().unwrap();
        assert_eq!(again.new_eliminations, 0);
        assert!(again.heal_beam);

        tokio::time::advance(Duration::from_secs(1)).await;
        let later = source.refresh().unwrap();
        assert_eq!(later.new_assists, 1);
        assert!(!later.heal_beam);
    }

    #[test]
    fn replay_file_parses() {
        let file: ReplayFile = toml::from_str(
            r#"
            [[frames]]
            at_secs = 0.5
            dead = true

            [[frames]]
            at_secs = 1.0
            new_saves = 3
            "#,
        )
        .unwrap();
        assert_eq!(file.frames.len(), 2);
        assert!(file.frames[0].dead);
        assert_eq!(file.frames[1].new_saves, 3);
    }
}
