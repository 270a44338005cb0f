//! Per-tick evaluation of the rule table against a snapshot

use super::{Rule, RuleAction, RuleError, RuleKind};
use crate::effects::{EffectRegistry, EventCategory};
use crate::tracker::{ContextId, GameSnapshot};
use std::time::Duration;
use tracing::{debug, info};

/// Level-triggered state of one rule
///
/// A pair rule holds at most one of its two sides, so both sides can never be
/// active at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelState {
    #[default]
    Off,
    /// Single level rule is active
    On,
    /// First side of an exclusive pair is active
    First,
    /// Second side of an exclusive pair is active
    Second,
}

#[derive(Debug, Clone)]
pub struct TransitionRules {
    rules: Vec<Rule>,
    levels: Vec<LevelState>,
    context: Option<ContextId>,
}

impl TransitionRules {
    pub fn new(rules: Vec<Rule>) -> Self {
        let levels = vec![LevelState::Off; rules.len()];
        Self {
            rules,
            levels,
            context: None,
        }
    }

    /// Level state of the rule bound to `category`
    pub fn level(&self, category: EventCategory) -> LevelState {
        self.rules
            .iter()
            .position(|rule| rule.category == category)
            .map_or(LevelState::Off, |idx| self.levels[idx])
    }

    pub fn active_context(&self) -> Option<&ContextId> {
        self.context.as_ref()
    }

    /// Forgets all level state; called at the start of every tracking session
    pub fn reset(&mut self) {
        self.levels.iter_mut().for_each(|level| *level = LevelState::Off);
        self.context = None;
    }

    /// Decides the deltas for one snapshot
    ///
    /// A context change first releases every level the old context was holding.
    /// Timed effects are left to expire on their own.
    pub fn evaluate(
        &mut self,
        snapshot: &GameSnapshot,
        registry: &EffectRegistry,
    ) -> Result<Vec<RuleAction>, RuleError> {
        let mut actions = self.switch_context(&snapshot.context);

        for (idx, rule) in self.rules.iter().enumerate() {
            if !rule.applies_to(&snapshot.context) {
                continue;
            }

            let level = &mut self.levels[idx];
            let category = rule.category;

            match &rule.kind {
                RuleKind::Impulse {
                    counter,
                    unit_intensity,
                    duration_secs,
                    suppress_when,
                } => {
                    let count = snapshot.count(*counter);
                    if count == 0 {
                        continue;
                    }
                    if let Some(flag) = suppress_when {
                        if snapshot.flag(*flag) {
                            debug!("{} impulse suppressed by {:?}", category, flag);
                            continue;
                        }
                    }
                    actions.push(timed(
                        category,
                        count as f64 * unit_intensity,
                        *duration_secs,
                    )?);
                }
                RuleKind::GuardedImpulse {
                    guard,
                    intensity,
                    duration_secs,
                } => {
                    if snapshot.flag(*guard) && registry.is_empty(category) {
                        actions.push(timed(category, *intensity, *duration_secs)?);
                    }
                }
                RuleKind::Level { signal, intensity } => {
                    match (*level, snapshot.flag(*signal)) {
                        (LevelState::Off, true) => {
                            actions.push(apply(category, *intensity)?);
                            *level = LevelState::On;
                        }
                        (LevelState::On, false) => {
                            actions.push(apply(category, -intensity)?);
                            *level = LevelState::Off;
                        }
                        _ => {}
                    }
                }
                RuleKind::ExclusivePair {
                    first,
                    first_intensity,
                    second,
                    second_intensity,
                } => {
                    let wants_first = snapshot.flag(*first);
                    let wants_second = !wants_first && snapshot.flag(*second);

                    let (delta, next) = match (*level, wants_first, wants_second) {
                        (LevelState::First, true, _) | (LevelState::Second, _, true) => {
                            continue
                        }
                        (LevelState::Second, true, _) => {
                            (first_intensity - second_intensity, LevelState::First)
                        }
                        (LevelState::First, _, true) => {
                            (second_intensity - first_intensity, LevelState::Second)
                        }
                        (_, true, _) => (*first_intensity, LevelState::First),
                        (_, _, true) => (*second_intensity, LevelState::Second),
                        (LevelState::First, false, false) => (-first_intensity, LevelState::Off),
                        (LevelState::Second, false, false) => {
                            (-second_intensity, LevelState::Off)
                        }
                        _ => continue,
                    };

                    actions.push(apply(category, delta)?);
                    *level = next;
                }
            }
        }

        Ok(actions)
    }

    /// Makes `next` the active context
    ///
    /// Returns the falling edges of every level the previous context was holding.
    pub fn switch_context(&mut self, next: &ContextId) -> Vec<RuleAction> {
        let mut actions = Vec::new();
        if self.context.as_ref() == Some(next) {
            return actions;
        }
        if let Some(previous) = self.context.take() {
            info!("Hero switched from {} to {}", previous, next);
            self.release_context(&previous, next, &mut actions);
        }
        self.context = Some(next.clone());
        actions
    }

    /// Emits falling edges for every level held by a rule bound to `previous`
    fn release_context(
        &mut self,
        previous: &ContextId,
        next: &ContextId,
        actions: &mut Vec<RuleAction>,
    ) {
        for (idx, rule) in self.rules.iter().enumerate() {
            let bound_to_previous = rule.context.as_ref() == Some(previous);
            if !bound_to_previous || rule.context.as_ref() == Some(next) {
                continue;
            }

            let release = match (&rule.kind, self.levels[idx]) {
                (RuleKind::Level { intensity, .. }, LevelState::On) => Some(-intensity),
                (RuleKind::ExclusivePair { first_intensity, .. }, LevelState::First) => {
                    Some(-first_intensity)
                }
                (RuleKind::ExclusivePair { second_intensity, .. }, LevelState::Second) => {
                    Some(-second_intensity)
                }
                _ => None,
            };

            if let Some(delta) = release {
                debug!("Releasing {} level after context switch", rule.category);
                actions.push(RuleAction::Apply {
                    category: rule.category,
                    delta,
                });
                self.levels[idx] = LevelState::Off;
            }
        }
    }
}

fn apply(category: EventCategory, delta: f64) -> Result<RuleAction, RuleError> {
    if !delta.is_finite() {
        return Err(RuleError::InvalidDelta {
            category,
            value: delta,
        });
    }
    Ok(RuleAction::Apply { category, delta })
}

fn timed(category: EventCategory, delta: f64, secs: f64) -> Result<RuleAction, RuleError> {
    if !delta.is_finite() {
        return Err(RuleError::InvalidDelta {
            category,
            value: delta,
        });
    }
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|_| RuleError::InvalidDuration { category, secs })?;
    Ok(RuleAction::ApplyTimed {
        category,
        delta,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{CounterSignal, FlagSignal};

    fn mercy() -> ContextId {
        ContextId::new("Mercy")
    }

    fn zen() -> ContextId {
        ContextId::new("Zenyatta")
    }

    fn beam_rule() -> Rule {
        Rule {
            category: EventCategory::MercyBeam,
            enabled: true,
            context: Some(mercy()),
            kind: RuleKind::ExclusivePair {
                first: FlagSignal::HealBeam,
                first_intensity: 0.1,
                second: FlagSignal::DamageBeam,
                second_intensity: 0.15,
            },
        }
    }

    fn snapshot(context: ContextId) -> GameSnapshot {
        GameSnapshot {
            context,
            ..GameSnapshot::default()
        }
    }

    fn deltas(actions: &[RuleAction]) -> Vec<f64> {
        actions.iter().map(RuleAction::delta).collect()
    }

    #[test]
    fn impulse_scales_with_count() {
        let mut rules = TransitionRules::new(vec![Rule {
            category: EventCategory::Elimination,
            enabled: true,
            context: None,
            kind: RuleKind::Impulse {
                counter: CounterSignal::Eliminations,
                unit_intensity: 0.05,
                duration_secs: 2.0,
                suppress_when: None,
            },
        }]);
        let registry = EffectRegistry::new();

        let quiet = rules.evaluate(&snapshot(ContextId::default()), &registry).unwrap();
        assert!(quiet.is_empty());

        let mut snap = snapshot(ContextId::default());
        snap.new_eliminations = 3;
        let actions = rules.evaluate(&snap, &registry).unwrap();
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            RuleAction::ApplyTimed { delta, duration, .. } => {
                assert!((delta - 0.15).abs() < 1e-9);
                assert_eq!(*duration, Duration::from_secs(2));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn save_is_suppressed_while_resurrecting() {
        let mut rules = TransitionRules::new(vec![Rule {
            category: EventCategory::Save,
            enabled: true,
            context: None,
            kind: RuleKind::Impulse {
                counter: CounterSignal::Saves,
                unit_intensity: 0.2,
                duration_secs: 1.0,
                suppress_when: Some(FlagSignal::Resurrecting),
            },
        }]);
        let registry = EffectRegistry::new();
        let mut snap = snapshot(mercy());
        snap.new_saves = 1;
        snap.resurrecting = true;
        assert!(rules.evaluate(&snap, &registry).unwrap().is_empty());

        snap.resurrecting = false;
        assert_eq!(rules.evaluate(&snap, &registry).unwrap().len(), 1);
    }

    #[test]
    fn resurrect_never_overlaps() {
        let mut rules = TransitionRules::new(vec![Rule {
            category: EventCategory::Resurrect,
            enabled: true,
            context: Some(mercy()),
            kind: RuleKind::GuardedImpulse {
                guard: FlagSignal::Resurrecting,
                intensity: 0.4,
                duration_secs: 2.0,
            },
        }]);
        let mut registry = EffectRegistry::new();
        let mut snap = snapshot(mercy());
        snap.resurrecting = true;

        let first = rules.evaluate(&snap, &registry).unwrap();
        assert_eq!(deltas(&first), vec![0.4]);
        registry.register(EventCategory::Resurrect, 0.4, Duration::from_secs(2)).unwrap();

        assert!(rules.evaluate(&snap, &registry).unwrap().is_empty());

        registry.clear();
        assert_eq!(rules.evaluate(&snap, &registry).unwrap().len(), 1);
    }

    #[test]
    fn disabled_and_foreign_context_rules_do_nothing() {
        let mut disabled = beam_rule();
        disabled.enabled = false;
        let mut rules = TransitionRules::new(vec![disabled]);
        let registry = EffectRegistry::new();
        let mut snap = snapshot(mercy());
        snap.heal_beam = true;
        assert!(rules.evaluate(&snap, &registry).unwrap().is_empty());

        let mut rules = TransitionRules::new(vec![beam_rule()]);
        snap.context = zen();
        assert!(rules.evaluate(&snap, &registry).unwrap().is_empty());
    }

    #[test]
    fn level_rule_fires_on_edges_only() {
        let mut rules = TransitionRules::new(vec![Rule {
            category: EventCategory::BeingBeamed,
            enabled: true,
            context: None,
            kind: RuleKind::Level {
                signal: FlagSignal::BeingBeamed,
                intensity: 0.1,
            },
        }]);
        let registry = EffectRegistry::new();
        let mut snap = snapshot(ContextId::default());

        snap.being_beamed = true;
        assert_eq!(deltas(&rules.evaluate(&snap, &registry).unwrap()), vec![0.1]);
        assert!(rules.evaluate(&snap, &registry).unwrap().is_empty());
        assert_eq!(rules.level(EventCategory::BeingBeamed), LevelState::On);

        snap.being_beamed = false;
        assert_eq!(deltas(&rules.evaluate(&snap, &registry).unwrap()), vec![-0.1]);
        assert!(rules.evaluate(&snap, &registry).unwrap().is_empty());
        assert_eq!(rules.level(EventCategory::BeingBeamed), LevelState::Off);
    }

    #[test]
    fn switching_beams_nets_into_one_delta() {
        let mut rules = TransitionRules::new(vec![beam_rule()]);
        let registry = EffectRegistry::new();
        let mut snap = snapshot(mercy());

        snap.heal_beam = true;
        assert_eq!(deltas(&rules.evaluate(&snap, &registry).unwrap()), vec![0.1]);

        snap.heal_beam = false;
        snap.damage_beam = true;
        let actions = rules.evaluate(&snap, &registry).unwrap();
        assert_eq!(actions.len(), 1);
        assert!((actions[0].delta() - 0.05).abs() < 1e-9);
        assert_eq!(rules.level(EventCategory::MercyBeam), LevelState::Second);

        snap.damage_beam = false;
        snap.heal_beam = true;
        let actions = rules.evaluate(&snap, &registry).unwrap();
        assert!((actions[0].delta() + 0.05).abs() < 1e-9);
        assert_eq!(rules.level(EventCategory::MercyBeam), LevelState::First);

        snap.heal_beam = false;
        assert_eq!(deltas(&rules.evaluate(&snap, &registry).unwrap()), vec![-0.1]);
        assert_eq!(rules.level(EventCategory::MercyBeam), LevelState::Off);
    }

    #[test]
    fn pair_prefers_first_when_both_signals_are_set() {
        let mut rules = TransitionRules::new(vec![beam_rule()]);
        let registry = EffectRegistry::new();
        let mut snap = snapshot(mercy());
        snap.heal_beam = true;
        snap.damage_beam = true;

        assert_eq!(deltas(&rules.evaluate(&snap, &registry).unwrap()), vec![0.1]);
        assert!(rules.evaluate(&snap, &registry).unwrap().is_empty());
        assert_eq!(rules.level(EventCategory::MercyBeam), LevelState::First);
    }

    #[test]
    fn context_switch_releases_held_levels() {
        let orb = Rule {
            category: EventCategory::HarmonyOrb,
            enabled: true,
            context: Some(zen()),
            kind: RuleKind::Level {
                signal: FlagSignal::HarmonyOrb,
                intensity: 0.1,
            },
        };
        let mut rules = TransitionRules::new(vec![beam_rule(), orb]);
        let registry = EffectRegistry::new();

        let mut snap = snapshot(mercy());
        snap.damage_beam = true;
        assert_eq!(deltas(&rules.evaluate(&snap, &registry).unwrap()), vec![0.15]);

        snap.context = zen();
        snap.harmony_orb = true;
        let actions = rules.evaluate(&snap, &registry).unwrap();
        assert_eq!(deltas(&actions), vec![-0.15, 0.1]);
        assert_eq!(rules.level(EventCategory::MercyBeam), LevelState::Off);
        assert_eq!(rules.level(EventCategory::HarmonyOrb), LevelState::On);
        assert_eq!(rules.active_context(), Some(&zen()));
    }

    #[test]
    fn reset_forgets_levels() {
        let mut rules = TransitionRules::new(vec![beam_rule()]);
        let registry = EffectRegistry::new();
        let mut snap = snapshot(mercy());
        snap.heal_beam = true;
        rules.evaluate(&snap, &registry).unwrap();

        rules.reset();
        assert_eq!(rules.level(EventCategory::MercyBeam), LevelState::Off);
        assert_eq!(rules.active_context(), None);
    }

    #[test]
    fn non_finite_intensity_is_an_error() {
        let mut rules = TransitionRules::new(vec![Rule {
            category: EventCategory::Assist,
            enabled: true,
            context: None,
            kind: RuleKind::Impulse {
                counter: CounterSignal::Assists,
                unit_intensity: f64::NAN,
                duration_secs: 1.0,
                suppress_when: None,
            },
        }]);
        let mut snap = snapshot(ContextId::default());
        snap.new_assists = 1;
        assert!(matches!(
            rules.evaluate(&snap, &EffectRegistry::new()),
            Err(RuleError::InvalidDelta { .. })
        ));
    }
}
