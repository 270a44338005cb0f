//! Stim session with statum state machine
//!
//! One session owns the arbitrator, the effect registry and the rule table, so no
//! state is shared between tasks. The machine cycles until quit:
//!
//! ```text
//! Idle ──(start)──► Tracking ──(stop / fault / lost transport)──► Stopping ──► Idle
//!   │                   │                                             ▲
//!   └──(quit)───────────┴────────────(quit)───────────────────────────┘ ──► exit
//! ```
//!
//! # Tracking tick
//!
//! ```text
//! yield (commands | tick) ──► device count ──► expiry sweep ──► refresh gate
//!                                                                    │
//!        poll commands ◄── apply actions ◄── evaluate rules ◄── snapshot
//! ```

use super::{ControlCommand, ProgramStatus, RefreshGate, SessionError, SessionStatus, StatusFault};
use crate::config::{ConfigError, StimConfig};
use crate::device::DeviceTransport;
use crate::effects::EffectRegistry;
use crate::intensity::{IntensityArbitrator, ToneFeedback};
use crate::rules::{RuleAction, TransitionRules};
use crate::tracker::{ContextId, StateSource};
use chrono::{DateTime, Local};
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,     // Waiting for start, reporting readiness
    Tracking, // Pulling snapshots and driving devices
    Stopping, // Zeroing devices and releasing the source
}

/// Channels and collaborators a session is wired to
pub struct SessionIo {
    pub transport: Arc<dyn DeviceTransport>,
    pub source: Box<dyn StateSource>,
    pub commands: mpsc::Receiver<ControlCommand>,
    pub status: watch::Sender<SessionStatus>,
    pub shutdown: CancellationToken,
}

/// Why tracking ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    Quit,
    ConnectionLost,
    Fault(String),
}

pub enum IdleOutcome {
    Start(StimSession<Tracking>),
    Quit(StimSession<Stopping>),
}

enum Wake {
    Cancelled,
    Command(Option<ControlCommand>),
    Tick,
}

/// Loop counters, logged every 30 seconds and once per session
#[derive(Debug, Clone)]
pub struct LoopStats {
    loops: u64,
    refreshes: u64,
    started: DateTime<Local>,
    window_loops: u64,
    window_start: DateTime<Local>,
}

impl LoopStats {
    fn new() -> Self {
        let now = Local::now();
        Self {
            loops: 0,
            refreshes: 0,
            started: now,
            window_loops: 0,
            window_start: now,
        }
    }

    fn record_loop(&mut self) {
        self.loops += 1;
        self.window_loops += 1;

        let now = Local::now();
        if now - self.window_start > chrono::Duration::seconds(30) {
            let elapsed_seconds = (now - self.window_start).num_seconds().max(1);
            info!(
                "Session stats: {} loops in {} seconds ({:.2} loops/sec), {} refreshes total",
                self.window_loops,
                elapsed_seconds,
                self.window_loops as f64 / elapsed_seconds as f64,
                self.refreshes
            );
            self.window_loops = 0;
            self.window_start = now;
        }
    }

    fn log_summary(&self) {
        if self.loops == 0 {
            return;
        }
        let elapsed_ms = (Local::now() - self.started).num_milliseconds().max(1) as f64;
        info!(
            "Loops: {} | Loops per second: {:.2} | Avg. time: {:.2}ms | Refreshes: {}",
            self.loops,
            self.loops as f64 / (elapsed_ms / 1000.0),
            elapsed_ms / self.loops as f64,
            self.refreshes
        );
    }
}

#[machine]
pub struct StimSession<S: SessionState> {
    config: StimConfig,
    config_fault: Option<String>,
    io: SessionIo,
    arbitrator: IntensityArbitrator,
    registry: EffectRegistry,
    rules: TransitionRules,
    gate: RefreshGate,
    context: ContextId,
    device_count: usize,
    fault: Option<StatusFault>,
    stats: LoopStats,
}

impl<S: SessionState> StimSession<S> {
    /// Publishes the current status; receivers are only woken on change
    fn publish(&self, program_status: ProgramStatus) {
        let next = SessionStatus {
            program_status,
            device_count: self.device_count,
            intensity: self.arbitrator.reading(),
            context: self.context.clone(),
        };
        self.io.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("Status: {}", next);
            *current = next;
            true
        });
    }

    fn refresh_device_count(&mut self) {
        let count = self.io.transport.device_count();
        if count != self.device_count {
            info!("Devices connected: {}", count);
            self.device_count = count;
        }
    }

    fn transport_ready(&self) -> bool {
        !self.config.engine.require_connection || self.io.transport.is_connected()
    }

    /// Status shown while not tracking
    fn idle_status(&self) -> ProgramStatus {
        if let Some(reason) = &self.config_fault {
            return ProgramStatus::Error(StatusFault::Config(reason.clone()));
        }
        if !self.transport_ready() {
            return ProgramStatus::Error(StatusFault::Transport);
        }
        match &self.fault {
            Some(fault) => ProgramStatus::Error(fault.clone()),
            None => ProgramStatus::Ready,
        }
    }
}

impl StimSession<Idle> {
    /// Builds a session from a loaded config, or from the error that prevented loading
    ///
    /// A failed config leaves the session usable for status reporting but it will
    /// refuse to start.
    pub fn create(config: Result<StimConfig, ConfigError>, io: SessionIo) -> Self {
        let (config, config_fault) = match config {
            Ok(config) => (config, None),
            Err(e) => {
                error!("Configuration error: {}", e);
                (StimConfig::default(), Some(e.to_string()))
            }
        };

        let mut arbitrator = IntensityArbitrator::new(
            config.engine.min_intensity_step,
            config.device_write_timeout(),
            config.engine.require_connection,
        );
        if config.engine.beep_enabled {
            arbitrator = arbitrator.with_observer(Box::new(ToneFeedback::default()));
        }

        let rules = TransitionRules::new(config.rules.clone());
        let gate = RefreshGate::new(config.min_refresh_interval(), config.dead_refresh_delay());

        info!(
            "Session created with {} rules, step {}",
            config.rules.len(),
            config.engine.min_intensity_step
        );

        Self::new(
            config,
            config_fault,
            io,
            arbitrator,
            EffectRegistry::new(),
            rules,
            gate,
            ContextId::default(), // context
            0,                    // device_count
            None,                 // fault
            LoopStats::new(),
        )
    }

    /// Serves commands until a start is accepted or the session should exit
    pub async fn await_start(mut self) -> IdleOutcome {
        let idle_poll = self.config.idle_poll_interval();
        self.refresh_device_count();
        self.publish(self.idle_status());

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.io.shutdown.cancelled() => Wake::Cancelled,
                command = self.io.commands.recv() => Wake::Command(command),
                _ = tokio::time::sleep(idle_poll) => Wake::Tick,
            };

            match wake {
                Wake::Cancelled => {
                    info!("Shutdown requested while idle");
                    return IdleOutcome::Quit(self.transition());
                }
                Wake::Command(None) => {
                    info!("Command channel closed, leaving");
                    return IdleOutcome::Quit(self.transition());
                }
                Wake::Command(Some(ControlCommand::Quit)) => {
                    return IdleOutcome::Quit(self.transition());
                }
                Wake::Command(Some(ControlCommand::Start)) => {
                    self.refresh_device_count();
                    match self.start_blocker() {
                        None => return IdleOutcome::Start(self.begin_tracking()),
                        Some(fault) => {
                            let status = ProgramStatus::Error(fault);
                            warn!("Refusing to start: {}", status);
                            self.publish(status);
                        }
                    }
                }
                Wake::Command(Some(ControlCommand::Stop)) => {
                    debug!("Not tracking, ignoring stop");
                }
                Wake::Command(Some(ControlCommand::SelectContext(context))) => {
                    info!("Hero selected: {}", context);
                    self.io.source.select_context(context.clone());
                    self.context = context;
                    self.publish(self.idle_status());
                }
                Wake::Tick => {
                    self.refresh_device_count();
                    self.publish(self.idle_status());
                }
            }
        }
    }

    fn start_blocker(&self) -> Option<StatusFault> {
        if let Some(reason) = &self.config_fault {
            return Some(StatusFault::Config(reason.clone()));
        }
        if !self.transport_ready() {
            return Some(StatusFault::Transport);
        }
        None
    }

    fn begin_tracking(mut self) -> StimSession<Tracking> {
        info!("Starting tracking as {}", self.context);

        self.fault = None;
        self.rules.reset();
        self.gate.reset();
        self.stats = LoopStats::new();

        let settings = self.config.tracker_settings();
        self.io.source.select_context(self.context.clone());
        self.io.source.start_tracking(&settings);

        self.publish(ProgramStatus::Running);
        self.transition()
    }
}

impl StimSession<Tracking> {
    /// Runs tracking ticks until stop, quit, a fault or transport loss
    pub async fn run_until_stopped(mut self) -> (StimSession<Stopping>, StopReason) {
        let tick = self.config.tick_interval();

        let reason = loop {
            let wake = tokio::select! {
                biased;
                _ = self.io.shutdown.cancelled() => Wake::Cancelled,
                command = self.io.commands.recv() => Wake::Command(command),
                _ = tokio::time::sleep(tick) => Wake::Tick,
            };

            match wake {
                Wake::Cancelled => break StopReason::Quit,
                Wake::Command(None) => break StopReason::Quit,
                Wake::Command(Some(command)) => {
                    match self.handle_command(command).await {
                        Ok(Some(reason)) => break reason,
                        Ok(None) => {}
                        Err(e) => break stop_reason(e),
                    }
                    // a ready command skips the sleep, so yield explicitly
                    tokio::task::yield_now().await;
                }
                Wake::Tick => {}
            }

            match self.tick().await {
                Ok(Some(reason)) => break reason,
                Ok(None) => {}
                Err(e) => break stop_reason(e),
            }
            self.stats.record_loop();
        };

        info!("Tracking ended: {:?}", reason);
        (self.transition(), reason)
    }

    async fn tick(&mut self) -> Result<Option<StopReason>, SessionError> {
        self.refresh_device_count();
        if !self.transport_ready() {
            return Err(SessionError::EnumerationLoss);
        }

        self.sweep_expired().await;

        // hero switches wait until this tick's actions are applied
        let mut deferred = Vec::new();
        let now = Instant::now();
        if self.gate.is_due(now) {
            let snapshot = self.io.source.refresh()?;
            self.gate.record(now, snapshot.is_actionable);
            self.stats.refreshes += 1;

            if snapshot.is_actionable {
                let actions = self.rules.evaluate(&snapshot, &self.registry)?;
                for action in actions {
                    if let Some(reason) = self.drain_commands(&mut deferred) {
                        return Ok(Some(reason));
                    }
                    self.perform(action).await?;
                }
            } else {
                debug!("Player not actionable, next refresh in {:?}", self.gate.current_interval());
            }
        }

        if let Some(reason) = self.drain_commands(&mut deferred) {
            return Ok(Some(reason));
        }
        for context in deferred {
            self.switch_context(context).await?;
        }
        self.publish(ProgramStatus::Running);
        Ok(None)
    }

    /// Reverts every effect whose time is up
    ///
    /// An effect that cannot be reverted yet goes back into the registry and is
    /// retried on the next tick.
    async fn sweep_expired(&mut self) {
        let expired = self.registry.collect_expired(Instant::now());
        for effect in expired {
            match self
                .arbitrator
                .apply_delta(self.io.transport.as_ref(), effect.inverse())
                .await
            {
                Ok(_) => debug!("{} effect expired", effect.category),
                Err(e) => {
                    warn!("Could not revert {} effect, retrying: {}", effect.category, e);
                    self.registry.requeue(effect);
                }
            }
        }
    }

    async fn perform(&mut self, action: RuleAction) -> Result<(), SessionError> {
        self.arbitrator
            .apply_delta(self.io.transport.as_ref(), action.delta())
            .await?;

        if let RuleAction::ApplyTimed {
            category,
            delta,
            duration,
        } = action
        {
            self.registry.register(category, delta, duration)?;
            debug!("{} effect of {} registered for {:?}", category, delta, duration);
        }

        self.publish(ProgramStatus::Running);
        Ok(())
    }

    /// Drains pending commands without waiting
    ///
    /// Stop and quit return at once. Hero switches are pushed to `deferred` so
    /// their releases never overtake deltas that were already evaluated.
    fn drain_commands(&mut self, deferred: &mut Vec<ContextId>) -> Option<StopReason> {
        if self.io.shutdown.is_cancelled() {
            return Some(StopReason::Quit);
        }
        loop {
            match self.io.commands.try_recv() {
                Ok(ControlCommand::Start) => debug!("Already tracking, ignoring start"),
                Ok(ControlCommand::Stop) => return Some(StopReason::Stopped),
                Ok(ControlCommand::Quit) => return Some(StopReason::Quit),
                Ok(ControlCommand::SelectContext(context)) => deferred.push(context),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(StopReason::Quit),
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: ControlCommand,
    ) -> Result<Option<StopReason>, SessionError> {
        match command {
            ControlCommand::Start => {
                debug!("Already tracking, ignoring start");
                Ok(None)
            }
            ControlCommand::Stop => Ok(Some(StopReason::Stopped)),
            ControlCommand::Quit => Ok(Some(StopReason::Quit)),
            ControlCommand::SelectContext(context) => {
                self.switch_context(context).await?;
                Ok(None)
            }
        }
    }

    /// Releases the old context's levels before the new context takes over
    async fn switch_context(&mut self, context: ContextId) -> Result<(), SessionError> {
        info!("Hero selected: {}", context);
        self.io.source.select_context(context.clone());
        let releases = self.rules.switch_context(&context);
        self.context = context;
        for action in releases {
            self.perform(action).await?;
        }
        self.publish(ProgramStatus::Running);
        Ok(())
    }
}

impl StimSession<Stopping> {
    /// Zeroes every device, releases the source and returns to idle
    pub async fn shutdown(mut self, reason: &StopReason) -> StimSession<Idle> {
        self.publish(ProgramStatus::Stopping);

        let report = self
            .arbitrator
            .stop_all(self.io.transport.as_ref(), &mut self.registry)
            .await;
        info!(
            "All devices stopped: {} ok, {} failed, {} pending effects dropped",
            report.devices_stopped, report.devices_failed, report.effects_dropped
        );

        self.io.source.stop_tracking();
        self.rules.reset();
        self.gate.reset();
        self.stats.log_summary();

        self.fault = match reason {
            StopReason::Fault(message) => Some(StatusFault::Unknown(message.clone())),
            _ => None,
        };

        self.refresh_device_count();
        self.publish(self.idle_status());
        self.transition()
    }
}

fn stop_reason(err: SessionError) -> StopReason {
    match err {
        SessionError::EnumerationLoss => {
            warn!("Device transport disconnected, stopping");
            StopReason::ConnectionLost
        }
        other => {
            error!("Tracking failed: {}", other);
            StopReason::Fault(other.to_string())
        }
    }
}

/// Drives a session through its lifecycle until quit
pub async fn run_session(mut session: StimSession<Idle>) {
    loop {
        match session.await_start().await {
            IdleOutcome::Start(tracking) => {
                let (stopping, reason) = tracking.run_until_stopped().await;
                session = stopping.shutdown(&reason).await;
                if reason == StopReason::Quit {
                    break;
                }
            }
            IdleOutcome::Quit(stopping) => {
                stopping.shutdown(&StopReason::Quit).await;
                break;
            }
        }
    }
    info!("Session finished");
}
