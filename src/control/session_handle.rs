//! Handle for a stim session running in its own tokio task

use super::session::{run_session, SessionIo, StimSession};
use super::{ControlCommand, SessionError, SessionStatus};
use crate::config::{ConfigError, StimConfig};
use crate::device::DeviceTransport;
use crate::tracker::StateSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle handle for a spawned session
///
/// Commands are queued on a bounded channel and served by the session between
/// ticks. Status is a watch channel, so readers always see the latest value and
/// never block the session.
///
/// ```text
/// SessionHandle ─[ControlCommand]→ StimSession ─[SessionStatus]→ subscribers
///                 (mpsc::channel(32))             (watch)
/// ```
///
/// The handle keeps its own reference to the transport so devices can still be
/// stopped if the session task dies without running its own stop path.
pub struct SessionHandle {
    commands: mpsc::Sender<ControlCommand>,
    status: watch::Receiver<SessionStatus>,
    shutdown: CancellationToken,
    transport: Arc<dyn DeviceTransport>,
    stop_timeout: Duration,
    task_handle: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Spawns a session task in the idle state
    ///
    /// A config error is handed to the session, which then reports it and refuses
    /// to start instead of failing here.
    pub fn spawn(
        config: Result<StimConfig, ConfigError>,
        transport: Arc<dyn DeviceTransport>,
        source: Box<dyn StateSource>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let shutdown = CancellationToken::new();
        let stop_timeout = config
            .as_ref()
            .map(StimConfig::device_write_timeout)
            .unwrap_or_else(|_| StimConfig::default().device_write_timeout());

        let io = SessionIo {
            transport: transport.clone(),
            source,
            commands: command_rx,
            status: status_tx,
            shutdown: shutdown.clone(),
        };
        let session = StimSession::create(config, io);

        let task_handle = tokio::spawn(async move {
            info!("Spawning stim session");
            run_session(session).await;
        });

        Self {
            commands: command_tx,
            status: status_rx,
            shutdown,
            transport,
            stop_timeout,
            task_handle: Some(task_handle),
        }
    }

    pub async fn send(&self, command: ControlCommand) -> Result<(), SessionError> {
        debug!("Sending {:?} to session", command);
        self.commands
            .send(command)
            .await
            .map_err(|e| SessionError::Channel(format!("Session is gone, dropped {:?}", e.0)))
    }

    /// Sender for other command sources, e.g. the console
    pub fn commands(&self) -> mpsc::Sender<ControlCommand> {
        self.commands.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Latest published status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Waits for the session task to finish on its own
    pub async fn join(&mut self) -> Result<(), SessionError> {
        match self.task_handle.take() {
            Some(handle) => match handle.await {
                Ok(()) => {
                    debug!("Session task completed");
                    Ok(())
                }
                Err(e) => {
                    error!("Session task panicked: {}", e);
                    self.stop_devices().await;
                    Err(SessionError::TaskPanicked(e.to_string()))
                }
            },
            None => {
                debug!("Session already joined");
                Ok(())
            }
        }
    }

    /// Best-effort stop of every connected device, used when the task died
    async fn stop_devices(&self) {
        for device in self.transport.devices() {
            match timeout(self.stop_timeout, device.stop()).await {
                Ok(Ok(())) => info!("Stopped {} after session failure", device.name()),
                Ok(Err(e)) => error!("Could not stop {}: {}", device.name(), e),
                Err(_) => error!("Stopping {} timed out", device.name()),
            }
        }
    }

    /// Cancels the session, which stops all devices, and waits for it
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.task_handle.as_ref().is_some_and(|handle| handle.is_finished()) {
            warn!("Session task already terminated");
        }
        self.shutdown.cancel();
        self.join().await
    }
}
