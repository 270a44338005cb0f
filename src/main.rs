pub mod config;
pub mod console;
pub mod control;
pub mod device;
pub mod effects;
pub mod intensity;
pub mod rules;
pub mod tracker;

use crate::config::{ConfigError, StimConfig};
use crate::control::SessionHandle;
use crate::device::{SimulatedDevice, SimulatedTransport};
use crate::tracker::{ReplayStateSource, StateSource};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    // A broken config still brings the session up so it can report CONFIG ERROR
    let config = load_config().await;
    let source = build_source(&config).await;

    let transport = SimulatedTransport::with_devices([Arc::new(SimulatedDevice::new(
        0,
        "Simulated stimulator",
        1,
    ))]);

    info!("Starting stim session");
    let mut session = SessionHandle::spawn(config, Arc::new(transport), source);
    let shutdown = session.shutdown_token();

    let _console = console::spawn_stdin(session.commands(), shutdown.clone());
    let _status_logger = console::spawn_status_logger(session.subscribe());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping all devices");
                shutdown.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    session.join().await?;
    info!("Goodbye");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn load_config() -> Result<StimConfig, ConfigError> {
    let path = StimConfig::default_path()?;
    StimConfig::ensure_default_config(&path).await?;
    StimConfig::load(&path).await
}

async fn build_source(config: &Result<StimConfig, ConfigError>) -> Box<dyn StateSource> {
    let replay_path = config
        .as_ref()
        .ok()
        .and_then(|config| config.source.replay_path.clone());

    let Some(path) = replay_path else {
        info!("No replay configured, game state stays idle");
        return Box::new(ReplayStateSource::idle());
    };

    match ReplayStateSource::load(&path).await {
        Ok(source) => {
            info!(
                "Replaying {} frames from {}",
                source.frame_count(),
                path.display()
            );
            Box::new(source)
        }
        Err(e) => {
            error!("Failed to load replay {}: {}", path.display(), e);
            Box::new(ReplayStateSource::idle())
        }
    }
}
