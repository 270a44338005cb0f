//! Line-based operator console
//!
//! Reads commands from stdin and logs every status change. Recognised input:
//!
//! ```text
//! start | stop | quit | hero <name>
//! ```

use crate::control::{ControlCommand, SessionStatus};
use crate::tracker::ContextId;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing hero name, usage: hero <name>")]
    MissingHero,
}

/// Parses one console line; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<ControlCommand>, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => ControlCommand::Start,
        "stop" => ControlCommand::Stop,
        "quit" | "exit" => ControlCommand::Quit,
        "hero" => {
            let name = words.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return Err(ConsoleError::MissingHero);
            }
            ControlCommand::SelectContext(ContextId::new(name))
        }
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

/// Forwards parsed lines from `input` until it ends, quit is sent or the token fires
pub async fn forward_commands<R>(
    input: R,
    commands: mpsc::Sender<ControlCommand>,
    shutdown: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Console input closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read console input: {}", e);
                break;
            }
        };

        match parse_command(&line) {
            Ok(Some(command)) => {
                let quit = command == ControlCommand::Quit;
                if commands.send(command).await.is_err() {
                    debug!("Session gone, console stops forwarding");
                    break;
                }
                if quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("{}", e),
        }
    }
}

/// Spawns the stdin reader
pub fn spawn_stdin(
    commands: mpsc::Sender<ControlCommand>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Console ready: start | stop | quit | hero <name>");
        forward_commands(BufReader::new(tokio::io::stdin()), commands, shutdown).await;
    })
}

/// Spawns a task that logs each status change until the session is gone
pub fn spawn_status_logger(mut status: watch::Receiver<SessionStatus>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            info!("Status: {}", current);
        }
    })
}
