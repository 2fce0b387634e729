//! Control socket: server (during `mergen run`) and client (for pause/resume/cancel).
//! Protocol: one line per command, `<verb> <id>` with verb pause, resume, retry or cancel.

use anyhow::Result;
use mergen_core::scheduler::Scheduler;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlVerb {
    Pause,
    Resume,
    Retry,
    Cancel,
}

impl ControlVerb {
    fn as_str(self) -> &'static str {
        match self {
            ControlVerb::Pause => "pause",
            ControlVerb::Resume => "resume",
            ControlVerb::Retry => "retry",
            ControlVerb::Cancel => "cancel",
        }
    }
}

/// Parse one protocol line. Malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<(ControlVerb, i64)> {
    let (verb, id) = line.trim().split_once(' ')?;
    let verb = match verb {
        "pause" => ControlVerb::Pause,
        "resume" => ControlVerb::Resume,
        "retry" => ControlVerb::Retry,
        "cancel" => ControlVerb::Cancel,
        _ => return None,
    };
    Some((verb, id.trim().parse().ok()?))
}

async fn dispatch(scheduler: &Scheduler, verb: ControlVerb, id: i64) -> Result<()> {
    match verb {
        ControlVerb::Pause => {
            scheduler.pause(id).await?;
        }
        ControlVerb::Cancel => {
            scheduler.cancel(id).await?;
        }
        ControlVerb::Resume => {
            scheduler.resume(id).await?;
        }
        ControlVerb::Retry => {
            scheduler.retry(id).await?;
        }
    }
    Ok(())
}

/// Spawns a task that listens on `path` and routes each command line to `scheduler`.
pub fn spawn_control_listener(
    scheduler: Scheduler,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let scheduler = scheduler.clone();
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            let Some((verb, id)) = parse_line(&line) else {
                                tracing::debug!(line = %line, "ignoring malformed control line");
                                continue;
                            };
                            if let Err(e) = dispatch(&scheduler, verb, id).await {
                                tracing::warn!(task_id = id, verb = verb.as_str(), "control command failed: {:#}", e);
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends `<verb> <id>` to a running `mergen run`. Returns false when no runner is listening.
pub async fn send_command(socket_path: &Path, verb: ControlVerb, id: i64) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(path = %socket_path.display(), "no runner on control socket: {}", e);
            return Ok(false);
        }
    };
    let msg = format!("{} {}\n", verb.as_str(), id);
    stream.write_all(msg.as_bytes()).await?;
    Ok(true)
}
