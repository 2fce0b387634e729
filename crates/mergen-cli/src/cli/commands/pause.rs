//! `mergen pause <id>` – pause a task. A running `mergen run` stops it after the current chunk.

use anyhow::Result;
use mergen_core::resume_db::ResumeDb;
use mergen_core::TaskStatus;

use crate::cli::control_socket::{self, ControlVerb};

pub async fn run_pause(db: &ResumeDb, id: i64) -> Result<()> {
    if let Ok(path) = mergen_core::control::default_control_socket_path() {
        if control_socket::send_command(&path, ControlVerb::Pause, id).await? {
            println!("Pausing task {id}");
            return Ok(());
        }
    }
    let task = db
        .get_task(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("task {} not found", id))?;
    match task.status {
        TaskStatus::Paused => println!("Task {id} is already paused"),
        TaskStatus::Queued => {
            db.set_status(id, TaskStatus::Paused).await?;
            println!("Paused task {id}");
        }
        other => anyhow::bail!("task {} is {}, nothing to pause", id, other),
    }
    Ok(())
}
