//! `mergen resume <id>` / `mergen retry <id>` – hand the task to a running
//! `mergen run`, or run it in the foreground when none is listening.

use anyhow::Result;
use mergen_core::config::MergenConfig;
use mergen_core::resume_db::ResumeDb;

use super::report::Runner;
use crate::cli::control_socket::{self, ControlVerb};

pub async fn run_resume(db: &ResumeDb, cfg: MergenConfig, id: i64, retry: bool) -> Result<()> {
    let verb = if retry { ControlVerb::Retry } else { ControlVerb::Resume };
    if let Ok(path) = mergen_core::control::default_control_socket_path() {
        if control_socket::send_command(&path, verb, id).await? {
            println!("Sent to running mergen: task {}", id);
            return Ok(());
        }
    }

    let runner = Runner::new(db, cfg);
    let admitted = if retry {
        runner.scheduler.retry(id).await?
    } else {
        runner.scheduler.resume(id).await?
    };
    if admitted.is_none() {
        let expected = if retry { "failed" } else { "paused" };
        anyhow::bail!("task {} is not {}", id, expected);
    }
    runner.drive().await
}
