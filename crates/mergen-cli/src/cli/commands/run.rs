//! `mergen run` – run queued downloads under the scheduler.

use anyhow::Result;
use mergen_core::config::MergenConfig;
use mergen_core::resume_db::ResumeDb;

use super::report::Runner;
use crate::cli::control_socket;

pub async fn run_scheduler(db: &ResumeDb, mut cfg: MergenConfig, jobs: Option<usize>) -> Result<()> {
    if let Some(n) = jobs {
        cfg.max_active_downloads = n.max(1);
    }
    let runner = Runner::new(db, cfg);
    let offered = runner.scheduler.init().await?;
    for task in &offered {
        println!(
            "Task {} is {}; `mergen {} {}` to continue it",
            task.id,
            task.status,
            if task.status == mergen_core::TaskStatus::Failed { "retry" } else { "resume" },
            task.id
        );
    }

    let socket = mergen_core::control::default_control_socket_path().ok();
    let listener = socket.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(runner.scheduler.clone(), path) {
            Ok(h) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(h)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket unavailable: {:#}", e);
                None
            }
        }
    });

    let started = runner.scheduler.active_count() + runner.scheduler.pending_count();
    if started == 0 {
        println!("No queued tasks.");
    }
    runner.drive().await?;

    if let Some(h) = listener {
        h.abort();
    }
    if let Some(path) = socket {
        let _ = std::fs::remove_file(path);
    }
    tracing::info!(tasks = started, "run finished");
    Ok(())
}
