//! `mergen cancel <id>` – cancel a task and delete its partial file.

use anyhow::Result;
use mergen_core::config::MergenConfig;
use mergen_core::engine::Engine;
use mergen_core::resume_db::ResumeDb;
use mergen_core::scheduler::Scheduler;
use std::sync::Arc;

use crate::cli::control_socket::{self, ControlVerb};

pub async fn run_cancel(db: &ResumeDb, cfg: MergenConfig, id: i64) -> Result<()> {
    if let Ok(path) = mergen_core::control::default_control_socket_path() {
        if control_socket::send_command(&path, ControlVerb::Cancel, id).await? {
            println!("Cancelling task {id}");
            return Ok(());
        }
    }
    let scheduler = Scheduler::new(Engine::new(db.clone(), Arc::new(cfg)));
    if scheduler.cancel(id).await? {
        println!("Cancelled task {id}");
        Ok(())
    } else {
        anyhow::bail!("task {} cannot be cancelled", id)
    }
}
