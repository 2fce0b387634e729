//! `mergen remove <id>` – remove a task; optionally delete its files with --delete-files.

use anyhow::Result;
use mergen_core::resume_db::ResumeDb;
use mergen_core::storage;

pub async fn run_remove(db: &ResumeDb, id: i64, delete_files: bool) -> Result<()> {
    let task = db
        .get_task(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("task {} not found", id))?;
    if task.status.is_active() {
        anyhow::bail!("task {} is {}; pause or cancel it first", id, task.status);
    }

    if delete_files && !task.destination_is_dir {
        for path in [storage::temp_path(&task.destination), task.destination.clone()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "deleted file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), "could not delete file: {}", e),
            }
        }
    }

    db.remove_task(id).await?;
    println!("Removed task {id}");
    Ok(())
}
