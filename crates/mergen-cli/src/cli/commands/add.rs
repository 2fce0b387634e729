//! `mergen add <url>` – queue a download.

use anyhow::Result;
use mergen_core::config::MergenConfig;
use mergen_core::resume_db::ResumeDb;
use mergen_core::scheduler::Submission;
use mergen_core::task::DownloadRequest;
use std::path::PathBuf;

pub async fn run_add(
    db: &ResumeDb,
    cfg: &MergenConfig,
    url: &str,
    output: Option<PathBuf>,
    connections: Option<usize>,
    name: Option<String>,
) -> Result<()> {
    let destination = match output.or_else(|| cfg.download_dir.clone()) {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let mut request = DownloadRequest::new(url, destination);
    request.connections = connections;
    request.suggested_filename = name;

    let sub = Submission::prepare(cfg, &request)?;
    if !sub.destination_is_dir {
        if let Some(owner) = db.destination_owner(&request.destination).await? {
            anyhow::bail!(
                "destination {} is already used by task {}",
                request.destination.display(),
                owner
            );
        }
    }
    let id = db
        .add_task(&request, sub.kind, sub.connections, sub.destination_is_dir)
        .await?;
    println!("Added task {} ({})", id, sub.kind.as_str());
    Ok(())
}
