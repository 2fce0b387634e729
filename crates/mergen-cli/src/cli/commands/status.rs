//! `mergen status` – show all tasks.

use anyhow::Result;
use mergen_core::resume_db::ResumeDb;

pub async fn run_status(db: &ResumeDb, json: bool) -> Result<()> {
    let tasks = db.list_tasks().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No tasks in database.");
        return Ok(());
    }
    println!("{:<6} {:<12} {:>8} {:>14}  {}", "ID", "STATUS", "DONE", "SIZE", "DESTINATION");
    for t in tasks {
        let size = t
            .total_size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let done = match t.total_size {
            Some(total) if t.status == mergen_core::TaskStatus::Completed || total == 0 => "100%".to_string(),
            Some(total) => format!("{:.1}%", t.downloaded.min(total) as f64 * 100.0 / total as f64),
            None => "-".to_string(),
        };
        println!(
            "{:<6} {:<12} {:>8} {:>14}  {}",
            t.id,
            t.status.as_str(),
            done,
            size,
            t.destination.display()
        );
        println!("       {}", t.url);
        if let Some(err) = t.last_error {
            println!("       error: {}", err);
        }
    }
    Ok(())
}
