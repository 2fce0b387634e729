//! Foreground runner shared by `run`, `resume` and `retry`: progress lines,
//! lifecycle events, Ctrl-C handling.

use anyhow::Result;
use mergen_core::config::MergenConfig;
use mergen_core::engine::{Engine, EngineEvent};
use mergen_core::progress::ProgressSnapshot;
use mergen_core::resume_db::ResumeDb;
use mergen_core::scheduler::Scheduler;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Scheduler plus the tasks printing its output.
pub struct Runner {
    pub scheduler: Scheduler,
    progress: JoinHandle<()>,
    events: JoinHandle<()>,
}

impl Runner {
    pub fn new(db: &ResumeDb, cfg: MergenConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::channel(16);
        let engine = Engine::new(db.clone(), Arc::new(cfg)).with_events(events_tx);
        let scheduler = Scheduler::with_progress_channel(engine, progress_tx);
        Self {
            scheduler,
            progress: tokio::spawn(print_progress(progress_rx)),
            events: tokio::spawn(print_events(events_rx)),
        }
    }

    /// Wait until every task settles; Ctrl-C pauses running tasks first.
    pub async fn drive(self) -> Result<()> {
        tokio::select! {
            _ = self.scheduler.wait_idle() => {}
            r = tokio::signal::ctrl_c() => {
                r?;
                println!("\nInterrupted, pausing active downloads...");
                self.scheduler.teardown().await;
            }
        }
        drop(self.scheduler);
        self.progress.abort();
        // Let the last events print.
        let _ = tokio::time::timeout(Duration::from_secs(1), self.events).await;
        Ok(())
    }
}

fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.1} {}", v, UNITS[unit])
    }
}

pub fn format_snapshot(s: &ProgressSnapshot) -> String {
    let total = s.total.map(human_bytes).unwrap_or_else(|| "?".to_string());
    let pct = s
        .percent
        .map(|p| format!("{:.1}%", p))
        .unwrap_or_else(|| "-".to_string());
    let eta = s
        .eta
        .map(|d| format!("{}s", d.as_secs()))
        .unwrap_or_else(|| "?".to_string());
    format!(
        "[{}] {} / {} ({})  {}/s  ETA {}",
        s.task_id,
        human_bytes(s.downloaded),
        total,
        pct,
        human_bytes(s.bytes_per_sec as u64),
        eta
    )
}

async fn print_progress(mut rx: mpsc::Receiver<ProgressSnapshot>) {
    const MIN_GAP: Duration = Duration::from_millis(500);
    let mut last: Option<Instant> = None;
    while let Some(snapshot) = rx.recv().await {
        if last.map_or(true, |t| t.elapsed() >= MIN_GAP) {
            println!("  {}", format_snapshot(&snapshot));
            last = Some(Instant::now());
        }
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Completed { task_id, path } => {
                println!("Task {} completed: {}", task_id, path.display())
            }
            EngineEvent::Failed { task_id, cause } => println!("Task {} failed: {}", task_id, cause),
            EngineEvent::Paused { task_id } => println!("Task {} paused", task_id),
            EngineEvent::Cancelled { task_id } => println!("Task {} cancelled", task_id),
            EngineEvent::CheckpointFailed { task_id, cause } => {
                eprintln!("Task {}: could not save progress: {}", task_id, cause)
            }
            EngineEvent::StatusChanged { task_id, status } => {
                tracing::debug!(task_id, %status, "status changed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MiB");
    }

    #[test]
    fn snapshot_line_with_unknown_total() {
        let s = ProgressSnapshot {
            task_id: 7,
            downloaded: 2048,
            total: None,
            bytes_per_sec: 0.0,
            percent: None,
            eta: None,
            segments: Vec::new(),
        };
        assert_eq!(format_snapshot(&s), "[7] 2.0 KiB / ? (-)  0 B/s  ETA ?");
    }
}
