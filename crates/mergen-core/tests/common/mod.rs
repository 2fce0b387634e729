#![allow(dead_code)]

pub mod range_server;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mergen_core::config::{MergenConfig, RetryConfig};
use mergen_core::resume_db::ResumeDb;
use mergen_core::task::{DownloadRequest, TaskId, TaskKind};
use mergen_core::Engine;

/// Config with small segments and fast retries so tests finish quickly.
pub fn test_config() -> MergenConfig {
    MergenConfig {
        min_segment_size: 64 * 1024,
        chunk_size: 16 * 1024,
        checkpoint_interval_secs: 1,
        progress_interval_ms: 50,
        connect_timeout_secs: 5,
        low_speed_time_secs: 10,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_secs: 0.01,
            max_delay_secs: 1,
        },
        ..MergenConfig::default()
    }
}

pub async fn open_db(dir: &Path) -> ResumeDb {
    ResumeDb::open_at(dir.join("tasks.db")).await.unwrap()
}

pub fn engine(db: &ResumeDb, cfg: MergenConfig) -> Engine {
    Engine::new(db.clone(), Arc::new(cfg))
}

pub async fn add_direct(db: &ResumeDb, url: &str, dest: &Path, connections: usize) -> TaskId {
    let is_dir = dest.is_dir();
    db.add_task(
        &DownloadRequest::new(url, dest),
        TaskKind::DirectSegmented,
        connections,
        is_dir,
    )
    .await
    .unwrap()
}

/// Body whose bytes encode their own offset, so misplaced writes show up.
pub fn patterned_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Poll `cond` every 10 ms for up to `secs` seconds.
pub async fn wait_until(secs: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
