//! Scheduler tests against an in-memory store and a server that never answers.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::MergenConfig;
use crate::resume_db::db::open_memory;
use crate::resume_db::ResumeDb;
use crate::task::TaskKind;

/// Accepts connections and holds them open without responding, so probes
/// block until their task is stopped.
fn stalling_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });
    format!("http://{}/file.bin", addr)
}

async fn scheduler(ceiling: usize) -> (Scheduler, ResumeDb) {
    let db = open_memory().await.unwrap();
    let cfg = MergenConfig {
        max_active_downloads: ceiling,
        ..MergenConfig::default()
    };
    let engine = Engine::new(db.clone(), Arc::new(cfg));
    (Scheduler::new(engine), db)
}

async fn wait_for_status(db: &ResumeDb, id: TaskId, want: TaskStatus) {
    for _ in 0..200 {
        if db.get_task(id).await.unwrap().map(|t| t.status) == Some(want) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {} never reached {}", id, want);
}

#[tokio::test(flavor = "multi_thread")]
async fn ceiling_holds_extra_tasks_in_fifo_order() {
    let (s, db) = scheduler(2).await;
    let dir = tempfile::tempdir().unwrap();
    let url = stalling_server();

    let mut ids = Vec::new();
    for i in 0..4 {
        let req = DownloadRequest::new(url.clone(), dir.path().join(format!("f{}.bin", i)));
        ids.push(s.submit(req).await.unwrap());
    }
    let admissions: Vec<_> = ids.iter().map(|(_, a)| *a).collect();
    assert_eq!(
        admissions,
        vec![Admission::Started, Admission::Started, Admission::Held, Admission::Held]
    );
    assert_eq!(s.active_count(), 2);
    assert_eq!(s.pending_count(), 2);

    // Cancelling a running task admits the oldest held one.
    assert!(s.cancel(ids[0].0).await.unwrap());
    wait_for_status(&db, ids[0].0, TaskStatus::Cancelled).await;
    for _ in 0..100 {
        if s.active_ids() == vec![ids[1].0, ids[2].0] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(s.active_ids(), vec![ids[1].0, ids[2].0]);
    assert_eq!(s.pending_count(), 1);
    assert!(s.active_count() <= 2);

    s.teardown().await;
    assert_eq!(s.active_count(), 0);
    wait_for_status(&db, ids[1].0, TaskStatus::Paused).await;
    wait_for_status(&db, ids[2].0, TaskStatus::Paused).await;
    // Held tasks stay queued for the next start.
    assert_eq!(db.get_task(ids[3].0).await.unwrap().unwrap().status, TaskStatus::Queued);
}

#[tokio::test(flavor = "multi_thread")]
async fn held_tasks_pause_and_cancel_without_running() {
    let (s, db) = scheduler(1).await;
    let dir = tempfile::tempdir().unwrap();
    let url = stalling_server();

    let (running, _) = s.submit(DownloadRequest::new(url.clone(), dir.path().join("a"))).await.unwrap();
    let (held_a, a) = s.submit(DownloadRequest::new(url.clone(), dir.path().join("b"))).await.unwrap();
    let (held_b, _) = s.submit(DownloadRequest::new(url.clone(), dir.path().join("c"))).await.unwrap();
    assert_eq!(a, Admission::Held);

    assert!(s.pause(held_a).await.unwrap());
    assert_eq!(db.get_task(held_a).await.unwrap().unwrap().status, TaskStatus::Paused);
    assert!(s.cancel(held_b).await.unwrap());
    assert_eq!(db.get_task(held_b).await.unwrap().unwrap().status, TaskStatus::Cancelled);
    assert_eq!(s.pending_count(), 0);

    // A paused task that is not running can still be cancelled.
    assert!(s.cancel(held_a).await.unwrap());
    assert_eq!(db.get_task(held_a).await.unwrap().unwrap().status, TaskStatus::Cancelled);
    assert!(!s.cancel(held_a).await.unwrap());

    assert!(s.pause(running).await.unwrap());
    wait_for_status(&db, running, TaskStatus::Paused).await;
    s.wait_idle().await;

    // Resume re-admits it; resuming twice is refused while it is known.
    assert_eq!(s.resume(running).await.unwrap(), Some(Admission::Started));
    assert_eq!(s.resume(running).await.unwrap(), None);
    s.teardown().await;
}

#[tokio::test]
async fn rejects_bad_url_and_busy_destination() {
    let (s, db) = scheduler(0).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("same.bin");

    assert!(s.submit(DownloadRequest::new("not a url", &dest)).await.is_err());
    assert!(db.list_tasks().await.unwrap().is_empty());

    let url = stalling_server();
    s.submit(DownloadRequest::new(url.clone(), &dest)).await.unwrap();
    let err = s.submit(DownloadRequest::new(url, &dest)).await.unwrap_err();
    assert!(err.to_string().contains("already used"));
    s.teardown().await;
}

#[tokio::test]
async fn connections_default_and_clamp() {
    let (s, db) = scheduler(1).await;
    let dir = tempfile::tempdir().unwrap();
    let url = stalling_server();
    s.teardown().await; // closed: nothing starts, rows are still created

    let (a, _) = s.submit(DownloadRequest::new(url.clone(), dir.path().join("a"))).await.unwrap();
    let (b, _) = s
        .submit(DownloadRequest::new(url, dir.path().join("b")).with_connections(500))
        .await
        .unwrap();
    assert_eq!(db.get_task(a).await.unwrap().unwrap().connections, 8);
    assert_eq!(db.get_task(b).await.unwrap().unwrap().connections, 32);
}

#[tokio::test(flavor = "multi_thread")]
async fn init_recovers_and_offers_resumable_tasks() {
    let (s, db) = scheduler(3).await;
    let dir = tempfile::tempdir().unwrap();
    let url = stalling_server();

    let crashed = db
        .add_task(&DownloadRequest::new(url.clone(), dir.path().join("x")), TaskKind::DirectSegmented, 4, false)
        .await
        .unwrap();
    db.set_status(crashed, TaskStatus::Downloading).await.unwrap();
    let paused = db
        .add_task(&DownloadRequest::new(url.clone(), dir.path().join("y")), TaskKind::DirectSegmented, 4, false)
        .await
        .unwrap();
    db.set_status(paused, TaskStatus::Paused).await.unwrap();
    let done = db
        .add_task(&DownloadRequest::new(url, dir.path().join("z")), TaskKind::DirectSegmented, 4, false)
        .await
        .unwrap();
    db.set_status(done, TaskStatus::Completed).await.unwrap();

    let offered = s.init().await.unwrap();
    assert_eq!(offered.iter().map(|t| t.id).collect::<Vec<_>>(), vec![paused]);
    assert_eq!(s.active_ids(), vec![crashed]);

    s.teardown().await;
    wait_for_status(&db, crashed, TaskStatus::Paused).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn init_fails_second_task_sharing_a_destination() {
    let (s, db) = scheduler(3).await;
    let dir = tempfile::tempdir().unwrap();
    let url = stalling_server();
    let dest = dir.path().join("shared.bin");

    let first = db
        .add_task(&DownloadRequest::new(url.clone(), &dest), TaskKind::DirectSegmented, 2, false)
        .await
        .unwrap();
    let second = db
        .add_task(&DownloadRequest::new(url, &dest), TaskKind::DirectSegmented, 2, false)
        .await
        .unwrap();

    let offered = s.init().await.unwrap();
    assert_eq!(s.active_ids(), vec![first]);
    assert_eq!(offered.iter().map(|t| t.id).collect::<Vec<_>>(), vec![second]);
    assert_eq!(offered[0].status, TaskStatus::Failed);

    let stored = db.get_task(second).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.last_error.unwrap().contains("already used"));

    s.teardown().await;
    wait_for_status(&db, first, TaskStatus::Paused).await;
}
