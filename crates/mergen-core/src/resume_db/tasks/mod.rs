//! Task and segment rows: conversion helpers shared by reads and writes.

mod read;
mod write;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use crate::task::{DownloadTask, SegmentRecord, SegmentStatus, TaskKind, TaskStatus};

pub(super) const TASK_COLUMNS: &str = "id, url, destination, destination_is_dir, suggested_filename, \
     total_size, connections, range_supported, etag, last_modified, kind, status, last_error, \
     created_at, updated_at";

pub(super) fn task_from_row(row: &SqliteRow) -> DownloadTask {
    let destination: String = row.get("destination");
    let total_size: Option<i64> = row.get("total_size");
    let connections: i64 = row.get("connections");
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    DownloadTask {
        id: row.get("id"),
        url: row.get("url"),
        destination: PathBuf::from(destination),
        destination_is_dir: row.get("destination_is_dir"),
        suggested_filename: row.get("suggested_filename"),
        total_size: total_size.map(|n| n.max(0) as u64),
        connections: connections.max(1) as usize,
        range_supported: row.get("range_supported"),
        etag: row.get("etag"),
        last_modified: row.get("last_modified"),
        kind: TaskKind::parse(&kind),
        status: TaskStatus::parse(&status),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_error: row.get("last_error"),
    }
}

pub(super) fn segment_from_row(row: &SqliteRow) -> SegmentRecord {
    let idx: i64 = row.get("idx");
    let start: i64 = row.get("start");
    let end: Option<i64> = row.get("end_inclusive");
    let downloaded: i64 = row.get("downloaded");
    let status: String = row.get("status");
    let retries: i64 = row.get("retries");
    SegmentRecord {
        task_id: row.get("task_id"),
        index: idx.max(0) as usize,
        start: start.max(0) as u64,
        end: end.map(|e| e.max(0) as u64),
        downloaded: downloaded.max(0) as u64,
        status: SegmentStatus::parse(&status),
        retries: retries.max(0) as u32,
    }
}
