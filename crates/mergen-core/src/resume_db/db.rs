//! SQLite-backed task store: connection, migrations, timestamp helper.
//! Task and segment CRUD lives in `tasks`.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Handle to the task store.
///
/// The database file lives under the XDG state directory:
/// `~/.local/state/mergen/tasks.db`.
#[derive(Clone)]
pub struct ResumeDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl ResumeDb {
    /// Open (or create) the default store and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("mergen")?;
        let db_path = xdg_dirs.get_state_home().join("tasks.db");
        Self::open_at(db_path).await
    }

    /// Open (or create) the store at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open task store {}", path.display()))?;
        let db = ResumeDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                destination TEXT NOT NULL,
                destination_is_dir INTEGER NOT NULL DEFAULT 0,
                suggested_filename TEXT,
                total_size INTEGER,
                connections INTEGER NOT NULL,
                range_supported INTEGER,
                etag TEXT,
                last_modified TEXT,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // `end_inclusive` is NULL only for the open-ended segment of an unknown-size download.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                start INTEGER NOT NULL,
                end_inclusive INTEGER,
                downloaded INTEGER NOT NULL,
                status TEXT NOT NULL,
                retries INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (task_id, idx)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Open an in-memory store (no disk I/O). Used by tests here and in the scheduler.
#[cfg(test)]
pub(crate) async fn open_memory() -> Result<ResumeDb> {
    use std::str::FromStr;
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    let db = ResumeDb { pool };
    db.migrate().await?;
    Ok(db)
}
