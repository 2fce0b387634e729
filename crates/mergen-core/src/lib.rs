//! Mergen core: the segmented download engine behind the Mergen download manager.
//!
//! Leaves first: [`segmenter`] plans byte ranges, [`downloader`] fetches them
//! on a bounded pool of blocking workers, [`progress`] aggregates counters,
//! [`resume_db`] persists partial state, [`engine`] drives one task and
//! [`scheduler`] admits tasks under a global ceiling.

pub mod config;
pub mod control;
pub mod downloader;
pub mod engine;
pub mod external;
pub mod logging;
pub mod probe;
pub mod progress;
pub mod resume_db;
pub mod retry;
pub mod safe_resume;
pub mod scheduler;
pub mod segmenter;
pub mod storage;
pub mod task;
pub mod url_model;

pub use config::MergenConfig;
pub use engine::{Engine, EngineEvent, TaskError};
pub use scheduler::{Admission, Scheduler};
pub use task::{DownloadRequest, DownloadTask, TaskId, TaskKind, TaskStatus};
