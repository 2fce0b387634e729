//! Safe resume: re-validate ETag/Last-Modified/size before reusing progress.
//!
//! Before a paused, failed or crash-interrupted task reuses persisted segment
//! offsets, the engine compares the fresh probe with what was recorded when
//! the bytes were fetched. A changed remote means the partial file is stale;
//! the engine discards it and restarts from zero.

mod validate;

pub use validate::{validate_for_resume, RemoteChanged};
