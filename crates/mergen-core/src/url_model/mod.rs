//! URL modeling: filename derivation and download-kind classification.

mod classify;
mod content_disposition;
mod filename;

pub use classify::classify_url;
pub use content_disposition::parse_content_disposition_filename;
pub use filename::{derive_filename, filename_from_url_path, sanitize_filename};
