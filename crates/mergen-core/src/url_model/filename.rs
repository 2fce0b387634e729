//! Local filename derivation from a suggestion, Content-Disposition or URL path.

use super::content_disposition::{parse_content_disposition_filename, percent_decode};

/// Used when nothing usable can be derived.
const FALLBACK_NAME: &str = "download";

/// Longest name most filesystems accept, in bytes.
const NAME_MAX: usize = 255;

/// Characters rejected by at least one of Linux, macOS or Windows.
const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Picks the name to save under: an explicit suggestion first, then the
/// `Content-Disposition` filename, then the last URL path segment.
/// The result is always sanitized and never empty.
pub fn derive_filename(
    url: &str,
    content_disposition: Option<&str>,
    suggested: Option<&str>,
) -> String {
    let candidates = [
        suggested.map(str::to_string),
        content_disposition.and_then(parse_content_disposition_filename),
        filename_from_url_path(url),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(|c| sanitize_filename(&c))
        .find(|c| !c.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

/// Last non-empty path segment of `url`, percent-decoded.
pub fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode(segment);
    match decoded.as_str() {
        "" | "." | ".." => None,
        _ => Some(decoded),
    }
}

/// Replace reserved and control characters with `_`, strip surrounding dots
/// and whitespace, and cap the length while keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_control() || RESERVED.contains(&c) { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.len() <= NAME_MAX {
        return trimmed.to_string();
    }

    let (stem, ext) = match trimmed.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() < 16 => (stem, Some(ext)),
        _ => (trimmed, None),
    };
    let budget = NAME_MAX - ext.map_or(0, |e| e.len() + 1);
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    match ext {
        Some(ext) => format!("{}.{}", &stem[..cut], ext),
        None => stem[..cut].to_string(),
    }
}
