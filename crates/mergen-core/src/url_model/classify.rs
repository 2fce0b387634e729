//! Decide at submission time how a URL is fetched.

use crate::task::{ExternalTool, TaskKind};

/// Extensions that are always fetched directly, even on a streaming domain.
const DIRECT_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".avi", ".mov", ".webm", ".flv", ".wmv", ".mp3", ".m4a", ".flac", ".wav",
    ".aac", ".ogg", ".zip", ".rar", ".7z", ".tar", ".gz", ".xz", ".pdf", ".epub", ".mobi", ".iso",
    ".dmg", ".exe", ".apk", ".deb", ".rpm",
];

/// Stream manifests remuxed into one file.
const MANIFEST_EXTENSIONS: &[&str] = &[".m3u8", ".mpd"];

/// Platforms whose pages need the extractor.
const STREAMING_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "youtube-nocookie.com",
    "instagram.com",
    "instagr.am",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    "facebook.com",
    "fb.watch",
    "reddit.com",
    "redd.it",
    "soundcloud.com",
    "bandcamp.com",
];

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Classify `url` once, when the task is created.
///
/// Manifests go to the muxer, pages on known platforms to the extractor, and
/// everything else (including unparseable URLs, which fail at probe) is a
/// direct segmented download.
pub fn classify_url(url: &str) -> TaskKind {
    let Ok(parsed) = url::Url::parse(url) else {
        return TaskKind::DirectSegmented;
    };
    let path = parsed.path().to_ascii_lowercase();
    if MANIFEST_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return TaskKind::ExternalDelegated(ExternalTool::StreamMuxer);
    }
    if DIRECT_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return TaskKind::DirectSegmented;
    }
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if STREAMING_DOMAINS.iter().any(|d| host_matches(&host, d)) {
        return TaskKind::ExternalDelegated(ExternalTool::Extractor);
    }
    TaskKind::DirectSegmented
}
