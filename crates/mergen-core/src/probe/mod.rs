//! Probing: learn size, range support and validators before planning.
//!
//! Issues `GET` with `Range: bytes=0-0` through libcurl. A `206` proves range
//! support and carries the total in `Content-Range`; a `200` means ranges are
//! ignored and the size (if any) comes from `Content-Length`. The body of a
//! `200` is abandoned after the headers.

mod parse;

use std::cell::RefCell;

pub use parse::{parse_content_range, parse_headers, ContentRange};
pub(crate) use parse::parse_status_line;

use crate::control::StopToken;
use crate::downloader::TransferOptions;
use crate::retry::{run_with_retry, RetryPolicy, SegmentError};

/// Metadata learned from the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total size in bytes, if the server reported one.
    pub total_size: Option<u64>,
    /// True if the server honored the one-byte range.
    pub range_supported: bool,
    /// `ETag` value if present (used for resume validation).
    pub etag: Option<String>,
    /// `Last-Modified` value if present (used for resume validation).
    pub last_modified: Option<String>,
    /// `Content-Disposition` value if present (filename hint).
    pub content_disposition: Option<String>,
    /// URL after redirects.
    pub effective_url: Option<String>,
}

/// Header lines of the final response plus its status.
#[derive(Debug, Default)]
struct Collected {
    status: u32,
    lines: Vec<String>,
}

/// One probe attempt. Runs in the current thread; call from `spawn_blocking`
/// in async code. A raised `stop` aborts the request with `Cancelled`.
pub fn probe(url: &str, opts: &TransferOptions, stop: Option<&StopToken>) -> Result<ProbeResult, SegmentError> {
    let collected = RefCell::new(Collected::default());

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(SegmentError::Curl)?;
    opts.apply(&mut easy).map_err(SegmentError::Curl)?;
    easy.range("0-0").map_err(SegmentError::Curl)?;
    if stop.is_some() {
        easy.progress(true).map_err(SegmentError::Curl)?;
    }

    let perform = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                let line = String::from_utf8_lossy(data);
                let line = line.trim_end();
                let mut c = collected.borrow_mut();
                if line.starts_with("HTTP/") {
                    c.status = parse_status_line(line).unwrap_or(0);
                    c.lines.clear();
                } else if !line.is_empty() {
                    c.lines.push(line.to_string());
                }
                true
            })
            .map_err(SegmentError::Curl)?;
        if let Some(stop) = stop {
            transfer
                .progress_function(move |_, _, _, _| !stop.is_raised())
                .map_err(SegmentError::Curl)?;
        }
        transfer
            .write_function(|data| {
                // A 206 carries one byte; anything longer is a 200 body we do not want.
                if collected.borrow().status == 206 {
                    Ok(data.len())
                } else {
                    Ok(0)
                }
            })
            .map_err(SegmentError::Curl)?;
        transfer.perform()
    };

    let collected = collected.into_inner();
    let code = easy.response_code().map_err(SegmentError::Curl)?;
    match perform {
        Ok(()) => {}
        // We abort 200 bodies ourselves.
        Err(e) if e.is_write_error() && (200..300).contains(&code) => {}
        Err(e) if e.is_aborted_by_callback() => return Err(SegmentError::Cancelled),
        Err(e) => {
            if code >= 400 {
                return Err(SegmentError::Http(code));
            }
            return Err(SegmentError::Curl(e));
        }
    }

    let effective_url = easy.effective_url().ok().flatten().map(str::to_string);
    let headers = parse_headers(&collected.lines);
    let mut result = ProbeResult {
        total_size: None,
        range_supported: false,
        etag: headers.etag,
        last_modified: headers.last_modified,
        content_disposition: headers.content_disposition,
        effective_url,
    };

    match code {
        206 => {
            let cr = headers
                .content_range
                .as_deref()
                .and_then(parse_content_range);
            result.range_supported = true;
            result.total_size = cr.and_then(|c| c.total);
        }
        // Zero-length resource: `bytes */0`.
        416 => {
            let total = headers
                .content_range
                .as_deref()
                .and_then(parse_content_range)
                .and_then(|c| c.total);
            if total != Some(0) {
                return Err(SegmentError::Http(code));
            }
            result.range_supported = true;
            result.total_size = Some(0);
        }
        200..=299 => {
            result.total_size = headers.content_length;
        }
        _ => return Err(SegmentError::Http(code)),
    }
    Ok(result)
}

/// `probe` under the retry policy. Transient failures (timeouts, resets,
/// 429/503/5xx) are retried; 4xx, TLS failures and exhausted retries are returned.
pub fn probe_with_retry(
    url: &str,
    opts: &TransferOptions,
    policy: &RetryPolicy,
    stop: Option<&StopToken>,
) -> Result<ProbeResult, SegmentError> {
    run_with_retry(policy, stop, |attempt| {
        if let Some(stop) = stop {
            if stop.is_raised() {
                return Err(SegmentError::Cancelled);
            }
        }
        tracing::debug!(url, attempt, "probing");
        probe(url, opts, stop)
    })
}
