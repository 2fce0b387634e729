//! Single-segment HTTP Range GET and write to storage.

use std::cell::{Cell, RefCell};

use super::board::SegmentSlot;
use super::TransferOptions;
use crate::control::StopToken;
use crate::probe::{parse_content_range, parse_status_line};
use crate::retry::{run_with_retry, RetryPolicy, SegmentError};
use crate::storage::StorageWriter;

/// Everything one worker needs to fetch one segment.
pub struct SegmentJob<'a> {
    pub url: &'a str,
    pub slot: &'a SegmentSlot,
    /// False once the task has fallen back to a single unranged transfer.
    pub ranged: bool,
    pub storage: &'a StorageWriter,
    pub opts: &'a TransferOptions,
    pub stop: &'a StopToken,
}

#[derive(Debug, Default)]
struct ResponseHead {
    status: u32,
    content_range: Option<String>,
}

/// Validate the final response head before the first body byte is written.
fn check_response(head: &ResponseHead, ranged: bool, offset: u64) -> Result<(), SegmentError> {
    match head.status {
        206 => {
            let expected = if ranged { offset } else { 0 };
            let got = head
                .content_range
                .as_deref()
                .and_then(parse_content_range)
                .and_then(|cr| cr.range)
                .map(|(first, _)| first);
            if got != Some(expected) {
                return Err(SegmentError::ContentRangeMismatch {
                    requested: expected,
                    got,
                });
            }
            Ok(())
        }
        200 if ranged => Err(SegmentError::RangeIgnored),
        200..=299 => Ok(()),
        code => Err(SegmentError::Http(code)),
    }
}

/// One transfer attempt for `job.slot`, starting at its current offset.
///
/// Bytes are written at `start + downloaded` and the slot counter advances
/// only after each write returns. The stop token is checked before every
/// chunk, so a stop never splits a chunk.
pub fn fetch_segment(job: &SegmentJob<'_>) -> Result<(), SegmentError> {
    let slot = job.slot;
    if job.stop.is_raised() {
        return Err(SegmentError::Cancelled);
    }
    if !job.ranged {
        // An unranged body always starts at byte 0.
        slot.reset_downloaded();
    }
    if slot.remaining() == Some(0) {
        return Ok(());
    }
    let offset = slot.next_offset();
    let remaining = slot.remaining();

    let mut easy = curl::easy::Easy::new();
    easy.url(job.url).map_err(SegmentError::Curl)?;
    job.opts.apply(&mut easy).map_err(SegmentError::Curl)?;
    if job.ranged {
        let spec = match slot.range.end {
            Some(end) => format!("{}-{}", offset, end),
            None => format!("{}-", offset),
        };
        easy.range(&spec).map_err(SegmentError::Curl)?;
    }
    easy.progress(true).map_err(SegmentError::Curl)?;

    let head = RefCell::new(ResponseHead::default());
    let checked = Cell::new(false);
    let written = Cell::new(0u64);
    let overrun = Cell::new(false);
    let failure: RefCell<Option<SegmentError>> = RefCell::new(None);

    let perform = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                let line = String::from_utf8_lossy(data);
                let line = line.trim();
                if line.starts_with("HTTP/") {
                    // New response in a redirect chain.
                    let mut h = head.borrow_mut();
                    *h = ResponseHead::default();
                    h.status = parse_status_line(line).unwrap_or(0);
                } else if let Some((name, value)) = line.split_once(':') {
                    if name.trim().eq_ignore_ascii_case("content-range") {
                        head.borrow_mut().content_range = Some(value.trim().to_string());
                    }
                }
                true
            })
            .map_err(SegmentError::Curl)?;
        // Lets a stop interrupt a stalled transfer between chunks.
        transfer
            .progress_function(|_, _, _, _| !job.stop.is_raised())
            .map_err(SegmentError::Curl)?;
        transfer
            .write_function(|data| {
                if !checked.get() {
                    checked.set(true);
                    if let Err(e) = check_response(&head.borrow(), job.ranged, offset) {
                        failure.replace(Some(e));
                        return Ok(0);
                    }
                }
                if job.stop.is_raised() {
                    failure.replace(Some(SegmentError::Cancelled));
                    return Ok(0);
                }
                let take = match remaining {
                    Some(r) => (r - written.get()).min(data.len() as u64) as usize,
                    None => data.len(),
                };
                if take > 0 {
                    if let Err(e) = job.storage.write_at(offset + written.get(), &data[..take]) {
                        failure.replace(Some(SegmentError::Storage(e)));
                        return Ok(0);
                    }
                    written.set(written.get() + take as u64);
                    slot.add_downloaded(take as u64);
                }
                if take < data.len() {
                    // Server sent past the end of the range; everything we need is written.
                    overrun.set(true);
                    return Ok(0);
                }
                Ok(data.len())
            })
            .map_err(SegmentError::Curl)?;
        transfer.perform()
    };

    if let Some(e) = failure.into_inner() {
        return Err(e);
    }
    if let Err(e) = perform {
        if e.is_aborted_by_callback() {
            return Err(SegmentError::Cancelled);
        }
        if !(overrun.get() && e.is_write_error()) {
            let code = easy.response_code().unwrap_or(0);
            if code >= 400 {
                return Err(SegmentError::Http(code));
            }
            return Err(SegmentError::Curl(e));
        }
    }

    let head = head.into_inner();
    if !checked.get() {
        check_response(&head, job.ranged, offset)?;
    }

    if let Some(len) = slot.range.len() {
        let received = slot.downloaded();
        if received < len {
            return Err(SegmentError::PartialTransfer {
                expected: len,
                received,
            });
        }
    }
    Ok(())
}

/// `fetch_segment` under the retry policy. Each retry resumes from the
/// slot's current offset; a stop during backoff returns `Cancelled`.
pub fn fetch_segment_with_retry(
    job: &SegmentJob<'_>,
    policy: &RetryPolicy,
) -> Result<(), SegmentError> {
    run_with_retry(policy, Some(job.stop), |attempt| {
        if attempt > 1 {
            tracing::debug!(
                segment = job.slot.index,
                attempt,
                offset = job.slot.next_offset(),
                "resuming segment"
            );
        }
        fetch_segment(job)
    })
}
