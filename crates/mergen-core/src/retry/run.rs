//! Retry loop: run a closure until success or policy says stop.

use std::time::{Duration, Instant};

use super::classify;
use super::error::SegmentError;
use super::policy::{RetryDecision, RetryPolicy};
use crate::control::StopToken;

/// Granularity at which a backoff sleep re-checks the stop token.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Runs `f(attempt)` until it succeeds or the retry policy says to stop.
/// `attempt` starts at 1. Backoff sleeps are interrupted by `stop`, in which
/// case `SegmentError::Cancelled` is returned.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    stop: Option<&StopToken>,
    mut f: F,
) -> Result<T, SegmentError>
where
    F: FnMut(u32) -> Result<T, SegmentError>,
{
    let mut attempt = 1u32;
    loop {
        match f(attempt) {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!(attempt, delay_ms = d.as_millis() as u64, "retrying after {}", e);
                        if !sleep_unless_stopped(d, stop) {
                            return Err(SegmentError::Cancelled);
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}

/// Sleeps for `d`; returns false early if the stop token is raised.
fn sleep_unless_stopped(d: Duration, stop: Option<&StopToken>) -> bool {
    let Some(stop) = stop else {
        std::thread::sleep(d);
        return true;
    };
    let deadline = Instant::now() + d;
    loop {
        if stop.is_raised() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
}
