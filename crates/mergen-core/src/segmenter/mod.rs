//! Range math and segment planning.
//!
//! Splits a download into N contiguous segments with inclusive byte ranges
//! and computes the HTTP Range header for the next byte a worker needs.

mod range;

pub use range::{effective_connections, plan_segments, PlanLimits, SegmentRange};
