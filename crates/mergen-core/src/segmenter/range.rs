//! Segment range type and planning.

/// A byte range `[start, end]` (inclusive end). `end` is `None` only for the
/// single open-ended segment of a download whose size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl SegmentRange {
    /// Length of this range in bytes, if bounded.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end + 1 - self.start)
    }

    /// HTTP Range header value for fetching from `offset` to the end of the range.
    pub fn range_header_from(&self, offset: u64) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", offset, end),
            None => format!("bytes={}-", offset),
        }
    }
}

/// Bounds applied when choosing how many segments to plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    /// Per-task connection ceiling (already clamped to the hard ceiling).
    pub max_connections: usize,
    /// Segments are never planned smaller than this.
    pub min_segment_size: u64,
}

/// Connection count actually used for a task of `total_size` bytes.
///
/// Clamped to `[1, max_connections]` and to `max(1, total_size / min_segment_size)`.
/// Unknown size always yields 1.
pub fn effective_connections(total_size: Option<u64>, requested: usize, limits: PlanLimits) -> usize {
    let Some(total) = total_size else {
        return 1;
    };
    let by_size = (total / limits.min_segment_size.max(1)).max(1);
    let by_size = usize::try_from(by_size).unwrap_or(usize::MAX);
    requested
        .clamp(1, limits.max_connections.max(1))
        .min(by_size)
}

/// Builds a segment plan.
///
/// Near-equal contiguous ranges; the last range absorbs the remainder so the
/// ranges cover exactly `[0, total_size)`. Unknown size yields one open-ended
/// range; a zero size yields no ranges.
pub fn plan_segments(total_size: Option<u64>, requested: usize, limits: PlanLimits) -> Vec<SegmentRange> {
    let Some(total) = total_size else {
        return vec![SegmentRange { start: 0, end: None }];
    };
    if total == 0 {
        return Vec::new();
    }

    let count = effective_connections(Some(total), requested, limits) as u64;
    let base = total / count;

    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = i * base;
        let end = if i + 1 == count { total - 1 } else { start + base - 1 };
        out.push(SegmentRange { start, end: Some(end) });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn limits() -> PlanLimits {
        PlanLimits {
            max_connections: 64,
            min_segment_size: 1,
        }
    }

    #[test]
    fn ten_mib_four_ways() {
        let segs = plan_segments(Some(10 * MIB), 4, PlanLimits { max_connections: 32, min_segment_size: MIB });
        let lens: Vec<u64> = segs.iter().map(|s| s.len().unwrap()).collect();
        assert_eq!(lens, vec![2621440, 2621440, 2621440, 2621440]);
        assert_eq!(segs[3].end, Some(10 * MIB - 1));
    }

    #[test]
    fn last_segment_absorbs_remainder() {
        let segs = plan_segments(Some(10485762), 4, PlanLimits { max_connections: 32, min_segment_size: MIB });
        let lens: Vec<u64> = segs.iter().map(|s| s.len().unwrap()).collect();
        assert_eq!(lens, vec![2621440, 2621440, 2621440, 2621442]);
    }

    #[test]
    fn unknown_size_is_one_open_segment() {
        let segs = plan_segments(None, 8, limits());
        assert_eq!(segs, vec![SegmentRange { start: 0, end: None }]);
        assert_eq!(segs[0].range_header_from(500), "bytes=500-");
        assert_eq!(effective_connections(None, 8, limits()), 1);
    }

    #[test]
    fn empty_resource_has_no_segments() {
        assert!(plan_segments(Some(0), 4, limits()).is_empty());
    }

    #[test]
    fn small_files_are_not_over_split() {
        let l = PlanLimits { max_connections: 32, min_segment_size: MIB };
        assert_eq!(plan_segments(Some(100), 8, l).len(), 1);
        assert_eq!(plan_segments(Some(3 * MIB + 5), 8, l).len(), 3);
    }

    #[test]
    fn count_is_clamped_to_configured_max() {
        let l = PlanLimits { max_connections: 4, min_segment_size: 1 };
        assert_eq!(plan_segments(Some(1000), 16, l).len(), 4);
        assert_eq!(plan_segments(Some(1000), 0, l).len(), 1);
    }

    #[test]
    fn range_header_is_inclusive() {
        let r = SegmentRange { start: 0, end: Some(999999) };
        assert_eq!(r.range_header_from(500000), "bytes=500000-999999");
        assert_eq!(r.len(), Some(1000000));
    }

    #[test]
    fn plans_cover_exactly_for_all_counts() {
        for total in [1u64, 2, 63, 64, 65, 1000, 4097, 10 * MIB + 3] {
            for n in 1..=64usize {
                let segs = plan_segments(Some(total), n, limits());
                assert!(!segs.is_empty() && segs.len() <= n);
                assert_eq!(segs[0].start, 0);
                for pair in segs.windows(2) {
                    assert_eq!(pair[0].end.unwrap() + 1, pair[1].start);
                }
                assert_eq!(segs.last().unwrap().end, Some(total - 1));
                let sum: u64 = segs.iter().map(|s| s.len().unwrap()).sum();
                assert_eq!(sum, total);
            }
        }
    }
}
