//! Gap detection over a requested date range.
//!
//! The expected timestamps are generated from `start` at the interval's
//! granularity up to and including `end`. A gap is a maximal run of expected
//! timestamps with no stored bar; its bounds are the first and last missing
//! timestamps of the run.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::interval::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Gap {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }
}

impl From<Gap> for (NaiveDateTime, NaiveDateTime) {
    fn from(gap: Gap) -> Self {
        (gap.start, gap.end)
    }
}

/// Expected timestamps in `[start, end]` stepping by `interval`.
pub fn expected_timestamps(
    interval: Interval,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> impl Iterator<Item = NaiveDateTime> {
    (0u32..)
        .map_while(move |n| interval.step_from(start, n))
        .take_while(move |ts| *ts <= end)
}

/// Find the gaps in `present` (sorted ascending) over `[start, end]`.
///
/// Stored timestamps that do not fall on the expected grid are ignored.
pub fn find_gaps(
    present: &[NaiveDateTime],
    interval: Interval,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut open: Option<Gap> = None;
    let mut cursor = present.partition_point(|ts| *ts < start);

    for expected in expected_timestamps(interval, start, end) {
        while cursor < present.len() && present[cursor] < expected {
            cursor += 1;
        }
        let found = cursor < present.len() && present[cursor] == expected;
        if found {
            gaps.extend(open.take());
        } else if let Some(gap) = open.as_mut() {
            gap.end = expected;
        } else {
            open = Some(Gap::new(expected, expected));
        }
    }
    gaps.extend(open);
    gaps
}
