//! Free-time detection between busy intervals.
//!
//! Finds the open windows left between fixed events, anchors and already
//! placed entries, for the fallback scheduler and the resolver's shift
//! policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::overlaps;

/// A detected free window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeGap {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TimeGap {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Option<Self> {
        if end_time <= start_time {
            return None;
        }
        Some(Self {
            start_time,
            end_time,
        })
    }

    /// Get duration in minutes
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    /// Check if this gap can fit a block of the given duration
    pub fn can_fit(&self, minutes: i64) -> bool {
        self.duration_minutes() >= minutes
    }

    /// This gap clipped to `[start, end)`, if anything is left.
    pub fn clip(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<TimeGap> {
        TimeGap::new(self.start_time.max(start), self.end_time.min(end))
    }
}

/// A busy interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusySpan {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BusySpan {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        overlaps(self.start_time, self.end_time, start, end)
    }
}

/// Detector for finding free windows in a day
pub struct TimeGapDetector {
    /// Minimum gap duration to report (in minutes)
    min_gap_minutes: i64,
}

impl TimeGapDetector {
    /// Create a new detector reporting every non-empty gap
    pub fn new() -> Self {
        Self { min_gap_minutes: 1 }
    }

    /// Set the minimum gap duration
    pub fn with_min_gap(mut self, minutes: i64) -> Self {
        self.min_gap_minutes = minutes.max(1);
        self
    }

    /// Find gaps between busy spans within `[window_start, window_end)`,
    /// sorted by start time.
    pub fn find_gaps(
        &self,
        busy: &[BusySpan],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<TimeGap> {
        let mut gaps = Vec::new();

        let mut sorted: Vec<_> = busy.to_vec();
        sorted.sort_by_key(|e| e.start_time);

        let mut last_end = window_start;
        let mut push = |start: DateTime<Utc>, end: DateTime<Utc>| {
            if let Some(gap) = TimeGap::new(start, end) {
                if gap.duration_minutes() >= self.min_gap_minutes {
                    gaps.push(gap);
                }
            }
        };

        for span in &sorted {
            // Already covered
            if span.end_time <= last_end {
                continue;
            }
            if span.start_time >= window_end {
                break;
            }
            if span.start_time > last_end {
                push(last_end, span.start_time.min(window_end));
            }
            last_end = span.end_time.min(window_end);
        }

        if last_end < window_end {
            push(last_end, window_end);
        }

        gaps
    }
}

impl Default for TimeGapDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The earliest start inside `gap` where `minutes` fit without touching any
/// span in `busy`.
pub fn first_fit(gap: &TimeGap, minutes: i64, busy: &[BusySpan]) -> Option<DateTime<Utc>> {
    let length = Duration::minutes(minutes);
    let mut candidate = gap.start_time;
    loop {
        let end = candidate + length;
        if end > gap.end_time {
            return None;
        }
        match busy
            .iter()
            .filter(|b| b.overlaps(candidate, end))
            .map(|b| b.end_time)
            .max()
        {
            Some(blocked_until) => candidate = blocked_until,
            None => return Some(candidate),
        }
    }
}
