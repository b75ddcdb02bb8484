//! Time representation for the composition layer.
//!
//! The timeline walks, trim arithmetic, and loop tiling all operate on `f64`
//! seconds. Repeated subtraction of slice lengths accumulates floating-point
//! residue, so every loop guard goes through [`round2`] (two decimal places)
//! instead of comparing raw values against zero.

use std::ops::RangeInclusive;

/// Time in seconds since the start of a timeline or source.
pub type Seconds = f64;

/// Hard cap on the length of an exported story.
pub const MAX_STORY_SECONDS: Seconds = 60.0;

/// Round to two decimal places (10 ms resolution).
///
/// Used as the loop guard for trim walks and song tiling: residual error
/// from repeated subtraction must not keep a loop alive.
#[inline]
pub fn round2(seconds: Seconds) -> Seconds {
    (seconds * 100.0).round() / 100.0
}

/// Convert a timeline position to a frame index at the given frame rate.
#[inline]
pub fn to_frame_index(seconds: Seconds, fps: f64) -> usize {
    (seconds * fps).floor().max(0.0) as usize
}

/// Convert a frame index back to its timeline position.
#[inline]
pub fn from_frame_index(frame_index: usize, fps: f64) -> Seconds {
    frame_index as f64 / fps
}

/// A half-open time range `[start, start + duration)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: Seconds,
    pub duration: Seconds,
}

impl TimeRange {
    pub fn new(start: Seconds, duration: Seconds) -> Self {
        Self { start, duration }
    }

    /// Build a range from its two bounds. `end` below `start` yields an
    /// empty range rather than a negative duration.
    pub fn from_bounds(start: Seconds, end: Seconds) -> Self {
        Self {
            start,
            duration: (end - start).max(0.0),
        }
    }

    pub fn end(&self) -> Seconds {
        self.start + self.duration
    }

    /// Empty at 10 ms resolution.
    pub fn is_empty(&self) -> bool {
        round2(self.duration) <= 0.0
    }

    pub fn contains(&self, at: Seconds) -> bool {
        at >= self.start && at < self.end()
    }

    /// Overlap of two ranges, or `None` when they are disjoint.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end().min(other.end());
        if end > start {
            Some(TimeRange::from_bounds(start, end))
        } else {
            None
        }
    }

    /// Clamp the range so it fits inside `bounds`.
    pub fn clamped_to(&self, bounds: RangeInclusive<Seconds>) -> TimeRange {
        let start = self.start.clamp(*bounds.start(), *bounds.end());
        let end = self.end().clamp(start, *bounds.end());
        TimeRange::from_bounds(start, end)
    }
}
