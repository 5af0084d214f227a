use core::ops::Range;

/// A closed byte range `[start, end]`, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    /// The first byte in the range.
    pub start: u64,
    /// The last byte in the range.
    pub end: u64,
}

impl Interval {
    /// Creates the interval `[start, end]`.  An interval with `end < start` is empty.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// The number of bytes in the interval.
    #[must_use]
    pub const fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start).saturating_add(1)
        }
    }

    /// True if the interval contains no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Keeps track of the byte ranges which are already present in the mirror.
///
/// The recorded intervals are sorted by `start`, never overlap, and never touch: two intervals
/// with `a.end + 1 >= b.start` are always stored as one.  This lets sequential reads extend a
/// single interval instead of accumulating many small ones.
#[derive(Debug, Default, Clone)]
pub struct IntervalTracker {
    intervals: Vec<Interval>,
}

impl IntervalTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    /// The recorded intervals, in ascending order.
    #[must_use]
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// The total number of bytes recorded.
    #[must_use]
    pub fn covered_len(&self) -> u64 {
        self.intervals.iter().map(Interval::len).sum()
    }

    /// True if every byte of `[start, end]` is recorded.
    #[must_use]
    pub fn covers(&self, start: u64, end: u64) -> bool {
        self.missing(start, end).is_empty()
    }

    /// Returns the minimal, ordered list of sub-ranges of `[start, end]` that are not yet
    /// recorded, and records `[start, end]` (merged with every interval it overlaps or touches).
    ///
    /// Calling this twice in a row with the same arguments returns no gaps the second time.
    pub fn reserve(&mut self, start: u64, end: u64) -> Vec<Interval> {
        let gaps = self.missing(start, end);
        self.insert(start, end);
        gaps
    }

    /// Returns the sub-ranges of `[start, end]` that are not yet recorded, without recording
    /// anything.
    #[must_use]
    pub fn missing(&self, start: u64, end: u64) -> Vec<Interval> {
        let mut gaps = vec![];
        if start > end {
            return gaps;
        }

        // `next` is the first byte of the request not yet accounted for.
        let mut next = start;
        for interval in &self.intervals[self.touched(start, end)] {
            if interval.start > next {
                gaps.push(Interval::new(next, interval.start - 1));
            }
            match interval.end.checked_add(1) {
                Some(after) => next = next.max(after),
                None => return gaps,
            }
        }
        if next <= end {
            gaps.push(Interval::new(next, end));
        }

        gaps
    }

    /// Records `[start, end]` as present, merging it with every interval it overlaps or touches.
    pub fn insert(&mut self, start: u64, end: u64) {
        if start > end {
            return;
        }

        let touched = self.touched(start, end);
        let slice = &self.intervals[touched.clone()];
        let merged = Interval::new(
            slice.first().map_or(start, |first| first.start.min(start)),
            slice.last().map_or(end, |last| last.end.max(end)),
        );
        self.intervals.splice(touched, [merged]);
    }

    /// The index range of the recorded intervals which overlap or are adjacent to
    /// `[start, end]`.  Both bounds are found by binary search: the lower one over right ends,
    /// the upper one over left starts.
    fn touched(&self, start: u64, end: u64) -> Range<usize> {
        let lo = self
            .intervals
            .partition_point(|interval| interval.end.saturating_add(1) < start);
        let hi = self
            .intervals
            .partition_point(|interval| interval.start <= end.saturating_add(1));
        lo..hi
    }
}
