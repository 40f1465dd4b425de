//! Offset arithmetic aligning a media playhead to the running timecode.
//!
//! The player computes `playhead_ms = timecode_ms + offset_ms`, so arming
//! the file start against a reading T means `offset_ms = -T`. Seeks
//! compose: each relative delta is added onto the current offset, never
//! re-derived from a fresh timecode read.

/// Holds the last-armed base offset for one scenario. Pure integer
/// arithmetic; the only rounding anywhere is the millisecond truncation of
/// the timecode reading itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetTracker {
    offset_ms: i64,
}

impl OffsetTracker {
    #[inline]
    pub fn new() -> Self {
        OffsetTracker::default()
    }

    /// Case (a): align playhead 0 with the timecode instant just read.
    /// Returns the offset to send.
    #[inline]
    pub fn arm(&mut self, timecode_ms: u64) -> i64 {
        self.offset_ms = -(timecode_ms as i64);
        self.offset_ms
    }

    /// Case (b): apply a relative jump on top of the current offset.
    /// Returns the new offset to send.
    #[inline]
    pub fn seek(&mut self, delta_ms: i64) -> i64 {
        self.offset_ms += delta_ms;
        self.offset_ms
    }

    #[inline]
    pub fn current(&self) -> i64 {
        self.offset_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_negates_the_reading() {
        let mut tracker = OffsetTracker::new();
        for t_ms in [0u64, 1, 480, 3_600_000, 86_399_999] {
            assert_eq!(tracker.arm(t_ms), -(t_ms as i64));
            // Immediately after arming the playhead lands on zero.
            assert_eq!(t_ms as i64 + tracker.current(), 0);
        }
    }

    #[test]
    fn seeks_compose_over_the_base() {
        let mut tracker = OffsetTracker::new();
        let base = tracker.arm(40_000);
        let deltas = [-10_000i64, 5_000, -15_000, 20_000, -5_000];

        let mut last = base;
        for delta in deltas {
            last = tracker.seek(delta);
        }
        assert_eq!(last, base + deltas.iter().sum::<i64>());
        assert_eq!(tracker.current(), -40_000 + -5_000);
    }

    #[test]
    fn rearming_discards_accumulated_seeks() {
        let mut tracker = OffsetTracker::new();
        tracker.arm(1_000);
        tracker.seek(999);
        assert_eq!(tracker.arm(2_000), -2_000);
    }
}
