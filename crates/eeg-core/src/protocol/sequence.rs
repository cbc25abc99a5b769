//! Packet loss detection from sequence numbers
//!
//! Used only to detect loss. Packets are never reordered or requested again.

/// Gaps at or above this distance are treated as the counter going backwards
const REGRESSION_THRESHOLD: u32 = 1 << 31;

/// Result of observing one validated sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// No previous sequence number to compare against
    First,
    InOrder,
    /// `missing` packets were skipped between `last` and `current`
    Gap { missing: u32, last: u32, current: u32 },
    /// Counter went backwards or repeated, typically a device restart
    Regression { last: u32, current: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    last: Option<u32>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }

    /// Compare against the previous number, then always adopt `seq` as the new reference
    pub fn observe(&mut self, seq: u32) -> SequenceCheck {
        let check = match self.last {
            None => SequenceCheck::First,
            Some(last) => {
                let gap = seq.wrapping_sub(last.wrapping_add(1));
                if gap == 0 {
                    SequenceCheck::InOrder
                } else if gap < REGRESSION_THRESHOLD {
                    SequenceCheck::Gap {
                        missing: gap,
                        last,
                        current: seq,
                    }
                } else {
                    SequenceCheck::Regression { last, current: seq }
                }
            }
        };
        self.last = Some(seq);
        check
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_of_one() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(1), SequenceCheck::First);
        assert_eq!(tracker.observe(2), SequenceCheck::InOrder);
        assert_eq!(
            tracker.observe(4),
            SequenceCheck::Gap { missing: 1, last: 2, current: 4 }
        );
        assert_eq!(tracker.last(), Some(4));
    }

    #[test]
    fn test_counter_wraparound_is_in_order() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(u32::MAX);
        assert_eq!(tracker.observe(0), SequenceCheck::InOrder);
    }

    #[test]
    fn test_regression_resets_reference() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(500);
        assert_eq!(
            tracker.observe(3),
            SequenceCheck::Regression { last: 500, current: 3 }
        );
        assert_eq!(tracker.observe(4), SequenceCheck::InOrder);
    }
}
