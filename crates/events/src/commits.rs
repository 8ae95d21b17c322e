//! Per-partition commit tracking shared by the transports.

use std::collections::BTreeSet;

/// Committed offsets of one partition for one group.
///
/// Offsets can be committed out of order. `low` only moves past an offset
/// once it and everything before it is committed.
#[derive(Debug, Default)]
pub(crate) struct PartitionCommits {
    /// Every offset below this is committed.
    pub(crate) low: u64,
    /// Committed offsets at or above `low`.
    pub(crate) above: BTreeSet<u64>,
}

impl PartitionCommits {
    pub(crate) fn starting_at(low: u64) -> Self {
        Self {
            low,
            above: BTreeSet::new(),
        }
    }

    pub(crate) fn commit(&mut self, offset: u64) {
        if offset < self.low {
            return;
        }
        self.above.insert(offset);
        self.advance();
    }

    pub(crate) fn is_committed(&self, offset: u64) -> bool {
        offset < self.low || self.above.contains(&offset)
    }

    /// Treat everything below `offset` as committed. Returns how many
    /// offsets were given up without a commit.
    pub(crate) fn skip_to(&mut self, offset: u64) -> u64 {
        if offset <= self.low {
            return 0;
        }
        let kept = self.above.split_off(&offset);
        let committed = self.above.len() as u64;
        let abandoned = offset - self.low - committed;
        self.above = kept;
        self.low = offset;
        self.advance();
        abandoned
    }

    /// Keep at most `max` out-of-order commits by giving up the oldest
    /// gaps. Returns how many uncommitted offsets were given up.
    pub(crate) fn cap_pending(&mut self, max: usize) -> u64 {
        let mut abandoned = 0;
        while self.above.len() > max {
            let Some(&first) = self.above.first() else {
                break;
            };
            abandoned += self.skip_to(first);
        }
        abandoned
    }

    fn advance(&mut self) {
        while self.above.remove(&self.low) {
            self.low += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_advances_over_gaps() {
        let mut c = PartitionCommits::default();
        c.commit(1);
        assert_eq!(c.low, 0);
        c.commit(0);
        assert_eq!(c.low, 2);
        assert!(c.above.is_empty());
        c.commit(0);
        assert_eq!(c.low, 2);
    }

    #[test]
    fn skip_to_counts_only_uncommitted_offsets() {
        let mut c = PartitionCommits::default();
        c.commit(1);
        c.commit(3);
        c.commit(5);
        assert_eq!(c.skip_to(4), 2);
        assert_eq!(c.low, 4);
        assert_eq!(c.above, BTreeSet::from([5]));
        assert_eq!(c.skip_to(2), 0);
    }

    #[test]
    fn cap_pending_gives_up_the_oldest_gap() {
        let mut c = PartitionCommits::starting_at(10);
        for offset in 11..15 {
            c.commit(offset);
        }
        assert_eq!((c.low, c.above.len()), (10, 4));

        assert_eq!(c.cap_pending(3), 1);
        assert_eq!(c.low, 15);
        assert!(c.above.is_empty());
        assert!(c.is_committed(10));

        assert_eq!(c.cap_pending(3), 0);
    }
}
