//! Per-thread logical-time vectors.
//!
//! A [`ClockVector`] summarizes, for one action, the latest sequence number
//! it has (transitively) observed from every thread. Happens-before queries
//! reduce to a single component comparison, and synchronization reduces to
//! a pointwise-max merge. Vectors grow lazily as thread ids appear.

use core::fmt;

use crate::types::{SeqNum, ThreadId};

/// A vector timestamp mapping thread id to the largest known sequence
/// number from that thread.
///
/// A vector is monotone over the life of its thread: merging only ever
/// raises components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockVector {
    clocks: Vec<u64>,
}

impl ClockVector {
    /// Creates an empty vector that knows about no thread.
    #[must_use]
    pub const fn new() -> Self {
        Self { clocks: Vec::new() }
    }

    /// Builds the clock vector for a fresh action: copy the parent's view,
    /// then bump the acting thread's own component to the action's
    /// sequence number.
    #[must_use]
    pub fn from_parent(parent: Option<&ClockVector>, tid: ThreadId, seq: SeqNum) -> Self {
        let mut clocks = parent.map_or_else(Vec::new, |p| p.clocks.clone());
        let i = tid.as_usize();
        if clocks.len() <= i {
            clocks.resize(i + 1, 0);
        }
        clocks[i] = seq.as_u64();
        Self { clocks }
    }

    /// Pointwise maximum: raises every component of `self` to at least the
    /// corresponding component of `other`. Returns whether anything
    /// changed.
    pub fn merge(&mut self, other: &ClockVector) -> bool {
        if other.clocks.len() > self.clocks.len() {
            self.clocks.resize(other.clocks.len(), 0);
        }
        let mut changed = false;
        for (mine, theirs) in self.clocks.iter_mut().zip(other.clocks.iter()) {
            if *theirs > *mine {
                *mine = *theirs;
                changed = true;
            }
        }
        changed
    }

    /// The largest sequence number observed from `tid` (0 when the thread
    /// is unknown to this vector).
    #[must_use]
    pub fn clock(&self, tid: ThreadId) -> SeqNum {
        SeqNum::new(self.clocks.get(tid.as_usize()).copied().unwrap_or(0))
    }

    /// True when an action `(tid, seq)` is within the history this vector
    /// has observed, i.e. the action happens before the owner of the
    /// vector.
    #[must_use]
    pub fn synchronized_since(&self, tid: ThreadId, seq: SeqNum) -> bool {
        match self.clocks.get(tid.as_usize()) {
            Some(&c) => seq.as_u64() <= c,
            None => false,
        }
    }

    /// Number of thread components this vector carries.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.clocks.len()
    }
}

impl Default for ClockVector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClockVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.clocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tid(i: u32) -> ThreadId {
        ThreadId::new(i)
    }

    #[test]
    fn from_parent_bumps_own_component() {
        let parent = ClockVector::from_parent(None, tid(1), SeqNum::new(3));
        let child = ClockVector::from_parent(Some(&parent), tid(1), SeqNum::new(5));
        assert_eq!(child.clock(tid(1)), SeqNum::new(5));
        assert_eq!(child.clock(tid(0)), SeqNum::ZERO);
    }

    #[test]
    fn merge_takes_pointwise_max() {
        let mut a = ClockVector::from_parent(None, tid(0), SeqNum::new(4));
        let b = ClockVector::from_parent(None, tid(2), SeqNum::new(9));
        assert!(a.merge(&b));
        assert_eq!(a.clock(tid(0)), SeqNum::new(4));
        assert_eq!(a.clock(tid(2)), SeqNum::new(9));
    }

    #[test]
    fn merge_reports_no_change_when_dominated() {
        let mut a = ClockVector::from_parent(None, tid(1), SeqNum::new(8));
        let b = ClockVector::from_parent(None, tid(1), SeqNum::new(2));
        assert!(!a.merge(&b));
        assert_eq!(a.clock(tid(1)), SeqNum::new(8));
    }

    #[test]
    fn synchronized_since_unknown_thread_is_false() {
        let cv = ClockVector::from_parent(None, tid(0), SeqNum::new(1));
        assert!(!cv.synchronized_since(tid(7), SeqNum::new(1)));
    }

    fn arb_clock_vector() -> impl Strategy<Value = ClockVector> {
        prop::collection::vec(0u64..100, 0..8).prop_map(|clocks| ClockVector { clocks })
    }

    proptest! {
        // Pointwise max is idempotent: merging a vector into itself is a no-op.
        #[test]
        fn merge_self_is_noop(cv in arb_clock_vector()) {
            let mut merged = cv.clone();
            prop_assert!(!merged.merge(&cv));
            prop_assert_eq!(merged, cv);
        }

        // Merge never lowers a component.
        #[test]
        fn merge_is_monotone(a in arb_clock_vector(), b in arb_clock_vector()) {
            let mut merged = a.clone();
            merged.merge(&b);
            for i in 0..8u32 {
                prop_assert!(merged.clock(ThreadId::new(i)) >= a.clock(ThreadId::new(i)));
                prop_assert!(merged.clock(ThreadId::new(i)) >= b.clock(ThreadId::new(i)));
            }
        }

        // Merge is commutative up to equality of the result.
        #[test]
        fn merge_is_commutative(a in arb_clock_vector(), b in arb_clock_vector()) {
            let mut ab = a.clone();
            ab.merge(&b);
            let mut ba = b.clone();
            ba.merge(&a);
            for i in 0..8u32 {
                prop_assert_eq!(ab.clock(ThreadId::new(i)), ba.clock(ThreadId::new(i)));
            }
        }
    }
}
