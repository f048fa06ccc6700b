//! Core identifier types for the model-checking engine.
//!
//! Everything a single execution produces is keyed by small dense integers:
//! threads by [`ThreadId`], actions by their position in the execution's
//! action arena ([`ActionId`]), program memory by an opaque [`Location`]
//! key, and logical time by [`SeqNum`]. Keeping these as newtypes prevents
//! the classic index-confusion bugs in code that juggles three or four
//! parallel index spaces.

use core::fmt;

use serde::Serialize;

use crate::util::arena::ArenaKey;

/// Identifier of a modeled thread.
///
/// Thread ids are dense small integers handed out by the execution; the
/// synthetic model thread always has id 0 and is never scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ThreadId(u32);

impl ThreadId {
    /// The synthetic model-checker thread. Owns uninitialized writes.
    pub const MODEL: Self = Self(0);

    /// Creates a thread id from a raw index.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw dense index.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns true for the synthetic model thread.
    #[inline]
    #[must_use]
    pub const fn is_model(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Logical timestamp of an action: its position in the execution's total
/// order. Allocated from a single monotonically increasing counter.
///
/// Sequence number 0 is reserved: uninitialized pseudo-writes keep it, and
/// the fuzzer resets a postponed read's number to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SeqNum(u64);

impl SeqNum {
    /// The reserved initial clock value.
    pub const ZERO: Self = Self(0);

    /// Creates a sequence number from a raw counter value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True for the reserved initial clock.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque pointer-sized key identifying one memory location (an atomic
/// variable, a mutex, or a condition variable) in the modeled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Location(u64);

impl Location {
    /// Creates a location key from a raw address-like value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw key.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Index of an action in the execution's action arena.
///
/// All cross-references between actions (reads-from, release fences,
/// creation links) are stored as `ActionId`s; the actions themselves live
/// in one arena released wholesale when the execution is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ActionId(u32);

impl ActionId {
    /// Returns the raw arena index.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl ArenaKey for ActionId {
    #[inline]
    fn from_index(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(index as u32)
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// The value a modeled thread observes from an operation that produces
/// none (writes, fences, thread lifecycle events).
pub const VALUE_NONE: u64 = 0xdead_beef;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_thread_is_zero() {
        assert!(ThreadId::MODEL.is_model());
        assert!(!ThreadId::new(1).is_model());
    }

    #[test]
    fn seq_num_ordering() {
        assert!(SeqNum::new(1) < SeqNum::new(2));
        assert!(SeqNum::ZERO.is_zero());
        assert!(!SeqNum::new(3).is_zero());
    }

    #[test]
    fn action_id_round_trips_through_arena_key() {
        let id = ActionId::from_index(17);
        assert_eq!(id.index(), 17);
        assert_eq!(id.as_u32(), 17);
    }
}
