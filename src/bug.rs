//! Bugs found while exploring one execution.
//!
//! A bug never unwinds the action pipeline: the execution keeps running to
//! completion or deadlock, bugs accumulate on the execution object, and
//! the outer driver decides when to stop. Kinds that make further
//! exploration of the schedule pointless (an infeasible read, a user
//! assertion) additionally raise the execution's assert flag.

use core::fmt;

use serde::Serialize;

/// Classification of a detected bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BugKind {
    /// A read had no feasible write to read from.
    InfeasibleRead,
    /// No thread is enabled but some thread still has work pending.
    Deadlock,
    /// Reported by the data-race detector.
    DataRace,
    /// An instrumented user assertion failed.
    AssertViolation,
}

impl BugKind {
    /// True for kinds that halt further exploration of this schedule.
    #[must_use]
    pub const fn raises_assert(&self) -> bool {
        matches!(self, Self::InfeasibleRead | Self::AssertViolation)
    }
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InfeasibleRead => "infeasible read",
            Self::Deadlock => "deadlock",
            Self::DataRace => "data race",
            Self::AssertViolation => "assertion violation",
        };
        f.write_str(name)
    }
}

/// One bug report: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bug {
    /// What class of bug this is.
    pub kind: BugKind,
    /// Description shown in the execution summary.
    pub message: String,
}

impl Bug {
    /// Creates a bug report.
    #[must_use]
    pub fn new(kind: BugKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Bug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Bug {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let bug = Bug::new(BugKind::Deadlock, "all threads blocked");
        assert_eq!(bug.to_string(), "deadlock: all threads blocked");
    }

    #[test]
    fn only_halting_kinds_raise_assert() {
        assert!(BugKind::InfeasibleRead.raises_assert());
        assert!(BugKind::AssertViolation.raises_assert());
        assert!(!BugKind::Deadlock.raises_assert());
        assert!(!BugKind::DataRace.raises_assert());
    }
}
