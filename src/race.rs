//! Data-race detector seam.
//!
//! The engine is not a race detector; it only guarantees the detector gets
//! a callback at every committed read and write, with enough context to
//! run its own vector-clock analysis. Whatever the detector reports is
//! appended to the execution's bug list.

use crate::bug::Bug;
use crate::types::{Location, SeqNum, ThreadId};

/// Callbacks invoked at every memory access the engine commits.
pub trait RaceDetector {
    /// Called after a write (including RMW commits) is indexed.
    fn on_atomic_write(
        &mut self,
        loc: Location,
        tid: ThreadId,
        value: u64,
        seq: SeqNum,
    ) -> Option<Bug>;

    /// Called after a read commits its reads-from choice.
    fn on_atomic_read(
        &mut self,
        loc: Location,
        tid: ThreadId,
        value: u64,
        seq: SeqNum,
    ) -> Option<Bug>;
}

/// A detector that never reports anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRaceDetector;

impl RaceDetector for NoopRaceDetector {
    fn on_atomic_write(
        &mut self,
        _loc: Location,
        _tid: ThreadId,
        _value: u64,
        _seq: SeqNum,
    ) -> Option<Bug> {
        None
    }

    fn on_atomic_read(
        &mut self,
        _loc: Location,
        _tid: ThreadId,
        _value: u64,
        _seq: SeqNum,
    ) -> Option<Bug> {
        None
    }
}
