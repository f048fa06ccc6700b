//! Per-lock state and condition-variable waiter sets.
//!
//! The modeled program's mutexes and condvars are identified by their
//! [`Location`]; the engine tracks who holds each lock and which wait
//! actions are parked on each condvar. The lock state machine itself lives
//! in the engine; this module is the bookkeeping it runs against.

use std::collections::HashMap;

use crate::types::{ActionId, Location, ThreadId};

/// State of one modeled mutex.
#[derive(Debug, Default, Clone, Copy)]
pub struct MutexState {
    /// The thread currently holding the lock, if any.
    pub locked: Option<ThreadId>,
}

/// All mutex and condvar state for one execution.
#[derive(Debug, Default)]
pub struct MutexTable {
    mutexes: HashMap<Location, MutexState>,
    condvar_waiters: HashMap<Location, Vec<ActionId>>,
}

impl MutexTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The state of the mutex at `loc`, default-initialized on first use.
    pub fn state_mut(&mut self, loc: Location) -> &mut MutexState {
        self.mutexes.entry(loc).or_default()
    }

    /// The current holder of the mutex at `loc`.
    #[must_use]
    pub fn owner(&self, loc: Location) -> Option<ThreadId> {
        self.mutexes.get(&loc).and_then(|s| s.locked)
    }

    /// Parks a wait action on the condvar at `loc`.
    pub fn park_waiter(&mut self, loc: Location, wait: ActionId) {
        self.condvar_waiters.entry(loc).or_default().push(wait);
    }

    /// The wait actions currently parked on the condvar at `loc`.
    #[must_use]
    pub fn waiters(&self, loc: Location) -> &[ActionId] {
        self.condvar_waiters.get(&loc).map_or(&[], Vec::as_slice)
    }

    /// Mutable access for notify-one, whose selection policy owns removal.
    pub fn waiters_mut(&mut self, loc: Location) -> &mut Vec<ActionId> {
        self.condvar_waiters.entry(loc).or_default()
    }

    /// Empties the waiter list at `loc`, returning the parked actions.
    pub fn drain_waiters(&mut self, loc: Location) -> Vec<ActionId> {
        self.condvar_waiters.remove(&loc).unwrap_or_default()
    }
}
