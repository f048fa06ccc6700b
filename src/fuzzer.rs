//! The choice oracle for one execution.
//!
//! Wherever the memory model leaves slack, the engine asks the fuzzer:
//! which feasible write a read observes, which condvar waiter a notify-one
//! wakes, whether a wait actually parks or returns spuriously, and whether
//! a voluntary sleep is taken or cut short. An outer driver explores the
//! program by re-running it against different fuzzer decisions.
//!
//! Two implementations ship with the crate: [`RandomFuzzer`], which draws
//! every decision from a seeded deterministic generator, and
//! [`ScriptedFuzzer`], which replays a recorded decision sequence exactly
//! (and is what the tests and replay tooling use).

use std::collections::VecDeque;

use crate::action::Action;
use crate::types::ActionId;
use crate::util::det_rng::DetRng;

/// Decision points the engine delegates.
pub trait Fuzzer {
    /// Picks the index in `rf_set` of the write `read` observes, or `None`
    /// when no candidate is acceptable (the read becomes infeasible).
    fn select_write(&mut self, read: &Action, rf_set: &[ActionId]) -> Option<usize>;

    /// Picks and removes one parked waiter for a notify-one. The engine
    /// leaves waiter-list management to this policy.
    fn select_notify(&mut self, waiters: &mut Vec<ActionId>) -> Option<ActionId>;

    /// Whether a condvar wait actually parks (false models a spurious
    /// early return).
    fn should_wait(&mut self, wait: &Action) -> bool;

    /// Whether a voluntary sleep is taken at all.
    fn should_sleep(&mut self, sleep: &Action) -> bool;

    /// Whether a taken sleep should now be woken.
    fn should_wake(&mut self, sleep: &Action) -> bool;
}

/// Uniform random decisions from a seeded xorshift generator.
#[derive(Debug)]
pub struct RandomFuzzer {
    rng: DetRng,
}

impl RandomFuzzer {
    /// Creates a fuzzer drawing from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: DetRng::new(seed),
        }
    }
}

impl Fuzzer for RandomFuzzer {
    fn select_write(&mut self, _read: &Action, rf_set: &[ActionId]) -> Option<usize> {
        if rf_set.is_empty() {
            None
        } else {
            Some(self.rng.gen_index(rf_set.len()))
        }
    }

    fn select_notify(&mut self, waiters: &mut Vec<ActionId>) -> Option<ActionId> {
        if waiters.is_empty() {
            None
        } else {
            let i = self.rng.gen_index(waiters.len());
            Some(waiters.remove(i))
        }
    }

    fn should_wait(&mut self, _wait: &Action) -> bool {
        self.rng.gen_bool()
    }

    fn should_sleep(&mut self, _sleep: &Action) -> bool {
        true
    }

    fn should_wake(&mut self, _sleep: &Action) -> bool {
        self.rng.gen_bool()
    }
}

/// Replays a recorded decision sequence.
///
/// Each decision queue falls back to a fixed default when exhausted: reads
/// take candidate 0 (the newest feasible write found), notifies wake the
/// first waiter, waits park, sleeps are taken and never woken early. This
/// makes short scripts convenient: only the decisions a test cares about
/// need to be queued.
#[derive(Debug, Default)]
pub struct ScriptedFuzzer {
    write_choices: VecDeque<usize>,
    notify_choices: VecDeque<usize>,
    wait_choices: VecDeque<bool>,
    wake_choices: VecDeque<bool>,
}

impl ScriptedFuzzer {
    /// Creates a fuzzer with empty scripts (all defaults).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the rf candidate index for the next unscripted read.
    #[must_use]
    pub fn choose_write(mut self, index: usize) -> Self {
        self.write_choices.push_back(index);
        self
    }

    /// Queues the waiter index for the next notify-one.
    #[must_use]
    pub fn choose_notify(mut self, index: usize) -> Self {
        self.notify_choices.push_back(index);
        self
    }

    /// Queues whether the next wait parks.
    #[must_use]
    pub fn choose_wait(mut self, park: bool) -> Self {
        self.wait_choices.push_back(park);
        self
    }

    /// Queues whether the next wake check fires.
    #[must_use]
    pub fn choose_wake(mut self, wake: bool) -> Self {
        self.wake_choices.push_back(wake);
        self
    }
}

impl Fuzzer for ScriptedFuzzer {
    fn select_write(&mut self, _read: &Action, rf_set: &[ActionId]) -> Option<usize> {
        if rf_set.is_empty() {
            return None;
        }
        let choice = self.write_choices.pop_front().unwrap_or(0);
        // A script outliving its candidate set clamps to the newest
        // remaining candidate rather than failing the read.
        Some(choice.min(rf_set.len() - 1))
    }

    fn select_notify(&mut self, waiters: &mut Vec<ActionId>) -> Option<ActionId> {
        if waiters.is_empty() {
            return None;
        }
        let choice = self.notify_choices.pop_front().unwrap_or(0);
        Some(waiters.remove(choice.min(waiters.len() - 1)))
    }

    fn should_wait(&mut self, _wait: &Action) -> bool {
        self.wait_choices.pop_front().unwrap_or(true)
    }

    fn should_sleep(&mut self, _sleep: &Action) -> bool {
        true
    }

    fn should_wake(&mut self, _sleep: &Action) -> bool {
        self.wake_choices.pop_front().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind, MemOrder};
    use crate::types::{Location, ThreadId};
    use crate::util::arena::ArenaKey;

    fn read() -> Action {
        Action::memory(
            ActionKind::AtomicRead,
            MemOrder::Relaxed,
            Location::new(8),
            0,
            8,
            ThreadId::new(1),
        )
    }

    fn ids(n: usize) -> Vec<ActionId> {
        (0..n).map(ActionId::from_index).collect()
    }

    #[test]
    fn random_fuzzer_is_deterministic_per_seed() {
        let set = ids(5);
        let mut a = RandomFuzzer::new(11);
        let mut b = RandomFuzzer::new(11);
        for _ in 0..20 {
            assert_eq!(a.select_write(&read(), &set), b.select_write(&read(), &set));
        }
    }

    #[test]
    fn empty_rf_set_is_infeasible() {
        let mut fuzzer = RandomFuzzer::new(3);
        assert_eq!(fuzzer.select_write(&read(), &[]), None);
    }

    #[test]
    fn scripted_choices_replay_in_order() {
        let set = ids(3);
        let mut fuzzer = ScriptedFuzzer::new().choose_write(2).choose_write(1);
        assert_eq!(fuzzer.select_write(&read(), &set), Some(2));
        assert_eq!(fuzzer.select_write(&read(), &set), Some(1));
        // Exhausted script falls back to candidate 0.
        assert_eq!(fuzzer.select_write(&read(), &set), Some(0));
    }

    #[test]
    fn scripted_notify_removes_the_chosen_waiter() {
        let mut waiters = ids(2);
        let mut fuzzer = ScriptedFuzzer::new().choose_notify(1);
        let picked = fuzzer.select_notify(&mut waiters).unwrap();
        assert_eq!(picked, ActionId::from_index(1));
        assert_eq!(waiters, ids(1));
    }
}
