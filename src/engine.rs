//! The per-execution state machine.
//!
//! [`ModelExecution`] consumes a sequential stream of [`Action`]s from an
//! outer driver and maintains everything one schedule needs: sequence
//! numbering, clock vectors, the reads-from relation, the modification
//! order graph, the action indexes, mutex/condvar state, and the modeled
//! threads. After construction the sole entry point is
//! [`ModelExecution::take_step`]; every call commits exactly one action
//! and returns either the thread that must run next or `None` to defer to
//! the scheduler.
//!
//! The engine is single-threaded and cooperative. Suspension of a modeled
//! thread is just a return to the driver: nothing here blocks, and all
//! per-execution records are released together when the value is dropped.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::action::{val_equals, Action, ActionKind};
use crate::bug::{Bug, BugKind};
use crate::clock::ClockVector;
use crate::config::ExecutionConfig;
use crate::fuzzer::{Fuzzer, RandomFuzzer};
use crate::graph::CycleGraph;
use crate::index::ActionIndex;
use crate::mutex::MutexTable;
use crate::race::{NoopRaceDetector, RaceDetector};
use crate::scheduler::{Scheduler, SleepSetScheduler};
use crate::thread::{Thread, ThreadState};
use crate::types::{ActionId, Location, SeqNum, ThreadId, VALUE_NONE};
use crate::util::arena::Arena;

/// A plain store observed before the location became atomic, waiting to be
/// converted into the execution lazily.
#[derive(Debug, Clone, Copy)]
struct NonatomicStore {
    tid: ThreadId,
    seq: SeqNum,
    value: u64,
    size: u8,
}

/// One execution of the modeled program.
pub struct ModelExecution {
    config: ExecutionConfig,
    actions: Arena<ActionId, Action>,
    threads: Vec<Thread>,
    index: ActionIndex,
    mo_graph: CycleGraph,
    mutexes: MutexTable,
    scheduler: Box<dyn Scheduler>,
    fuzzer: Box<dyn Fuzzer>,
    race_detector: Box<dyn RaceDetector>,
    used_sequence_numbers: u64,
    pthread_counter: u32,
    pthread_map: Vec<Option<ThreadId>>,
    nonatomic_stores: HashMap<Location, NonatomicStore>,
    bugs: Vec<Bug>,
    asserted: bool,
    finished: bool,
    init_thread: Option<ThreadId>,
    execution_number: u32,
}

impl ModelExecution {
    /// Creates an execution with the default collaborators: a
    /// [`SleepSetScheduler`], a [`RandomFuzzer`] seeded from the config,
    /// and no race detection.
    #[must_use]
    pub fn new(config: ExecutionConfig) -> Self {
        let seed = config.seed;
        Self::with_parts(
            config,
            Box::new(SleepSetScheduler::new()),
            Box::new(RandomFuzzer::new(seed)),
            Box::new(NoopRaceDetector),
        )
    }

    /// Creates an execution with explicit collaborators.
    #[must_use]
    pub fn with_parts(
        config: ExecutionConfig,
        scheduler: Box<dyn Scheduler>,
        fuzzer: Box<dyn Fuzzer>,
        race_detector: Box<dyn RaceDetector>,
    ) -> Self {
        let mut exec = Self {
            config,
            actions: Arena::new(),
            threads: Vec::new(),
            index: ActionIndex::new(),
            mo_graph: CycleGraph::new(),
            mutexes: MutexTable::new(),
            scheduler,
            fuzzer,
            race_detector,
            used_sequence_numbers: 0,
            pthread_counter: 1,
            pthread_map: Vec::new(),
            nonatomic_stores: HashMap::new(),
            bugs: Vec::new(),
            asserted: false,
            finished: false,
            init_thread: None,
            execution_number: 0,
        };
        // The model thread owns uninitialized writes and never runs.
        exec.threads
            .push(Thread::new(ThreadId::MODEL, ThreadState::Model));
        exec
    }

    /// Creates the first user thread. Called once by the driver before the
    /// first `take_step`; when this thread finishes, the execution is
    /// finished.
    pub fn create_initial_thread(&mut self) -> ThreadId {
        debug_assert!(self.init_thread.is_none(), "initial thread created twice");
        let tid = self.alloc_thread();
        self.scheduler.add_thread(tid);
        self.init_thread = Some(tid);
        tid
    }

    fn alloc_thread(&mut self) -> ThreadId {
        let tid = ThreadId::new(self.threads.len() as u32);
        self.threads.push(Thread::new(tid, ThreadState::Ready));
        tid
    }

    // === Small accessors ===

    /// The action stored under `id`.
    #[must_use]
    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id]
    }

    /// The total action trace, in sequence order.
    #[must_use]
    pub fn action_trace(&self) -> &[ActionId] {
        self.index.action_trace()
    }

    /// The modification-order graph.
    #[must_use]
    pub fn mo_graph(&self) -> &CycleGraph {
        &self.mo_graph
    }

    /// The thread record for `tid`.
    #[must_use]
    pub fn thread(&self, tid: ThreadId) -> &Thread {
        &self.threads[tid.as_usize()]
    }

    /// Number of threads, the model thread included.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Resolves a user-visible pthread number to its thread.
    #[must_use]
    pub fn get_pthread(&self, pthread_id: u32) -> Option<ThreadId> {
        self.pthread_map
            .get(pthread_id as usize)
            .copied()
            .flatten()
    }

    /// The most recent seq-cst write at `loc`, if any.
    #[must_use]
    pub fn last_seq_cst_write(&self, loc: Location) -> Option<ActionId> {
        self.index.last_seq_cst_write(loc)
    }

    /// Bugs reported so far in this execution.
    #[must_use]
    pub fn bugs(&self) -> &[Bug] {
        &self.bugs
    }

    /// True when any bug has been reported.
    #[must_use]
    pub fn have_bug_reports(&self) -> bool {
        !self.bugs.is_empty()
    }

    /// True once the execution hit a halting condition (infeasible read or
    /// user assertion). The driver inspects this after every step.
    #[must_use]
    pub fn has_asserted(&self) -> bool {
        self.asserted
    }

    /// Raises the halting flag.
    pub fn set_assert(&mut self) {
        self.asserted = true;
    }

    /// Records a user assertion failure and halts the schedule.
    pub fn assert_bug(&mut self, message: impl Into<String>) {
        self.bugs.push(Bug::new(BugKind::AssertViolation, message));
        self.set_assert();
    }

    /// True once the initial thread has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The driver-assigned number of this execution, used in dump
    /// filenames.
    #[must_use]
    pub fn execution_number(&self) -> u32 {
        self.execution_number
    }

    /// Sets the driver-assigned execution number.
    pub fn set_execution_number(&mut self, number: u32) {
        self.execution_number = number;
    }

    /// True when the thread can still make progress.
    #[must_use]
    pub fn is_enabled(&self, tid: ThreadId) -> bool {
        self.scheduler.is_enabled(tid)
    }

    /// True when only sleep-set threads remain runnable.
    #[must_use]
    pub fn all_threads_sleeping(&self) -> bool {
        self.scheduler.all_threads_sleeping()
    }

    /// Asks the scheduler for the next thread to run.
    pub fn select_next_thread(&mut self) -> Option<ThreadId> {
        self.scheduler.next_thread()
    }

    /// Removes and returns a suspended thread's pending action so the
    /// driver can resubmit it.
    pub fn take_pending(&mut self, tid: ThreadId) -> Option<Action> {
        self.threads[tid.as_usize()].take_pending()
    }

    /// Hands back a sequence number when the fuzzer postpones a thread
    /// whose action was already stamped.
    pub fn restore_last_seq_num(&mut self) {
        self.used_sequence_numbers -= 1;
    }

    /// Registers a plain (non-atomic) store seen by instrumentation before
    /// the location was touched atomically. The first atomic read at the
    /// location converts it into the execution.
    pub fn note_nonatomic_store(
        &mut self,
        loc: Location,
        tid: ThreadId,
        seq: SeqNum,
        value: u64,
        size: u8,
    ) {
        self.nonatomic_stores.insert(
            loc,
            NonatomicStore {
                tid,
                seq,
                value,
                size,
            },
        );
    }

    fn next_seq_num(&mut self) -> SeqNum {
        self.used_sequence_numbers += 1;
        SeqNum::new(self.used_sequence_numbers)
    }

    /// The action a fresh action of `tid` inherits its clock vector from:
    /// the thread's last action, or its creation.
    #[must_use]
    pub fn parent_action(&self, tid: ThreadId) -> Option<ActionId> {
        self.index
            .last_action(tid)
            .or_else(|| self.threads[tid.as_usize()].creation())
    }

    /// The clock vector of `tid`'s most recent action.
    #[must_use]
    pub fn get_cv(&self, tid: ThreadId) -> Option<&ClockVector> {
        self.parent_action(tid)
            .and_then(|id| self.actions[id].cv())
    }

    /// The last action of `tid`, if any.
    #[must_use]
    pub fn last_action(&self, tid: ThreadId) -> Option<ActionId> {
        self.index.last_action(tid)
    }

    // === Enablement and suspension ===

    /// Whether `curr` can execute right now: its lock is free, its join
    /// target has finished, and a voluntary sleep is sanctioned by the
    /// fuzzer.
    pub fn check_action_enabled(&mut self, curr: &Action) -> bool {
        if curr.is_lock() {
            let loc = curr.location().expect("locks carry a location");
            if self.mutexes.owner(loc).is_some() {
                return false;
            }
        } else if curr.is_thread_join() {
            match self.join_target_of(curr) {
                Some(target) => {
                    if !self.threads[target.as_usize()].is_complete() {
                        return false;
                    }
                }
                None => return false,
            }
        } else if curr.is_sleep() && !self.fuzzer.should_sleep(curr) {
            return false;
        }
        true
    }

    fn join_target_of(&self, curr: &Action) -> Option<ThreadId> {
        match curr.kind() {
            ActionKind::ThreadJoin => curr.thread_operand(),
            ActionKind::PthreadJoin => curr
                .thread_operand()
                .or_else(|| self.get_pthread(curr.value() as u32)),
            _ => None,
        }
    }

    /// Suspends the acting thread on an action that
    /// [`check_action_enabled`](Self::check_action_enabled) rejected. The
    /// action is parked as the thread's pending step; the thread is woken
    /// when its lock is released or its join target completes.
    pub fn suspend_pending(&mut self, action: Action) {
        let tid = action.tid();
        let target = if action.is_lock() {
            let loc = action.location().expect("locks carry a location");
            self.mutexes.owner(loc)
        } else if action.is_thread_join() {
            self.join_target_of(&action)
        } else {
            None
        };
        trace!(thread = %tid, waiting_on = ?target, "suspending thread on pending action");
        let thread = &mut self.threads[tid.as_usize()];
        thread.set_waiting_on(target);
        thread.set_pending(action);
        thread.set_state(ThreadState::Blocked);
        self.scheduler.sleep(tid);
    }

    fn wake_thread(&mut self, tid: ThreadId) {
        self.scheduler.wake(tid);
        let thread = &mut self.threads[tid.as_usize()];
        thread.set_state(ThreadState::Ready);
        thread.set_waiting_on(None);
    }

    // === End-of-execution queries ===

    /// True when no thread is enabled but some user thread still has a
    /// pending action. Only meaningful at the end of an execution.
    #[must_use]
    pub fn is_deadlocked(&self) -> bool {
        let mut blocking_threads = false;
        for thread in &self.threads {
            if self.scheduler.is_enabled(thread.id()) {
                return false;
            }
            if !thread.is_model_thread() && thread.pending().is_some() {
                blocking_threads = true;
            }
        }
        blocking_threads
    }

    /// True when every thread ran to completion, as opposed to the sleep
    /// set forcing a redundant schedule.
    #[must_use]
    pub fn is_complete_execution(&self) -> bool {
        self.threads
            .iter()
            .all(|t| !self.scheduler.is_enabled(t.id()))
    }

    // === The step loop ===

    /// Commits one action. Preconditions: the acting thread is ready and
    /// the action is enabled. Returns the thread that must run next (an
    /// uncommitted RMW pair or a freshly created thread pins the choice),
    /// or `None` to let the scheduler pick.
    pub fn take_step(&mut self, curr: Action) -> Option<ThreadId> {
        let tid = curr.tid();
        assert_eq!(
            self.threads[tid.as_usize()].state(),
            ThreadState::Ready,
            "take_step on a thread that is not ready"
        );
        assert!(
            self.check_action_enabled(&curr),
            "take_step on a disabled action"
        );

        let id = self.check_current_action(curr);

        let thread = &self.threads[tid.as_usize()];
        if thread.is_blocked() || thread.is_complete() {
            self.scheduler.remove_thread(tid);
        }

        self.action_select_next_thread(id)
    }

    /// The dispatch for one action: merge RMW commits, stamp and index new
    /// actions, wake sleepers, resolve reads, and run the per-kind state
    /// machines.
    fn check_current_action(&mut self, curr: Action) -> ActionId {
        let second_part_of_rmw = curr.is_rmwc() || curr.is_rmw();

        let (id, newly_explored) = if second_part_of_rmw {
            (self.process_rmw(&curr), false)
        } else {
            (self.initialize_curr_action(curr), true)
        };

        trace!(action = %self.actions[id], "processing action");

        self.wake_up_sleeping_actions(id);

        if !second_part_of_rmw {
            self.add_uninit_action_to_lists(id);
        }

        let rf_set = if newly_explored && self.actions[id].is_read() {
            Some(self.build_may_read_from(id))
        } else {
            None
        };

        if self.actions[id].is_read() && !second_part_of_rmw {
            let rf_set = rf_set.expect("reads always get a candidate set");
            self.process_read(id, rf_set);
        } else {
            debug_assert!(rf_set.is_none());
        }

        if !second_part_of_rmw {
            self.index.add_action(id, &self.actions, self.threads.len());
        }

        // A committed RMW becomes a write only now, so this is not guarded
        // by second_part_of_rmw.
        if self.actions[id].is_write() {
            self.index.add_write(id, &self.actions, self.threads.len());
        }

        self.process_thread_action(id);

        if self.actions[id].is_write() {
            self.process_write(id);
        }

        if self.actions[id].is_fence() {
            self.process_fence(id);
        }

        if self.actions[id].is_mutex_op() {
            self.process_mutex(id);
        }

        id
    }

    /// Stamps a fresh action: sequence number, clock vector inherited from
    /// the thread's parent action, and the thread's current release fence.
    fn initialize_curr_action(&mut self, mut curr: Action) -> ActionId {
        let tid = curr.tid();
        let seq = self.next_seq_num();
        curr.set_seq(seq);

        let parent_cv = self
            .parent_action(tid)
            .and_then(|p| self.actions[p].cv())
            .cloned();
        curr.set_cv(ClockVector::from_parent(parent_cv.as_ref(), tid, seq));
        curr.set_last_fence_release(self.index.last_fence_release(tid));

        self.actions.alloc(curr)
    }

    /// Merges an RMW commit into the read half issued earlier by the same
    /// thread. A successful commit makes the pair MO-adjacent to its rf.
    fn process_rmw(&mut self, commit: &Action) -> ActionId {
        let tid = commit.tid();
        let lastread = self
            .index
            .last_action(tid)
            .expect("RMW commit without a preceding read half");
        self.actions[lastread].absorb_rmw_commit(commit);
        if commit.kind() == ActionKind::AtomicRmw {
            if let Some(rf) = self.actions[lastread].reads_from() {
                self.mo_graph.add_rmw_edge(rf, lastread);
            }
        }
        lastread
    }

    // === Sleep-set wakeup ===

    /// Should `curr` wake the sleeping thread `tid`? A sleeper wakes when
    /// its pending action could synchronize with `curr`, when a release
    /// arrives for its acquire fence or acquire read, or when the fuzzer
    /// cuts a voluntary sleep short. Partial RMWs never wake anyone.
    fn should_wake_up(&mut self, curr_id: ActionId, tid: ThreadId) -> bool {
        let curr = &self.actions[curr_id];
        if curr.is_rmwr() {
            return false;
        }
        let Some(asleep) = self.threads[tid.as_usize()].pending() else {
            return false;
        };
        // Synchronizing actions may have been backtracked.
        if asleep.could_synchronize_with(curr) {
            return true;
        }
        if asleep.is_fence() && asleep.is_acquire() && curr.is_release() {
            return true;
        }
        // A release fence plus a plain store can wake a load-acquire on
        // the same location.
        if asleep.is_read() && asleep.is_acquire() && curr.same_var(asleep) && curr.is_write() {
            if let Some(fence_release) = self.index.last_fence_release(curr.tid()) {
                let last = self.index.last_action(tid);
                if last.is_none_or(|l| self.actions[l].seq() < self.actions[fence_release].seq()) {
                    return true;
                }
            }
        }
        if asleep.is_sleep() {
            let asleep = self.threads[tid.as_usize()]
                .pending()
                .expect("pending checked above");
            if self.fuzzer.should_wake(asleep) {
                return true;
            }
        }
        false
    }

    fn wake_up_sleeping_actions(&mut self, curr_id: ActionId) {
        for i in 0..self.threads.len() {
            let tid = ThreadId::new(i as u32);
            if !self.scheduler.is_sleep_set(tid) {
                continue;
            }
            if self.should_wake_up(curr_id, tid) {
                debug!(thread = %tid, "waking thread from sleep set");
                self.scheduler.remove_sleep(tid);
                let thread = &mut self.threads[i];
                thread.set_state(ThreadState::Ready);
                if thread.pending().is_some_and(Action::is_sleep) {
                    thread.set_wakeup_state(true);
                }
            }
        }
    }

    // === Uninitialized locations ===

    /// Seeds a location's history with a synthetic uninitialized write the
    /// first time an atomic action touches it, and sizes the per-thread
    /// lists for the acting thread.
    fn add_uninit_action_to_lists(&mut self, curr_id: ActionId) {
        let (loc, size, is_atomic) = {
            let act = &self.actions[curr_id];
            match act.location() {
                Some(loc) => (loc, act.size(), act.is_atomic_var()),
                None => return,
            }
        };

        if is_atomic && self.index.obj_list(loc).is_empty() {
            let mut uninit = Action::memory(
                ActionKind::AtomicUninit,
                crate::action::MemOrder::Relaxed,
                loc,
                self.config.uninit_value,
                size,
                ThreadId::MODEL,
            );
            uninit.set_cv(ClockVector::from_parent(
                None,
                ThreadId::MODEL,
                SeqNum::ZERO,
            ));
            let uninit_id = self.actions.alloc(uninit);
            self.index.add_uninit(uninit_id, &self.actions);
            trace!(location = %loc, "seeded uninitialized write");
        }

        self.index.ensure_thread_lists(loc, self.threads.len());
    }

    // === Reads ===

    /// Builds the set of writes `curr` may read from: per thread, newest
    /// first, stopping at the first write sequenced before the read. A
    /// seq-cst read is restricted to the last seq-cst write at the
    /// location, other seq-cst writes, and writes not ordered before the
    /// last seq-cst write; a write already consumed by an RMW is off
    /// limits to a second RMW unless the CAS would fail anyway.
    #[must_use]
    pub fn build_may_read_from(&self, curr_id: ActionId) -> Vec<ActionId> {
        let curr = &self.actions[curr_id];
        debug_assert!(curr.is_read());
        let loc = curr.location().expect("reads carry a location");

        let last_sc_write = if curr.is_seqcst() {
            self.index.last_seq_cst_write(loc)
        } else {
            None
        };

        let mut rf_set = Vec::new();
        for t in 0..self.index.write_lists_len(loc) {
            for &act_id in self.index.write_list(loc, t).iter().rev() {
                if act_id == curr_id {
                    continue;
                }
                let act = &self.actions[act_id];

                let mut allow_read = true;

                // A seq-cst read may not skip over the last seq-cst write.
                if curr.is_seqcst()
                    && (act.is_seqcst()
                        || last_sc_write
                            .is_some_and(|lsc| act.happens_before(&self.actions[lsc])))
                    && Some(act_id) != last_sc_write
                {
                    allow_read = false;
                }

                // No two RMWs may read the same value; a failing CAS is
                // exempt because it never writes.
                if curr.is_rmwr()
                    && (!curr.is_rmwrcas()
                        || val_equals(curr.value(), act.value(), curr.size()))
                    && self.mo_graph.has_rmw(act_id)
                {
                    allow_read = false;
                }

                if allow_read {
                    rf_set.push(act_id);
                }

                // At most one write per thread that happens before curr.
                if act.happens_before(curr) {
                    break;
                }
            }
        }
        trace!(
            action = %self.actions[curr_id],
            candidates = rf_set.len(),
            "built may-read-from set"
        );
        rf_set
    }

    /// The fuzzer-guided rf-choice loop. Candidates that would close an MO
    /// cycle are discarded and another choice is made; a committed choice
    /// installs the rf link, the MO edges it implies, and (for acquire
    /// reads) the release sequence's clock vector. Returns false when no
    /// feasible write remains, which marks the execution infeasible.
    fn process_read(&mut self, curr_id: ActionId, mut rf_set: Vec<ActionId>) -> bool {
        let loc = self.actions[curr_id]
            .location()
            .expect("reads carry a location");

        if let Some(store) = self.nonatomic_stores.remove(&loc) {
            let converted = self.convert_nonatomic_store(loc, store);
            rf_set.push(converted);
        }

        let mut priorset: SmallVec<[ActionId; 8]> = SmallVec::new();
        loop {
            let index = self
                .fuzzer
                .select_write(&self.actions[curr_id], &rf_set);
            let Some(index) = index else {
                debug!(action = %self.actions[curr_id], "no feasible write for read");
                self.bugs.push(Bug::new(
                    BugKind::InfeasibleRead,
                    format!("read {} has no feasible write", self.actions[curr_id]),
                ));
                self.set_assert();
                return false;
            };

            let rf = rf_set[index];
            priorset.clear();
            let mut canprune = false;
            if self.r_modification_order(curr_id, rf, &mut priorset, &mut canprune, false) {
                for &prior in &priorset {
                    self.mo_graph.add_edge(prior, rf);
                }
                self.read_from(curr_id, rf);
                let value = self.return_value_of(curr_id);
                let tid = self.actions[curr_id].tid();
                self.threads[tid.as_usize()].set_return_value(value);

                if let Some(bug) = self.race_detector.on_atomic_read(
                    loc,
                    tid,
                    value,
                    self.actions[curr_id].seq(),
                ) {
                    self.bugs.push(bug);
                }

                // A plain read dominated by an earlier same-thread read of
                // the same write is pruned from the per-thread index.
                if canprune && self.actions[curr_id].kind() == ActionKind::AtomicRead {
                    self.index.prune_read(loc, tid);
                }
                debug!(
                    read = %self.actions[curr_id],
                    rf = %self.actions[rf],
                    "committed reads-from choice"
                );
                return true;
            }
            trace!(
                rf = %self.actions[rf],
                "rf candidate rejected: would close an MO cycle"
            );
            rf_set.swap_remove(index);
        }
    }

    /// Installs the rf link and, for acquire reads, merges the release
    /// sequence's clock vector into the reader.
    fn read_from(&mut self, act_id: ActionId, rf_id: ActionId) {
        debug_assert!(self.actions[rf_id].is_write());
        self.actions[act_id].set_reads_from(rf_id);
        if self.actions[act_id].is_acquire() {
            if let Some(cv) = self.get_hb_from_write(rf_id) {
                self.actions[act_id].merge_cv(&cv);
            }
        }
    }

    /// The value the acting thread observes from `id`.
    #[must_use]
    pub fn return_value_of(&self, id: ActionId) -> u64 {
        let act = &self.actions[id];
        if act.is_read() {
            act.reads_from()
                .map_or(VALUE_NONE, |rf| self.actions[rf].value())
        } else if act.is_trylock() {
            act.value()
        } else {
            VALUE_NONE
        }
    }

    // === Modification-order constraints ===

    /// Collects the MO edges a read at `curr_id` reading from `rf_id`
    /// implies. Walking each thread's actions at the location newest
    /// first: a prior write sequenced before the read must come before the
    /// rf in MO; a prior read's rf must too. Seq-cst fences pin further
    /// writes per the C++ fence rules. Returns false as soon as an implied
    /// edge would close an MO cycle.
    ///
    /// With `check_only` the acceptance answer is computed without
    /// touching `priorset` or `canprune`, so a check followed by a real
    /// run yields identical results.
    pub fn r_modification_order(
        &self,
        curr_id: ActionId,
        rf_id: ActionId,
        priorset: &mut SmallVec<[ActionId; 8]>,
        canprune: &mut bool,
        check_only: bool,
    ) -> bool {
        let curr = &self.actions[curr_id];
        debug_assert!(curr.is_read());
        let loc = curr.location().expect("reads carry a location");
        let nthreads = self.index.thread_lists_len(loc);
        if nthreads == 0 {
            return true;
        }

        // Last SC fence in the reading thread.
        let last_sc_fence_local = self
            .index
            .last_seq_cst_fence(curr.tid(), None, &self.actions);

        let mut tid = curr.tid().as_usize() % nthreads;
        let mut prev_same_thread: Option<ActionId> = None;

        for i in 0..nthreads {
            let t = ThreadId::new(tid as u32);

            // Last SC fence in thread `t`.
            let last_sc_fence_thread_local = if i == 0 {
                None
            } else {
                self.index.last_seq_cst_fence(t, None, &self.actions)
            };

            // Last SC fence in thread `t` before the local SC fence.
            let last_sc_fence_thread_before = last_sc_fence_local
                .and_then(|local| self.index.last_seq_cst_fence(t, Some(local), &self.actions));

            // Skip the thread when nothing new happened-before since the
            // previous same-thread anchor and no SC fence intervened.
            if let Some(prev) = prev_same_thread {
                let prev_act = &self.actions[prev];
                let hb_unchanged = prev_act
                    .cv()
                    .is_some_and(|cv| cv.clock(t) == curr.cv().expect("curr has a cv").clock(t));
                let no_new_fence = last_sc_fence_thread_local
                    .is_none_or(|f| self.actions[f].seq() < prev_act.seq());
                if hb_unchanged && no_new_fence {
                    tid = if tid + 1 == nthreads { 0 } else { tid + 1 };
                    continue;
                }
            }

            for &act_id in self.index.thread_list(loc, tid).iter().rev() {
                if act_id == curr_id {
                    continue;
                }
                let act = &self.actions[act_id];

                // No reflexive edge on the rf itself.
                if act_id == rf_id {
                    if act.happens_before(curr) {
                        break;
                    }
                    continue;
                }

                if act.is_write() {
                    let pinned = if curr.is_seqcst()
                        && last_sc_fence_thread_local
                            .is_some_and(|f| act.seq() < self.actions[f].seq())
                    {
                        // C++, 29.3 statement 5.
                        true
                    } else if act.is_seqcst()
                        && last_sc_fence_local
                            .is_some_and(|f| act.seq() < self.actions[f].seq())
                    {
                        // C++, 29.3 statement 4.
                        true
                    } else {
                        // C++, 29.3 statement 6.
                        last_sc_fence_thread_before
                            .is_some_and(|f| act.seq() < self.actions[f].seq())
                    };
                    if pinned {
                        if self.mo_graph.check_reachable(rf_id, act_id) {
                            return false;
                        }
                        if !check_only {
                            priorset.push(act_id);
                        }
                        break;
                    }
                }

                // At most one action per thread that happens before curr.
                if act.happens_before(curr) {
                    if i == 0
                        && last_sc_fence_local
                            .is_none_or(|f| self.actions[f].seq() < act.seq())
                    {
                        prev_same_thread = Some(act_id);
                    }
                    if act.is_write() {
                        if self.mo_graph.check_reachable(rf_id, act_id) {
                            return false;
                        }
                        if !check_only {
                            priorset.push(act_id);
                        }
                    } else {
                        match act.reads_from() {
                            Some(prevrf) if prevrf != rf_id => {
                                if self.mo_graph.check_reachable(rf_id, prevrf) {
                                    return false;
                                }
                                if !check_only {
                                    priorset.push(prevrf);
                                }
                            }
                            Some(_) => {
                                if act.tid() == curr.tid() && !check_only {
                                    *canprune = true;
                                }
                            }
                            // A read that never resolved constrains nothing.
                            None => {}
                        }
                    }
                    break;
                }
            }

            tid = if tid + 1 == nthreads { 0 } else { tid + 1 };
        }
        true
    }

    /// Collects and commits the MO edges a write implies: the previous
    /// seq-cst write at the location for seq-cst writes, writes pinned by
    /// seq-cst fences, and per thread the newest action sequenced before
    /// the write (a write directly, a read through its rf). A committed
    /// RMW skips the walk; its edges came with the RMW edge.
    fn w_modification_order(&mut self, curr_id: ActionId) {
        let (loc, tid, is_seqcst, curr_is_rmw, curr_rf) = {
            let curr = &self.actions[curr_id];
            debug_assert!(curr.is_write());
            (
                curr.location().expect("writes carry a location"),
                curr.tid(),
                curr.is_seqcst(),
                curr.is_rmw(),
                curr.reads_from(),
            )
        };

        let mut edgeset: SmallVec<[ActionId; 8]> = SmallVec::new();

        if is_seqcst {
            // The new write is ordered after the previous seq-cst write.
            if let Some(last_seq_cst) = self.index.last_seq_cst_write(loc) {
                edgeset.push(last_seq_cst);
            }
            self.index.set_last_seq_cst_write(loc, curr_id);
        }

        let last_sc_fence_local = self.index.last_seq_cst_fence(tid, None, &self.actions);

        let nthreads = self.index.thread_lists_len(loc);
        for i in 0..nthreads {
            let t = ThreadId::new(i as u32);
            let last_sc_fence_thread_before = if t != tid {
                last_sc_fence_local
                    .and_then(|local| self.index.last_seq_cst_fence(t, Some(local), &self.actions))
            } else {
                None
            };

            for &act_id in self.index.thread_list(loc, i).iter().rev() {
                if act_id == curr_id {
                    // A committed RMW is already pinned next to its rf; an
                    // uncommitted one takes any edge it can get.
                    if curr_is_rmw {
                        if curr_rf.is_some() {
                            break;
                        }
                        continue;
                    }
                    continue;
                }
                let act = &self.actions[act_id];

                // C++, 29.3 statement 7.
                if act.is_write()
                    && last_sc_fence_thread_before
                        .is_some_and(|f| act.seq() < self.actions[f].seq())
                {
                    edgeset.push(act_id);
                    break;
                }

                // At most one action per thread that happens before curr.
                if act.happens_before(&self.actions[curr_id]) {
                    if act.is_write() {
                        edgeset.push(act_id);
                    } else if let Some(prevrf) = act.reads_from() {
                        edgeset.push(prevrf);
                    }
                    break;
                }
            }
        }

        self.mo_graph.add_edges(&edgeset, curr_id);
    }

    fn process_write(&mut self, curr_id: ActionId) {
        self.w_modification_order(curr_id);
        let (loc, tid, value, seq) = {
            let act = &self.actions[curr_id];
            (
                act.location().expect("writes carry a location"),
                act.tid(),
                act.value(),
                act.seq(),
            )
        };
        if let Some(bug) = self.race_detector.on_atomic_write(loc, tid, value, seq) {
            self.bugs.push(bug);
        }
        self.threads[tid.as_usize()].set_return_value(VALUE_NONE);
    }

    // === Release sequences ===

    /// The clock vector an acquiring read or fence inherits by reading
    /// from `rf_id`: walk the RMW chain back to its release root, then
    /// accumulate forward, caching the result on each RMW as `rfcv`. A
    /// non-release write contributes through its thread's last release
    /// fence, if any.
    pub fn get_hb_from_write(&mut self, rf_id: ActionId) -> Option<ClockVector> {
        // Walk backward while the chain is made of relaxed/release-only
        // RMWs without a cached vector.
        let mut chain: Vec<ActionId> = Vec::new();
        let mut node = rf_id;
        loop {
            let act = &self.actions[node];
            debug_assert!(act.is_write());
            if !act.is_rmw() || (act.is_acquire() && act.is_release()) || act.rfcv().is_some() {
                break;
            }
            chain.push(node);
            match act.reads_from() {
                Some(prev) => node = prev,
                None => {
                    chain.pop();
                    break;
                }
            }
        }

        // Accumulate forward from the chain's root.
        let mut vec: Option<ClockVector> = None;
        let mut i = chain.len();
        loop {
            let (cached, is_acq, is_rel, is_rmw, fence, cv) = {
                let act = &self.actions[node];
                (
                    act.rfcv().cloned(),
                    act.is_acquire(),
                    act.is_release(),
                    act.is_rmw(),
                    act.last_fence_release(),
                    act.cv().cloned(),
                )
            };
            if let Some(cached) = cached {
                vec = Some(cached);
            } else if is_acq && is_rel {
                vec = cv;
            } else if is_rel && !is_rmw {
                vec = cv;
            } else if is_rel {
                // A release RMW extends the sequence: fold its own clock
                // into whatever the chain has accumulated.
                let mut merged = vec.take().unwrap_or_default();
                if let Some(cv) = cv {
                    merged.merge(&cv);
                }
                self.actions[node].set_rfcv(Some(merged.clone()));
                vec = Some(merged);
            } else {
                // Not a release: the write passes on its thread's last
                // release fence, if it had one.
                if let Some(fence) = fence {
                    if let Some(fence_cv) = self.actions[fence].cv().cloned() {
                        match vec.as_mut() {
                            None => vec = Some(fence_cv),
                            Some(v) => {
                                v.merge(&fence_cv);
                            }
                        }
                    }
                }
                self.actions[node].set_rfcv(vec.clone());
            }

            if i == 0 {
                break;
            }
            i -= 1;
            node = chain[i];
        }
        vec
    }

    /// Acquire fences synthesize release sequences for every non-acquire
    /// read sequenced before them, back to the thread's start or its
    /// previous acquire fence. Relaxed and release fences are handled by
    /// indexing alone; seq-cst fence constraints live in the modification
    /// order walks.
    fn process_fence(&mut self, curr_id: ActionId) -> bool {
        let mut updated = false;
        if !self.actions[curr_id].is_acquire() {
            return false;
        }
        let tid = self.actions[curr_id].tid();

        for i in (0..self.index.action_trace().len()).rev() {
            let act_id = self.index.action_trace()[i];
            if act_id == curr_id {
                continue;
            }
            let (act_tid, is_start, is_fence, is_acquire, is_read, rf) = {
                let act = &self.actions[act_id];
                (
                    act.tid(),
                    act.is_thread_start(),
                    act.is_fence(),
                    act.is_acquire(),
                    act.is_read(),
                    act.reads_from(),
                )
            };
            if act_tid != tid {
                continue;
            }
            if is_start {
                break;
            }
            if is_fence && is_acquire {
                break;
            }
            if !is_read {
                continue;
            }
            // A read-acquire found its own release sequence already.
            if is_acquire {
                continue;
            }
            if let Some(rf) = rf {
                if let Some(cv) = self.get_hb_from_write(rf) {
                    if self.actions[curr_id].merge_cv(&cv) {
                        updated = true;
                    }
                }
            }
        }
        updated
    }

    // === Mutexes and condvars ===

    /// Wakes every thread blocked on a lock held by `owner`.
    fn wake_lock_waiters(&mut self, owner: ThreadId) {
        let to_wake: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|t| {
                t.waiting_on() == Some(owner) && t.pending().is_some_and(Action::is_lock)
            })
            .map(Thread::id)
            .collect();
        for tid in to_wake {
            self.wake_thread(tid);
        }
    }

    fn do_lock(&mut self, curr_id: ActionId, loc: Location, tid: ThreadId) {
        self.mutexes.state_mut(loc).locked = Some(tid);
        // Synchronize with the previous unlock (or wait) on this mutex.
        let last_unlock = self
            .index
            .obj_list(loc)
            .iter()
            .rev()
            .copied()
            .find(|&a| self.actions[a].is_unlock() || self.actions[a].is_wait());
        if let Some(unlock) = last_unlock {
            self.synchronize(unlock, curr_id);
        }
    }

    /// The lock/condvar state machine.
    fn process_mutex(&mut self, curr_id: ActionId) {
        let (kind, loc, value, tid) = {
            let act = &self.actions[curr_id];
            (
                act.kind(),
                act.location().expect("mutex ops carry a location"),
                act.value(),
                act.tid(),
            )
        };

        match kind {
            ActionKind::AtomicTrylock => {
                let success = self.mutexes.owner(loc).is_none();
                self.actions[curr_id].set_try_lock(success);
                self.threads[tid.as_usize()].set_return_value(u64::from(success));
                if success {
                    // A successful trylock behaves exactly like a lock.
                    self.do_lock(curr_id, loc, tid);
                }
            }
            ActionKind::AtomicLock => {
                debug_assert!(self.mutexes.owner(loc).is_none(), "lock taken while held");
                self.do_lock(curr_id, loc, tid);
            }
            ActionKind::AtomicWait => {
                let mutex_loc = Location::new(value);
                // Threads queued on the mutex get a chance before we park.
                self.wake_lock_waiters(tid);
                self.mutexes.state_mut(mutex_loc).locked = None;

                let should_wait = self.fuzzer.should_wait(&self.actions[curr_id]);
                if should_wait {
                    self.mutexes.park_waiter(loc, curr_id);
                    self.scheduler.sleep(tid);
                    self.threads[tid.as_usize()].set_state(ThreadState::Blocked);
                }
                // Otherwise the wait returns spuriously and the thread
                // goes straight back to relocking.
            }
            ActionKind::AtomicTimedWait | ActionKind::AtomicUnlock => {
                // A timed wait always releases; its sleep/retry behavior
                // is the fuzzer's business, not the lock's.
                let mutex_loc = if kind == ActionKind::AtomicTimedWait {
                    Location::new(value)
                } else {
                    loc
                };
                self.wake_lock_waiters(tid);
                self.mutexes.state_mut(mutex_loc).locked = None;
            }
            ActionKind::AtomicNotifyAll => {
                let waiters = self.mutexes.drain_waiters(loc);
                for wait_id in waiters {
                    let wtid = self.actions[wait_id].tid();
                    self.wake_thread(wtid);
                }
            }
            ActionKind::AtomicNotifyOne => {
                let picked = self.fuzzer.select_notify(self.mutexes.waiters_mut(loc));
                if let Some(wait_id) = picked {
                    let wtid = self.actions[wait_id].tid();
                    self.wake_thread(wtid);
                }
            }
            _ => unreachable!("process_mutex on a non-mutex action"),
        }
    }

    // === Thread lifecycle ===

    /// The thread state machine: creation allocates and schedules a new
    /// thread, join synchronizes with the target's last action, finish
    /// completes the thread and wakes its joiners, sleep parks the thread
    /// in the sleep set.
    fn process_thread_action(&mut self, curr_id: ActionId) {
        let kind = self.actions[curr_id].kind();
        let tid = self.actions[curr_id].tid();

        match kind {
            ActionKind::ThreadCreate | ActionKind::PthreadCreate => {
                let new_tid = self.alloc_thread();
                self.actions[curr_id].set_thread_operand(new_tid);
                self.scheduler.add_thread(new_tid);
                self.threads[new_tid.as_usize()].set_creation(curr_id);
                if kind == ActionKind::PthreadCreate {
                    let pthread_id = self.pthread_counter;
                    self.pthread_counter += 1;
                    if self.pthread_map.len() <= pthread_id as usize {
                        self.pthread_map.resize(pthread_id as usize + 1, None);
                    }
                    self.pthread_map[pthread_id as usize] = Some(new_tid);
                    self.actions[curr_id].set_value(u64::from(pthread_id));
                }
                debug!(parent = %tid, child = %new_tid, "created thread");
            }
            ActionKind::ThreadJoin | ActionKind::PthreadJoin => {
                let target = self
                    .join_target_of(&self.actions[curr_id])
                    .expect("join without a resolvable target");
                self.actions[curr_id].set_thread_operand(target);
                if let Some(last) = self.index.last_action(target) {
                    self.synchronize(last, curr_id);
                }
            }
            ActionKind::ThreadFinish | ActionKind::ThreadonlyFinish => {
                if kind == ActionKind::ThreadFinish && Some(tid) == self.init_thread {
                    self.threads[tid.as_usize()].complete();
                    self.finished = true;
                    return;
                }
                // Wake any threads joining on us.
                let joiners: Vec<ThreadId> = self
                    .threads
                    .iter()
                    .filter(|t| {
                        t.waiting_on() == Some(tid)
                            && t.pending().is_some_and(Action::is_thread_join)
                    })
                    .map(Thread::id)
                    .collect();
                for joiner in joiners {
                    self.wake_thread(joiner);
                }
                self.threads[tid.as_usize()].complete();
            }
            ActionKind::ThreadStart => {
                // Explicitly nothing: the start action exists to anchor
                // the thread's first clock vector.
            }
            ActionKind::ThreadSleep => {
                let pending = self.actions[curr_id].clone();
                let thread = &mut self.threads[tid.as_usize()];
                thread.set_pending(pending);
                thread.set_state(ThreadState::Sleeping);
                self.scheduler.add_sleep(tid);
            }
            _ => {}
        }
    }

    /// When A synchronizes with B, B inherits A's clock vector.
    ///
    /// # Panics
    ///
    /// Panics when `second` precedes `first` in the execution order; that
    /// is a corrupted schedule, not a recoverable condition.
    fn synchronize(&mut self, first: ActionId, second: ActionId) {
        assert!(
            self.actions[first].seq() <= self.actions[second].seq(),
            "synchronizing against execution order"
        );
        if let Some(cv) = self.actions[first].cv().cloned() {
            self.actions[second].merge_cv(&cv);
        }
    }

    // === Scheduling handoff ===

    /// True when the fuzzer postponed this read: its sequence number was
    /// handed back.
    #[must_use]
    pub fn paused_by_fuzzer(&self, id: ActionId) -> bool {
        debug_assert!(self.actions[id].is_read());
        self.actions[id].seq().is_zero()
    }

    /// An RMW pair may not be split, and a created thread runs next;
    /// otherwise the scheduler decides.
    fn action_select_next_thread(&mut self, curr_id: ActionId) -> Option<ThreadId> {
        let curr = &self.actions[curr_id];
        if curr.is_rmwr() && !self.paused_by_fuzzer(curr_id) {
            return Some(curr.tid());
        }
        if matches!(
            curr.kind(),
            ActionKind::ThreadCreate | ActionKind::PthreadCreate
        ) {
            return curr.thread_operand();
        }
        None
    }

    // === Non-atomic store conversion ===

    /// Materializes a registered plain store as a relaxed write, splicing
    /// it into the indexes at its original timestamp and constraining it
    /// in MO like any other write.
    fn convert_nonatomic_store(&mut self, loc: Location, store: NonatomicStore) -> ActionId {
        let mut act = Action::memory(
            ActionKind::NonatomicWrite,
            crate::action::MemOrder::Relaxed,
            loc,
            store.value,
            store.size,
            store.tid,
        );
        act.set_seq(store.seq);
        let id = self.actions.alloc(act);
        self.index
            .add_normal_write(id, &mut self.actions, self.threads.len());
        self.index.add_write(id, &self.actions, self.threads.len());
        self.w_modification_order(id);
        id
    }

    // === Graph dumps ===

    /// Writes `exec<NNNN>.dot` (modification order only) and
    /// `graph<NNNN>.dot` (modification order plus rf and sb edges) into
    /// the configured dump directory. A no-op when dumping is off.
    pub fn dump_graphs(&self) -> io::Result<()> {
        let Some(dir) = &self.config.graph_dir else {
            return Ok(());
        };
        let n = self.execution_number;

        let name = format!("exec{n:04}");
        let mut file = File::create(dir.join(format!("{name}.dot")))?;
        self.mo_graph.write_dot(&mut file, &name, &self.actions)?;

        let name = format!("graph{n:04}");
        let mut file = File::create(dir.join(format!("{name}.dot")))?;
        writeln!(file, "digraph {name} {{")?;
        self.mo_graph.write_dot_nodes(&mut file, &self.actions)?;
        let mut last_in_thread: Vec<Option<SeqNum>> = vec![None; self.threads.len()];
        for &id in self.index.action_trace() {
            let act = &self.actions[id];
            if act.is_read() {
                if let Some(rf) = act.reads_from() {
                    writeln!(file, "N{} [label=\"N{}: {} {:?}\"];", act.seq(), act.seq(), act.tid(), act.kind())?;
                    writeln!(
                        file,
                        "N{} -> N{} [label=\"rf\", color=red, weight=2];",
                        self.actions[rf].seq(),
                        act.seq()
                    )?;
                }
            }
            let slot = &mut last_in_thread[act.tid().as_usize()];
            if let Some(prev) = slot {
                writeln!(
                    file,
                    "N{} -> N{} [label=\"sb\", color=blue, weight=400];",
                    prev,
                    act.seq()
                )?;
            }
            *slot = Some(act.seq());
        }
        writeln!(file, "}}")
    }

    /// Renders the end-of-execution summary and, when dumping is
    /// configured, writes the dot files alongside it.
    pub fn print_summary(&self) -> io::Result<String> {
        self.dump_graphs()?;
        Ok(crate::report::ExecutionReport::from_execution(self).render())
    }
}

impl std::fmt::Debug for ModelExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelExecution")
            .field("actions", &self.actions.len())
            .field("threads", &self.threads.len())
            .field("bugs", &self.bugs.len())
            .field("asserted", &self.asserted)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
