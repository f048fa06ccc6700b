//! Layered views over the actions of one execution.
//!
//! The engine answers "newest write at this location from that thread" and
//! "last seq-cst fence before this one" constantly, so actions are indexed
//! four ways as they commit: the total trace, per location, per location
//! per thread, and writes per location per thread. All lists stay sorted
//! by sequence number because insertion is by append; the one exception is
//! the lazy conversion of non-atomic stores, which splices into the middle
//! by exact sequence-number match.
//!
//! Fences carry no program location, so they get a dedicated trace instead
//! of a sentinel key.

use std::collections::HashMap;

use crate::action::Action;
use crate::clock::ClockVector;
use crate::types::{ActionId, Location, SeqNum, ThreadId};
use crate::util::arena::Arena;

/// Splices `id` (with sequence number `seq`) into `list`, which is sorted
/// by sequence number. An empty list or a matching tail appends; otherwise
/// the action lands directly after the newest entry sharing its sequence
/// number (ties break by arrival order).
///
/// # Panics
///
/// Panics when no entry carries the matching sequence number: the caller
/// produced a stamp that does not correspond to any indexed action.
fn insert_into_action_list(
    list: &mut Vec<ActionId>,
    id: ActionId,
    seq: SeqNum,
    actions: &Arena<ActionId, Action>,
) {
    match list.last() {
        None => list.push(id),
        Some(&last) if actions[last].seq() == seq => list.push(id),
        _ => {
            for i in (0..list.len()).rev() {
                if actions[list[i]].seq() == seq {
                    list.insert(i + 1, id);
                    return;
                }
            }
            panic!("insert_into_action_list: no action with seq {seq} to anchor on");
        }
    }
}

/// The index tables for one execution.
#[derive(Debug, Default)]
pub struct ActionIndex {
    /// Total order of every action, by sequence number.
    action_trace: Vec<ActionId>,
    /// Location -> every action at that location.
    obj_map: HashMap<Location, Vec<ActionId>>,
    /// Location -> per-thread ordered actions at that location.
    obj_thrd_map: HashMap<Location, Vec<Vec<ActionId>>>,
    /// Location -> per-thread ordered writes at that location.
    obj_wr_thrd_map: HashMap<Location, Vec<Vec<ActionId>>>,
    /// Location -> most recent seq-cst write.
    obj_last_sc_map: HashMap<Location, ActionId>,
    /// Thread -> most recent action.
    thrd_last_action: Vec<Option<ActionId>>,
    /// Thread -> most recent release fence.
    thrd_last_fence_release: Vec<Option<ActionId>>,
    /// Every fence, in trace order.
    fence_trace: Vec<ActionId>,
}

fn ensure_threads(lists: &mut Vec<Vec<ActionId>>, num_threads: usize) {
    if lists.len() < num_threads {
        lists.resize_with(num_threads, Vec::new);
    }
}

impl ActionIndex {
    /// Creates empty index tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a freshly initialized action: total trace, per-location and
    /// per-location-per-thread views, last-action and release-fence
    /// tracking. A condvar wait is additionally indexed under its mutex so
    /// lock bookkeeping sees it.
    pub fn add_action(
        &mut self,
        id: ActionId,
        actions: &Arena<ActionId, Action>,
        num_threads: usize,
    ) {
        let act = &actions[id];
        let tid = act.tid().as_usize();

        self.action_trace.push(id);

        if let Some(loc) = act.location() {
            self.obj_map.entry(loc).or_default().push(id);
            let lists = self.obj_thrd_map.entry(loc).or_default();
            ensure_threads(lists, num_threads.max(tid + 1));
            lists[tid].push(id);
        }

        if self.thrd_last_action.len() <= tid {
            self.thrd_last_action.resize(num_threads.max(tid + 1), None);
        }
        self.thrd_last_action[tid] = Some(id);

        if act.is_fence() {
            self.fence_trace.push(id);
            if act.is_release() {
                if self.thrd_last_fence_release.len() <= tid {
                    self.thrd_last_fence_release
                        .resize(num_threads.max(tid + 1), None);
                }
                self.thrd_last_fence_release[tid] = Some(id);
            }
        }

        if act.is_wait() {
            let mutex_loc = Location::new(act.value());
            self.obj_map.entry(mutex_loc).or_default().push(id);
            let lists = self.obj_thrd_map.entry(mutex_loc).or_default();
            ensure_threads(lists, num_threads.max(tid + 1));
            lists[tid].push(id);
        }
    }

    /// Indexes a write into the writes-per-thread view.
    pub fn add_write(
        &mut self,
        id: ActionId,
        actions: &Arena<ActionId, Action>,
        num_threads: usize,
    ) {
        let act = &actions[id];
        let loc = act
            .location()
            .expect("writes always carry a program location");
        let tid = act.tid().as_usize();
        let lists = self.obj_wr_thrd_map.entry(loc).or_default();
        ensure_threads(lists, num_threads.max(tid + 1));
        lists[tid].push(id);
    }

    /// Front-inserts the synthetic uninitialized write that seeds a
    /// location's history. The model thread owns it and it predates every
    /// real action, so it lands at the head of each list.
    pub fn add_uninit(&mut self, id: ActionId, actions: &Arena<ActionId, Action>) {
        let act = &actions[id];
        let loc = act
            .location()
            .expect("uninitialized writes carry a location");
        let tid = act.tid().as_usize();

        self.obj_map.entry(loc).or_default().insert(0, id);

        let wr_lists = self.obj_wr_thrd_map.entry(loc).or_default();
        ensure_threads(wr_lists, tid + 1);
        wr_lists[tid].insert(0, id);

        self.action_trace.insert(0, id);

        let lists = self.obj_thrd_map.entry(loc).or_default();
        ensure_threads(lists, tid + 1);
        lists[tid].insert(0, id);

        if self.thrd_last_action.len() <= tid {
            self.thrd_last_action.resize(tid + 1, None);
        }
        self.thrd_last_action[tid] = Some(id);
    }

    /// Splices a lazily converted non-atomic store into the middle of the
    /// trace and per-location views, anchored on its borrowed sequence
    /// number, and gives it a clock vector inherited from its anchor.
    pub fn add_normal_write(
        &mut self,
        id: ActionId,
        actions: &mut Arena<ActionId, Action>,
        num_threads: usize,
    ) {
        let (loc, tid, seq) = {
            let act = &actions[id];
            (
                act.location().expect("stores carry a location"),
                act.tid(),
                act.seq(),
            )
        };

        // Anchor in the total trace and inherit the anchor's clock vector.
        let cv = match self.action_trace.last() {
            None => ClockVector::from_parent(None, tid, seq),
            Some(&last) if actions[last].seq() == seq => {
                let parent = actions[last].cv();
                let cv = ClockVector::from_parent(parent, tid, seq);
                self.action_trace.push(id);
                cv
            }
            _ => {
                let mut anchored = None;
                for i in (0..self.action_trace.len()).rev() {
                    if actions[self.action_trace[i]].seq() == seq {
                        let parent = actions[self.action_trace[i]].cv();
                        anchored = Some(ClockVector::from_parent(parent, tid, seq));
                        self.action_trace.insert(i + 1, id);
                        break;
                    }
                }
                anchored.unwrap_or_else(|| {
                    panic!("non-atomic store with seq {seq} has no anchor in the trace")
                })
            }
        };
        actions[id].set_cv(cv);

        insert_into_action_list(self.obj_map.entry(loc).or_default(), id, seq, actions);

        let lists = self.obj_thrd_map.entry(loc).or_default();
        ensure_threads(lists, num_threads.max(tid.as_usize() + 1));
        insert_into_action_list(&mut lists[tid.as_usize()], id, seq, actions);

        if let Some(Some(last)) = self.thrd_last_action.get(tid.as_usize()) {
            if actions[*last].seq() == seq {
                self.thrd_last_action[tid.as_usize()] = Some(id);
            }
        }
    }

    /// Sizes the per-thread lists at `loc` for the current thread count,
    /// so modification-order walks can index any live thread.
    pub fn ensure_thread_lists(&mut self, loc: Location, num_threads: usize) {
        let lists = self.obj_thrd_map.entry(loc).or_default();
        ensure_threads(lists, num_threads);
    }

    /// Drops the newest action from a thread's per-location list; used
    /// when a read is redundant with an earlier same-thread rf choice.
    pub fn prune_read(&mut self, loc: Location, tid: ThreadId) {
        if let Some(lists) = self.obj_thrd_map.get_mut(&loc) {
            if let Some(list) = lists.get_mut(tid.as_usize()) {
                list.pop();
            }
        }
    }

    // === Queries ===

    /// The total action trace in sequence order.
    #[must_use]
    pub fn action_trace(&self) -> &[ActionId] {
        &self.action_trace
    }

    /// Every action at `loc`, in sequence order.
    #[must_use]
    pub fn obj_list(&self, loc: Location) -> &[ActionId] {
        self.obj_map.get(&loc).map_or(&[], Vec::as_slice)
    }

    /// Number of per-thread lists tracked for `loc`.
    #[must_use]
    pub fn thread_lists_len(&self, loc: Location) -> usize {
        self.obj_thrd_map.get(&loc).map_or(0, Vec::len)
    }

    /// Actions at `loc` by thread index `tid`, oldest first.
    #[must_use]
    pub fn thread_list(&self, loc: Location, tid: usize) -> &[ActionId] {
        self.obj_thrd_map
            .get(&loc)
            .and_then(|lists| lists.get(tid))
            .map_or(&[], Vec::as_slice)
    }

    /// Number of per-thread write lists tracked for `loc`.
    #[must_use]
    pub fn write_lists_len(&self, loc: Location) -> usize {
        self.obj_wr_thrd_map.get(&loc).map_or(0, Vec::len)
    }

    /// Writes at `loc` by thread index `tid`, oldest first.
    #[must_use]
    pub fn write_list(&self, loc: Location, tid: usize) -> &[ActionId] {
        self.obj_wr_thrd_map
            .get(&loc)
            .and_then(|lists| lists.get(tid))
            .map_or(&[], Vec::as_slice)
    }

    /// Most recent seq-cst write at `loc`.
    #[must_use]
    pub fn last_seq_cst_write(&self, loc: Location) -> Option<ActionId> {
        self.obj_last_sc_map.get(&loc).copied()
    }

    pub fn set_last_seq_cst_write(&mut self, loc: Location, id: ActionId) {
        self.obj_last_sc_map.insert(loc, id);
    }

    /// Most recent action of `tid`.
    #[must_use]
    pub fn last_action(&self, tid: ThreadId) -> Option<ActionId> {
        self.thrd_last_action.get(tid.as_usize()).copied().flatten()
    }

    /// Most recent release fence of `tid`.
    #[must_use]
    pub fn last_fence_release(&self, tid: ThreadId) -> Option<ActionId> {
        self.thrd_last_fence_release
            .get(tid.as_usize())
            .copied()
            .flatten()
    }

    /// The last seq-cst fence of `tid`, searching the whole fence trace or
    /// only the prefix strictly before `before_fence`.
    #[must_use]
    pub fn last_seq_cst_fence(
        &self,
        tid: ThreadId,
        before_fence: Option<ActionId>,
        actions: &Arena<ActionId, Action>,
    ) -> Option<ActionId> {
        let mut end = self.fence_trace.len();
        if let Some(before) = before_fence {
            let pos = self
                .fence_trace
                .iter()
                .rposition(|&f| f == before)
                .expect("before_fence must be an indexed fence");
            end = pos;
        }
        self.fence_trace[..end]
            .iter()
            .rev()
            .copied()
            .find(|&f| actions[f].tid() == tid && actions[f].is_seqcst())
    }
}
