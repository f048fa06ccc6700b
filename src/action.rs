//! The unit of work the engine consumes: one atomic operation by one
//! modeled thread.
//!
//! An [`Action`] is a tagged record: the [`ActionKind`] says what the
//! operation is, the [`MemOrder`] says how strongly it orders, and a bag of
//! predicates (`is_read`, `is_release`, ...) gives the engine the exact
//! vocabulary the memory-model rules are written in. Instrumentation
//! constructs actions fully populated except for the sequence number and
//! clock vector, which the engine assigns exactly once when the action is
//! committed to the execution.

use core::fmt;

use serde::Serialize;

use crate::clock::ClockVector;
use crate::types::{ActionId, Location, SeqNum, ThreadId, VALUE_NONE};

/// What kind of operation an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    /// Plain atomic load.
    AtomicRead,
    /// Plain atomic store.
    AtomicWrite,
    /// The read half of an atomic read-modify-write.
    AtomicRmwr,
    /// The read half of a compare-and-swap; `value` carries the expected
    /// comparand, which may fail to match (a failing CAS).
    AtomicRmwrCas,
    /// The commit half of an RMW that did not write (failed CAS).
    AtomicRmwc,
    /// A completed read-modify-write (the merged pair).
    AtomicRmw,
    /// A non-atomic store converted lazily into the execution.
    NonatomicWrite,
    /// Synthetic initial value for a location, owned by the model thread.
    AtomicUninit,
    /// A memory fence; ordering strength comes from [`MemOrder`].
    Fence,
    /// Mutex acquisition.
    AtomicLock,
    /// Mutex acquisition attempt; never blocks.
    AtomicTrylock,
    /// Mutex release.
    AtomicUnlock,
    /// Condition-variable wait; `location` names the condvar and `value`
    /// the associated mutex location.
    AtomicWait,
    /// Condition-variable wait with a timeout; always released.
    AtomicTimedWait,
    /// Wake one condvar waiter.
    AtomicNotifyOne,
    /// Wake all condvar waiters.
    AtomicNotifyAll,
    /// First action of every modeled thread.
    ThreadStart,
    /// Spawn of a modeled thread.
    ThreadCreate,
    /// Join on a modeled thread.
    ThreadJoin,
    /// Final action of a modeled thread.
    ThreadFinish,
    /// Thread teardown variant that never finishes the whole execution.
    ThreadonlyFinish,
    /// Voluntary sleep; parks the thread in the scheduler's sleep set.
    ThreadSleep,
    /// Spawn through the pthread numbering layer.
    PthreadCreate,
    /// Join through the pthread numbering layer.
    PthreadJoin,
}

/// C/C++-style memory-order annotation, orthogonal to [`ActionKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MemOrder {
    Relaxed,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

/// Compares two values under an access size of 1, 2, 4 or 8 bytes.
///
/// # Panics
///
/// Panics on any other size; sizes outside the atomic access widths are a
/// caller bug.
#[must_use]
pub fn val_equals(a: u64, b: u64, size: u8) -> bool {
    match size {
        1 => (a as u8) == (b as u8),
        2 => (a as u16) == (b as u16),
        4 => (a as u32) == (b as u32),
        8 => a == b,
        _ => panic!("val_equals: unsupported access size {size}"),
    }
}

/// One atomic operation and its per-execution metadata.
///
/// Identity is `(tid, seq)`; the sequence number is unique across the
/// execution and assigned exactly once. Cross-references to other actions
/// are arena indices valid for the life of the execution.
#[derive(Debug, Clone)]
pub struct Action {
    kind: ActionKind,
    order: MemOrder,
    location: Option<Location>,
    value: u64,
    size: u8,
    tid: ThreadId,
    seq: SeqNum,
    cv: Option<ClockVector>,
    reads_from: Option<ActionId>,
    last_fence_release: Option<ActionId>,
    rfcv: Option<ClockVector>,
    thread_operand: Option<ThreadId>,
}

impl Action {
    /// Creates an atomic memory access (read, write, or RMW half).
    #[must_use]
    pub fn memory(
        kind: ActionKind,
        order: MemOrder,
        location: Location,
        value: u64,
        size: u8,
        tid: ThreadId,
    ) -> Self {
        Self {
            kind,
            order,
            location: Some(location),
            value,
            size,
            tid,
            seq: SeqNum::ZERO,
            cv: None,
            reads_from: None,
            last_fence_release: None,
            rfcv: None,
            thread_operand: None,
        }
    }

    /// Creates a fence. Fences carry no program location.
    #[must_use]
    pub fn fence(order: MemOrder, tid: ThreadId) -> Self {
        Self {
            kind: ActionKind::Fence,
            order,
            location: None,
            value: VALUE_NONE,
            size: 8,
            tid,
            seq: SeqNum::ZERO,
            cv: None,
            reads_from: None,
            last_fence_release: None,
            rfcv: None,
            thread_operand: None,
        }
    }

    /// Creates a mutex operation on `mutex`.
    #[must_use]
    pub fn mutex_op(kind: ActionKind, mutex: Location, tid: ThreadId) -> Self {
        debug_assert!(matches!(
            kind,
            ActionKind::AtomicLock
                | ActionKind::AtomicTrylock
                | ActionKind::AtomicUnlock
                | ActionKind::AtomicNotifyOne
                | ActionKind::AtomicNotifyAll
        ));
        Self {
            kind,
            order: MemOrder::SeqCst,
            location: Some(mutex),
            value: VALUE_NONE,
            size: 8,
            tid,
            seq: SeqNum::ZERO,
            cv: None,
            reads_from: None,
            last_fence_release: None,
            rfcv: None,
            thread_operand: None,
        }
    }

    /// Creates a condvar wait on `condvar` releasing `mutex`.
    #[must_use]
    pub fn wait(kind: ActionKind, condvar: Location, mutex: Location, tid: ThreadId) -> Self {
        debug_assert!(matches!(
            kind,
            ActionKind::AtomicWait | ActionKind::AtomicTimedWait
        ));
        Self {
            kind,
            order: MemOrder::SeqCst,
            location: Some(condvar),
            value: mutex.as_u64(),
            size: 8,
            tid,
            seq: SeqNum::ZERO,
            cv: None,
            reads_from: None,
            last_fence_release: None,
            rfcv: None,
            thread_operand: None,
        }
    }

    /// Creates a thread lifecycle action. Join-like kinds name the target
    /// thread in `operand`.
    #[must_use]
    pub fn thread_op(kind: ActionKind, tid: ThreadId, operand: Option<ThreadId>) -> Self {
        Self {
            kind,
            order: MemOrder::SeqCst,
            location: None,
            value: VALUE_NONE,
            size: 8,
            tid,
            seq: SeqNum::ZERO,
            cv: None,
            reads_from: None,
            last_fence_release: None,
            rfcv: None,
            thread_operand: operand,
        }
    }

    // === Accessors ===

    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    #[must_use]
    pub fn order(&self) -> MemOrder {
        self.order
    }

    #[must_use]
    pub fn location(&self) -> Option<Location> {
        self.location
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }

    #[must_use]
    pub fn size(&self) -> u8 {
        self.size
    }

    #[must_use]
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    #[must_use]
    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    #[must_use]
    pub fn cv(&self) -> Option<&ClockVector> {
        self.cv.as_ref()
    }

    #[must_use]
    pub fn reads_from(&self) -> Option<ActionId> {
        self.reads_from
    }

    #[must_use]
    pub fn last_fence_release(&self) -> Option<ActionId> {
        self.last_fence_release
    }

    #[must_use]
    pub fn rfcv(&self) -> Option<&ClockVector> {
        self.rfcv.as_ref()
    }

    #[must_use]
    pub fn thread_operand(&self) -> Option<ThreadId> {
        self.thread_operand
    }

    // === Engine-side initialization ===

    /// Assigns the sequence number. Called once by the engine; the fuzzer
    /// may later reset it to zero when postponing a thread.
    pub(crate) fn set_seq(&mut self, seq: SeqNum) {
        self.seq = seq;
    }

    /// Installs the clock vector. Set exactly once, on initialization.
    pub(crate) fn set_cv(&mut self, cv: ClockVector) {
        debug_assert!(self.cv.is_none(), "clock vector is write-once");
        self.cv = Some(cv);
    }

    /// Merges `other` into this action's clock vector. Returns whether the
    /// vector changed.
    ///
    /// # Panics
    ///
    /// Panics if the clock vector has not been installed yet.
    pub(crate) fn merge_cv(&mut self, other: &ClockVector) -> bool {
        self.cv
            .as_mut()
            .expect("merge_cv before clock vector initialization")
            .merge(other)
    }

    pub(crate) fn set_reads_from(&mut self, rf: ActionId) {
        self.reads_from = Some(rf);
    }

    pub(crate) fn set_last_fence_release(&mut self, fence: Option<ActionId>) {
        self.last_fence_release = fence;
    }

    /// Caches the release-sequence clock vector. Write-once: recomputation
    /// may pass the same value again, but never a different one.
    pub(crate) fn set_rfcv(&mut self, rfcv: Option<ClockVector>) {
        debug_assert!(
            self.rfcv.is_none() || self.rfcv == rfcv,
            "release-sequence cache is write-once"
        );
        self.rfcv = rfcv;
    }

    pub(crate) fn set_thread_operand(&mut self, operand: ThreadId) {
        self.thread_operand = Some(operand);
    }

    /// Records a trylock outcome; the value doubles as the return value.
    pub(crate) fn set_try_lock(&mut self, success: bool) {
        self.value = u64::from(success);
    }

    pub(crate) fn set_value(&mut self, value: u64) {
        self.value = value;
    }

    // === Kind predicates ===

    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicRead
                | ActionKind::AtomicRmwr
                | ActionKind::AtomicRmwrCas
                | ActionKind::AtomicRmw
        )
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicWrite
                | ActionKind::AtomicRmw
                | ActionKind::NonatomicWrite
                | ActionKind::AtomicUninit
        )
    }

    /// True for writes and for RMW read halves, which may yet become
    /// writes when they commit.
    #[must_use]
    pub fn could_be_write(&self) -> bool {
        self.is_write() || self.is_rmwr()
    }

    /// True for actions on an atomic variable (as opposed to mutexes,
    /// fences, and thread lifecycle events).
    #[must_use]
    pub fn is_atomic_var(&self) -> bool {
        self.is_read() || self.could_be_write()
    }

    #[must_use]
    pub fn is_rmwr(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicRmwr | ActionKind::AtomicRmwrCas
        )
    }

    #[must_use]
    pub fn is_rmwrcas(&self) -> bool {
        self.kind == ActionKind::AtomicRmwrCas
    }

    #[must_use]
    pub fn is_rmwc(&self) -> bool {
        self.kind == ActionKind::AtomicRmwc
    }

    #[must_use]
    pub fn is_rmw(&self) -> bool {
        self.kind == ActionKind::AtomicRmw
    }

    #[must_use]
    pub fn is_uninitialized(&self) -> bool {
        self.kind == ActionKind::AtomicUninit
    }

    #[must_use]
    pub fn is_fence(&self) -> bool {
        self.kind == ActionKind::Fence
    }

    #[must_use]
    pub fn is_lock(&self) -> bool {
        self.kind == ActionKind::AtomicLock
    }

    #[must_use]
    pub fn is_trylock(&self) -> bool {
        self.kind == ActionKind::AtomicTrylock
    }

    #[must_use]
    pub fn is_unlock(&self) -> bool {
        self.kind == ActionKind::AtomicUnlock
    }

    #[must_use]
    pub fn is_wait(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicWait | ActionKind::AtomicTimedWait
        )
    }

    #[must_use]
    pub fn is_notify(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicNotifyOne | ActionKind::AtomicNotifyAll
        )
    }

    #[must_use]
    pub fn is_mutex_op(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicLock
                | ActionKind::AtomicTrylock
                | ActionKind::AtomicUnlock
                | ActionKind::AtomicWait
                | ActionKind::AtomicTimedWait
                | ActionKind::AtomicNotifyOne
                | ActionKind::AtomicNotifyAll
        )
    }

    #[must_use]
    pub fn is_thread_start(&self) -> bool {
        self.kind == ActionKind::ThreadStart
    }

    #[must_use]
    pub fn is_thread_create(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::ThreadCreate | ActionKind::PthreadCreate
        )
    }

    #[must_use]
    pub fn is_thread_join(&self) -> bool {
        matches!(self.kind, ActionKind::ThreadJoin | ActionKind::PthreadJoin)
    }

    #[must_use]
    pub fn is_sleep(&self) -> bool {
        self.kind == ActionKind::ThreadSleep
    }

    // === Order predicates ===

    #[must_use]
    pub fn is_acquire(&self) -> bool {
        matches!(
            self.order,
            MemOrder::Acquire | MemOrder::AcqRel | MemOrder::SeqCst
        )
    }

    #[must_use]
    pub fn is_release(&self) -> bool {
        matches!(
            self.order,
            MemOrder::Release | MemOrder::AcqRel | MemOrder::SeqCst
        )
    }

    #[must_use]
    pub fn is_seqcst(&self) -> bool {
        self.order == MemOrder::SeqCst
    }

    // === Relations ===

    /// True when both actions touch the same variable. A condvar wait
    /// aliases its associated mutex, which lives in the wait's value slot.
    #[must_use]
    pub fn same_var(&self, other: &Action) -> bool {
        if self.is_wait() || other.is_wait() {
            if self.is_wait() && other.is_wait() && self.value == other.value {
                return true;
            }
            if self.is_wait() && other.location.map(Location::as_u64) == Some(self.value) {
                return true;
            }
            if other.is_wait() && self.location.map(Location::as_u64) == Some(other.value) {
                return true;
            }
        }
        self.location == other.location
    }

    /// True when `self` happens before `other`, i.e. `other`'s clock
    /// vector has observed `self`.
    #[must_use]
    pub fn happens_before(&self, other: &Action) -> bool {
        match other.cv() {
            Some(cv) => cv.synchronized_since(self.tid, self.seq),
            None => false,
        }
    }

    /// Could `other` (executed later by another thread) synchronize with a
    /// pending `self`? Used to decide whether a sleeping thread should be
    /// woken and its schedule re-explored.
    #[must_use]
    pub fn could_synchronize_with(&self, other: &Action) -> bool {
        if !self.same_var(other) {
            return false;
        }
        // Interleavings of seq-cst accesses matter regardless of kind:
        // they contend for a slot in the single total order.
        if (self.could_be_write() || other.could_be_write())
            && self.is_seqcst()
            && other.is_seqcst()
        {
            return true;
        }
        // Acquire read against a (potential) release write.
        if self.is_acquire() && self.is_read() && other.is_release() && other.could_be_write() {
            return true;
        }
        // A blocked lock against the release of that lock.
        if (self.is_lock() || self.is_trylock()) && (other.is_unlock() || other.is_wait()) {
            return true;
        }
        // A parked wait against a notify on its condvar.
        if self.is_wait() && other.is_notify() {
            return true;
        }
        false
    }

    /// Merges the commit half of an RMW into this action, which must be
    /// the read half issued earlier by the same thread. A plain commit
    /// (failed CAS) demotes the pair to an ordinary read; a writing commit
    /// promotes it to a full RMW carrying the new value.
    pub(crate) fn absorb_rmw_commit(&mut self, commit: &Action) {
        debug_assert!(self.is_rmwr());
        debug_assert_eq!(self.tid, commit.tid);
        self.order = commit.order;
        if commit.is_rmwc() {
            self.kind = ActionKind::AtomicRead;
        } else if commit.kind == ActionKind::AtomicRmw {
            self.kind = ActionKind::AtomicRmw;
            self.value = commit.value;
        }
    }

    /// Stable per-action hash folded into the trace hash of a summary.
    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut h = self.seq.as_u64();
        h = h
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(self.tid.as_usize() as u64);
        h ^= (self.kind as u64) << 32;
        h ^= (self.order as u64) << 40;
        h ^= self.location.map_or(0, Location::as_u64).rotate_left(17);
        h ^= self.value.rotate_left(33);
        h
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<5} {} {:?} {:?} loc={} val={:#x}",
            self.seq,
            self.tid,
            self.kind,
            self.order,
            self.location
                .map_or_else(|| "-".to_string(), |l| l.to_string()),
            self.value,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(x: u64) -> Location {
        Location::new(x)
    }

    fn tid(i: u32) -> ThreadId {
        ThreadId::new(i)
    }

    #[test]
    fn val_equals_is_exact_per_size() {
        assert!(val_equals(0x1_00, 0x2_00, 1)); // low byte equal
        assert!(!val_equals(0x1_01, 0x1_02, 1));
        assert!(val_equals(0xabcd_1234, 0xffff_1234, 2));
        assert!(!val_equals(0xabcd_1234, 0xabcd_1235, 4));
        assert!(val_equals(u64::MAX, u64::MAX, 8));
    }

    #[test]
    #[should_panic(expected = "unsupported access size")]
    fn val_equals_rejects_odd_sizes() {
        let _ = val_equals(1, 1, 3);
    }

    #[test]
    fn rmw_commit_promotes_read_half() {
        let mut rmwr = Action::memory(
            ActionKind::AtomicRmwr,
            MemOrder::AcqRel,
            loc(8),
            0,
            8,
            tid(1),
        );
        let commit = Action::memory(ActionKind::AtomicRmw, MemOrder::AcqRel, loc(8), 7, 8, tid(1));
        rmwr.absorb_rmw_commit(&commit);
        assert!(rmwr.is_rmw());
        assert_eq!(rmwr.value(), 7);
    }

    #[test]
    fn rmw_commit_demotes_failed_cas_to_read() {
        let mut rmwr = Action::memory(
            ActionKind::AtomicRmwrCas,
            MemOrder::SeqCst,
            loc(8),
            5,
            8,
            tid(1),
        );
        let commit = Action::memory(ActionKind::AtomicRmwc, MemOrder::SeqCst, loc(8), 0, 8, tid(1));
        rmwr.absorb_rmw_commit(&commit);
        assert_eq!(rmwr.kind(), ActionKind::AtomicRead);
        assert!(!rmwr.is_write());
    }

    #[test]
    fn happens_before_follows_clock_vectors() {
        let mut a = Action::memory(
            ActionKind::AtomicWrite,
            MemOrder::Relaxed,
            loc(4),
            1,
            4,
            tid(1),
        );
        a.set_seq(SeqNum::new(1));
        a.set_cv(ClockVector::from_parent(None, tid(1), SeqNum::new(1)));

        let mut b = Action::memory(
            ActionKind::AtomicRead,
            MemOrder::Relaxed,
            loc(4),
            0,
            4,
            tid(2),
        );
        b.set_seq(SeqNum::new(2));
        let mut cv = ClockVector::from_parent(None, tid(2), SeqNum::new(2));
        cv.merge(a.cv().unwrap());
        b.set_cv(cv);

        assert!(a.happens_before(&b));
        assert!(!b.happens_before(&a));
    }

    #[test]
    fn wait_aliases_its_mutex() {
        let wait = Action::wait(ActionKind::AtomicWait, loc(0x10), loc(0x20), tid(1));
        let unlock = Action::mutex_op(ActionKind::AtomicUnlock, loc(0x20), tid(2));
        assert!(wait.same_var(&unlock));
        let lock = Action::mutex_op(ActionKind::AtomicLock, loc(0x20), tid(2));
        assert!(lock.could_synchronize_with(&wait));
    }

    #[test]
    fn acquire_read_could_synchronize_with_release_write() {
        let read = Action::memory(
            ActionKind::AtomicRead,
            MemOrder::Acquire,
            loc(4),
            0,
            4,
            tid(1),
        );
        let write = Action::memory(
            ActionKind::AtomicWrite,
            MemOrder::Release,
            loc(4),
            1,
            4,
            tid(2),
        );
        assert!(read.could_synchronize_with(&write));
        let relaxed = Action::memory(
            ActionKind::AtomicWrite,
            MemOrder::Relaxed,
            loc(4),
            1,
            4,
            tid(2),
        );
        assert!(!read.could_synchronize_with(&relaxed));
    }
}
