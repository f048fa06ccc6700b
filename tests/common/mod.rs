//! Shared test driver: a minimal outer driver that feeds scripted
//! programs into the engine one action at a time, playing the role the
//! real exploration driver has in production.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Once;

use atomlab::{
    Action, ActionId, ActionKind, ExecutionConfig, Fuzzer, Location, MemOrder, ModelExecution,
    NoopRaceDetector, RandomFuzzer, ScriptedFuzzer, SleepSetScheduler, ThreadId,
};

/// Installs a test subscriber once per process; `RUST_LOG` controls
/// verbosity.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One scripted program step. Threads are named by their index into the
/// driver's script table; thread 0 is the initial thread.
#[derive(Debug, Clone)]
pub enum Op {
    Start,
    Load(MemOrder, u64),
    Store(MemOrder, u64, u64),
    Cas {
        order: MemOrder,
        loc: u64,
        expected: u64,
        new: u64,
    },
    FetchAdd {
        order: MemOrder,
        loc: u64,
        add: u64,
    },
    Fence(MemOrder),
    Lock(u64),
    Trylock(u64),
    Unlock(u64),
    Wait {
        condvar: u64,
        mutex: u64,
    },
    NotifyOne(u64),
    NotifyAll(u64),
    Create(usize),
    Join(usize),
    Sleep,
    Finish,
}

#[derive(Debug, Clone)]
enum PendingCommit {
    Cas {
        order: MemOrder,
        loc: u64,
        expected: u64,
        new: u64,
    },
    FetchAdd {
        order: MemOrder,
        loc: u64,
        add: u64,
    },
}

/// Drives scripted programs through a [`ModelExecution`], handling
/// suspension, wakeups, forced-thread handoffs, and the two-action RMW
/// protocol the way the real driver does.
pub struct Driver {
    pub exec: ModelExecution,
    scripts: Vec<VecDeque<Op>>,
    tids: Vec<Option<ThreadId>>,
    commits: Vec<Option<PendingCommit>>,
    pending_create: Option<usize>,
    pub steps: usize,
}

impl Driver {
    /// A driver with an explicit fuzzer.
    pub fn with_fuzzer(fuzzer: Box<dyn Fuzzer>, scripts: Vec<Vec<Op>>) -> Self {
        let mut exec = ModelExecution::with_parts(
            ExecutionConfig::default(),
            Box::new(SleepSetScheduler::new()),
            fuzzer,
            Box::new(NoopRaceDetector),
        );
        let t0 = exec.create_initial_thread();
        let n = scripts.len();
        let mut tids = vec![None; n];
        tids[0] = Some(t0);
        Self {
            exec,
            scripts: scripts.into_iter().map(VecDeque::from).collect(),
            tids,
            commits: vec![None; n],
            pending_create: None,
            steps: 0,
        }
    }

    /// A driver with the default random fuzzer at `seed`.
    pub fn with_seed(seed: u64, scripts: Vec<Vec<Op>>) -> Self {
        Self::with_fuzzer(Box::new(RandomFuzzer::new(seed)), scripts)
    }

    /// A driver with a scripted fuzzer.
    pub fn scripted(fuzzer: ScriptedFuzzer, scripts: Vec<Vec<Op>>) -> Self {
        Self::with_fuzzer(Box::new(fuzzer), scripts)
    }

    /// The engine thread id of scripted thread `index`.
    pub fn tid(&self, index: usize) -> ThreadId {
        self.tids[index].expect("thread not created yet")
    }

    fn prog_index(&self, tid: ThreadId) -> usize {
        self.tids
            .iter()
            .position(|t| *t == Some(tid))
            .expect("unknown thread")
    }

    fn next_action(&mut self, tid: ThreadId) -> Action {
        let i = self.prog_index(tid);

        // The commit half of an RMW follows its read half immediately.
        if let Some(commit) = self.commits[i].take() {
            let read_val = self.exec.thread(tid).return_value();
            return match commit {
                PendingCommit::Cas {
                    order,
                    loc,
                    expected,
                    new,
                } => {
                    if read_val == expected {
                        Action::memory(ActionKind::AtomicRmw, order, Location::new(loc), new, 8, tid)
                    } else {
                        Action::memory(ActionKind::AtomicRmwc, order, Location::new(loc), 0, 8, tid)
                    }
                }
                PendingCommit::FetchAdd { order, loc, add } => Action::memory(
                    ActionKind::AtomicRmw,
                    order,
                    Location::new(loc),
                    read_val.wrapping_add(add),
                    8,
                    tid,
                ),
            };
        }

        let op = self.scripts[i]
            .pop_front()
            .expect("script exhausted while thread still runnable");
        match op {
            Op::Start => Action::thread_op(ActionKind::ThreadStart, tid, None),
            Op::Load(order, loc) => Action::memory(
                ActionKind::AtomicRead,
                order,
                Location::new(loc),
                0,
                8,
                tid,
            ),
            Op::Store(order, loc, value) => Action::memory(
                ActionKind::AtomicWrite,
                order,
                Location::new(loc),
                value,
                8,
                tid,
            ),
            Op::Cas {
                order,
                loc,
                expected,
                new,
            } => {
                self.commits[i] = Some(PendingCommit::Cas {
                    order,
                    loc,
                    expected,
                    new,
                });
                // The read half carries the expected comparand.
                Action::memory(
                    ActionKind::AtomicRmwrCas,
                    order,
                    Location::new(loc),
                    expected,
                    8,
                    tid,
                )
            }
            Op::FetchAdd { order, loc, add } => {
                self.commits[i] = Some(PendingCommit::FetchAdd { order, loc, add });
                Action::memory(ActionKind::AtomicRmwr, order, Location::new(loc), 0, 8, tid)
            }
            Op::Fence(order) => Action::fence(order, tid),
            Op::Lock(m) => Action::mutex_op(ActionKind::AtomicLock, Location::new(m), tid),
            Op::Trylock(m) => Action::mutex_op(ActionKind::AtomicTrylock, Location::new(m), tid),
            Op::Unlock(m) => Action::mutex_op(ActionKind::AtomicUnlock, Location::new(m), tid),
            Op::Wait { condvar, mutex } => Action::wait(
                ActionKind::AtomicWait,
                Location::new(condvar),
                Location::new(mutex),
                tid,
            ),
            Op::NotifyOne(cv) => {
                Action::mutex_op(ActionKind::AtomicNotifyOne, Location::new(cv), tid)
            }
            Op::NotifyAll(cv) => {
                Action::mutex_op(ActionKind::AtomicNotifyAll, Location::new(cv), tid)
            }
            Op::Create(j) => {
                self.pending_create = Some(j);
                Action::thread_op(ActionKind::ThreadCreate, tid, None)
            }
            Op::Join(j) => Action::thread_op(
                ActionKind::ThreadJoin,
                tid,
                Some(self.tids[j].expect("join target not created yet")),
            ),
            Op::Sleep => Action::thread_op(ActionKind::ThreadSleep, tid, None),
            Op::Finish => Action::thread_op(ActionKind::ThreadFinish, tid, None),
        }
    }

    /// Runs until no thread is schedulable (completion, deadlock, or an
    /// all-sleeping redundant end).
    pub fn run(&mut self) {
        self.run_bounded(10_000);
    }

    /// Runs at most `max_steps` actions.
    pub fn run_bounded(&mut self, max_steps: usize) {
        let mut forced: Option<ThreadId> = None;
        loop {
            assert!(self.steps < max_steps, "driver exceeded {max_steps} steps");
            let Some(tid) = forced.take().or_else(|| self.exec.select_next_thread()) else {
                break;
            };

            let action = match self.exec.take_pending(tid) {
                // A woken voluntary sleeper resumes its script; any other
                // pending action is resubmitted as-is.
                Some(pending) if pending.is_sleep() => self.next_action(tid),
                Some(pending) => pending,
                None => self.next_action(tid),
            };

            if !self.exec.check_action_enabled(&action) {
                self.exec.suspend_pending(action);
                continue;
            }

            let is_create = matches!(
                action.kind(),
                ActionKind::ThreadCreate | ActionKind::PthreadCreate
            );
            forced = self.exec.take_step(action);
            self.steps += 1;

            if is_create {
                let j = self.pending_create.take().expect("create without mapping");
                self.tids[j] = Some(forced.expect("create pins the new thread"));
            }
        }
    }
}

/// Every committed action satisfying `pred`, in trace order.
pub fn find_actions(exec: &ModelExecution, pred: impl Fn(&Action) -> bool) -> Vec<ActionId> {
    exec.action_trace()
        .iter()
        .copied()
        .filter(|&id| pred(exec.action(id)))
        .collect()
}

/// The single committed action satisfying `pred`.
pub fn find_action(exec: &ModelExecution, pred: impl Fn(&Action) -> bool) -> ActionId {
    let matches = find_actions(exec, pred);
    assert_eq!(matches.len(), 1, "expected exactly one matching action");
    matches[0]
}
