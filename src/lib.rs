//! # atomlab
//!
//! The execution core of a stateless model checker for shared-memory
//! concurrent programs under a C/C++-style relaxed-atomics memory model.
//!
//! An outer driver feeds the engine one instrumented [`Action`] at a time
//! (atomic loads/stores/RMWs, fences, locks, condvar operations, thread
//! lifecycle events). For each schedule the engine:
//!
//! - linearizes the program into a single ordered trace;
//! - picks, for every atomic read, which prior write it reads from out of
//!   the candidates the memory model permits;
//! - maintains happens-before (clock vectors) and modification order (an
//!   online acyclic graph) so only model-consistent executions emerge;
//! - reports deadlocks, infeasible reads, assertion failures, and
//!   whatever the pluggable race detector finds;
//! - replays identically from the same seed, letting the driver explore
//!   schedules by varying fuzzer decisions.
//!
//! # Architecture
//!
//! [`ModelExecution`] is the per-execution state machine and the only
//! entry point after construction. It owns the action arena, the modeled
//! [`Thread`]s, the [`CycleGraph`] of modification order, the layered
//! action indexes, and mutex/condvar state. Thread *selection* is not its
//! job: it consumes a [`Scheduler`] and defers every free choice to a
//! [`Fuzzer`].
//!
//! # Example
//!
//! ```
//! use atomlab::{Action, ActionKind, ExecutionConfig, Location, MemOrder, ModelExecution};
//!
//! let mut exec = ModelExecution::new(ExecutionConfig::with_seed(1));
//! let t1 = exec.create_initial_thread();
//! exec.take_step(Action::thread_op(ActionKind::ThreadStart, t1, None));
//! exec.take_step(Action::memory(
//!     ActionKind::AtomicWrite,
//!     MemOrder::Release,
//!     Location::new(0x40),
//!     1,
//!     8,
//!     t1,
//! ));
//! exec.take_step(Action::thread_op(ActionKind::ThreadFinish, t1, None));
//! assert!(exec.is_finished());
//! ```

pub mod action;
pub mod bug;
pub mod clock;
pub mod config;
pub mod engine;
pub mod fuzzer;
pub mod graph;
pub mod index;
pub mod mutex;
pub mod race;
pub mod report;
pub mod scheduler;
pub mod thread;
pub mod types;
pub mod util;

pub use action::{val_equals, Action, ActionKind, MemOrder};
pub use bug::{Bug, BugKind};
pub use clock::ClockVector;
pub use config::ExecutionConfig;
pub use engine::ModelExecution;
pub use fuzzer::{Fuzzer, RandomFuzzer, ScriptedFuzzer};
pub use graph::CycleGraph;
pub use mutex::{MutexState, MutexTable};
pub use race::{NoopRaceDetector, RaceDetector};
pub use report::{ActionRecord, ExecutionReport};
pub use scheduler::{Scheduler, SleepSetScheduler};
pub use thread::{Thread, ThreadState};
pub use types::{ActionId, Location, SeqNum, ThreadId, VALUE_NONE};
