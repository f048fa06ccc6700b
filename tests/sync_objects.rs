//! Mutexes, condition variables, thread sleeps, and deadlock detection.

mod common;
use common::*;

use atomlab::{BugKind, ExecutionReport, MemOrder, ScriptedFuzzer};

const M: u64 = 0x200;
const M2: u64 = 0x208;
const CV: u64 = 0x210;
const D: u64 = 0x218;

// ==================== Lock handoff ====================

#[test]
fn lock_handoff_synchronizes_with_the_previous_unlock() {
    init_test_logging();
    let scripts = vec![
        vec![
            Op::Start,
            Op::Lock(M),
            Op::Store(MemOrder::Relaxed, D, 1),
            Op::Create(1),
            Op::Unlock(M),
            Op::Join(1),
            Op::Finish,
        ],
        vec![
            Op::Start,
            Op::Lock(M),
            Op::Load(MemOrder::Relaxed, D),
            Op::Unlock(M),
            Op::Finish,
        ],
    ];
    let mut driver = Driver::with_seed(17, scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_complete_execution());
    assert!(!exec.is_deadlocked());
    assert!(exec.bugs().is_empty());

    let holder = driver.tid(0);
    let contender = driver.tid(1);
    let unlock = find_action(exec, |a| a.is_unlock() && a.tid() == holder);
    let second_lock = find_action(exec, |a| a.is_lock() && a.tid() == contender);

    // The second lock inherits the unlocker's clock vector even without
    // any fence in sight.
    let cv = exec.action(second_lock).cv().unwrap();
    assert!(cv.synchronized_since(holder, exec.action(unlock).seq()));

    // The data protected by the mutex is therefore visible.
    let load = find_action(exec, |a| a.is_read());
    let rf = exec.action(load).reads_from().unwrap();
    assert_eq!(exec.action(rf).value(), 1);
}

// ==================== Trylock ====================

#[test]
fn trylock_on_a_taken_lock_fails_without_blocking() {
    init_test_logging();
    let scripts = vec![
        vec![
            Op::Start,
            Op::Lock(M),
            Op::Create(1),
            Op::Join(1),
            Op::Unlock(M),
            Op::Finish,
        ],
        vec![Op::Start, Op::Trylock(M), Op::Finish],
    ];
    let mut driver = Driver::with_seed(5, scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_complete_execution());
    let trylock = find_action(exec, |a| a.is_trylock());
    // Failure is reported as value 0; the thread kept running.
    assert_eq!(exec.action(trylock).value(), 0);
}

#[test]
fn trylock_on_a_free_lock_behaves_like_lock() {
    init_test_logging();
    let scripts = vec![vec![
        Op::Start,
        Op::Trylock(M),
        Op::Unlock(M),
        Op::Finish,
    ]];
    let mut driver = Driver::with_seed(5, scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_complete_execution());
    let trylock = find_action(exec, |a| a.is_trylock());
    assert_eq!(exec.action(trylock).value(), 1);
}

// ==================== Condition variables ====================

#[test]
fn notify_one_wakes_the_parked_waiter() {
    init_test_logging();
    // Waiter takes the lock first, so the notifier's lock attempt blocks
    // until the wait releases the mutex.
    let scripts = vec![
        vec![
            Op::Start,
            Op::Lock(M),
            Op::Create(1),
            Op::Wait { condvar: CV, mutex: M },
            Op::Lock(M),
            Op::Unlock(M),
            Op::Finish,
        ],
        vec![
            Op::Start,
            Op::Lock(M),
            Op::NotifyOne(CV),
            Op::Unlock(M),
            Op::Finish,
        ],
    ];
    let mut driver = Driver::scripted(ScriptedFuzzer::new().choose_wait(true), scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_complete_execution());
    assert!(!exec.is_deadlocked());
    assert!(exec.is_finished());

    let waiter = driver.tid(0);
    let notifier = driver.tid(1);
    assert!(exec.thread(waiter).is_complete());
    assert!(exec.thread(notifier).is_complete());

    // The wait parked and the waiter's relock synchronized with the
    // notifier's unlock.
    let wait = find_action(exec, |a| a.is_wait());
    assert_eq!(exec.action(wait).tid(), waiter);
    let notifier_unlock = find_action(exec, |a| a.is_unlock() && a.tid() == notifier);
    let relock = find_action(exec, |a| a.is_lock() && a.tid() == waiter);
    let cv = exec.action(relock).cv().unwrap();
    assert!(cv.synchronized_since(notifier, exec.action(notifier_unlock).seq()));
}

#[test]
fn spurious_wait_returns_without_parking() {
    init_test_logging();
    let scripts = vec![vec![
        Op::Start,
        Op::Lock(M),
        Op::Wait { condvar: CV, mutex: M },
        Op::Lock(M),
        Op::Unlock(M),
        Op::Finish,
    ]];
    // The fuzzer refuses the park: the wait returns spuriously and the
    // thread immediately reacquires the mutex.
    let mut driver = Driver::scripted(ScriptedFuzzer::new().choose_wait(false), scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_complete_execution());
    assert!(!exec.is_deadlocked());
}

#[test]
fn notify_all_wakes_every_waiter() {
    init_test_logging();
    let scripts = vec![
        vec![
            Op::Start,
            Op::Lock(M),
            Op::Create(1),
            Op::Wait { condvar: CV, mutex: M },
            Op::Lock(M),
            Op::Unlock(M),
            Op::Finish,
        ],
        vec![
            Op::Start,
            Op::Lock(M),
            Op::Create(2),
            Op::Wait { condvar: CV, mutex: M },
            Op::Lock(M),
            Op::Unlock(M),
            Op::Finish,
        ],
        vec![
            Op::Start,
            Op::Lock(M),
            Op::NotifyAll(CV),
            Op::Unlock(M),
            Op::Finish,
        ],
    ];
    let mut driver = Driver::with_seed(23, scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_complete_execution());
    assert!(!exec.is_deadlocked());
    assert_eq!(find_actions(exec, |a| a.is_wait()).len(), 2);
    for i in 0..3 {
        assert!(exec.thread(driver.tid(i)).is_complete());
    }
}

// ==================== Deadlock ====================

#[test]
fn crossed_locks_deadlock() {
    init_test_logging();
    let scripts = vec![
        vec![
            Op::Start,
            Op::Lock(M),
            Op::Create(1),
            Op::Lock(M2),
            Op::Unlock(M2),
            Op::Unlock(M),
            Op::Finish,
        ],
        vec![
            Op::Start,
            Op::Lock(M2),
            Op::Lock(M),
            Op::Unlock(M),
            Op::Unlock(M2),
            Op::Finish,
        ],
    ];
    let mut driver = Driver::with_seed(11, scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_deadlocked());
    assert!(!exec.is_complete_execution());

    let report = ExecutionReport::from_execution(exec);
    assert!(report.deadlocked);
    assert!(!report.complete);
}

// ==================== Voluntary sleep ====================

#[test]
fn unwoken_sleeper_ends_the_execution_as_redundant() {
    init_test_logging();
    let scripts = vec![
        vec![Op::Start, Op::Create(1), Op::Sleep, Op::Finish],
        vec![Op::Start, Op::Finish],
    ];
    // Default scripted policy: sleeps are taken and never woken.
    let mut driver = Driver::scripted(ScriptedFuzzer::new(), scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.all_threads_sleeping());
    assert!(!exec.is_complete_execution());
    assert!(!exec.is_deadlocked());

    let report = ExecutionReport::from_execution(exec);
    assert!(report.sleep_set_redundant);
    assert!(!report.complete);
}

#[test]
fn fuzzer_can_cut_a_sleep_short() {
    init_test_logging();
    let scripts = vec![
        vec![
            Op::Start,
            Op::Create(1),
            Op::Sleep,
            Op::Store(MemOrder::Relaxed, D, 1),
            Op::Finish,
        ],
        vec![Op::Start, Op::Store(MemOrder::Relaxed, D, 9), Op::Finish],
    ];
    let mut driver = Driver::scripted(ScriptedFuzzer::new().choose_wake(true), scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_complete_execution());
    let sleeper = driver.tid(0);
    assert!(exec.thread(sleeper).wakeup_state());
    assert!(exec.thread(sleeper).is_complete());
}

// ==================== Bug surface ====================

#[test]
fn user_assertions_halt_the_schedule() {
    init_test_logging();
    let scripts = vec![vec![Op::Start, Op::Finish]];
    let mut driver = Driver::with_seed(2, scripts);
    driver.run();

    driver.exec.assert_bug("invariant broken in modeled program");
    assert!(driver.exec.has_asserted());
    assert_eq!(driver.exec.bugs().len(), 1);
    assert_eq!(driver.exec.bugs()[0].kind, BugKind::AssertViolation);

    let report = ExecutionReport::from_execution(&driver.exec);
    assert!(report.asserted);
    assert_eq!(report.bugs.len(), 1);
}

#[test]
fn a_lock_synchronizes_with_a_wait_that_released_the_mutex() {
    init_test_logging();
    let scripts = vec![
        vec![
            Op::Start,
            Op::Lock(M),
            Op::Create(1),
            Op::Wait { condvar: CV, mutex: M },
            Op::Join(1),
            Op::Finish,
        ],
        vec![Op::Start, Op::Lock(M), Op::Unlock(M), Op::Finish],
    ];
    // The wait returns spuriously; its unlock half is still the release
    // the other thread's lock must synchronize with.
    let mut driver = Driver::scripted(ScriptedFuzzer::new().choose_wait(false), scripts);
    driver.run();

    let exec = &driver.exec;
    assert!(exec.is_complete_execution());
    let waiter = driver.tid(0);
    let contender = driver.tid(1);
    let wait = find_action(exec, |a| a.is_wait());
    let lock = find_action(exec, |a| a.is_lock() && a.tid() == contender);
    let cv = exec.action(lock).cv().unwrap();
    assert!(cv.synchronized_since(waiter, exec.action(wait).seq()));
}
