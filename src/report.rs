//! End-of-execution reporting.
//!
//! The driver asks for an [`ExecutionReport`] after each schedule: the
//! ordered trace, a stable trace hash for replay comparison, the
//! completeness flags, and every bug found. The report is plain data and
//! serializes to JSON for artifact pipelines; [`ExecutionReport::render`]
//! produces the human-readable trace table.

use std::fmt::Write as _;

use serde::Serialize;

use crate::action::{ActionKind, MemOrder};
use crate::bug::Bug;
use crate::engine::ModelExecution;
use crate::types::ThreadId;

/// One trace row.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    /// Sequence number.
    pub seq: u64,
    /// Acting thread.
    pub tid: u32,
    /// Operation kind.
    pub kind: ActionKind,
    /// Memory order.
    pub order: MemOrder,
    /// Location key, if the action has one.
    pub location: Option<u64>,
    /// Operation value.
    pub value: u64,
    /// Sequence number of the write this read observed.
    pub rf_seq: Option<u64>,
    /// Rendered clock vector.
    pub cv: String,
}

/// Everything one execution produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Driver-assigned execution number.
    pub execution_number: u32,
    /// Every thread ran to completion.
    pub complete: bool,
    /// The execution ended because only sleep-set threads remained.
    pub sleep_set_redundant: bool,
    /// No thread enabled while work was still pending.
    pub deadlocked: bool,
    /// A halting condition (infeasible read, user assert) fired.
    pub asserted: bool,
    /// Stable hash over the whole trace; identical replays match.
    pub trace_hash: u64,
    /// The ordered trace.
    pub actions: Vec<ActionRecord>,
    /// Bugs found, in discovery order.
    pub bugs: Vec<Bug>,
}

impl ExecutionReport {
    /// Collects the report for a finished (or abandoned) execution.
    #[must_use]
    pub fn from_execution(exec: &ModelExecution) -> Self {
        let mut trace_hash: u64 = 0;
        let mut actions = Vec::with_capacity(exec.action_trace().len());
        for &id in exec.action_trace() {
            let act = exec.action(id);
            trace_hash = trace_hash ^ (trace_hash << 3) ^ act.hash();
            actions.push(ActionRecord {
                seq: act.seq().as_u64(),
                tid: act.tid().as_usize() as u32,
                kind: act.kind(),
                order: act.order(),
                location: act.location().map(|l| l.as_u64()),
                value: act.value(),
                rf_seq: act.reads_from().map(|rf| exec.action(rf).seq().as_u64()),
                cv: act.cv().map_or_else(String::new, |cv| cv.to_string()),
            });
        }
        let deadlocked = exec.is_deadlocked();
        Self {
            execution_number: exec.execution_number(),
            complete: exec.is_complete_execution(),
            sleep_set_redundant: exec.all_threads_sleeping(),
            deadlocked,
            asserted: exec.has_asserted(),
            trace_hash,
            actions,
            bugs: exec.bugs().to_vec(),
        }
    }

    /// Renders the trace table. Synthetic seq-0 actions are folded into
    /// the hash but not shown.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "Execution trace {}:", self.execution_number);
        if self.sleep_set_redundant {
            out.push_str(" SLEEP-SET REDUNDANT");
        }
        if self.deadlocked {
            out.push_str(" DEADLOCK");
        }
        if !self.bugs.is_empty() {
            out.push_str(" DETECTED BUG(S)");
        }
        out.push('\n');

        let rule = "-".repeat(90);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            "{:<6}{:<5}{:<18}{:<9}{:<14}{:<20}{:<5}CV",
            "#", "t", "Action type", "MO", "Location", "Value", "Rf"
        );
        let _ = writeln!(out, "{rule}");
        for rec in &self.actions {
            if rec.seq == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "{:<6}{:<5}{:<18}{:<9}{:<14}{:<20}{:<5}{}",
                rec.seq,
                ThreadId::new(rec.tid).to_string(),
                format!("{:?}", rec.kind),
                format!("{:?}", rec.order),
                rec.location
                    .map_or_else(|| "-".to_string(), |l| format!("{l:#x}")),
                format!("{:#x}", rec.value),
                rec.rf_seq
                    .map_or_else(|| "-".to_string(), |s| s.to_string()),
                rec.cv,
            );
        }
        let _ = writeln!(out, "HASH {}", self.trace_hash);
        let _ = writeln!(out, "{rule}");
        for bug in &self.bugs {
            let _ = writeln!(out, "BUG: {bug}");
        }
        out
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns any `serde_json` serialization error.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
