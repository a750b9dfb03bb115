//! Structured counterexamples
//!
//! A counterexample is the block path a falsifying execution takes from a
//! procedure's entry to the failing assertion, plus nested counterexamples
//! for call sites whose callee behavior lies on that path. Built bottom-up
//! by the reconstructor and immutable once returned to the reporter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

/// Position of a command inside a trace: (trace step index, command index).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TraceLocation {
    pub step: usize,
    pub cmd: usize,
}

impl TraceLocation {
    pub fn new(step: usize, cmd: usize) -> Self {
        Self { step, cmd }
    }
}

/// One block on the falsifying path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub block_index: usize,
    pub block_label: String,
}

impl TraceStep {
    pub fn new(block_index: usize, block_label: impl Into<String>) -> Self {
        Self {
            block_index,
            block_label: block_label.into(),
        }
    }
}

/// The assertion a falsifying execution violates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAssert {
    pub expr: String,
    pub block_label: String,
    pub cmd: usize,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
}

/// A reconstructed counterexample for one procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterexample {
    pub procedure: String,
    pub trace: Vec<TraceStep>,
    /// Absent for a nested callee trace whose behavior merely feeds a
    /// failure higher up.
    pub failing: Option<FailedAssert>,
    /// Nested traces for call sites on the path, keyed by location.
    pub callee_traces: BTreeMap<TraceLocation, Counterexample>,
}

impl Counterexample {
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            trace: Vec::new(),
            failing: None,
            callee_traces: BTreeMap::new(),
        }
    }

    pub fn push_step(&mut self, step: TraceStep) {
        self.trace.push(step);
    }

    pub fn set_failing(&mut self, failing: FailedAssert) {
        self.failing = Some(failing);
    }

    pub fn add_callee_trace(&mut self, at: TraceLocation, nested: Counterexample) {
        self.callee_traces.insert(at, nested);
    }

    /// Total number of blocks across this trace and all nested traces.
    pub fn total_len(&self) -> usize {
        self.trace.len()
            + self
                .callee_traces
                .values()
                .map(Counterexample::total_len)
                .sum::<usize>()
    }

    /// Short human-readable rendering for diagnostics.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        let _ = writeln!(out, "{pad}{}:", self.procedure);
        for (i, step) in self.trace.iter().enumerate() {
            let _ = writeln!(out, "{pad}  {}", step.block_label);
            if let Some(nested) = self
                .callee_traces
                .iter()
                .filter(|(loc, _)| loc.step == i)
                .map(|(_, n)| n)
                .next()
            {
                nested.render(out, indent + 2);
            }
        }
        if let Some(failing) = &self.failing {
            let loc = match (&failing.source_file, failing.source_line) {
                (Some(f), Some(l)) => format!(" ({f}:{l})"),
                (Some(f), None) => format!(" ({f})"),
                _ => String::new(),
            };
            let _ = writeln!(
                out,
                "{pad}  failed assertion `{}` in {}{loc}",
                failing.expr, failing.block_label
            );
        }
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
