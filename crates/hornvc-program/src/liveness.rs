//! Live-variable analysis
//!
//! Backward may-be-used-later fixpoint over the blocks of one
//! implementation, iterated with reverse-order sweeps until nothing
//! changes. Calls to procedures with a known summary propagate liveness
//! through the summary's read/write footprint instead of descending into
//! the callee, which keeps the analysis modular. Results are written into
//! `Block::live_before` and the pass is idempotent on an unchanged CFG.

use crate::ir::{idents, Command, Implementation, Procedure, Program, Transfer};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Read/write footprint of a call, derived from the callee's contract.
#[derive(Debug, Clone, Default)]
pub struct CallSummary {
    /// Globals the callee may write.
    pub writes: Vec<String>,
    /// Globals whose pre-state the callee may read: globals in `requires`
    /// plus globals under `(old ...)` in `ensures`.
    pub reads: Vec<String>,
}

/// Identifiers appearing directly under an `(old ...)` wrapper.
fn old_idents(expr: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = expr;
    while let Some(pos) = rest.find("(old ") {
        let tail = &rest[pos + 5..];
        if let Some(first) = idents(tail).into_iter().next() {
            if !out.contains(&first) {
                out.push(first);
            }
        }
        rest = tail;
    }
    out
}

impl CallSummary {
    pub fn of_procedure(program: &Program, proc: &Procedure) -> Self {
        let globals: HashSet<&str> = program.globals.iter().map(|g| g.name.as_str()).collect();
        let mut reads: Vec<String> = Vec::new();
        for clause in &proc.requires {
            for id in idents(&clause.expr) {
                if globals.contains(id.as_str()) && !reads.contains(&id) {
                    reads.push(id);
                }
            }
        }
        for clause in &proc.ensures {
            for id in old_idents(&clause.expr) {
                if globals.contains(id.as_str()) && !reads.contains(&id) {
                    reads.push(id);
                }
            }
        }
        Self {
            writes: proc.modifies.clone(),
            reads,
        }
    }
}

/// Summaries for every declared procedure, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SummaryMap {
    summaries: HashMap<String, CallSummary>,
}

impl SummaryMap {
    pub fn from_program(program: &Program) -> Self {
        let summaries = program
            .procedures
            .iter()
            .map(|p| (p.name.clone(), CallSummary::of_procedure(program, p)))
            .collect();
        Self { summaries }
    }

    pub fn get(&self, callee: &str) -> Option<&CallSummary> {
        self.summaries.get(callee)
    }
}

/// Effect of one command on the live set, processed backwards.
fn propagate(cmd: &Command, live: &mut HashSet<String>, summaries: &SummaryMap) {
    match cmd {
        Command::Assume { expr, .. } | Command::Assert { expr, .. } => {
            live.extend(idents(expr));
        }
        Command::Assign { target, expr } => {
            live.remove(target);
            live.extend(idents(expr));
        }
        Command::Havoc { vars } => {
            for v in vars {
                live.remove(v);
            }
        }
        Command::Call {
            callee,
            args,
            dests,
            ..
        } => {
            for d in dests {
                live.remove(d);
            }
            if let Some(summary) = summaries.get(callee) {
                for w in &summary.writes {
                    live.remove(w);
                }
                for r in &summary.reads {
                    live.insert(r.clone());
                }
            }
            for a in args {
                live.extend(idents(a));
            }
        }
    }
}

/// Run the fixpoint, filling `Block::live_before`.
pub fn compute_live_variables(imp: &mut Implementation, summaries: &SummaryMap) {
    for block in &mut imp.blocks {
        block.live_before.clear();
    }

    let order: Vec<usize> = (0..imp.blocks.len()).rev().collect();
    let mut sweeps = 0;
    let mut changed = true;
    while changed {
        changed = false;
        sweeps += 1;
        for &b in &order {
            let mut live_after: HashSet<String> = HashSet::new();
            if let Transfer::Goto(targets) = &imp.blocks[b].transfer {
                for &t in targets {
                    live_after.extend(imp.blocks[t].live_before.iter().cloned());
                }
            }
            for cmd in imp.blocks[b].cmds.iter().rev() {
                propagate(cmd, &mut live_after, summaries);
            }
            if live_after != imp.blocks[b].live_before {
                imp.blocks[b].live_before = live_after;
                changed = true;
            }
        }
    }
    debug!(sweeps, blocks = imp.blocks.len(), "live-variable fixpoint");
}
