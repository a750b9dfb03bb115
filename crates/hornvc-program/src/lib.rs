//! Program representation for VC generation
//!
//! An imperative program is a list of procedures with contracts; a verified
//! procedure carries an implementation: a control-flow graph of blocks
//! holding assume/assert/assign/havoc/call commands. Expression payloads are
//! SMT-LIB strings, parsed into the term arena only when the VC builder
//! needs them.
//!
//! The crate also hosts the CFG analyses and transforms the generator runs
//! before building a VC: dominance and natural-loop detection (refusing
//! irreducible graphs), live-variable analysis, call inlining, and the
//! DAG-conversion + passification pass that puts an implementation into
//! single-assignment, loop-free form.

pub mod graph;
pub mod inline;
pub mod ir;
pub mod liveness;
pub mod passify;

pub use graph::{analyze_loops, CfgError, LoopAnalysis};
pub use inline::{inline_all, InlineError, InlinerConfig};
pub use ir::{
    idents, rename_idents, Attributes, Block, BlockId, Command, Implementation, Procedure,
    Program, SpecClause, Transfer, Variable,
};
pub use liveness::{compute_live_variables, CallSummary, SummaryMap};
pub use passify::{convert_to_dag, passify, PassifyError};
