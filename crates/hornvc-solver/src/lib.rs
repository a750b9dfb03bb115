//! Solver seam for the hornvc generator
//!
//! The generator lowers its assembled problem (factored clauses or an
//! RPFP) into a [`HornQuery`] and hands it to a [`FixpointSolver`]. The
//! solver answers with a [`FixpointOutcome`]: `Valid` (an inductive model
//! exists), `Invalid` (a falsifying derivation), or `Unknown`. On
//! `Invalid`, the derivation carries, per RPFP node, the set of labels that
//! lie on the falsifying path, which is all the counterexample
//! reconstructor needs.
//!
//! One backend ships: [`SpacerSolver`], which runs a `z4`/`z3` binary on a
//! `(set-logic HORN)` script in a temporary file, synchronously and with a
//! hard timeout.

pub mod outcome;
pub mod spacer;

pub use outcome::{
    parse_spacer_statistics, Derivation, DerivationId, DerivationNode, FixpointOutcome,
    HornQuery, HornRule, SolverError, SolverStats,
};
pub use spacer::{find_executable, SpacerConfig, SpacerSolver};

/// A synchronous Horn/fixpoint solver.
pub trait FixpointSolver {
    fn solve(&self, query: &HornQuery) -> Result<FixpointOutcome, SolverError>;
}
