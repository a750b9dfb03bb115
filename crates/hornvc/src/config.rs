//! Configuration surface

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How the problem handed to the solver is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VcMode {
    /// One relational node/edge per verified procedure; the solver
    /// computes inductive summaries under unbounded recursion.
    #[default]
    SummaryHorn,

    /// Inline everything into the entry procedure, build one VC, factor
    /// it into independent per-assertion implications.
    LegacyFlat,

    /// Verify each procedure independently against its contract; calls
    /// desugar through callee contracts, no interprocedural summaries.
    Plain,
}

/// Where annotations are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AnnotationStyle {
    /// One annotation per loop header of the (fully inlined) top CFG.
    Flat,

    /// One summary annotation per implementation.
    #[default]
    Procedure,

    /// `Procedure` plus an annotation on every block reaching a call to a
    /// verified procedure.
    Call,
}

/// Configuration for one verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcConfig {
    pub mode: VcMode,
    pub style: AnnotationStyle,

    /// Merge repeated goal occurrences behind fresh equated arguments
    /// before factoring ("large block" mode). Trades path-specific
    /// diagnostic values for fewer clauses.
    pub merge_before_factor: bool,

    /// Wall-clock limit per solver invocation.
    pub solver_timeout: Duration,

    /// Explicit solver binary; otherwise discovered from PATH.
    pub solver_binary: Option<PathBuf>,
}

impl Default for VcConfig {
    fn default() -> Self {
        Self {
            mode: VcMode::default(),
            style: AnnotationStyle::default(),
            merge_before_factor: false,
            solver_timeout: Duration::from_secs(30),
            solver_binary: None,
        }
    }
}

impl VcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: VcMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_style(mut self, style: AnnotationStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_merge_before_factor(mut self, merge: bool) -> Self {
        self.merge_before_factor = merge;
        self
    }

    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = timeout;
        self
    }
}
