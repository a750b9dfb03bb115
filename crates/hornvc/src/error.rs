//! Error type for VC generation and reconstruction

use hornvc_program::{CfgError, InlineError, PassifyError};
use hornvc_solver::SolverError;
use hornvc_term::ParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcError {
    /// Fatal per implementation; reported, never retried or approximated.
    #[error("unsupported program: {0}")]
    UnsupportedProgram(String),

    /// Internal-consistency failure: reconstruction expected a label the
    /// VC builder should have attached. Signals a construction/solver
    /// mismatch, not a user problem.
    #[error("missing label: {0}")]
    MissingLabel(String),

    /// Rejected before VC construction.
    #[error("malformed program: {0}")]
    MalformedProgram(String),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

impl From<CfgError> for VcError {
    fn from(e: CfgError) -> Self {
        VcError::UnsupportedProgram(e.to_string())
    }
}

impl From<InlineError> for VcError {
    fn from(e: InlineError) -> Self {
        match e {
            InlineError::Recursive(_) | InlineError::BoundExceeded(_) => {
                VcError::UnsupportedProgram(e.to_string())
            }
            InlineError::NoEntry => VcError::MalformedProgram(e.to_string()),
        }
    }
}

impl From<ParseError> for VcError {
    fn from(e: ParseError) -> Self {
        VcError::MalformedProgram(e.to_string())
    }
}

impl From<PassifyError> for VcError {
    fn from(e: PassifyError) -> Self {
        VcError::MalformedProgram(e.to_string())
    }
}
