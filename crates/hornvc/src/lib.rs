//! hornvc — verification-condition and fixpoint-problem generation
//!
//! Given an imperative program as a control-flow graph of typed variables
//! and guarded commands, this crate produces a logical artifact whose
//! unsatisfiability (or fixpoint solution) proves the program's
//! assertions, and maps falsifying solver derivations back onto the CFG
//! as nested counterexample traces.
//!
//! Three construction modes:
//!
//! - **summary Horn** (default): each verified procedure becomes a
//!   relational node/edge pair (an RPFP) so a Horn solver can compute
//!   inductive procedure summaries under unbounded recursion;
//! - **legacy flat**: full inlining into the entry procedure, one
//!   monolithic VC, factored into independent per-assertion implications;
//! - **plain**: each procedure verified independently against its
//!   contract.
//!
//! # Example
//!
//! ```no_run
//! use hornvc::{FixedpointVcGen, VcConfig, VcMode};
//! use hornvc_program::Program;
//! use hornvc_solver::SpacerSolver;
//!
//! # fn run(program: Program) -> Result<(), hornvc::VcError> {
//! let config = VcConfig::new().with_mode(VcMode::SummaryHorn);
//! let mut gen = FixedpointVcGen::new(program, config)?;
//! gen.generate()?;
//! let result = gen.check(&SpacerSolver::new())?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod annotate;
pub mod config;
pub mod engine;
pub mod error;
pub mod factor;
pub mod reconstruct;
pub mod rpfp;
pub mod wp;

pub use annotate::{AnnotationInfo, AnnotationKind, AnnotationRegistry};
pub use config::{AnnotationStyle, VcConfig, VcMode};
pub use engine::{FixedpointVcGen, ProcedureReport, VerificationOutcome, VerificationResult};
pub use error::VcError;
pub use factor::Factorer;
pub use reconstruct::{find_labels, ReconstructContext};
pub use rpfp::{collect_rel_params, EdgeId, NodeId, Rpfp, RpfpEdge, RpfpNode, Transformer};
pub use wp::VcInfo;
