//! Hash-consed terms for VC generation
//!
//! All formulas the generator manipulates are nodes in a [`TermArena`]:
//! structurally equal terms are interned to the same [`TermId`], so the
//! shared-subterm DAGs produced by weakest-precondition expansion stay
//! linear in memory and every rewrite pass can memoize by index instead of
//! by reference identity.
//!
//! The arena also owns the table of uninterpreted relation symbols
//! ([`RelId`]) used for invariant and summary annotations, and the `Label`
//! wrapper is an ordinary term variant so hash-consing and rewriting treat
//! it uniformly.

pub mod arena;
pub mod eval;
pub mod parse;
pub mod print;

pub use arena::{RelDecl, RelId, Sort, Term, TermArena, TermId};
pub use eval::{eval, eval_labels, Env, EvalError, Value};
pub use parse::{parse_term, ParseError};
pub use print::{declare_rels, term_to_smt2};
