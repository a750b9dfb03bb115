//! Concrete term evaluation
//!
//! Evaluates a formula under an assignment of variables to values, with a
//! per-relation verdict for uninterpreted applications. While evaluating,
//! the boolean value of every `Label` node is recorded; a falsifying
//! execution makes exactly the labels on its path evaluate to `false`,
//! which is what the counterexample reconstructor consumes.

use crate::arena::{RelId, Term, TermArena, TermId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A concrete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
}

impl Value {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            Value::Int(_) => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(n),
            Value::Bool(_) => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("no value for variable `{0}`")]
    UnboundVariable(String),
    #[error("type mismatch at `{0}`")]
    TypeMismatch(String),
    #[error("cannot evaluate quantified term")]
    Quantifier,
}

/// Evaluation environment: variable assignment plus relation verdicts.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, Value>,
    rels: HashMap<RelId, bool>,
    /// Verdict for relations with no explicit entry. Defaults to `true`:
    /// summary placeholders on a witnessed path are assumptions that held.
    pub default_rel: bool,
}

impl Env {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
            rels: HashMap::new(),
            default_rel: true,
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn with_int(self, name: impl Into<String>, n: i64) -> Self {
        self.with_var(name, Value::Int(n))
    }

    pub fn with_bool(self, name: impl Into<String>, b: bool) -> Self {
        self.with_var(name, Value::Bool(b))
    }

    pub fn set_rel(&mut self, rel: RelId, verdict: bool) {
        self.rels.insert(rel, verdict);
    }

    pub fn var(&self, name: &str) -> Option<Value> {
        self.vars.get(name).copied()
    }
}

/// Evaluate `id` under `env`.
pub fn eval(arena: &TermArena, id: TermId, env: &Env) -> Result<Value, EvalError> {
    let mut labels = HashMap::new();
    eval_rec(arena, id, env, &mut labels)
}

/// Evaluate `id` and report the boolean value every label wrapped.
pub fn eval_labels(
    arena: &TermArena,
    id: TermId,
    env: &Env,
) -> Result<(Value, HashMap<String, bool>), EvalError> {
    let mut labels = HashMap::new();
    let v = eval_rec(arena, id, env, &mut labels)?;
    Ok((v, labels))
}

fn eval_rec(
    arena: &TermArena,
    id: TermId,
    env: &Env,
    labels: &mut HashMap<String, bool>,
) -> Result<Value, EvalError> {
    let as_bool = |v: Value| v.as_bool().ok_or_else(|| type_err(arena, id));
    let as_int = |v: Value| v.as_int().ok_or_else(|| type_err(arena, id));
    match arena.term(id) {
        Term::True => Ok(Value::Bool(true)),
        Term::False => Ok(Value::Bool(false)),
        Term::IntLit(n) => Ok(Value::Int(*n)),
        Term::Var(name, _) => env
            .var(name)
            .ok_or_else(|| EvalError::UnboundVariable(name.clone())),
        Term::Not(a) => {
            let v = as_bool(eval_rec(arena, *a, env, labels)?)?;
            Ok(Value::Bool(!v))
        }
        Term::And(args) => {
            let mut acc = true;
            for a in args {
                acc &= as_bool(eval_rec(arena, *a, env, labels)?)?;
            }
            Ok(Value::Bool(acc))
        }
        Term::Or(args) => {
            let mut acc = false;
            for a in args {
                acc |= as_bool(eval_rec(arena, *a, env, labels)?)?;
            }
            Ok(Value::Bool(acc))
        }
        Term::Implies(a, b) => {
            let l = as_bool(eval_rec(arena, *a, env, labels)?)?;
            let r = as_bool(eval_rec(arena, *b, env, labels)?)?;
            Ok(Value::Bool(!l || r))
        }
        Term::Eq(a, b) => {
            let l = eval_rec(arena, *a, env, labels)?;
            let r = eval_rec(arena, *b, env, labels)?;
            match (l, r) {
                (Value::Int(l), Value::Int(r)) => Ok(Value::Bool(l == r)),
                (Value::Bool(l), Value::Bool(r)) => Ok(Value::Bool(l == r)),
                _ => Err(type_err(arena, id)),
            }
        }
        Term::Ite(c, t, e) => {
            let c = as_bool(eval_rec(arena, *c, env, labels)?)?;
            if c {
                eval_rec(arena, *t, env, labels)
            } else {
                eval_rec(arena, *e, env, labels)
            }
        }
        Term::Add(a, b) => {
            let l = as_int(eval_rec(arena, *a, env, labels)?)?;
            let r = as_int(eval_rec(arena, *b, env, labels)?)?;
            Ok(Value::Int(l.wrapping_add(r)))
        }
        Term::Sub(a, b) => {
            let l = as_int(eval_rec(arena, *a, env, labels)?)?;
            let r = as_int(eval_rec(arena, *b, env, labels)?)?;
            Ok(Value::Int(l.wrapping_sub(r)))
        }
        Term::Mul(a, b) => {
            let l = as_int(eval_rec(arena, *a, env, labels)?)?;
            let r = as_int(eval_rec(arena, *b, env, labels)?)?;
            Ok(Value::Int(l.wrapping_mul(r)))
        }
        Term::Le(a, b) => {
            let l = as_int(eval_rec(arena, *a, env, labels)?)?;
            let r = as_int(eval_rec(arena, *b, env, labels)?)?;
            Ok(Value::Bool(l <= r))
        }
        Term::Lt(a, b) => {
            let l = as_int(eval_rec(arena, *a, env, labels)?)?;
            let r = as_int(eval_rec(arena, *b, env, labels)?)?;
            Ok(Value::Bool(l < r))
        }
        Term::Ge(a, b) => {
            let l = as_int(eval_rec(arena, *a, env, labels)?)?;
            let r = as_int(eval_rec(arena, *b, env, labels)?)?;
            Ok(Value::Bool(l >= r))
        }
        Term::Gt(a, b) => {
            let l = as_int(eval_rec(arena, *a, env, labels)?)?;
            let r = as_int(eval_rec(arena, *b, env, labels)?)?;
            Ok(Value::Bool(l > r))
        }
        Term::App(rel, args) => {
            // Arguments still evaluate so their labels are visited.
            for a in args {
                eval_rec(arena, *a, env, labels)?;
            }
            let verdict = env.rels.get(rel).copied().unwrap_or(env.default_rel);
            Ok(Value::Bool(verdict))
        }
        Term::Label(name, inner) => {
            let v = eval_rec(arena, *inner, env, labels)?;
            if let Value::Bool(b) = v {
                labels.insert(name.clone(), b);
            }
            Ok(v)
        }
        Term::Quantifier { .. } => Err(EvalError::Quantifier),
    }
}

fn type_err(arena: &TermArena, id: TermId) -> EvalError {
    EvalError::TypeMismatch(crate::print::term_to_smt2(arena, id))
}
