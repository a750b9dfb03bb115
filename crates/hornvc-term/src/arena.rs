//! The term arena
//!
//! One canonical node per structurally-equal term. Constructors perform
//! light constant folding (dropping `true` conjuncts, collapsing
//! implications from `false`) so the factoring passes can compare against
//! the interned `true`/`false` nodes the way the original rewrites do.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sort of a term or relation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sort {
    Bool,
    Int,
}

impl Sort {
    pub fn to_smt_string(self) -> &'static str {
        match self {
            Sort::Bool => "Bool",
            Sort::Int => "Int",
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_smt_string())
    }
}

/// Handle to an interned term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TermId(pub u32);

impl TermId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a declared uninterpreted relation symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelId(pub(crate) u32);

impl RelId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A declared relation: boolean-valued, fixed parameter sorts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelDecl {
    pub name: String,
    pub params: Vec<Sort>,
}

/// A term node. Variants are indexed by `TermId`; children are ids into the
/// same arena.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    True,
    False,
    IntLit(i64),
    Var(String, Sort),
    Not(TermId),
    And(Vec<TermId>),
    Or(Vec<TermId>),
    Implies(TermId, TermId),
    Eq(TermId, TermId),
    Ite(TermId, TermId, TermId),
    Add(TermId, TermId),
    Sub(TermId, TermId),
    Mul(TermId, TermId),
    Le(TermId, TermId),
    Lt(TermId, TermId),
    Ge(TermId, TermId),
    Gt(TermId, TermId),
    /// Application of an uninterpreted relation (annotation or summary).
    App(RelId, Vec<TermId>),
    /// Marker wrapping a sub-formula so the reconstructor can test whether
    /// it lies on a falsifying path. First-class: rewrites see it like any
    /// other node.
    Label(String, TermId),
    /// Quantified sub-formula. The factoring rewrites treat this as an
    /// explicit unsupported case and never descend into it.
    Quantifier {
        forall: bool,
        bound: Vec<(String, Sort)>,
        body: TermId,
    },
}

/// Arena of hash-consed terms plus the relation symbol table.
///
/// Scoped to one verification run; not shared across runs.
#[derive(Debug, Default)]
pub struct TermArena {
    terms: Vec<Term>,
    dedup: HashMap<Term, TermId>,
    rels: Vec<RelDecl>,
    rel_by_name: HashMap<String, RelId>,
}

impl TermArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Intern a term node, returning the canonical id.
    pub fn intern(&mut self, t: Term) -> TermId {
        if let Some(&id) = self.dedup.get(&t) {
            return id;
        }
        let id = TermId(self.terms.len() as u32);
        self.terms.push(t.clone());
        self.dedup.insert(t, id);
        id
    }

    pub fn term(&self, id: TermId) -> &Term {
        &self.terms[id.index()]
    }

    // --- constructors ---

    pub fn mk_true(&mut self) -> TermId {
        self.intern(Term::True)
    }

    pub fn mk_false(&mut self) -> TermId {
        self.intern(Term::False)
    }

    pub fn mk_int(&mut self, n: i64) -> TermId {
        self.intern(Term::IntLit(n))
    }

    pub fn mk_var(&mut self, name: impl Into<String>, sort: Sort) -> TermId {
        self.intern(Term::Var(name.into(), sort))
    }

    pub fn mk_not(&mut self, t: TermId) -> TermId {
        match self.term(t) {
            Term::True => self.mk_false(),
            Term::False => self.mk_true(),
            _ => self.intern(Term::Not(t)),
        }
    }

    /// Conjunction. `true` conjuncts are dropped, any `false` collapses the
    /// whole node, and a singleton is returned unwrapped.
    pub fn mk_and(&mut self, args: Vec<TermId>) -> TermId {
        let t = self.mk_true();
        let f = self.mk_false();
        let kept: Vec<TermId> = args.into_iter().filter(|a| *a != t).collect();
        if kept.contains(&f) {
            return f;
        }
        match kept.len() {
            0 => t,
            1 => kept[0],
            _ => self.intern(Term::And(kept)),
        }
    }

    pub fn mk_or(&mut self, args: Vec<TermId>) -> TermId {
        let t = self.mk_true();
        let f = self.mk_false();
        let kept: Vec<TermId> = args.into_iter().filter(|a| *a != f).collect();
        if kept.contains(&t) {
            return t;
        }
        match kept.len() {
            0 => f,
            1 => kept[0],
            _ => self.intern(Term::Or(kept)),
        }
    }

    pub fn mk_implies(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        let t = self.mk_true();
        let f = self.mk_false();
        if lhs == t {
            return rhs;
        }
        if lhs == f || rhs == t {
            return t;
        }
        self.intern(Term::Implies(lhs, rhs))
    }

    pub fn mk_eq(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        if lhs == rhs {
            return self.mk_true();
        }
        self.intern(Term::Eq(lhs, rhs))
    }

    pub fn mk_ite(&mut self, c: TermId, then: TermId, els: TermId) -> TermId {
        self.intern(Term::Ite(c, then, els))
    }

    pub fn mk_add(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.intern(Term::Add(lhs, rhs))
    }

    pub fn mk_sub(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.intern(Term::Sub(lhs, rhs))
    }

    pub fn mk_mul(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.intern(Term::Mul(lhs, rhs))
    }

    pub fn mk_le(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.intern(Term::Le(lhs, rhs))
    }

    pub fn mk_lt(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.intern(Term::Lt(lhs, rhs))
    }

    pub fn mk_ge(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.intern(Term::Ge(lhs, rhs))
    }

    pub fn mk_gt(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.intern(Term::Gt(lhs, rhs))
    }

    pub fn mk_app(&mut self, rel: RelId, args: Vec<TermId>) -> TermId {
        self.intern(Term::App(rel, args))
    }

    pub fn mk_label(&mut self, name: impl Into<String>, inner: TermId) -> TermId {
        self.intern(Term::Label(name.into(), inner))
    }

    pub fn mk_quantifier(
        &mut self,
        forall: bool,
        bound: Vec<(String, Sort)>,
        body: TermId,
    ) -> TermId {
        self.intern(Term::Quantifier {
            forall,
            bound,
            body,
        })
    }

    // --- relation symbols ---

    /// Declare a relation symbol, or return the existing handle when the
    /// name was declared before. The first declaration fixes the signature.
    pub fn declare_rel(&mut self, name: impl Into<String>, params: Vec<Sort>) -> RelId {
        let name = name.into();
        if let Some(&id) = self.rel_by_name.get(&name) {
            return id;
        }
        let id = RelId(self.rels.len() as u32);
        self.rel_by_name.insert(name.clone(), id);
        self.rels.push(RelDecl { name, params });
        id
    }

    pub fn rel(&self, id: RelId) -> &RelDecl {
        &self.rels[id.index()]
    }

    pub fn rel_by_name(&self, name: &str) -> Option<RelId> {
        self.rel_by_name.get(name).copied()
    }

    pub fn rels(&self) -> impl Iterator<Item = (RelId, &RelDecl)> {
        self.rels
            .iter()
            .enumerate()
            .map(|(i, d)| (RelId(i as u32), d))
    }

    /// Declare a fresh copy of `rel` with a numeric suffix, same signature.
    pub fn suffixed_rel(&mut self, rel: RelId, n: usize) -> RelId {
        let decl = self.rel(rel).clone();
        self.declare_rel(format!("{}_{}", decl.name, n), decl.params)
    }

    /// Free variables of a term, in first-occurrence order.
    pub fn free_vars(&self, id: TermId) -> Vec<(String, Sort)> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut bound = Vec::new();
        self.free_vars_rec(id, &mut seen, &mut out, &mut bound);
        out
    }

    fn free_vars_rec(
        &self,
        id: TermId,
        seen: &mut std::collections::HashSet<TermId>,
        out: &mut Vec<(String, Sort)>,
        bound: &mut Vec<String>,
    ) {
        // The seen set is only valid while the bound-variable stack is
        // empty; under a quantifier we fall back to plain recursion.
        if bound.is_empty() && !seen.insert(id) {
            return;
        }
        match self.term(id) {
            Term::Var(name, sort) => {
                if !bound.iter().any(|b| b == name) && !out.iter().any(|(n, _)| n == name) {
                    out.push((name.clone(), *sort));
                }
            }
            Term::True | Term::False | Term::IntLit(_) => {}
            Term::Not(a) | Term::Label(_, a) => self.free_vars_rec(*a, seen, out, bound),
            Term::And(args) | Term::Or(args) => {
                for a in args.clone() {
                    self.free_vars_rec(a, seen, out, bound);
                }
            }
            Term::Implies(a, b)
            | Term::Eq(a, b)
            | Term::Add(a, b)
            | Term::Sub(a, b)
            | Term::Mul(a, b)
            | Term::Le(a, b)
            | Term::Lt(a, b)
            | Term::Ge(a, b)
            | Term::Gt(a, b) => {
                let (a, b) = (*a, *b);
                self.free_vars_rec(a, seen, out, bound);
                self.free_vars_rec(b, seen, out, bound);
            }
            Term::Ite(c, t, e) => {
                let (c, t, e) = (*c, *t, *e);
                self.free_vars_rec(c, seen, out, bound);
                self.free_vars_rec(t, seen, out, bound);
                self.free_vars_rec(e, seen, out, bound);
            }
            Term::App(_, args) => {
                for a in args.clone() {
                    self.free_vars_rec(a, seen, out, bound);
                }
            }
            Term::Quantifier { bound: bs, body, .. } => {
                let names: Vec<String> = bs.iter().map(|(n, _)| n.clone()).collect();
                let body = *body;
                let depth = bound.len();
                bound.extend(names);
                self.free_vars_rec(body, seen, out, bound);
                bound.truncate(depth);
            }
        }
    }
}
