//! VC factoring
//!
//! Splits one verification condition into small implications that each own
//! a single proof obligation, so a failure localizes to one goal:
//!
//! 1. **extract**: linearize along the implication/conjunction spine
//!    (`(A∧B)⇒Q` becomes `A⇒(B⇒Q)`); when an implication's left side is a
//!    loop-invariant application the chain is cut there — `inv ⇒ rest` is
//!    emitted as a standalone small VC and replaced by `true` in the
//!    parent, which bounds parent growth.
//! 2. **merge** (optional): labeled annotation applications get fresh
//!    numbered arguments bound by equalities, collapsing repeated
//!    occurrences of one goal across paths. Quantified subterms are
//!    skipped; path-specific diagnostic values are lost.
//! 3. **collect**: within each small VC, every annotation application or
//!    `_solve_`-prefixed application reachable through implication
//!    right-hand sides and conjunctions is a goal; other formulas touched
//!    on that spine are cruft — context a goal depends on but not itself
//!    an obligation.
//! 4. **emit**: per goal, `¬(VC with this goal ↦ false, sibling goals ↦
//!    true, cruft ↦ true) ⇒ goal`; plus one residual clause with every
//!    goal forced true, unless trivially true.
//!
//! All passes memoize by `TermId`, so shared subterms rewrite once.

use crate::annotate::AnnotationRegistry;
use hornvc_term::{RelId, Term, TermArena, TermId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Factoring pass over one arena, carrying the per-run goal numbering.
pub struct Factorer<'a> {
    arena: &'a mut TermArena,
    registry: &'a AnnotationRegistry,
    merge: bool,
    goal_numbering: HashMap<RelId, usize>,
}

impl<'a> Factorer<'a> {
    pub fn new(arena: &'a mut TermArena, registry: &'a AnnotationRegistry, merge: bool) -> Self {
        Self {
            arena,
            registry,
            merge,
            goal_numbering: HashMap::new(),
        }
    }

    /// Factor `t` into independent implications for the solver.
    pub fn factor_vcs(&mut self, t: TermId) -> Vec<TermId> {
        let mut small = Vec::new();
        let mut memo = HashMap::new();
        let top = self.extract_rec(&mut memo, t, &mut small);
        small.push(top);

        let tru = self.arena.mk_true();
        let fls = self.arena.mk_false();
        let mut vcs = Vec::new();
        for smm in small {
            let sm = if self.merge { self.merge_goals(smm) } else { smm };
            let mut goals = Vec::new();
            let mut cruft = Vec::new();
            self.collect_goals(sm, &mut goals, &mut cruft);

            for &goal in &goals {
                let mut memo: HashMap<TermId, TermId> = goals
                    .iter()
                    .map(|&g| (g, if g == goal { fls } else { tru }))
                    .collect();
                for &c in &cruft {
                    memo.insert(c, tru);
                }
                let vc = self.subst_goals(&mut memo, sm);
                let nvc = self.arena.mk_not(vc);
                vcs.push(self.arena.mk_implies(nvc, goal));
            }

            let mut memo: HashMap<TermId, TermId> =
                goals.iter().map(|&g| (g, tru)).collect();
            let vc = self.subst_goals(&mut memo, sm);
            if vc != tru {
                let nvc = self.arena.mk_not(vc);
                vcs.push(self.arena.mk_implies(nvc, fls));
            }
        }
        debug!(clauses = vcs.len(), "factored VC");
        vcs
    }

    fn is_invariant_app(&self, t: TermId) -> bool {
        match self.arena.term(t) {
            Term::App(rel, _) => {
                let name = &self.arena.rel(*rel).name;
                self.registry.is_loop_invariant(name)
            }
            _ => false,
        }
    }

    fn extract_rec(
        &mut self,
        memo: &mut HashMap<TermId, TermId>,
        t: TermId,
        small: &mut Vec<TermId>,
    ) -> TermId {
        if let Some(&res) = memo.get(&t) {
            return res;
        }
        let res = match self.arena.term(t).clone() {
            Term::Implies(lhs, rhs) => {
                match self.arena.term(lhs).clone() {
                    Term::And(args) => {
                        // (A ∧ B) ⇒ Q  ~~>  A ⇒ (B ⇒ Q)
                        let mut q = rhs;
                        for &a in args.iter().rev() {
                            q = self.arena.mk_implies(a, q);
                        }
                        self.extract_rec(memo, q, small)
                    }
                    Term::Label(_, inner) if self.is_invariant_app(inner) => {
                        let rest = self.extract_rec(memo, rhs, small);
                        let sm = self.arena.mk_implies(lhs, rest);
                        small.push(sm);
                        self.arena.mk_true()
                    }
                    _ if self.is_invariant_app(lhs) => {
                        let rest = self.extract_rec(memo, rhs, small);
                        let sm = self.arena.mk_implies(lhs, rest);
                        small.push(sm);
                        self.arena.mk_true()
                    }
                    _ => {
                        let rest = self.extract_rec(memo, rhs, small);
                        self.arena.mk_implies(lhs, rest)
                    }
                }
            }
            Term::And(args) => {
                let mapped: Vec<TermId> = args
                    .iter()
                    .map(|&a| self.extract_rec(memo, a, small))
                    .collect();
                self.arena.mk_and(mapped)
            }
            Term::Label(name, inner) => {
                let mapped = self.extract_rec(memo, inner, small);
                self.arena.mk_label(name, mapped)
            }
            _ => t,
        };
        memo.insert(t, res);
        res
    }

    /// Large-block rewrite: collapse repeated goal occurrences behind
    /// fresh equated arguments.
    pub fn merge_goals(&mut self, t: TermId) -> TermId {
        let mut memo = HashMap::new();
        self.merge_rec(&mut memo, t)
    }

    fn merge_rec(&mut self, memo: &mut HashMap<TermId, TermId>, t: TermId) -> TermId {
        if let Some(&res) = memo.get(&t) {
            return res;
        }
        let res = match self.arena.term(t).clone() {
            Term::Implies(lhs, rhs) => {
                let mapped = self.merge_rec(memo, rhs);
                self.arena.mk_implies(lhs, mapped)
            }
            Term::And(args) => {
                let mapped: Vec<TermId> =
                    args.iter().map(|&a| self.merge_rec(memo, a)).collect();
                self.arena.mk_and(mapped)
            }
            Term::Label(name, inner) => match self.arena.term(inner).clone() {
                Term::App(_, _) => self.normalize_goal(inner, &name),
                _ => {
                    let mapped = self.merge_rec(memo, inner);
                    self.arena.mk_label(name, mapped)
                }
            },
            Term::Quantifier { .. } => {
                // Assumes side-effect-free arguments; quantified subterms
                // are an explicit unsupported case.
                warn!("merge_goals: skipping quantified subterm");
                t
            }
            _ => t,
        };
        memo.insert(t, res);
        res
    }

    fn normalize_goal(&mut self, goal: TermId, label: &str) -> TermId {
        let Term::App(rel, args) = self.arena.term(goal).clone() else {
            return goal;
        };
        let number = match self.goal_numbering.get(&rel) {
            Some(&n) => n,
            None => {
                let n = self.goal_numbering.len();
                self.goal_numbering.insert(rel, n);
                n
            }
        };
        let decl = self.arena.rel(rel).clone();
        let info = self.registry.get(&decl.name);
        let mut tvars = Vec::with_capacity(args.len());
        let mut eqns = Vec::with_capacity(args.len());
        for (i, &arg) in args.iter().enumerate() {
            let pname = info
                .and_then(|inf| inf.argnames.get(i).cloned())
                .unwrap_or_else(|| i.to_string());
            let tv = self
                .arena
                .mk_var(format!("@a{number}_{pname}"), decl.params[i]);
            tvars.push(tv);
            eqns.push(self.arena.mk_eq(tv, arg));
        }
        let hyp = self.arena.mk_and(eqns);
        let app = self.arena.mk_app(rel, tvars);
        let labeled = self.arena.mk_label(label, app);
        self.arena.mk_implies(hyp, labeled)
    }

    /// Gather the goals and cruft of one small VC.
    pub fn collect_goals(&mut self, t: TermId, goals: &mut Vec<TermId>, cruft: &mut Vec<TermId>) {
        let mut visited = HashSet::new();
        let mut goal_set = HashSet::new();
        self.collect_rec(&mut visited, &mut goal_set, t, goals, cruft);
    }

    fn collect_rec(
        &mut self,
        visited: &mut HashSet<TermId>,
        goal_set: &mut HashSet<TermId>,
        t: TermId,
        goals: &mut Vec<TermId>,
        cruft: &mut Vec<TermId>,
    ) {
        if !visited.insert(t) {
            return;
        }
        match self.arena.term(t).clone() {
            Term::Implies(_, rhs) => self.collect_rec(visited, goal_set, rhs, goals, cruft),
            Term::And(args) => {
                for &a in &args {
                    self.collect_rec(visited, goal_set, a, goals, cruft);
                }
            }
            Term::Label(_, inner) => {
                let app_rel = match self.arena.term(inner) {
                    Term::App(rel, _) => Some(*rel),
                    _ => None,
                };
                match app_rel {
                    Some(rel) => {
                        if goal_set.contains(&inner) {
                            return;
                        }
                        let name = self.arena.rel(rel).name.clone();
                        if self.registry.contains(&name) || name.starts_with("_solve_") {
                            goals.push(inner);
                            goal_set.insert(inner);
                        }
                    }
                    None => self.collect_rec(visited, goal_set, inner, goals, cruft),
                }
            }
            Term::App(rel, _) => {
                let name = self.arena.rel(rel).name.clone();
                if name.starts_with("_solve_") {
                    if goal_set.insert(t) {
                        goals.push(t);
                    }
                } else {
                    cruft.push(t);
                }
            }
            _ => cruft.push(t),
        }
    }

    /// Substitute goal/cruft verdicts through a small VC, dropping
    /// implications and conjuncts that collapse to `true`.
    pub fn subst_goals(&mut self, memo: &mut HashMap<TermId, TermId>, t: TermId) -> TermId {
        if let Some(&res) = memo.get(&t) {
            return res;
        }
        let tru = self.arena.mk_true();
        let res = match self.arena.term(t).clone() {
            Term::Implies(lhs, rhs) => {
                let mapped = self.subst_goals(memo, rhs);
                self.arena.mk_implies(lhs, mapped)
            }
            Term::And(args) => {
                let mapped: Vec<TermId> =
                    args.iter().map(|&a| self.subst_goals(memo, a)).collect();
                self.arena.mk_and(mapped)
            }
            Term::Label(name, inner) => {
                let is_app = matches!(self.arena.term(inner), Term::App(_, _));
                if is_app {
                    match memo.get(&inner) {
                        Some(&verdict) => {
                            if verdict == tru {
                                tru
                            } else {
                                self.arena.mk_label(name, verdict)
                            }
                        }
                        None => t,
                    }
                } else {
                    let mapped = self.subst_goals(memo, inner);
                    self.arena.mk_label(name, mapped)
                }
            }
            _ => t,
        };
        memo.insert(t, res);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{AnnotationInfo, AnnotationKind};
    use hornvc_term::{term_to_smt2, Sort};

    fn registry_with(arena: &mut TermArena, invariants: &[&str]) -> AnnotationRegistry {
        let mut registry = AnnotationRegistry::new();
        for name in invariants {
            arena.declare_rel(*name, vec![Sort::Int]);
            registry.insert(
                *name,
                AnnotationInfo {
                    filename: None,
                    lineno: None,
                    argnames: vec!["x".to_string()],
                    kind: AnnotationKind::LoopInvariant,
                },
            );
        }
        registry
    }

    /// `p ⇒ (@0[Inv(x)] ∧ (Inv(x) ⇒ @1[q]))` — the shape a one-loop VC
    /// takes: entry check, then the cut body under the invariant.
    fn one_loop_vc(arena: &mut TermArena) -> TermId {
        let inv = arena.rel_by_name("inv").unwrap();
        let x = arena.mk_var("x", Sort::Int);
        let inv_app = arena.mk_app(inv, vec![x]);
        let p = arena.mk_var("p", Sort::Bool);
        let q = arena.mk_var("q", Sort::Bool);
        let goal_entry = arena.mk_label("@0", inv_app);
        let body_assert = arena.mk_label("@1", q);
        let body = arena.mk_implies(inv_app, body_assert);
        let conj = arena.mk_and(vec![goal_entry, body]);
        arena.mk_implies(p, conj)
    }

    #[test]
    fn test_extract_cuts_at_invariant_hypothesis() {
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv"]);
        let vc = one_loop_vc(&mut arena);

        let mut factorer = Factorer::new(&mut arena, &registry, false);
        let mut small = Vec::new();
        let mut memo = HashMap::new();
        let top = factorer.extract_rec(&mut memo, vc, &mut small);
        small.push(top);

        // One cut small (inv ⇒ body) plus the remainder.
        assert_eq!(small.len(), 2);
        assert_eq!(term_to_smt2(&arena, small[0]), "(=> (inv x) q)");
        // In the parent, the cut position became true and was simplified
        // away, leaving the entry check.
        assert_eq!(term_to_smt2(&arena, small[1]), "(=> p (inv x))");
    }

    #[test]
    fn test_factor_counts_goals_and_residual() {
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv"]);
        let vc = one_loop_vc(&mut arena);

        let mut factorer = Factorer::new(&mut arena, &registry, false);
        let vcs = factorer.factor_vcs(vc);

        // Goals: the invariant entry check (in the remainder small) is one
        // goal; the cut small has no annotation goal, so its body assert
        // lands in a residual clause. Two clauses total here.
        assert_eq!(vcs.len(), 2);
        // Each emitted clause is `¬body ⇒ head`.
        for &vc in &vcs {
            assert!(matches!(arena.term(vc), Term::Implies(_, _)));
        }
    }

    #[test]
    fn test_factor_two_distinct_goals() {
        // (@0[inv(x)] ∧ @1[inv2(y)]) with plain context: two isolating
        // clauses, no residual (nothing ground remains).
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv", "inv2"]);
        let inv = arena.rel_by_name("inv").unwrap();
        let inv2 = arena.rel_by_name("inv2").unwrap();
        let x = arena.mk_var("x", Sort::Int);
        let y = arena.mk_var("y", Sort::Int);
        let a1 = arena.mk_app(inv, vec![x]);
        let a2 = arena.mk_app(inv2, vec![y]);
        let g1 = arena.mk_label("@0", a1);
        let g2 = arena.mk_label("@1", a2);
        let vc = arena.mk_and(vec![g1, g2]);

        let mut factorer = Factorer::new(&mut arena, &registry, false);
        let vcs = factorer.factor_vcs(vc);
        assert_eq!(vcs.len(), 2);

        // Each clause isolates one goal with the sibling forced true; the
        // remaining body is the forced-false goal itself.
        let rendered: Vec<String> = vcs.iter().map(|&v| term_to_smt2(&arena, v)).collect();
        assert_eq!(rendered[0], "(=> (not false) (inv x))");
        assert_eq!(rendered[1], "(=> (not false) (inv2 y))");
    }

    #[test]
    fn test_collect_goals_skips_unregistered_labels() {
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv"]);
        let other = arena.declare_rel("helper", vec![Sort::Int]);
        let x = arena.mk_var("x", Sort::Int);
        let helper_app = arena.mk_app(other, vec![x]);
        let labeled = arena.mk_label("+b", helper_app);
        let inv = arena.rel_by_name("inv").unwrap();
        let inv_app = arena.mk_app(inv, vec![x]);
        let goal = arena.mk_label("@0", inv_app);
        let vc = arena.mk_and(vec![labeled, goal]);

        let mut factorer = Factorer::new(&mut arena, &registry, false);
        let mut goals = Vec::new();
        let mut cruft = Vec::new();
        factorer.collect_goals(vc, &mut goals, &mut cruft);
        assert_eq!(goals, vec![inv_app]);
        // The unregistered labeled application is neither goal nor cruft.
        assert!(cruft.is_empty());
    }

    #[test]
    fn test_collect_goals_solve_prefix() {
        let mut arena = TermArena::new();
        let registry = AnnotationRegistry::new();
        let solve = arena.declare_rel("_solve_q", vec![]);
        let app = arena.mk_app(solve, vec![]);
        let ground = arena.mk_var("c", Sort::Bool);
        let vc = arena.mk_and(vec![app, ground]);

        let mut factorer = Factorer::new(&mut arena, &registry, false);
        let mut goals = Vec::new();
        let mut cruft = Vec::new();
        factorer.collect_goals(vc, &mut goals, &mut cruft);
        assert_eq!(goals, vec![app]);
        assert_eq!(cruft, vec![ground]);
    }

    #[test]
    fn test_goal_collected_once_across_paths() {
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv"]);
        let inv = arena.rel_by_name("inv").unwrap();
        let x = arena.mk_var("x", Sort::Int);
        let app = arena.mk_app(inv, vec![x]);
        let g = arena.mk_label("@0", app);
        let p = arena.mk_var("p", Sort::Bool);
        let left = arena.mk_implies(p, g);
        // The same labeled goal reachable on two spines.
        let vc = arena.mk_and(vec![left, g]);

        let mut factorer = Factorer::new(&mut arena, &registry, false);
        let mut goals = Vec::new();
        let mut cruft = Vec::new();
        factorer.collect_goals(vc, &mut goals, &mut cruft);
        assert_eq!(goals.len(), 1);
    }

    #[test]
    fn test_merge_goals_freshens_arguments() {
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv"]);
        let inv = arena.rel_by_name("inv").unwrap();
        let x = arena.mk_var("x!3", Sort::Int);
        let app = arena.mk_app(inv, vec![x]);
        let goal = arena.mk_label("@0", app);

        let mut factorer = Factorer::new(&mut arena, &registry, true);
        let merged = factorer.merge_goals(goal);
        assert_eq!(
            term_to_smt2(&arena, merged),
            "(=> (= @a0_x x!3) (inv @a0_x))"
        );
    }

    #[test]
    fn test_merge_goals_numbering_is_stable_per_relation() {
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv", "inv2"]);
        let inv = arena.rel_by_name("inv").unwrap();
        let inv2 = arena.rel_by_name("inv2").unwrap();
        let a = arena.mk_var("a", Sort::Int);
        let b = arena.mk_var("b", Sort::Int);
        let app1 = arena.mk_app(inv, vec![a]);
        let app2 = arena.mk_app(inv2, vec![b]);
        let g1 = arena.mk_label("@0", app1);
        let g2 = arena.mk_label("@1", app2);
        let vc = arena.mk_and(vec![g1, g2]);

        let mut factorer = Factorer::new(&mut arena, &registry, true);
        let merged = factorer.merge_goals(vc);
        let text = term_to_smt2(&arena, merged);
        assert!(text.contains("@a0_x"));
        assert!(text.contains("@a1_x"));
    }

    #[test]
    fn test_merge_skips_quantifier() {
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv"]);
        let k = arena.mk_var("k", Sort::Int);
        let zero = arena.mk_int(0);
        let body = arena.mk_ge(k, zero);
        let q = arena.mk_quantifier(true, vec![("k".to_string(), Sort::Int)], body);

        let mut factorer = Factorer::new(&mut arena, &registry, true);
        assert_eq!(factorer.merge_goals(q), q);
    }

    #[test]
    fn test_subst_keeps_label_on_falsified_goal() {
        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv"]);
        let inv = arena.rel_by_name("inv").unwrap();
        let x = arena.mk_var("x", Sort::Int);
        let app = arena.mk_app(inv, vec![x]);
        let goal = arena.mk_label("@0", app);
        let p = arena.mk_var("p", Sort::Bool);
        let vc = arena.mk_implies(p, goal);

        let fls = arena.mk_false();
        let mut factorer = Factorer::new(&mut arena, &registry, false);
        let mut memo = HashMap::new();
        memo.insert(app, fls);
        let result = factorer.subst_goals(&mut memo, vc);
        // The label survives around the forced-false goal.
        match arena.term(result) {
            Term::Implies(_, rhs) => {
                assert!(matches!(arena.term(*rhs), Term::Label(name, inner)
                    if name == "@0" && *inner == fls));
            }
            other => panic!("expected implication, got {other:?}"),
        }
    }

    #[test]
    fn test_factored_conjunction_equivalent_on_assignments() {
        // Truth-table check: conjoining the emitted clauses is equivalent
        // to the original VC for all assignments of the goal relation and
        // ground atoms. (Invariant-hypothesis cuts deliberately strengthen
        // the system, so the VC here has goals and cruft but no cut.)
        use hornvc_term::{eval, Env, Value};

        let mut arena = TermArena::new();
        let registry = registry_with(&mut arena, &["inv"]);
        let inv = arena.rel_by_name("inv").unwrap();
        let x = arena.mk_var("x", Sort::Int);
        let inv_app = arena.mk_app(inv, vec![x]);
        let goal = arena.mk_label("@0", inv_app);
        let q = arena.mk_var("q", Sort::Bool);
        let ground = arena.mk_label("@1", q);
        let p = arena.mk_var("p", Sort::Bool);
        let conj = arena.mk_and(vec![goal, ground]);
        let vc = arena.mk_implies(p, conj);

        let mut factorer = Factorer::new(&mut arena, &registry, false);
        let clauses = factorer.factor_vcs(vc);
        assert_eq!(clauses.len(), 2);

        for p_val in [false, true] {
            for q_val in [false, true] {
                for inv_verdict in [false, true] {
                    let mut env = Env::new()
                        .with_bool("p", p_val)
                        .with_bool("q", q_val)
                        .with_int("x", 0);
                    env.set_rel(inv, inv_verdict);
                    let original = eval(&arena, vc, &env).unwrap();
                    let all_clauses = clauses
                        .iter()
                        .map(|&c| eval(&arena, c, &env).unwrap())
                        .all(|v| v == Value::Bool(true));
                    assert_eq!(
                        original,
                        Value::Bool(all_clauses),
                        "mismatch at p={p_val} q={q_val} inv={inv_verdict}"
                    );
                }
            }
        }
    }
}
