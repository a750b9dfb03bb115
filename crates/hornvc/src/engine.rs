//! The generator engine
//!
//! `FixedpointVcGen` owns all per-run state: the term arena, the
//! annotation registry, the transformed program, per-implementation VC
//! info, the assembled RPFP, and the lowered Horn queries. `generate()`
//! assembles the problem; `check()` invokes the solver synchronously per
//! independent unit and classifies each outcome into Correct /
//! CounterexampleFound / Inconclusive. Nothing here is process-global, so
//! separate runs never share caches.

use crate::annotate::{
    annotate_call_sites, annotate_loops, annotate_proc_summary, AnnotationRegistry,
};
use crate::config::{AnnotationStyle, VcConfig, VcMode};
use crate::error::VcError;
use crate::factor::Factorer;
use crate::reconstruct::{reconstruct, ReconstructContext};
use crate::rpfp::{collect_rel_params, NodeId, Rpfp, Transformer};
use crate::wp::{build_block_equations, desugar_calls, install_exit_asserts, VcInfo};
use hornvc_counterexample::Counterexample;
use hornvc_program::{
    analyze_loops, compute_live_variables, convert_to_dag, inline_all, passify, Block, Command,
    Implementation, InlinerConfig, Program, SummaryMap, Transfer,
};
use hornvc_solver::{
    Derivation, FixpointOutcome, FixpointSolver, HornQuery, HornRule, SolverError, SolverStats,
};
use hornvc_term::{eval_labels, term_to_smt2, Env, RelId, Sort, Term, TermArena, TermId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Per-unit verification verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Correct,
    /// The trace is absent when the solver produced no usable derivation.
    CounterexampleFound(Option<Counterexample>),
    Inconclusive(String),
}

impl VerificationOutcome {
    pub fn is_correct(&self) -> bool {
        matches!(self, VerificationOutcome::Correct)
    }
}

/// Outcome of one independent unit (a procedure, or the whole program in
/// flat/summary modes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureReport {
    pub procedure: String,
    pub outcome: VerificationOutcome,
    pub stats: SolverStats,
}

/// All per-unit reports of one `check()` run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResult {
    pub reports: Vec<ProcedureReport>,
}

impl VerificationResult {
    pub fn is_correct(&self) -> bool {
        !self.reports.is_empty() && self.reports.iter().all(|r| r.outcome.is_correct())
    }

    pub fn first_counterexample(&self) -> Option<&Counterexample> {
        self.reports.iter().find_map(|r| match &r.outcome {
            VerificationOutcome::CounterexampleFound(cex) => cex.as_ref(),
            _ => None,
        })
    }

    /// Collapse the per-unit reports into one verdict.
    pub fn overall(&self) -> VerificationOutcome {
        for r in &self.reports {
            if let VerificationOutcome::CounterexampleFound(_) = &r.outcome {
                return r.outcome.clone();
            }
        }
        for r in &self.reports {
            if let VerificationOutcome::Inconclusive(_) = &r.outcome {
                return r.outcome.clone();
            }
        }
        VerificationOutcome::Correct
    }
}

impl std::fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for r in &self.reports {
            match &r.outcome {
                VerificationOutcome::Correct => {
                    writeln!(f, "{}: correct ({})", r.procedure, r.stats)?;
                }
                VerificationOutcome::CounterexampleFound(Some(cex)) => {
                    writeln!(f, "{}: counterexample found", r.procedure)?;
                    write!(f, "{}", cex.summary())?;
                }
                VerificationOutcome::CounterexampleFound(None) => {
                    writeln!(f, "{}: counterexample found (no trace)", r.procedure)?;
                }
                VerificationOutcome::Inconclusive(reason) => {
                    writeln!(f, "{}: inconclusive ({reason})", r.procedure)?;
                }
            }
        }
        Ok(())
    }
}

/// The verification-condition and fixpoint-problem generator.
pub struct FixedpointVcGen {
    config: VcConfig,
    program: Program,
    arena: TermArena,
    registry: AnnotationRegistry,
    vc_infos: HashMap<String, VcInfo>,
    rpfp: Option<Rpfp>,
    node_procs: HashMap<usize, String>,
    queries: Vec<(String, HornQuery)>,
    axioms: Vec<String>,
    generated: bool,
}

impl FixedpointVcGen {
    /// Reject malformed input before any VC construction.
    pub fn new(program: Program, config: VcConfig) -> Result<Self, VcError> {
        program.validate().map_err(VcError::MalformedProgram)?;
        Ok(Self {
            config,
            program,
            arena: TermArena::new(),
            registry: AnnotationRegistry::new(),
            vc_infos: HashMap::new(),
            rpfp: None,
            node_procs: HashMap::new(),
            queries: Vec::new(),
            axioms: Vec::new(),
            generated: false,
        })
    }

    /// Register a ground background axiom over the program's globals,
    /// asserted alongside the assembled problem.
    pub fn assert_axiom(&mut self, expr: impl Into<String>) {
        self.axioms.push(expr.into());
    }

    pub fn arena(&self) -> &TermArena {
        &self.arena
    }

    pub fn registry(&self) -> &AnnotationRegistry {
        &self.registry
    }

    /// The transformed program the VCs were built from.
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn rpfp(&self) -> Option<&Rpfp> {
        self.rpfp.as_ref()
    }

    pub fn vc_info(&self, proc: &str) -> Option<&VcInfo> {
        self.vc_infos.get(proc)
    }

    pub fn queries(&self) -> &[(String, HornQuery)] {
        &self.queries
    }

    fn entry_name(&self) -> Option<String> {
        self.program.entry_procedure().map(|p| p.name.clone())
    }

    /// Assemble the verification problem as internal state.
    pub fn generate(&mut self) -> Result<(), VcError> {
        if self.generated {
            return Ok(());
        }
        match self.config.mode {
            VcMode::LegacyFlat => self.generate_flat()?,
            VcMode::SummaryHorn => self.generate_summary()?,
            VcMode::Plain => self.generate_plain()?,
        }
        self.generated = true;
        Ok(())
    }

    /// Parse the registered axioms over the globals into one conjunction.
    fn axiom_background(&mut self) -> Result<Option<TermId>, VcError> {
        if self.axioms.is_empty() {
            return Ok(None);
        }
        let globals: HashMap<String, Sort> = self
            .program
            .globals
            .iter()
            .map(|g| (g.name.clone(), g.sort))
            .collect();
        let mut parsed = Vec::with_capacity(self.axioms.len());
        for axiom in self.axioms.clone() {
            parsed.push(hornvc_term::parse_term(&mut self.arena, &axiom, &globals)?);
        }
        Ok(Some(self.arena.mk_and(parsed)))
    }

    fn implemented(&self) -> Vec<String> {
        self.program
            .procedures
            .iter()
            .filter(|p| p.body.is_some())
            .map(|p| p.name.clone())
            .collect()
    }

    fn generate_flat(&mut self) -> Result<(), VcError> {
        self.program = inline_all(&self.program, &InlinerConfig::default())?;
        let entry = self
            .entry_name()
            .ok_or_else(|| VcError::MalformedProgram("no entry procedure".to_string()))?;
        info!(procedure = %entry, "generating flat VC");

        let summaries = SummaryMap::from_program(&self.program);
        self.run_liveness(&entry, &summaries);
        annotate_loops(&mut self.arena, &mut self.registry, &mut self.program, &entry, true)?;

        let mut sites = 0;
        let vc = self.build_proc_vc(&entry, &summaries, false, &mut sites)?;
        let background = self.axiom_background()?;
        let clauses = {
            let mut factorer = Factorer::new(
                &mut self.arena,
                &self.registry,
                self.config.merge_before_factor,
            );
            factorer.factor_vcs(vc)
        };
        let mut query = self.lower_clauses(&clauses);
        if let Some(bg) = background {
            query.set_background(term_to_smt2(&self.arena, bg));
        }
        self.queries.push((entry.clone(), query));

        // A single-node RPFP so reconstruction is uniform across modes.
        let rel = self.arena.declare_rel(format!("{entry}_vc"), vec![]);
        let mut rpfp = Rpfp::new(&mut self.arena);
        if let Some(bg) = background {
            rpfp.assert_axiom(&mut self.arena, bg);
        }
        let node = rpfp.create_node(rel);
        let fls = self.arena.mk_false();
        rpfp.set_bound(node, fls);
        let formula = self.arena.mk_not(vc);
        rpfp.create_edge(
            node,
            Transformer {
                rel_params: Vec::new(),
                formula,
            },
            Vec::new(),
        );
        self.node_procs.insert(node.0, entry);
        self.rpfp = Some(rpfp);
        Ok(())
    }

    fn generate_plain(&mut self) -> Result<(), VcError> {
        let implemented = self.implemented();
        let summaries = SummaryMap::from_program(&self.program);
        let background = self.axiom_background()?;
        let mut rpfp = Rpfp::new(&mut self.arena);
        if let Some(bg) = background {
            rpfp.assert_axiom(&mut self.arena, bg);
        }
        let mut sites = 0;

        for name in &implemented {
            info!(procedure = %name, "generating plain VC");
            self.run_liveness(name, &summaries);
            annotate_loops(&mut self.arena, &mut self.registry, &mut self.program, name, true)?;
            let vc = self.build_proc_vc(name, &summaries, false, &mut sites)?;

            let clauses = {
                let mut factorer = Factorer::new(
                    &mut self.arena,
                    &self.registry,
                    self.config.merge_before_factor,
                );
                factorer.factor_vcs(vc)
            };
            let mut query = self.lower_clauses(&clauses);
            if let Some(bg) = background {
                query.set_background(term_to_smt2(&self.arena, bg));
            }
            self.queries.push((name.clone(), query));

            let rel = self.arena.declare_rel(format!("{name}_vc"), vec![]);
            let node = rpfp.create_node(rel);
            let fls = self.arena.mk_false();
            rpfp.set_bound(node, fls);
            let formula = self.arena.mk_not(vc);
            rpfp.create_edge(
                node,
                Transformer {
                    rel_params: Vec::new(),
                    formula,
                },
                Vec::new(),
            );
            self.node_procs.insert(node.0, name.clone());
        }
        self.rpfp = Some(rpfp);
        Ok(())
    }

    fn generate_summary(&mut self) -> Result<(), VcError> {
        let implemented = self.implemented();
        let entry = self.entry_name();
        let summaries = SummaryMap::from_program(&self.program);

        for name in &implemented {
            self.run_liveness(name, &summaries);
        }
        for name in &implemented {
            annotate_proc_summary(&mut self.arena, &mut self.registry, &mut self.program, name)?;
        }
        if self.config.style == AnnotationStyle::Call {
            for name in &implemented {
                annotate_call_sites(&mut self.arena, &mut self.registry, &mut self.program, name)?;
            }
        }
        for name in &implemented {
            annotate_loops(&mut self.arena, &mut self.registry, &mut self.program, name, false)?;
        }

        let mut sites = 0;
        for name in &implemented {
            info!(procedure = %name, "generating summary-mode VC");
            let is_entry = entry.as_deref() == Some(name.as_str());
            let vc = self.build_proc_vc(name, &summaries, is_entry, &mut sites)?;
            debug!(procedure = %name, vc = %term_to_smt2(&self.arena, vc), "procedure VC");
        }

        // Nodes first (relations index the procedures), then edges with
        // call sites rewritten to suffixed relation parameters.
        let background = self.axiom_background()?;
        let mut rpfp = Rpfp::new(&mut self.arena);
        if let Some(bg) = background {
            rpfp.assert_axiom(&mut self.arena, bg);
        }
        let mut rel_to_node: HashMap<RelId, NodeId> = HashMap::new();
        for name in &implemented {
            let rel = self
                .arena
                .rel_by_name(&format!("{name}_summary"))
                .expect("summary annotation declared above");
            let node = rpfp.create_node(rel);
            rel_to_node.insert(rel, node);
            self.node_procs.insert(node.0, name.clone());
            if entry.as_deref() == Some(name.as_str()) {
                let fls = self.arena.mk_false();
                rpfp.set_bound(node, fls);
            }
        }
        for name in &implemented {
            let vc = self.vc_infos[name].vc;
            let (rewritten, rel_params, children) =
                collect_rel_params(&mut self.arena, vc, &rel_to_node);
            let formula = self.arena.mk_not(rewritten);
            let node = rpfp
                .node_of_rel(
                    self.arena
                        .rel_by_name(&format!("{name}_summary"))
                        .expect("summary annotation declared above"),
                )
                .expect("node created above");
            rpfp.create_edge(
                node,
                Transformer {
                    rel_params,
                    formula,
                },
                children,
            );
        }
        self.rpfp = Some(rpfp);

        // Lower the whole RPFP into one Horn query via factoring.
        let mut all_clauses = Vec::new();
        for name in &implemented {
            let vc = self.vc_infos[name].vc;
            let mut factorer = Factorer::new(
                &mut self.arena,
                &self.registry,
                self.config.merge_before_factor,
            );
            all_clauses.extend(factorer.factor_vcs(vc));
        }
        let mut query = self.lower_clauses(&all_clauses);
        if let Some(bg) = background {
            query.set_background(term_to_smt2(&self.arena, bg));
        }
        let unit = entry.unwrap_or_else(|| "program".to_string());
        self.queries.push((unit, query));
        Ok(())
    }

    fn run_liveness(&mut self, name: &str, summaries: &SummaryMap) {
        if let Some(body) = self
            .program
            .procedure_mut(name)
            .and_then(|p| p.body.as_mut())
        {
            compute_live_variables(body, summaries);
        }
    }

    /// Transform one implementation (entry assumes, exit asserts, call
    /// desugaring, DAG conversion, passification) and build its VC.
    fn build_proc_vc(
        &mut self,
        name: &str,
        summaries: &SummaryMap,
        is_entry: bool,
        sites: &mut usize,
    ) -> Result<TermId, VcError> {
        let (requires, ensures) = {
            let proc = self
                .program
                .procedure(name)
                .ok_or_else(|| VcError::MalformedProgram(format!("no procedure `{name}`")))?;
            (proc.requires.clone(), proc.ensures.clone())
        };
        let mut imp = self
            .program
            .procedure_mut(name)
            .and_then(|p| p.body.take())
            .ok_or_else(|| {
                VcError::MalformedProgram(format!("procedure `{name}` has no implementation"))
            })?;

        // Requires go into a fresh preamble block so a loop header at the
        // original entry keeps its invariant asserts in leading position.
        if !requires.is_empty() {
            let mut pre = Block::new(
                imp.fresh_label(&format!("{name}_pre")),
                Vec::new(),
                Transfer::Goto(vec![imp.entry]),
            );
            install_entry_assumes_into(&mut pre, &requires);
            imp.blocks.push(pre);
            imp.entry = imp.blocks.len() - 1;
        }
        install_exit_asserts(&self.registry, &mut imp, &ensures, is_entry);
        desugar_calls(&self.registry, &self.program, &mut imp, sites)?;

        let loops = analyze_loops(&imp)
            .map_err(|e| VcError::UnsupportedProgram(format!("{e} in `{name}`")))?;
        convert_to_dag(&mut imp, &loops, summaries);

        let base_sorts = self.base_sorts(name, &imp);
        let sorts = passify(&mut imp, &base_sorts)?;
        let vcinfo = build_block_equations(&mut self.arena, &imp, &sorts, name)?;
        let vc = vcinfo.vc;

        self.vc_infos.insert(name.to_string(), vcinfo);
        if let Some(proc) = self.program.procedure_mut(name) {
            proc.body = Some(imp);
        }
        Ok(vc)
    }

    fn base_sorts(&self, name: &str, imp: &Implementation) -> HashMap<String, Sort> {
        let mut env: HashMap<String, Sort> = HashMap::new();
        for g in &self.program.globals {
            env.insert(g.name.clone(), g.sort);
        }
        if let Some(proc) = self.program.procedure(name) {
            for v in proc.in_params.iter().chain(&proc.out_params) {
                env.insert(v.name.clone(), v.sort);
            }
        }
        for v in &imp.locals {
            env.insert(v.name.clone(), v.sort);
        }
        env
    }

    /// Lower factored clauses into a Horn query, dropping trivial ones.
    fn lower_clauses(&mut self, clauses: &[TermId]) -> HornQuery {
        let mut query = HornQuery::new();
        let tru = self.arena.mk_true();
        for &clause in clauses {
            if clause == tru {
                continue;
            }
            let Term::Implies(lhs, rhs) = self.arena.term(clause).clone() else {
                warn!("skipping non-implication clause");
                continue;
            };
            let head = match self.arena.term(rhs).clone() {
                Term::False => "false".to_string(),
                Term::App(_, _) => term_to_smt2(&self.arena, rhs),
                Term::Label(_, inner)
                    if matches!(self.arena.term(inner), Term::App(_, _)) =>
                {
                    term_to_smt2(&self.arena, inner)
                }
                _ => {
                    warn!("skipping clause with non-relational head");
                    continue;
                }
            };
            let body = term_to_smt2(&self.arena, lhs);
            let mut bound = self.arena.free_vars(lhs);
            for (n, s) in self.arena.free_vars(rhs) {
                if !bound.iter().any(|(bn, _)| *bn == n) {
                    bound.push((n, s));
                }
            }
            let mut rels = Vec::new();
            collect_rels(&self.arena, lhs, &mut HashSet::new(), &mut rels);
            collect_rels(&self.arena, rhs, &mut HashSet::new(), &mut rels);
            for rel in rels {
                let decl = self.arena.rel(rel).clone();
                query.declare(decl.name, decl.params);
            }
            query.add_rule(HornRule { bound, body, head });
        }
        query
    }

    /// Invoke the solver per independent unit and classify outcomes. A
    /// solver timeout is an inconclusive unit, not a run failure; each
    /// unit reports once, with no retries.
    pub fn check(&self, solver: &dyn FixpointSolver) -> Result<VerificationResult, VcError> {
        if !self.generated {
            return Err(VcError::MalformedProgram(
                "generate() must run before check()".to_string(),
            ));
        }
        let mut result = VerificationResult::default();
        for (unit, query) in &self.queries {
            let outcome = match solver.solve(query) {
                Ok(outcome) => outcome,
                Err(SolverError::Timeout(d)) => {
                    result.reports.push(ProcedureReport {
                        procedure: unit.clone(),
                        outcome: VerificationOutcome::Inconclusive(format!(
                            "solver timed out after {d:?}"
                        )),
                        stats: SolverStats::default(),
                    });
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let stats = outcome.stats().clone();
            let verdict = match outcome {
                FixpointOutcome::Valid { .. } => VerificationOutcome::Correct,
                FixpointOutcome::Invalid { derivation, .. } => {
                    let cex = match derivation {
                        Some(d) => Some(self.reconstruct(&d)?),
                        None => None,
                    };
                    VerificationOutcome::CounterexampleFound(cex)
                }
                FixpointOutcome::Unknown { reason, .. } => {
                    VerificationOutcome::Inconclusive(reason)
                }
            };
            info!(unit = %unit, ?verdict, "unit checked");
            result.reports.push(ProcedureReport {
                procedure: unit.clone(),
                outcome: verdict,
                stats,
            });
        }
        Ok(result)
    }

    /// Map a falsifying derivation back onto the CFG.
    pub fn reconstruct(&self, derivation: &Derivation) -> Result<Counterexample, VcError> {
        let rpfp = self.rpfp.as_ref().ok_or_else(|| {
            VcError::MissingLabel("no RPFP assembled; run generate() first".to_string())
        })?;
        let ctx = ReconstructContext {
            arena: &self.arena,
            rpfp,
            program: &self.program,
            registry: &self.registry,
            vc_infos: &self.vc_infos,
            node_procs: &self.node_procs,
        };
        reconstruct(&ctx, derivation)
    }

    /// Labels on the falsifying path of `proc` under a concrete witness
    /// environment: exactly those whose labeled subterm evaluates false.
    /// The procedure's own summary goal is falsified automatically.
    pub fn path_labels(
        &self,
        proc: &str,
        env: &Env,
    ) -> Result<HashSet<String>, VcError> {
        let rpfp = self.rpfp.as_ref().ok_or_else(|| {
            VcError::MissingLabel("no RPFP assembled; run generate() first".to_string())
        })?;
        let node = self
            .node_procs
            .iter()
            .find(|(_, p)| p.as_str() == proc)
            .map(|(&n, _)| NodeId(n))
            .ok_or_else(|| VcError::MissingLabel(format!("no node for `{proc}`")))?;
        let edge = rpfp
            .edge_of_node(node)
            .ok_or_else(|| VcError::MissingLabel(format!("no edge for `{proc}`")))?;
        let mut env = env.clone();
        if let Some(rel) = self.arena.rel_by_name(&format!("{proc}_summary")) {
            env.set_rel(rel, false);
        }
        let formula = rpfp.edge(edge).transformer.formula;
        let (_, labels) = eval_labels(&self.arena, formula, &env)
            .map_err(|e| VcError::MissingLabel(format!("cannot evaluate labels: {e}")))?;
        Ok(labels
            .into_iter()
            .filter(|(_, value)| !value)
            .map(|(name, _)| name)
            .collect())
    }
}

fn install_entry_assumes_into(block: &mut Block, requires: &[hornvc_program::SpecClause]) {
    for clause in requires {
        block.cmds.push(Command::Assume {
            expr: clause.expr.clone(),
            attrs: clause.attrs.clone(),
        });
    }
}

fn collect_rels(
    arena: &TermArena,
    t: TermId,
    visited: &mut HashSet<TermId>,
    out: &mut Vec<RelId>,
) {
    if !visited.insert(t) {
        return;
    }
    match arena.term(t).clone() {
        Term::App(rel, args) => {
            if !out.contains(&rel) {
                out.push(rel);
            }
            for a in args {
                collect_rels(arena, a, visited, out);
            }
        }
        Term::Label(_, inner) | Term::Not(inner) => collect_rels(arena, inner, visited, out),
        Term::And(args) | Term::Or(args) => {
            for a in args {
                collect_rels(arena, a, visited, out);
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
            collect_rels(arena, a, visited, out);
            collect_rels(arena, b, visited, out);
        }
        Term::Ite(c, t1, t2) => {
            collect_rels(arena, c, visited, out);
            collect_rels(arena, t1, visited, out);
            collect_rels(arena, t2, visited, out);
        }
        Term::Quantifier { body, .. } => collect_rels(arena, body, visited, out),
        Term::True | Term::False | Term::IntLit(_) | Term::Var(_, _) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hornvc_program::Procedure;

    fn counter_program(with_loop: bool) -> Program {
        // main: counter := 0; while (counter < 11) counter := counter + 1;
        // assert counter < 10.
        let blocks = if with_loop {
            vec![
                Block::new(
                    "entry",
                    vec![Command::assign("counter", "0")],
                    Transfer::Goto(vec![1]),
                ),
                Block::new("head", vec![], Transfer::Goto(vec![2, 3])),
                Block::new(
                    "body",
                    vec![
                        Command::assume("(< counter 11)"),
                        Command::assign("counter", "(+ counter 1)"),
                    ],
                    Transfer::Goto(vec![1]),
                ),
                Block::new(
                    "exit",
                    vec![
                        Command::assume("(>= counter 11)"),
                        Command::assert("(< counter 10)"),
                    ],
                    Transfer::Return,
                ),
            ]
        } else {
            vec![Block::new(
                "entry",
                vec![
                    Command::assign("counter", "0"),
                    Command::assert("(< counter 10)"),
                ],
                Transfer::Return,
            )]
        };
        Program::new().with_procedure(
            Procedure::new("main")
                .entrypoint()
                .with_body(Implementation {
                    locals: vec![hornvc_program::Variable::new("counter", Sort::Int)],
                    blocks,
                    entry: 0,
                }),
        )
    }

    #[test]
    fn test_generate_flat_produces_query_and_rpfp() {
        let config = VcConfig::new()
            .with_mode(VcMode::LegacyFlat)
            .with_style(AnnotationStyle::Flat);
        let mut gen = FixedpointVcGen::new(counter_program(true), config).unwrap();
        gen.generate().unwrap();

        assert_eq!(gen.queries().len(), 1);
        let (unit, query) = &gen.queries()[0];
        assert_eq!(unit, "main");
        // The loop invariant relation was declared and appears in rules.
        assert!(query.rels.iter().any(|(n, _)| n == "main_head_invar"));
        assert!(query.rules.iter().any(|r| r.is_query()));
        let smt2 = query.to_smt2();
        assert!(smt2.contains("(set-logic HORN)"));

        let rpfp = gen.rpfp().unwrap();
        assert_eq!(rpfp.len_nodes(), 1);
        assert_eq!(rpfp.len_edges(), 1);
    }

    #[test]
    fn test_generate_is_idempotent() {
        let config = VcConfig::new().with_mode(VcMode::SummaryHorn);
        let mut gen = FixedpointVcGen::new(counter_program(true), config).unwrap();
        gen.generate().unwrap();
        let queries = gen.queries().len();
        let annotations = gen.registry().names();
        gen.generate().unwrap();
        assert_eq!(gen.queries().len(), queries);
        assert_eq!(gen.registry().names(), annotations);
    }

    #[test]
    fn test_generate_summary_builds_nodes_and_bound() {
        let config = VcConfig::new().with_mode(VcMode::SummaryHorn);
        let mut gen = FixedpointVcGen::new(counter_program(true), config).unwrap();
        gen.generate().unwrap();

        let rpfp = gen.rpfp().unwrap();
        assert_eq!(rpfp.len_nodes(), 1);
        let (_, node) = rpfp.nodes().next().unwrap();
        assert_eq!(gen.arena().rel(node.rel).name, "main_summary");
        // Entry points must be unreachable.
        assert!(node.bound.is_some());
    }

    #[test]
    fn test_check_requires_generate() {
        struct NeverSolver;
        impl FixpointSolver for NeverSolver {
            fn solve(&self, _query: &HornQuery) -> Result<FixpointOutcome, SolverError> {
                unreachable!("check() must not reach the solver before generate()")
            }
        }
        let gen = FixedpointVcGen::new(counter_program(false), VcConfig::new()).unwrap();
        assert!(matches!(
            gen.check(&NeverSolver),
            Err(VcError::MalformedProgram(_))
        ));
    }

    #[test]
    fn test_check_classifies_outcomes() {
        struct FixedSolver(FixpointOutcome);
        impl FixpointSolver for FixedSolver {
            fn solve(&self, _query: &HornQuery) -> Result<FixpointOutcome, SolverError> {
                Ok(self.0.clone())
            }
        }

        let mut gen =
            FixedpointVcGen::new(counter_program(false), VcConfig::new()).unwrap();
        gen.generate().unwrap();

        let valid = FixedSolver(FixpointOutcome::Valid {
            model: None,
            stats: SolverStats::default(),
        });
        assert!(gen.check(&valid).unwrap().is_correct());

        let invalid = FixedSolver(FixpointOutcome::Invalid {
            derivation: None,
            stats: SolverStats::default(),
        });
        let result = gen.check(&invalid).unwrap();
        assert!(matches!(
            result.overall(),
            VerificationOutcome::CounterexampleFound(None)
        ));

        let unknown = FixedSolver(FixpointOutcome::Unknown {
            reason: "gave up".to_string(),
            stats: SolverStats::default(),
        });
        let result = gen.check(&unknown).unwrap();
        assert!(matches!(
            result.overall(),
            VerificationOutcome::Inconclusive(_)
        ));
    }

    #[test]
    fn test_solver_timeout_is_inconclusive() {
        struct TimeoutSolver;
        impl FixpointSolver for TimeoutSolver {
            fn solve(&self, _query: &HornQuery) -> Result<FixpointOutcome, SolverError> {
                Err(SolverError::Timeout(std::time::Duration::from_secs(1)))
            }
        }
        let mut gen =
            FixedpointVcGen::new(counter_program(false), VcConfig::new()).unwrap();
        gen.generate().unwrap();
        let result = gen.check(&TimeoutSolver).unwrap();
        assert!(matches!(
            result.overall(),
            VerificationOutcome::Inconclusive(_)
        ));
    }

    #[test]
    fn test_background_axiom_reaches_query() {
        let program = Program::new()
            .with_global("limit", Sort::Int)
            .with_procedure(
                Procedure::new("main")
                    .entrypoint()
                    .with_body(Implementation {
                        locals: vec![],
                        blocks: vec![Block::new(
                            "entry",
                            vec![Command::assert("(> limit 0)")],
                            Transfer::Return,
                        )],
                        entry: 0,
                    }),
            );
        let mut gen = FixedpointVcGen::new(program, VcConfig::new()).unwrap();
        gen.assert_axiom("(> limit 0)");
        gen.generate().unwrap();
        let (_, query) = &gen.queries()[0];
        assert_eq!(query.background.as_deref(), Some("(> limit 0)"));
        assert!(query.to_smt2().contains("(assert (> limit 0))"));
    }

    #[test]
    fn test_malformed_program_rejected_at_construction() {
        let program = Program::new().with_procedure(Procedure::new("main").entrypoint());
        assert!(matches!(
            FixedpointVcGen::new(program, VcConfig::new()),
            Err(VcError::MalformedProgram(_))
        ));
    }

    #[test]
    fn test_flat_mode_rejects_recursion() {
        let rec = Procedure::new("spin").with_body(Implementation {
            locals: vec![],
            blocks: vec![Block::new(
                "entry",
                vec![Command::call("spin", vec![], vec![])],
                Transfer::Return,
            )],
            entry: 0,
        });
        let program = Program::new()
            .with_procedure(
                Procedure::new("main")
                    .entrypoint()
                    .with_body(Implementation {
                        locals: vec![],
                        blocks: vec![Block::new(
                            "entry",
                            vec![Command::call("spin", vec![], vec![])],
                            Transfer::Return,
                        )],
                        entry: 0,
                    }),
            )
            .with_procedure(rec);
        let mut gen = FixedpointVcGen::new(
            program,
            VcConfig::new().with_mode(VcMode::LegacyFlat),
        )
        .unwrap();
        assert!(matches!(
            gen.generate(),
            Err(VcError::UnsupportedProgram(_))
        ));
    }

    #[test]
    fn test_summary_mode_two_call_sites() {
        // main calls incr twice: the transformer must carry two suffixed
        // relation parameters and two ordered children.
        let incr = Procedure::new("incr")
            .with_in_param("x", Sort::Int)
            .with_out_param("r", Sort::Int)
            .with_body(Implementation {
                locals: vec![],
                blocks: vec![Block::new(
                    "entry",
                    vec![Command::assign("r", "(+ x 1)")],
                    Transfer::Return,
                )],
                entry: 0,
            });
        let program = Program::new()
            .with_procedure(
                Procedure::new("main")
                    .entrypoint()
                    .with_body(Implementation {
                        locals: vec![
                            hornvc_program::Variable::new("a", Sort::Int),
                            hornvc_program::Variable::new("b", Sort::Int),
                        ],
                        blocks: vec![Block::new(
                            "start",
                            vec![
                                Command::call(
                                    "incr",
                                    vec!["1".to_string()],
                                    vec!["a".to_string()],
                                ),
                                Command::call(
                                    "incr",
                                    vec!["a".to_string()],
                                    vec!["b".to_string()],
                                ),
                                Command::assert("(> b 1)"),
                            ],
                            Transfer::Return,
                        )],
                        entry: 0,
                    }),
            )
            .with_procedure(incr);

        let mut gen =
            FixedpointVcGen::new(program, VcConfig::new().with_mode(VcMode::SummaryHorn))
                .unwrap();
        gen.generate().unwrap();

        let rpfp = gen.rpfp().unwrap();
        let main_node = rpfp
            .nodes()
            .find(|(_, n)| gen.arena().rel(n.rel).name == "main_summary")
            .map(|(id, _)| id)
            .unwrap();
        let edge = rpfp.edge(rpfp.edge_of_node(main_node).unwrap());
        assert_eq!(edge.children.len(), 2);
        assert_eq!(edge.transformer.rel_params.len(), 2);
        let names: Vec<&str> = edge
            .transformer
            .rel_params
            .iter()
            .map(|&r| gen.arena().rel(r).name.as_str())
            .collect();
        assert_eq!(names, vec!["incr_summary_0", "incr_summary_1"]);
        // Both children are the incr node, in call order.
        let incr_node = rpfp
            .nodes()
            .find(|(_, n)| gen.arena().rel(n.rel).name == "incr_summary")
            .map(|(id, _)| id)
            .unwrap();
        assert_eq!(edge.children, vec![incr_node, incr_node]);
    }
}
