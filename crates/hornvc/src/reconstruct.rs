//! Counterexample reconstruction
//!
//! Given a falsifying derivation rooted at an RPFP node, walk that
//! procedure's (transformed) CFG from entry. At every `goto`, the
//! uniquely-labeled successor whose reach label lies on the falsifying
//! path is followed; the walk stops at the assert whose label is on the
//! path. Call-site placeholder assumptions are resolved through the
//! edge's relational parameters to the matching derivation child and
//! unfolded recursively into nested counterexamples; assumptions without
//! a placeholder position are diagnostic-only and skipped.
//!
//! A label the VC builder should have attached but the walk cannot find
//! is an internal-consistency failure (`VcError::MissingLabel`), never a
//! user error.

use crate::annotate::AnnotationRegistry;
use crate::error::VcError;
use crate::rpfp::{transformer_arg_position, NodeId, Rpfp};
use crate::wp::VcInfo;
use hornvc_counterexample::{Counterexample, FailedAssert, TraceLocation, TraceStep};
use hornvc_program::{Command, Program, Transfer};
use hornvc_solver::{Derivation, DerivationId};
use hornvc_term::{Term, TermArena, TermId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Everything reconstruction needs from one generation run. The program
/// is the transformed one the VCs were built from, so block labels match.
pub struct ReconstructContext<'a> {
    pub arena: &'a TermArena,
    pub rpfp: &'a Rpfp,
    pub program: &'a Program,
    pub registry: &'a AnnotationRegistry,
    pub vc_infos: &'a HashMap<String, VcInfo>,
    /// RPFP node index to procedure name.
    pub node_procs: &'a HashMap<usize, String>,
}

/// Collect every labeled subterm across all edge transformers.
pub fn find_labels(arena: &TermArena, rpfp: &Rpfp) -> HashMap<String, TermId> {
    let mut labels = HashMap::new();
    let mut memo = HashSet::new();
    for (_, edge) in rpfp.edges() {
        find_labels_rec(arena, edge.transformer.formula, &mut memo, &mut labels);
    }
    labels
}

fn find_labels_rec(
    arena: &TermArena,
    t: TermId,
    memo: &mut HashSet<TermId>,
    labels: &mut HashMap<String, TermId>,
) {
    if !memo.insert(t) {
        return;
    }
    match arena.term(t).clone() {
        Term::Label(name, inner) => {
            labels.entry(name).or_insert(inner);
            find_labels_rec(arena, inner, memo, labels);
        }
        Term::Not(a) => find_labels_rec(arena, a, memo, labels),
        Term::And(args) | Term::Or(args) | Term::App(_, args) => {
            for a in args {
                find_labels_rec(arena, a, memo, labels);
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
            find_labels_rec(arena, a, memo, labels);
            find_labels_rec(arena, b, memo, labels);
        }
        Term::Ite(c, t1, t2) => {
            find_labels_rec(arena, c, memo, labels);
            find_labels_rec(arena, t1, memo, labels);
            find_labels_rec(arena, t2, memo, labels);
        }
        Term::True
        | Term::False
        | Term::IntLit(_)
        | Term::Var(_, _)
        | Term::Quantifier { .. } => {}
    }
}

/// Rebuild the program-level counterexample from a derivation.
pub fn reconstruct(
    ctx: &ReconstructContext<'_>,
    derivation: &Derivation,
) -> Result<Counterexample, VcError> {
    let labels = find_labels(ctx.arena, ctx.rpfp);
    let root = derivation
        .root()
        .ok_or_else(|| VcError::MissingLabel("derivation has no root".to_string()))?;
    walk(ctx, derivation, &labels, root)
}

fn walk(
    ctx: &ReconstructContext<'_>,
    derivation: &Derivation,
    labels: &HashMap<String, TermId>,
    did: DerivationId,
) -> Result<Counterexample, VcError> {
    let dnode = derivation.node(did);
    let proc_name = ctx.node_procs.get(&dnode.node).ok_or_else(|| {
        VcError::MissingLabel(format!("derivation refers to unknown node {}", dnode.node))
    })?;
    let info = ctx.vc_infos.get(proc_name).ok_or_else(|| {
        VcError::MissingLabel(format!("no VC info for procedure `{proc_name}`"))
    })?;
    let imp = ctx
        .program
        .procedure(proc_name)
        .and_then(|p| p.body.as_ref())
        .ok_or_else(|| {
            VcError::MissingLabel(format!("no implementation for procedure `{proc_name}`"))
        })?;
    let edge = ctx
        .rpfp
        .edge_of_node(NodeId(dnode.node))
        .map(|e| ctx.rpfp.edge(e));

    let mut cex = Counterexample::new(proc_name.clone());
    let mut b = imp.entry;

    let entry_label = format!("+{}.{}", proc_name, imp.blocks[b].label);
    if !labels.contains_key(&entry_label) {
        return Err(VcError::MissingLabel(entry_label));
    }
    if !derivation.label_on(did, &entry_label) {
        return Err(VcError::MissingLabel(format!(
            "entry block `{}` of `{proc_name}` is not on the falsifying path",
            imp.blocks[b].label
        )));
    }

    loop {
        let block = &imp.blocks[b];
        cex.push_step(TraceStep::new(b, block.label.clone()));
        debug!(procedure = %proc_name, block = %block.label, "trace step");

        for (i, cmd) in block.cmds.iter().enumerate() {
            match cmd {
                Command::Assert { expr, attrs } => {
                    let albl = info.assert_label_at.get(&(b, i)).ok_or_else(|| {
                        VcError::MissingLabel(format!(
                            "assert in `{}` carries no label",
                            block.label
                        ))
                    })?;
                    if derivation.label_on(did, albl) {
                        // A falsified summary application is the relational
                        // signature witnessing this behavior, not a user
                        // assertion.
                        if let Some(&inner) = labels.get(albl) {
                            if let Term::App(rel, _) = ctx.arena.term(inner) {
                                if ctx.registry.is_summary(&ctx.arena.rel(*rel).name) {
                                    continue;
                                }
                            }
                        }
                        let shown = attrs.get("source_expr").unwrap_or(expr.as_str());
                        cex.set_failing(FailedAssert {
                            expr: shown.to_string(),
                            block_label: block.label.clone(),
                            cmd: i,
                            source_file: attrs.source_file().map(str::to_string),
                            source_line: attrs.source_line(),
                        });
                        return Ok(cex);
                    }
                }
                Command::Assume { .. } => {
                    let Some(clbl) = info.call_labels.get(&(b, i)) else {
                        continue;
                    };
                    let placeholder = labels.get(clbl).ok_or_else(|| {
                        VcError::MissingLabel(format!("call placeholder `{clbl}` not in VC"))
                    })?;
                    let Term::App(rel, _) = ctx.arena.term(*placeholder) else {
                        continue;
                    };
                    let Some(edge) = edge else {
                        continue;
                    };
                    let Some(pos) = transformer_arg_position(edge, *rel) else {
                        // Diagnostic-only pseudo-assumption; never an
                        // obligation.
                        continue;
                    };
                    let Some(&child) = dnode.children.get(pos) else {
                        warn!(position = pos, "derivation is missing a callee child");
                        continue;
                    };
                    let nested = walk(ctx, derivation, labels, child)?;
                    let at = TraceLocation::new(cex.trace.len() - 1, i);
                    cex.add_callee_trace(at, nested);
                }
                _ => {}
            }
        }

        match &block.transfer {
            Transfer::Return => return Ok(cex),
            Transfer::Goto(targets) => {
                let mut next = None;
                for &t in targets {
                    let lbl = format!("+{}.{}", proc_name, imp.blocks[t].label);
                    if !labels.contains_key(&lbl) {
                        return Err(VcError::MissingLabel(lbl));
                    }
                    if derivation.label_on(did, &lbl) {
                        next = Some(t);
                        break;
                    }
                }
                match next {
                    Some(t) => b = t,
                    // No successor on the path: the falsifying behavior
                    // ends here (a callee behavior trace).
                    None => return Ok(cex),
                }
            }
        }
    }
}
