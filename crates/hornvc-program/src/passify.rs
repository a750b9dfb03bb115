//! DAG conversion and passification
//!
//! `convert_to_dag` cuts every natural loop at its header: the leading
//! invariant asserts stay as the base-case check, the loop targets are
//! havocked, the invariants are assumed for an arbitrary iteration, and
//! each back edge is redirected into a latch block that asserts the
//! invariants and assumes `false`.
//!
//! `passify` then renames the loop-free CFG into single-assignment form:
//! assignments become equality assumes over fresh incarnations (`x!1`,
//! `x!2`, ...), havocs bump the incarnation without constraining it, and
//! joins that see differing incarnations introduce a fresh one tied to each
//! predecessor by an edge equality. `(old x)` in contract-derived commands
//! resolves to the entry incarnation.

use crate::graph::LoopAnalysis;
use crate::ir::{Attributes, Block, BlockId, Command, Implementation, Transfer};
use crate::liveness::SummaryMap;
use hornvc_term::Sort;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PassifyError {
    #[error("call to `{0}` survived until passification")]
    CallNotDesugared(String),
    #[error("no sort known for variable `{0}`")]
    UnknownVariable(String),
    #[error("control flow still cyclic after DAG conversion")]
    CyclicCfg,
}

/// Replace loops with havoc + assume-invariant at the headers.
pub fn convert_to_dag(imp: &mut Implementation, loops: &LoopAnalysis, summaries: &SummaryMap) {
    for &header in &loops.headers {
        let body_blocks = &loops.loop_blocks[&header];

        // Leading asserts at the header are its invariants.
        let invariants: Vec<(String, Attributes)> = imp.blocks[header]
            .cmds
            .iter()
            .take_while(|c| matches!(c, Command::Assert { .. }))
            .map(|c| match c {
                Command::Assert { expr, attrs } => (expr.clone(), attrs.clone()),
                _ => unreachable!(),
            })
            .collect();

        // Everything the loop may write.
        let mut targets: Vec<String> = Vec::new();
        for &b in body_blocks {
            for cmd in &imp.blocks[b].cmds {
                let mut add = |name: &str| {
                    if !targets.contains(&name.to_string()) {
                        targets.push(name.to_string());
                    }
                };
                match cmd {
                    Command::Assign { target, .. } => add(target),
                    Command::Havoc { vars } => vars.iter().for_each(|v| add(v)),
                    Command::Call { callee, dests, .. } => {
                        dests.iter().for_each(|d| add(d));
                        if let Some(summary) = summaries.get(callee) {
                            summary.writes.iter().for_each(|w| add(w));
                        }
                    }
                    _ => {}
                }
            }
        }

        // Header: assert Inv (entry), havoc targets, assume Inv (arbitrary
        // iteration), then the rest of the block.
        let rest: Vec<Command> = imp.blocks[header]
            .cmds
            .iter()
            .skip(invariants.len())
            .cloned()
            .collect();
        let mut cmds: Vec<Command> = invariants
            .iter()
            .map(|(expr, attrs)| Command::Assert {
                expr: expr.clone(),
                attrs: attrs.clone(),
            })
            .collect();
        if !targets.is_empty() {
            cmds.push(Command::havoc(targets));
        }
        for (expr, _) in &invariants {
            cmds.push(Command::assume(expr.clone()));
        }
        cmds.extend(rest);
        imp.blocks[header].cmds = cmds;
    }

    // Redirect each back edge into a latch checking preservation.
    for &(src, header) in &loops.back_edges {
        let invariants: Vec<(String, Attributes)> = imp.blocks[header]
            .cmds
            .iter()
            .take_while(|c| matches!(c, Command::Assert { .. }))
            .map(|c| match c {
                Command::Assert { expr, attrs } => (expr.clone(), attrs.clone()),
                _ => unreachable!(),
            })
            .collect();
        let mut latch_cmds: Vec<Command> = invariants
            .into_iter()
            .map(|(expr, attrs)| Command::Assert { expr, attrs })
            .collect();
        latch_cmds.push(Command::assume("false"));
        let latch_id = imp.blocks.len();
        let latch_label = imp.fresh_label(&format!("{}_latch", imp.blocks[src].label));
        imp.blocks
            .push(Block::new(latch_label, latch_cmds, Transfer::Goto(vec![])));
        if let Transfer::Goto(targets) = &mut imp.blocks[src].transfer {
            for t in targets.iter_mut() {
                if *t == header {
                    *t = latch_id;
                }
            }
        }
    }
}

fn topo_order(imp: &Implementation) -> Result<Vec<BlockId>, PassifyError> {
    let reachable = imp.reachable();
    let mut indegree: HashMap<BlockId, usize> = reachable.iter().map(|&b| (b, 0)).collect();
    for &b in &reachable {
        for &s in imp.successors(b) {
            *indegree.get_mut(&s).expect("reachable successor") += 1;
        }
    }
    let mut queue: VecDeque<BlockId> = VecDeque::new();
    queue.push_back(imp.entry);
    let mut order = Vec::with_capacity(reachable.len());
    while let Some(b) = queue.pop_front() {
        order.push(b);
        for &s in imp.successors(b) {
            let d = indegree.get_mut(&s).expect("reachable successor");
            *d -= 1;
            if *d == 0 {
                queue.push_back(s);
            }
        }
    }
    if order.len() != reachable.len() {
        return Err(PassifyError::CyclicCfg);
    }
    Ok(order)
}

/// Resolve `(old x)` to the entry incarnation and every other identifier
/// through the current incarnation map, in one pass.
fn resolve_expr(expr: &str, map: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut rest = expr;
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix("(old ") {
            // `(old x)` over a simple identifier: emit the base name.
            let inner = stripped.trim_start();
            let end = inner
                .find(|c: char| c.is_whitespace() || c == ')' || c == '(')
                .unwrap_or(inner.len());
            let name = &inner[..end];
            let after = inner[end..].trim_start();
            if !name.is_empty() && after.starts_with(')') {
                out.push_str(name);
                let consumed = rest.len() - after.len() + 1;
                rest = &rest[consumed..];
                continue;
            }
        }
        let mut chars = rest.char_indices();
        let (_, c) = chars.next().expect("nonempty rest");
        if c.is_ascii_alphabetic() || c == '_' {
            let end = rest
                .find(|ch: char| {
                    !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '!' | '.' | '$'))
                })
                .unwrap_or(rest.len());
            let word = &rest[..end];
            match map.get(word) {
                Some(current) => out.push_str(current),
                None => out.push_str(word),
            }
            rest = &rest[end..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

/// Passify a loop-free implementation. Returns the extended sort
/// environment covering every incarnation introduced.
pub fn passify(
    imp: &mut Implementation,
    base_sorts: &HashMap<String, Sort>,
) -> Result<HashMap<String, Sort>, PassifyError> {
    let order = topo_order(imp)?;
    let preds = imp.predecessors();
    let mut sorts = base_sorts.clone();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut out_maps: HashMap<BlockId, HashMap<String, String>> = HashMap::new();

    let entry_map: HashMap<String, String> = base_sorts
        .keys()
        .map(|k| (k.clone(), k.clone()))
        .collect();

    for &b in &order {
        // Join the predecessor maps; differing incarnations get a fresh
        // name tied back by an edge equality in each predecessor.
        let mut map = if b == imp.entry {
            entry_map.clone()
        } else {
            let mut merged: HashMap<String, String> = HashMap::new();
            let merge_preds: Vec<BlockId> = preds[b]
                .iter()
                .copied()
                .filter(|p| out_maps.contains_key(p))
                .collect();
            let vars: Vec<String> = base_sorts.keys().cloned().collect();
            for var in vars {
                let names: Vec<&String> = merge_preds
                    .iter()
                    .map(|p| &out_maps[p][&var])
                    .collect();
                if names.is_empty() {
                    merged.insert(var.clone(), var.clone());
                } else if names.windows(2).all(|w| w[0] == w[1]) {
                    merged.insert(var.clone(), names[0].clone());
                } else {
                    let fresh = fresh_name(&var, &mut counters, &mut sorts, base_sorts)?;
                    for &p in &merge_preds {
                        let pred_name = out_maps[&p][&var].clone();
                        imp.blocks[p]
                            .cmds
                            .push(Command::assume(format!("(= {fresh} {pred_name})")));
                    }
                    merged.insert(var.clone(), fresh);
                }
            }
            merged
        };

        let cmds = std::mem::take(&mut imp.blocks[b].cmds);
        let mut new_cmds = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            match cmd {
                Command::Assume { expr, attrs } => new_cmds.push(Command::Assume {
                    expr: resolve_expr(&expr, &map),
                    attrs,
                }),
                Command::Assert { expr, attrs } => {
                    // Keep the pre-passification text for diagnostics.
                    let mut attrs = attrs;
                    if attrs.get("source_expr").is_none() {
                        attrs.set("source_expr", expr.clone());
                    }
                    new_cmds.push(Command::Assert {
                        expr: resolve_expr(&expr, &map),
                        attrs,
                    });
                }
                Command::Assign { target, expr } => {
                    let rhs = resolve_expr(&expr, &map);
                    let fresh = fresh_name(&target, &mut counters, &mut sorts, base_sorts)?;
                    new_cmds.push(Command::assume(format!("(= {fresh} {rhs})")));
                    map.insert(target, fresh);
                }
                Command::Havoc { vars } => {
                    for v in vars {
                        let fresh = fresh_name(&v, &mut counters, &mut sorts, base_sorts)?;
                        map.insert(v, fresh);
                    }
                }
                Command::Call { callee, .. } => {
                    return Err(PassifyError::CallNotDesugared(callee));
                }
            }
        }
        imp.blocks[b].cmds = new_cmds;
        out_maps.insert(b, map);
    }
    Ok(sorts)
}

fn fresh_name(
    var: &str,
    counters: &mut HashMap<String, usize>,
    sorts: &mut HashMap<String, Sort>,
    base_sorts: &HashMap<String, Sort>,
) -> Result<String, PassifyError> {
    let sort = *base_sorts
        .get(var)
        .ok_or_else(|| PassifyError::UnknownVariable(var.to_string()))?;
    let n = counters.entry(var.to_string()).or_insert(0);
    *n += 1;
    let name = format!("{var}!{n}");
    sorts.insert(name.clone(), sort);
    Ok(name)
}
