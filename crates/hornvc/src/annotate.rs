//! Annotation synthesis
//!
//! Annotations are nullary-result uninterpreted relations standing for
//! unknown loop invariants or procedure summaries. Loop headers get an
//! `<impl>_<label>_invar` relation asserted at the head of the block;
//! implementations get an `<impl>_summary` relation appended as a free
//! postcondition. Parameter order is fixed at creation and recorded in the
//! per-run registry, which every later pass consults by relation name.
//!
//! Insertion is idempotent per annotation name: re-running the inserter on
//! an unchanged CFG yields the same annotation set.

use crate::error::VcError;
use hornvc_program::{analyze_loops, Attributes, Command, Procedure, Program, SpecClause};
use hornvc_term::{Sort, TermArena};
use std::collections::HashMap;
use tracing::debug;

/// What an annotation stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    LoopInvariant,
    ProcedureSummary,
}

/// Registry entry for one synthesized annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationInfo {
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    /// Parameter names in application order; immutable once created.
    pub argnames: Vec<String>,
    pub kind: AnnotationKind,
}

/// Per-run annotation registry, keyed by relation name.
#[derive(Debug, Clone, Default)]
pub struct AnnotationRegistry {
    map: HashMap<String, AnnotationInfo>,
}

impl AnnotationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&AnnotationInfo> {
        self.map.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, info: AnnotationInfo) -> bool {
        let name = name.into();
        if self.map.contains_key(&name) {
            return false;
        }
        self.map.insert(name, info);
        true
    }

    pub fn is_loop_invariant(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|i| i.kind == AnnotationKind::LoopInvariant)
    }

    pub fn is_summary(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|i| i.kind == AnnotationKind::ProcedureSummary)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Annotation names in sorted order (for stable comparison).
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map.keys().cloned().collect();
        names.sort();
        names
    }
}

fn app_expr(name: &str, args: &[String]) -> String {
    if args.is_empty() {
        name.to_string()
    } else {
        format!("({} {})", name, args.join(" "))
    }
}

/// One annotation parameter: registry name, application argument
/// expression, and sort.
struct Param {
    argname: String,
    expr: String,
    sort: Sort,
}

/// Insert a loop-invariant annotation at the head of every natural-loop
/// header of `proc_name`. With `flat_params`, the parameter list is
/// exactly the variables live before the header; otherwise it is the
/// contract-shaped list (old globals, modified globals, old in-params,
/// locals). Live-variable analysis must have run already in flat mode.
pub fn annotate_loops(
    arena: &mut TermArena,
    registry: &mut AnnotationRegistry,
    program: &mut Program,
    proc_name: &str,
    flat_params: bool,
) -> Result<(), VcError> {
    let proc = program
        .procedure(proc_name)
        .ok_or_else(|| VcError::MalformedProgram(format!("no procedure `{proc_name}`")))?;
    let sort_env = program.sort_env(proc);
    let contract_params = contract_block_params(program, proc);

    let proc = program
        .procedure_mut(proc_name)
        .expect("procedure looked up above");
    let Some(body) = proc.body.as_mut() else {
        return Ok(());
    };
    let loops = analyze_loops(body).map_err(|e| {
        VcError::UnsupportedProgram(format!("{e} in `{proc_name}`"))
    })?;

    for &header in &loops.headers {
        let name = format!("{}_{}_invar", proc_name, body.blocks[header].label);
        if registry.contains(&name) {
            continue;
        }
        let params = if flat_params {
            let mut live: Vec<String> =
                body.blocks[header].live_before.iter().cloned().collect();
            live.sort();
            live.into_iter()
                .filter_map(|v| {
                    sort_env.get(&v).map(|&sort| Param {
                        argname: v.clone(),
                        expr: v,
                        sort,
                    })
                })
                .collect()
        } else {
            contract_params
                .iter()
                .map(|p| Param {
                    argname: p.argname.clone(),
                    expr: p.expr.clone(),
                    sort: p.sort,
                })
                .collect::<Vec<_>>()
        };
        insert_block_annotation(arena, registry, body, header, &name, params);
        debug!(annotation = %name, "inserted loop invariant");
    }
    Ok(())
}

/// Parameter list used for non-flat block annotations: old globals,
/// modified globals, old in-params, locals.
fn contract_block_params(program: &Program, proc: &Procedure) -> Vec<Param> {
    let mut params = Vec::new();
    for g in &program.globals {
        params.push(Param {
            argname: format!("@old_{}", g.name),
            expr: format!("(old {})", g.name),
            sort: g.sort,
        });
    }
    for m in &proc.modifies {
        if let Some(g) = program.globals.iter().find(|g| g.name == *m) {
            params.push(Param {
                argname: g.name.clone(),
                expr: g.name.clone(),
                sort: g.sort,
            });
        }
    }
    for v in &proc.in_params {
        params.push(Param {
            argname: format!("@old_{}", v.name),
            expr: format!("(old {})", v.name),
            sort: v.sort,
        });
    }
    if let Some(body) = &proc.body {
        for v in &body.locals {
            params.push(Param {
                argname: v.name.clone(),
                expr: v.name.clone(),
                sort: v.sort,
            });
        }
    }
    params
}

fn insert_block_annotation(
    arena: &mut TermArena,
    registry: &mut AnnotationRegistry,
    body: &mut hornvc_program::Implementation,
    block: usize,
    name: &str,
    params: Vec<Param>,
) {
    let sorts: Vec<Sort> = params.iter().map(|p| p.sort).collect();
    let argnames: Vec<String> = params.iter().map(|p| p.argname.clone()).collect();
    let args: Vec<String> = params.into_iter().map(|p| p.expr).collect();
    arena.declare_rel(name, sorts);

    // Provenance from the original first command when it carries any.
    let mut attrs = Attributes::new();
    if let Some(first) = body.blocks[block].cmds.first() {
        let src = match first {
            Command::Assume { attrs, .. }
            | Command::Assert { attrs, .. }
            | Command::Call { attrs, .. } => Some(attrs),
            _ => None,
        };
        if let Some(src) = src {
            if let Some(f) = src.source_file() {
                attrs.set("source_file", f);
            }
            if let Some(l) = src.source_line() {
                attrs.set("source_line", l.to_string());
            }
        }
    }

    registry.insert(
        name,
        AnnotationInfo {
            filename: attrs.source_file().map(str::to_string),
            lineno: attrs.source_line(),
            argnames,
            kind: AnnotationKind::LoopInvariant,
        },
    );
    body.blocks[block].cmds.insert(
        0,
        Command::Assert {
            expr: app_expr(name, &args),
            attrs,
        },
    );
}

/// Append a summary annotation as a free postcondition of `proc_name`:
/// parameters are (old globals, modified globals out, old in-params,
/// out-params).
pub fn annotate_proc_summary(
    arena: &mut TermArena,
    registry: &mut AnnotationRegistry,
    program: &mut Program,
    proc_name: &str,
) -> Result<(), VcError> {
    let name = format!("{proc_name}_summary");
    if registry.contains(&name) {
        return Ok(());
    }
    let proc = program
        .procedure(proc_name)
        .ok_or_else(|| VcError::MalformedProgram(format!("no procedure `{proc_name}`")))?;

    let mut params = Vec::new();
    for g in &program.globals {
        params.push(Param {
            argname: g.name.clone(),
            expr: format!("(old {})", g.name),
            sort: g.sort,
        });
    }
    for m in &proc.modifies {
        if let Some(g) = program.globals.iter().find(|g| g.name == *m) {
            params.push(Param {
                argname: format!("{}_out", g.name),
                expr: g.name.clone(),
                sort: g.sort,
            });
        }
    }
    for v in &proc.in_params {
        params.push(Param {
            argname: v.name.clone(),
            expr: format!("(old {})", v.name),
            sort: v.sort,
        });
    }
    for v in &proc.out_params {
        params.push(Param {
            argname: v.name.clone(),
            expr: v.name.clone(),
            sort: v.sort,
        });
    }

    let sorts: Vec<Sort> = params.iter().map(|p| p.sort).collect();
    let argnames: Vec<String> = params.iter().map(|p| p.argname.clone()).collect();
    let args: Vec<String> = params.into_iter().map(|p| p.expr).collect();
    arena.declare_rel(&name, sorts);

    registry.insert(
        &name,
        AnnotationInfo {
            filename: proc.attrs.source_file().map(str::to_string),
            lineno: proc.attrs.source_line(),
            argnames,
            kind: AnnotationKind::ProcedureSummary,
        },
    );

    let proc = program
        .procedure_mut(proc_name)
        .expect("procedure looked up above");
    proc.ensures.push(SpecClause::free(app_expr(&name, &args)));
    debug!(annotation = %name, "appended procedure summary");
    Ok(())
}

/// Call-site style: additionally annotate every block containing a call
/// to a procedure that has an implementation.
pub fn annotate_call_sites(
    arena: &mut TermArena,
    registry: &mut AnnotationRegistry,
    program: &mut Program,
    proc_name: &str,
) -> Result<(), VcError> {
    let implemented: Vec<String> = program
        .procedures
        .iter()
        .filter(|p| p.body.is_some())
        .map(|p| p.name.clone())
        .collect();
    let proc = program
        .procedure(proc_name)
        .ok_or_else(|| VcError::MalformedProgram(format!("no procedure `{proc_name}`")))?;
    let contract_params = contract_block_params(program, proc);

    let Some(body) = program
        .procedure_mut(proc_name)
        .and_then(|p| p.body.as_mut())
    else {
        return Ok(());
    };

    let call_blocks: Vec<usize> = body
        .blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| {
            b.cmds.iter().any(|c| {
                matches!(c, Command::Call { callee, .. } if implemented.contains(callee))
            })
        })
        .map(|(i, _)| i)
        .collect();

    for block in call_blocks {
        let name = format!("{}_{}_invar", proc_name, body.blocks[block].label);
        if registry.contains(&name) {
            continue;
        }
        let params = contract_params
            .iter()
            .map(|p| Param {
                argname: p.argname.clone(),
                expr: p.expr.clone(),
                sort: p.sort,
            })
            .collect();
        insert_block_annotation(arena, registry, body, block, &name, params);
    }
    Ok(())
}
