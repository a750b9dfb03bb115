//! Call inlining
//!
//! Flat-mode VC generation needs one top-level CFG, so every call to a
//! procedure with an implementation is expanded at its call site: callee
//! locals and parameters are renamed with a site-unique prefix, callee
//! blocks are appended with offset targets, the call is replaced by a goto
//! into the renamed entry, and callee returns are rewired to a fresh
//! continuation block holding the rest of the caller's block.
//!
//! Calls to body-less procedures are left alone (they desugar through
//! their contracts later). Recursion is rejected up front: a cycle among
//! implemented procedures cannot be fully inlined.

use crate::ir::{
    rename_idents, Block, Command, Implementation, Procedure, Program, Transfer, Variable,
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InlineError {
    #[error("recursive call through `{0}` cannot be fully inlined")]
    Recursive(String),
    #[error("inlining exceeded {0} call sites")]
    BoundExceeded(usize),
    #[error("no entry procedure to inline into")]
    NoEntry,
}

/// Configuration for the inliner.
#[derive(Debug, Clone)]
pub struct InlinerConfig {
    /// Hard cap on expanded call sites, as a runaway guard.
    pub max_sites: usize,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        Self { max_sites: 4096 }
    }
}

/// Detect a call cycle among implemented procedures reachable from `from`.
fn find_cycle(program: &Program, from: &str) -> Option<String> {
    fn visit(
        program: &Program,
        name: &str,
        on_stack: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Option<String> {
        if on_stack.iter().any(|n| n == name) {
            return Some(name.to_string());
        }
        if done.contains(name) {
            return None;
        }
        on_stack.push(name.to_string());
        if let Some(body) = program.procedure(name).and_then(|p| p.body.as_ref()) {
            for block in &body.blocks {
                for cmd in &block.cmds {
                    if let Command::Call { callee, .. } = cmd {
                        let has_body = program
                            .procedure(callee)
                            .is_some_and(|p| p.body.is_some());
                        if has_body {
                            if let Some(c) = visit(program, callee, on_stack, done) {
                                return Some(c);
                            }
                        }
                    }
                }
            }
        }
        on_stack.pop();
        done.insert(name.to_string());
        None
    }
    visit(program, from, &mut Vec::new(), &mut HashSet::new())
}

/// Inline all implemented callees into the entry procedure, returning the
/// rewritten program. The entry procedure's body afterwards contains calls
/// only to body-less procedures.
pub fn inline_all(program: &Program, config: &InlinerConfig) -> Result<Program, InlineError> {
    let entry_name = program
        .entry_procedure()
        .map(|p| p.name.clone())
        .ok_or(InlineError::NoEntry)?;
    if let Some(cycle) = find_cycle(program, &entry_name) {
        return Err(InlineError::Recursive(cycle));
    }

    let mut result = program.clone();
    let mut sites = 0usize;
    loop {
        let entry = result
            .procedure(&entry_name)
            .and_then(|p| p.body.as_ref())
            .ok_or(InlineError::NoEntry)?;
        let Some((bi, ci, callee_name)) = find_inlinable(&result, entry) else {
            break;
        };
        sites += 1;
        if sites > config.max_sites {
            return Err(InlineError::BoundExceeded(config.max_sites));
        }
        let callee = result
            .procedure(&callee_name)
            .cloned()
            .expect("callee resolved by find_inlinable");
        let body = result
            .procedure_mut(&entry_name)
            .and_then(|p| p.body.as_mut())
            .expect("entry body present");
        inline_site(body, bi, ci, &callee, sites);
    }
    debug!(procedure = %entry_name, sites, "inlining complete");
    Ok(result)
}

fn find_inlinable(program: &Program, imp: &Implementation) -> Option<(usize, usize, String)> {
    for (bi, block) in imp.blocks.iter().enumerate() {
        for (ci, cmd) in block.cmds.iter().enumerate() {
            if let Command::Call { callee, .. } = cmd {
                if program.procedure(callee).is_some_and(|p| p.body.is_some()) {
                    return Some((bi, ci, callee.clone()));
                }
            }
        }
    }
    None
}

fn inline_site(
    caller: &mut Implementation,
    bi: usize,
    ci: usize,
    callee: &Procedure,
    site: usize,
) {
    let callee_body = callee.body.as_ref().expect("inlinable callee has a body");
    let Command::Call { args, dests, .. } = caller.blocks[bi].cmds[ci].clone() else {
        unreachable!("inline_site called on a non-call command");
    };

    // Site-unique renaming of everything the callee owns.
    let prefix = format!("inl{site}_{}_", callee.name);
    let mut renames: HashMap<String, String> = HashMap::new();
    let mut new_locals: Vec<Variable> = Vec::new();
    for v in callee_body
        .locals
        .iter()
        .chain(&callee.in_params)
        .chain(&callee.out_params)
    {
        let renamed = format!("{prefix}{}", v.name);
        renames.insert(v.name.clone(), renamed.clone());
        new_locals.push(Variable::new(renamed, v.sort));
    }

    let cont_id = caller.blocks.len();
    let offset = cont_id + 1;

    // Continuation: the remainder of the caller block.
    let tail_cmds = caller.blocks[bi].cmds.split_off(ci + 1);
    caller.blocks[bi].cmds.pop(); // drop the call itself
    let cont_label = caller.fresh_label(&format!("{}_ret", caller.blocks[bi].label));
    let cont_transfer =
        std::mem::replace(&mut caller.blocks[bi].transfer, Transfer::Goto(vec![]));
    let cont = Block::new(cont_label, tail_cmds, cont_transfer);

    // Bind formals to actuals, then check the callee's precondition in the
    // renamed namespace.
    for (formal, actual) in callee.in_params.iter().zip(&args) {
        caller.blocks[bi]
            .cmds
            .push(Command::assign(renames[&formal.name].clone(), actual.clone()));
    }
    for clause in &callee.requires {
        let renamed = rename_idents(&clause.expr, &renames);
        let cmd = if clause.free {
            Command::Assume {
                expr: renamed,
                attrs: clause.attrs.clone(),
            }
        } else {
            Command::Assert {
                expr: renamed,
                attrs: clause.attrs.clone(),
            }
        };
        caller.blocks[bi].cmds.push(cmd);
    }
    caller.blocks[bi].transfer = Transfer::Goto(vec![offset + callee_body.entry]);

    caller.blocks.push(cont);
    caller.locals.extend(new_locals);

    for src in &callee_body.blocks {
        let mut cmds: Vec<Command> = src
            .cmds
            .iter()
            .map(|c| rename_command(c, &renames))
            .collect();
        let transfer = match &src.transfer {
            Transfer::Goto(targets) => {
                Transfer::Goto(targets.iter().map(|t| t + offset).collect())
            }
            Transfer::Return => {
                for (dest, out) in dests.iter().zip(&callee.out_params) {
                    cmds.push(Command::assign(dest.clone(), renames[&out.name].clone()));
                }
                Transfer::Goto(vec![cont_id])
            }
        };
        caller
            .blocks
            .push(Block::new(format!("{prefix}{}", src.label), cmds, transfer));
    }
}

fn rename_command(cmd: &Command, renames: &HashMap<String, String>) -> Command {
    match cmd {
        Command::Assume { expr, attrs } => Command::Assume {
            expr: rename_idents(expr, renames),
            attrs: attrs.clone(),
        },
        Command::Assert { expr, attrs } => Command::Assert {
            expr: rename_idents(expr, renames),
            attrs: attrs.clone(),
        },
        Command::Assign { target, expr } => Command::Assign {
            target: renames.get(target).cloned().unwrap_or_else(|| target.clone()),
            expr: rename_idents(expr, renames),
        },
        Command::Havoc { vars } => Command::Havoc {
            vars: vars
                .iter()
                .map(|v| renames.get(v).cloned().unwrap_or_else(|| v.clone()))
                .collect(),
        },
        Command::Call {
            callee,
            args,
            dests,
            attrs,
        } => Command::Call {
            callee: callee.clone(),
            args: args.iter().map(|a| rename_idents(a, renames)).collect(),
            dests: dests
                .iter()
                .map(|d| renames.get(d).cloned().unwrap_or_else(|| d.clone()))
                .collect(),
            attrs: attrs.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SpecClause;
    use hornvc_term::Sort;

    fn add_proc() -> Procedure {
        Procedure::new("add")
            .with_in_param("a", Sort::Int)
            .with_in_param("b", Sort::Int)
            .with_out_param("r", Sort::Int)
            .with_body(Implementation {
                locals: vec![],
                blocks: vec![Block::new(
                    "entry",
                    vec![Command::assign("r", "(+ a b)")],
                    Transfer::Return,
                )],
                entry: 0,
            })
    }

    fn caller_program() -> Program {
        Program::new()
            .with_procedure(
                Procedure::new("main")
                    .entrypoint()
                    .with_body(Implementation {
                        locals: vec![Variable::new("s", Sort::Int)],
                        blocks: vec![Block::new(
                            "start",
                            vec![
                                Command::call(
                                    "add",
                                    vec!["3".to_string(), "5".to_string()],
                                    vec!["s".to_string()],
                                ),
                                Command::assert("(= s 8)"),
                            ],
                            Transfer::Return,
                        )],
                        entry: 0,
                    }),
            )
            .with_procedure(add_proc())
    }

    #[test]
    fn test_inline_replaces_call_with_goto() {
        let inlined = inline_all(&caller_program(), &InlinerConfig::default()).unwrap();
        let body = inlined.procedure("main").unwrap().body.as_ref().unwrap();

        assert!(body.blocks.len() > 1, "expected split + callee blocks");
        assert!(matches!(body.blocks[0].transfer, Transfer::Goto(_)));
        let any_call = body
            .blocks
            .iter()
            .flat_map(|b| &b.cmds)
            .any(|c| matches!(c, Command::Call { .. }));
        assert!(!any_call, "no calls may remain after inlining");
        // Renamed locals were added to the caller.
        assert!(body.locals.iter().any(|v| v.name == "inl1_add_r"));
    }

    #[test]
    fn test_inline_wires_return_through_continuation() {
        let inlined = inline_all(&caller_program(), &InlinerConfig::default()).unwrap();
        let body = inlined.procedure("main").unwrap().body.as_ref().unwrap();

        // The continuation carries the assert after the call.
        let cont = &body.blocks[1];
        assert!(matches!(&cont.cmds[0], Command::Assert { expr, .. } if expr == "(= s 8)"));
        assert!(matches!(cont.transfer, Transfer::Return));
        // The inlined return block assigns the destination and jumps to it.
        let ret_block = body
            .blocks
            .iter()
            .find(|b| b.label == "inl1_add_entry")
            .expect("renamed callee block present");
        assert!(ret_block
            .cmds
            .iter()
            .any(|c| matches!(c, Command::Assign { target, expr } if target == "s" && expr == "inl1_add_r")));
        assert_eq!(ret_block.transfer, Transfer::Goto(vec![1]));
    }

    #[test]
    fn test_inline_checks_requires() {
        let mut program = caller_program();
        program
            .procedure_mut("add")
            .unwrap()
            .requires
            .push(SpecClause::checked("(>= a 0)"));
        let inlined = inline_all(&program, &InlinerConfig::default()).unwrap();
        let body = inlined.procedure("main").unwrap().body.as_ref().unwrap();
        assert!(body.blocks[0]
            .cmds
            .iter()
            .any(|c| matches!(c, Command::Assert { expr, .. } if expr == "(>= inl1_add_a 0)")));
    }

    #[test]
    fn test_inline_two_sites_get_distinct_prefixes() {
        let mut program = caller_program();
        let body = program
            .procedure_mut("main")
            .unwrap()
            .body
            .as_mut()
            .unwrap();
        body.blocks[0].cmds.insert(
            1,
            Command::call(
                "add",
                vec!["s".to_string(), "1".to_string()],
                vec!["s".to_string()],
            ),
        );
        let inlined = inline_all(&program, &InlinerConfig::default()).unwrap();
        let body = inlined.procedure("main").unwrap().body.as_ref().unwrap();
        assert!(body.locals.iter().any(|v| v.name == "inl1_add_r"));
        assert!(body.locals.iter().any(|v| v.name == "inl2_add_r"));
    }

    #[test]
    fn test_inline_rejects_recursion() {
        let mut program = caller_program();
        // Make add call itself.
        let body = program.procedure_mut("add").unwrap().body.as_mut().unwrap();
        body.blocks[0].cmds.push(Command::call(
            "add",
            vec!["a".to_string(), "b".to_string()],
            vec!["r".to_string()],
        ));
        assert_eq!(
            inline_all(&program, &InlinerConfig::default()),
            Err(InlineError::Recursive("add".to_string()))
        );
    }

    #[test]
    fn test_inline_leaves_bodyless_calls() {
        let mut program = caller_program();
        program.procedure_mut("add").unwrap().body = None;
        let inlined = inline_all(&program, &InlinerConfig::default()).unwrap();
        let body = inlined.procedure("main").unwrap().body.as_ref().unwrap();
        assert!(body.blocks[0]
            .cmds
            .iter()
            .any(|c| matches!(c, Command::Call { .. })));
    }
}
