//! Core program data model

use hornvc_term::Sort;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub type BlockId = usize;

/// A typed variable (global, parameter, or local).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub sort: Sort,
}

impl Variable {
    pub fn new(name: impl Into<String>, sort: Sort) -> Self {
        Self {
            name: name.into(),
            sort,
        }
    }
}

/// Key/value attributes attached to commands and contract clauses. Carries provenance
/// (`source_file`, `source_line`) and internal markers such as the
/// call-site placeholder written by call desugaring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value.into();
        } else {
            self.entries.push((key, value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn source_file(&self) -> Option<&str> {
        self.get("source_file")
    }

    pub fn source_line(&self) -> Option<u32> {
        self.get("source_line").and_then(|v| v.parse().ok())
    }
}

/// A single requires/ensures clause. Free clauses are assumed but never
/// checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecClause {
    pub expr: String,
    pub free: bool,
    pub attrs: Attributes,
}

impl SpecClause {
    pub fn checked(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            free: false,
            attrs: Attributes::new(),
        }
    }

    pub fn free(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            free: true,
            attrs: Attributes::new(),
        }
    }
}

/// A guarded command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Assume {
        expr: String,
        attrs: Attributes,
    },
    Assert {
        expr: String,
        attrs: Attributes,
    },
    Assign {
        target: String,
        expr: String,
    },
    Havoc {
        vars: Vec<String>,
    },
    Call {
        callee: String,
        args: Vec<String>,
        dests: Vec<String>,
        attrs: Attributes,
    },
}

impl Command {
    pub fn assume(expr: impl Into<String>) -> Self {
        Command::Assume {
            expr: expr.into(),
            attrs: Attributes::new(),
        }
    }

    pub fn assert(expr: impl Into<String>) -> Self {
        Command::Assert {
            expr: expr.into(),
            attrs: Attributes::new(),
        }
    }

    pub fn assign(target: impl Into<String>, expr: impl Into<String>) -> Self {
        Command::Assign {
            target: target.into(),
            expr: expr.into(),
        }
    }

    pub fn havoc(vars: Vec<String>) -> Self {
        Command::Havoc { vars }
    }

    pub fn call(callee: impl Into<String>, args: Vec<String>, dests: Vec<String>) -> Self {
        Command::Call {
            callee: callee.into(),
            args,
            dests,
            attrs: Attributes::new(),
        }
    }
}

/// Block terminal transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transfer {
    Goto(Vec<BlockId>),
    Return,
}

/// A basic block. Mutated in place during annotation and passification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub label: String,
    pub cmds: Vec<Command>,
    pub transfer: Transfer,
    /// Filled by live-variable analysis.
    pub live_before: HashSet<String>,
}

impl Block {
    pub fn new(label: impl Into<String>, cmds: Vec<Command>, transfer: Transfer) -> Self {
        Self {
            label: label.into(),
            cmds,
            transfer,
            live_before: HashSet::new(),
        }
    }
}

/// A procedure body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub locals: Vec<Variable>,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
}

impl Implementation {
    pub fn successors(&self, b: BlockId) -> &[BlockId] {
        match &self.blocks[b].transfer {
            Transfer::Goto(targets) => targets,
            Transfer::Return => &[],
        }
    }

    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (b, block) in self.blocks.iter().enumerate() {
            if let Transfer::Goto(targets) = &block.transfer {
                for &t in targets {
                    preds[t].push(b);
                }
            }
        }
        preds
    }

    /// Blocks reachable from entry.
    pub fn reachable(&self) -> HashSet<BlockId> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.entry];
        while let Some(b) = stack.pop() {
            if !seen.insert(b) {
                continue;
            }
            for &s in self.successors(b) {
                stack.push(s);
            }
        }
        seen
    }

    pub fn fresh_label(&self, base: &str) -> String {
        let mut n = 0;
        loop {
            let candidate = format!("{base}{n}");
            if !self.blocks.iter().any(|b| b.label == candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// A procedure: contract plus optional implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub in_params: Vec<Variable>,
    pub out_params: Vec<Variable>,
    pub modifies: Vec<String>,
    pub requires: Vec<SpecClause>,
    pub ensures: Vec<SpecClause>,
    pub entrypoint: bool,
    pub body: Option<Implementation>,
    pub attrs: Attributes,
}

impl Procedure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            in_params: Vec::new(),
            out_params: Vec::new(),
            modifies: Vec::new(),
            requires: Vec::new(),
            ensures: Vec::new(),
            entrypoint: false,
            body: None,
            attrs: Attributes::new(),
        }
    }

    pub fn with_in_param(mut self, name: impl Into<String>, sort: Sort) -> Self {
        self.in_params.push(Variable::new(name, sort));
        self
    }

    pub fn with_out_param(mut self, name: impl Into<String>, sort: Sort) -> Self {
        self.out_params.push(Variable::new(name, sort));
        self
    }

    pub fn with_modifies(mut self, name: impl Into<String>) -> Self {
        self.modifies.push(name.into());
        self
    }

    pub fn with_requires(mut self, clause: SpecClause) -> Self {
        self.requires.push(clause);
        self
    }

    pub fn with_ensures(mut self, clause: SpecClause) -> Self {
        self.ensures.push(clause);
        self
    }

    pub fn entrypoint(mut self) -> Self {
        self.entrypoint = true;
        self
    }

    pub fn with_body(mut self, body: Implementation) -> Self {
        self.body = Some(body);
        self
    }
}

/// A whole program: globals plus ordered procedures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub globals: Vec<Variable>,
    pub procedures: Vec<Procedure>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, name: impl Into<String>, sort: Sort) -> Self {
        self.globals.push(Variable::new(name, sort));
        self
    }

    pub fn with_procedure(mut self, proc: Procedure) -> Self {
        self.procedures.push(proc);
        self
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    pub fn procedure_mut(&mut self, name: &str) -> Option<&mut Procedure> {
        self.procedures.iter_mut().find(|p| p.name == name)
    }

    pub fn entry_procedure(&self) -> Option<&Procedure> {
        self.procedures
            .iter()
            .find(|p| p.entrypoint)
            .or_else(|| self.procedures.iter().find(|p| p.name == "main"))
    }

    /// Sort environment for one procedure: globals, parameters, locals.
    pub fn sort_env(&self, proc: &Procedure) -> HashMap<String, Sort> {
        let mut env = HashMap::new();
        for v in &self.globals {
            env.insert(v.name.clone(), v.sort);
        }
        for v in proc.in_params.iter().chain(&proc.out_params) {
            env.insert(v.name.clone(), v.sort);
        }
        if let Some(body) = &proc.body {
            for v in &body.locals {
                env.insert(v.name.clone(), v.sort);
            }
        }
        env
    }

    /// Structural sanity checks applied before any VC construction.
    pub fn validate(&self) -> Result<(), String> {
        for proc in &self.procedures {
            if let Some(body) = &proc.body {
                if body.entry >= body.blocks.len() {
                    return Err(format!("procedure `{}` has no entry block", proc.name));
                }
                for block in &body.blocks {
                    if let Transfer::Goto(targets) = &block.transfer {
                        for &t in targets {
                            if t >= body.blocks.len() {
                                return Err(format!(
                                    "block `{}` in `{}` jumps to unknown block {}",
                                    block.label, proc.name, t
                                ));
                            }
                        }
                    }
                    for cmd in &block.cmds {
                        if let Command::Call { callee, .. } = cmd {
                            if self.procedure(callee).is_none() {
                                return Err(format!(
                                    "call to undeclared procedure `{callee}` in `{}`",
                                    proc.name
                                ));
                            }
                        }
                    }
                }
            }
        }
        if let Some(entry) = self.entry_procedure() {
            if entry.body.is_none() {
                return Err(format!(
                    "entry procedure `{}` has no implementation",
                    entry.name
                ));
            }
        }
        Ok(())
    }
}

const IDENT_EXTRA: &[char] = &['_', '!', '.', '$'];

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || IDENT_EXTRA.contains(&c)
}

/// Identifiers mentioned in an SMT-LIB expression string, in order of first
/// occurrence, with operators and literals filtered out.
pub fn idents(expr: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut chars = expr.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if !is_ident_start(c) {
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, c)) = chars.peek() {
            if is_ident_continue(c) {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let word = &expr[start..end];
        if is_keyword(word) || out.iter().any(|w| w == word) {
            continue;
        }
        out.push(word.to_string());
    }
    out
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "true" | "false" | "and" | "or" | "not" | "ite" | "old" | "forall" | "exists"
    )
}

/// Rename identifiers in an SMT-LIB expression string in a single pass,
/// respecting word boundaries. Names absent from the map are untouched.
pub fn rename_idents(expr: &str, renames: &HashMap<String, String>) -> String {
    if renames.is_empty() {
        return expr.to_string();
    }
    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if !is_ident_start(c) {
            out.push(c);
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, c)) = chars.peek() {
            if is_ident_continue(c) {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let word = &expr[start..end];
        match renames.get(word) {
            Some(new) => out.push_str(new),
            None => out.push_str(word),
        }
    }
    out
}
