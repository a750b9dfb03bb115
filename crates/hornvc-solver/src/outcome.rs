//! Solver outcome, derivation, and statistics types

use hornvc_term::Sort;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

lazy_static! {
    /// Matches solver statistics key-value pairs like `:SPACER-num-lemmas 3`.
    static ref RE_STATS: Regex =
        Regex::new(r":([a-zA-Z0-9_.-]+)\s+([0-9.]+)").expect("RE_STATS regex is valid");
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver binary not found: {0}")]
    NotFound(String),
    #[error("solver execution failed: {0}")]
    ExecutionFailed(String),
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not interpret solver output: {0}")]
    OutputParse(String),
}

/// Statistics reported by a fixpoint run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub solve_time: Duration,
    pub iterations: Option<u64>,
    pub lemmas: Option<u64>,
    pub max_depth: Option<u64>,
    pub memory_bytes: Option<u64>,
}

impl fmt::Display for SolverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "solve_time={:?}", self.solve_time)?;
        if let Some(iter) = self.iterations {
            write!(f, ", iterations={iter}")?;
        }
        if let Some(lemmas) = self.lemmas {
            write!(f, ", lemmas={lemmas}")?;
        }
        if let Some(depth) = self.max_depth {
            write!(f, ", max_depth={depth}")?;
        }
        if let Some(mem) = self.memory_bytes {
            write!(f, ", memory={:.2}MB", mem as f64 / (1024.0 * 1024.0))?;
        }
        Ok(())
    }
}

/// Parse Spacer statistics from raw solver output.
///
/// The statistics section looks like:
/// ```text
/// (:SPACER-num-lemmas 3
///  :SPACER-max-depth  1
///  :max-memory        64.77)
/// ```
pub fn parse_spacer_statistics(output: &str) -> SolverStats {
    let mut stats = SolverStats::default();
    let Some(start) = output.rfind("(:") else {
        return stats;
    };
    let section = &output[start..];
    let section = match section.rfind(')') {
        Some(end) => &section[..=end],
        None => section,
    };
    for cap in RE_STATS.captures_iter(section) {
        let key = &cap[1];
        let value = &cap[2];
        match key {
            "SPACER-num-queries" => stats.iterations = value.parse().ok(),
            "SPACER-num-lemmas" => stats.lemmas = value.parse().ok(),
            "SPACER-max-depth" => stats.max_depth = value.parse().ok(),
            "max-memory" => {
                if let Ok(mb) = value.parse::<f64>() {
                    stats.memory_bytes = Some((mb * 1024.0 * 1024.0) as u64);
                }
            }
            _ => {}
        }
    }
    stats
}

/// Handle into a [`Derivation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationId(pub usize);

/// One step of a falsifying derivation: an RPFP node together with the
/// labels of its outgoing edge that lie on the falsifying path, and the
/// derivations of its callee children in call-site order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationNode {
    /// Index of the falsified RPFP node.
    pub node: usize,
    /// Labels on the falsifying path through this node's edge.
    pub labels: HashSet<String>,
    pub children: Vec<DerivationId>,
}

/// A falsifying derivation tree, arena-allocated to keep recursive
/// structures handle-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    nodes: Vec<DerivationNode>,
    root: Option<DerivationId>,
}

impl Derivation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: DerivationNode) -> DerivationId {
        let id = DerivationId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn set_root(&mut self, id: DerivationId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<DerivationId> {
        self.root
    }

    pub fn node(&self, id: DerivationId) -> &DerivationNode {
        &self.nodes[id.0]
    }

    pub fn label_on(&self, id: DerivationId, label: &str) -> bool {
        self.node(id).labels.contains(label)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Result of solving a fixpoint problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FixpointOutcome {
    /// Every bound constraint holds; an inductive model exists.
    Valid {
        /// Raw `(define-fun ...)` model text when the solver produced one.
        model: Option<String>,
        stats: SolverStats,
    },
    /// Some bound is violated.
    Invalid {
        /// Falsifying derivation when the backend could recover one.
        derivation: Option<Derivation>,
        stats: SolverStats,
    },
    /// The solver could not decide.
    Unknown { reason: String, stats: SolverStats },
}

impl FixpointOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, FixpointOutcome::Valid { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, FixpointOutcome::Invalid { .. })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, FixpointOutcome::Unknown { .. })
    }

    pub fn stats(&self) -> &SolverStats {
        match self {
            FixpointOutcome::Valid { stats, .. }
            | FixpointOutcome::Invalid { stats, .. }
            | FixpointOutcome::Unknown { stats, .. } => stats,
        }
    }
}

impl fmt::Display for FixpointOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixpointOutcome::Valid { stats, .. } => write!(f, "valid ({stats})"),
            FixpointOutcome::Invalid { stats, .. } => write!(f, "invalid ({stats})"),
            FixpointOutcome::Unknown { reason, stats } => {
                write!(f, "unknown: {reason} ({stats})")
            }
        }
    }
}

/// One Horn rule, already rendered to SMT-LIB text by the generator:
/// `forall bound. body => head`, with `head` either a relation application
/// or `false` (a query).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HornRule {
    pub bound: Vec<(String, Sort)>,
    pub body: String,
    pub head: String,
}

impl HornRule {
    pub fn is_query(&self) -> bool {
        self.head == "false"
    }

    fn to_assert(&self) -> String {
        let inner = format!("(=> {} {})", self.body, self.head);
        if self.bound.is_empty() {
            format!("(assert {inner})")
        } else {
            let binders: Vec<String> = self
                .bound
                .iter()
                .map(|(n, s)| format!("({} {})", n, s.to_smt_string()))
                .collect();
            format!("(assert (forall ({}) {inner}))", binders.join(" "))
        }
    }
}

/// The lowered fixpoint problem handed to a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HornQuery {
    /// Relation declarations (name, parameter sorts).
    pub rels: Vec<(String, Vec<Sort>)>,
    pub rules: Vec<HornRule>,
    /// Ground background axiom asserted alongside the rules.
    pub background: Option<String>,
}

impl HornQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, params: Vec<Sort>) {
        let name = name.into();
        if !self.rels.iter().any(|(n, _)| *n == name) {
            self.rels.push((name, params));
        }
    }

    pub fn add_rule(&mut self, rule: HornRule) {
        self.rules.push(rule);
    }

    pub fn set_background(&mut self, axiom: impl Into<String>) {
        self.background = Some(axiom.into());
    }

    /// Render the whole problem as a `(set-logic HORN)` script.
    pub fn to_smt2(&self) -> String {
        let mut out = String::from("(set-logic HORN)\n");
        for (name, params) in &self.rels {
            let params: Vec<&str> = params.iter().map(|s| s.to_smt_string()).collect();
            out.push_str(&format!(
                "(declare-fun {} ({}) Bool)\n",
                name,
                params.join(" ")
            ));
        }
        if let Some(background) = &self.background {
            out.push_str(&format!("(assert {background})\n"));
        }
        for rule in &self.rules {
            out.push_str(&rule.to_assert());
            out.push('\n');
        }
        out.push_str("(check-sat)\n(get-model)\n");
        out
    }
}
