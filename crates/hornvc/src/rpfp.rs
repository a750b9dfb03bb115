//! RPFP assembly
//!
//! One relational node per verified procedure (its summary relation plus
//! an optional bound formula — `false` for entry points, which must be
//! unreachable), and one edge per procedure body. An edge's transformer is
//! the procedure's negated VC with every call-site placeholder relation
//! replaced by a freshly suffixed copy, one per site; the edge's children
//! are the callee nodes in call order, repeats (including self) allowed.
//!
//! Nodes and edges are arena-indexed handles, so the graph stays cycle-
//! free in memory even for recursive programs.

use hornvc_term::{RelId, Term, TermArena, TermId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub usize);

/// A relational node: the procedure's summary as its signature.
#[derive(Debug, Clone)]
pub struct RpfpNode {
    pub rel: RelId,
    /// Constraint the solution must satisfy; `false` for entry points.
    pub bound: Option<TermId>,
}

/// An edge's formula with its relational holes.
#[derive(Debug, Clone)]
pub struct Transformer {
    /// Freshly suffixed relation symbols, one per call site, in call
    /// order. Position `i` corresponds to `children[i]` of the edge.
    pub rel_params: Vec<RelId>,
    pub formula: TermId,
}

#[derive(Debug, Clone)]
pub struct RpfpEdge {
    pub node: NodeId,
    pub transformer: Transformer,
    pub children: Vec<NodeId>,
}

/// The assembled fixpoint problem.
#[derive(Debug, Clone)]
pub struct Rpfp {
    nodes: Vec<RpfpNode>,
    edges: Vec<RpfpEdge>,
    background: TermId,
}

impl Rpfp {
    pub fn new(arena: &mut TermArena) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            background: arena.mk_true(),
        }
    }

    pub fn create_node(&mut self, rel: RelId) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(RpfpNode { rel, bound: None });
        id
    }

    pub fn set_bound(&mut self, node: NodeId, bound: TermId) {
        self.nodes[node.0].bound = Some(bound);
    }

    pub fn create_edge(
        &mut self,
        node: NodeId,
        transformer: Transformer,
        children: Vec<NodeId>,
    ) -> EdgeId {
        debug_assert_eq!(transformer.rel_params.len(), children.len());
        let id = EdgeId(self.edges.len());
        self.edges.push(RpfpEdge {
            node,
            transformer,
            children,
        });
        id
    }

    /// Conjoin an axiom onto the background formula.
    pub fn assert_axiom(&mut self, arena: &mut TermArena, axiom: TermId) {
        self.background = arena.mk_and(vec![self.background, axiom]);
    }

    pub fn background(&self) -> TermId {
        self.background
    }

    pub fn node(&self, id: NodeId) -> &RpfpNode {
        &self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &RpfpEdge {
        &self.edges[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &RpfpNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &RpfpEdge)> {
        self.edges.iter().enumerate().map(|(i, e)| (EdgeId(i), e))
    }

    /// The (unique) edge whose head is `node`.
    pub fn edge_of_node(&self, node: NodeId) -> Option<EdgeId> {
        self.edges
            .iter()
            .position(|e| e.node == node)
            .map(EdgeId)
    }

    pub fn node_of_rel(&self, rel: RelId) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.rel == rel)
            .map(NodeId)
    }

    pub fn len_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn len_edges(&self) -> usize {
        self.edges.len()
    }
}

/// Position of a suffixed relation among an edge's relational parameters.
pub fn transformer_arg_position(edge: &RpfpEdge, rel: RelId) -> Option<usize> {
    edge.transformer.rel_params.iter().position(|&r| r == rel)
}

/// Replace every call-site placeholder application (an `App` under a
/// `+call_` label) whose head relation belongs to a verified procedure by
/// a freshly suffixed copy, unique per call site. Returns the rewritten
/// term, the suffixed relations, and the callee nodes, both in call order.
pub fn collect_rel_params(
    arena: &mut TermArena,
    t: TermId,
    rel_to_node: &HashMap<RelId, NodeId>,
) -> (TermId, Vec<RelId>, Vec<NodeId>) {
    let mut rel_params = Vec::new();
    let mut nodes = Vec::new();
    let mut memo = HashMap::new();
    let rewritten = collect_rec(arena, t, rel_to_node, &mut rel_params, &mut nodes, &mut memo);
    (rewritten, rel_params, nodes)
}

fn collect_rec(
    arena: &mut TermArena,
    t: TermId,
    rel_to_node: &HashMap<RelId, NodeId>,
    rel_params: &mut Vec<RelId>,
    nodes: &mut Vec<NodeId>,
    memo: &mut HashMap<TermId, TermId>,
) -> TermId {
    if let Some(&res) = memo.get(&t) {
        return res;
    }
    let res = match arena.term(t).clone() {
        Term::Label(name, inner) => {
            let is_call = name.starts_with("+call_");
            match arena.term(inner).clone() {
                Term::App(rel, args) if is_call && rel_to_node.contains_key(&rel) => {
                    let args: Vec<TermId> = args
                        .iter()
                        .map(|&a| collect_rec(arena, a, rel_to_node, rel_params, nodes, memo))
                        .collect();
                    let suffixed = arena.suffixed_rel(rel, rel_params.len());
                    rel_params.push(suffixed);
                    nodes.push(rel_to_node[&rel]);
                    let app = arena.mk_app(suffixed, args);
                    arena.mk_label(name, app)
                }
                _ => {
                    let mapped = collect_rec(arena, inner, rel_to_node, rel_params, nodes, memo);
                    arena.mk_label(name, mapped)
                }
            }
        }
        Term::Not(a) => {
            let a = collect_rec(arena, a, rel_to_node, rel_params, nodes, memo);
            arena.mk_not(a)
        }
        Term::And(args) => {
            let mapped: Vec<TermId> = args
                .iter()
                .map(|&a| collect_rec(arena, a, rel_to_node, rel_params, nodes, memo))
                .collect();
            arena.mk_and(mapped)
        }
        Term::Or(args) => {
            let mapped: Vec<TermId> = args
                .iter()
                .map(|&a| collect_rec(arena, a, rel_to_node, rel_params, nodes, memo))
                .collect();
            arena.mk_or(mapped)
        }
        Term::Implies(a, b) => {
            let a = collect_rec(arena, a, rel_to_node, rel_params, nodes, memo);
            let b = collect_rec(arena, b, rel_to_node, rel_params, nodes, memo);
            arena.mk_implies(a, b)
        }
        Term::Eq(a, b) => {
            let a = collect_rec(arena, a, rel_to_node, rel_params, nodes, memo);
            let b = collect_rec(arena, b, rel_to_node, rel_params, nodes, memo);
            arena.mk_eq(a, b)
        }
        Term::Ite(c, th, el) => {
            let c = collect_rec(arena, c, rel_to_node, rel_params, nodes, memo);
            let th = collect_rec(arena, th, rel_to_node, rel_params, nodes, memo);
            let el = collect_rec(arena, el, rel_to_node, rel_params, nodes, memo);
            arena.mk_ite(c, th, el)
        }
        Term::App(rel, args) => {
            let mapped: Vec<TermId> = args
                .iter()
                .map(|&a| collect_rec(arena, a, rel_to_node, rel_params, nodes, memo))
                .collect();
            arena.mk_app(rel, mapped)
        }
        Term::Quantifier { .. } => {
            warn!("collect_rel_params: not descending into quantified subterm");
            t
        }
        Term::Add(_, _)
        | Term::Sub(_, _)
        | Term::Mul(_, _)
        | Term::Le(_, _)
        | Term::Lt(_, _)
        | Term::Ge(_, _)
        | Term::Gt(_, _)
        | Term::True
        | Term::False
        | Term::IntLit(_)
        | Term::Var(_, _) => t,
    };
    memo.insert(t, res);
    res
}
