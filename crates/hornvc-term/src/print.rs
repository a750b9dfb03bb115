//! SMT-LIB2 printing
//!
//! Labels have no SMT-LIB counterpart and print as their wrapped formula;
//! they only matter to the in-process rewrites and the reconstructor.

use crate::arena::{RelId, Term, TermArena, TermId};
use std::fmt::Write as _;

/// Render a term as an SMT-LIB2 expression.
pub fn term_to_smt2(arena: &TermArena, id: TermId) -> String {
    let mut out = String::new();
    write_term(arena, id, &mut out);
    out
}

fn write_term(arena: &TermArena, id: TermId, out: &mut String) {
    match arena.term(id) {
        Term::True => out.push_str("true"),
        Term::False => out.push_str("false"),
        Term::IntLit(n) => {
            if *n < 0 {
                let _ = write!(out, "(- {})", -n);
            } else {
                let _ = write!(out, "{n}");
            }
        }
        Term::Var(name, _) => out.push_str(name),
        Term::Not(a) => write_nary(arena, "not", &[*a], out),
        Term::And(args) => write_nary(arena, "and", args, out),
        Term::Or(args) => write_nary(arena, "or", args, out),
        Term::Implies(a, b) => write_nary(arena, "=>", &[*a, *b], out),
        Term::Eq(a, b) => write_nary(arena, "=", &[*a, *b], out),
        Term::Ite(c, t, e) => write_nary(arena, "ite", &[*c, *t, *e], out),
        Term::Add(a, b) => write_nary(arena, "+", &[*a, *b], out),
        Term::Sub(a, b) => write_nary(arena, "-", &[*a, *b], out),
        Term::Mul(a, b) => write_nary(arena, "*", &[*a, *b], out),
        Term::Le(a, b) => write_nary(arena, "<=", &[*a, *b], out),
        Term::Lt(a, b) => write_nary(arena, "<", &[*a, *b], out),
        Term::Ge(a, b) => write_nary(arena, ">=", &[*a, *b], out),
        Term::Gt(a, b) => write_nary(arena, ">", &[*a, *b], out),
        Term::App(rel, args) => {
            let name = arena.rel(*rel).name.clone();
            if args.is_empty() {
                out.push_str(&name);
            } else {
                out.push('(');
                out.push_str(&name);
                for a in args {
                    out.push(' ');
                    write_term(arena, *a, out);
                }
                out.push(')');
            }
        }
        Term::Label(_, inner) => write_term(arena, *inner, out),
        Term::Quantifier {
            forall,
            bound,
            body,
        } => {
            out.push('(');
            out.push_str(if *forall { "forall" } else { "exists" });
            out.push_str(" (");
            for (i, (name, sort)) in bound.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "({} {})", name, sort.to_smt_string());
            }
            out.push_str(") ");
            write_term(arena, *body, out);
            out.push(')');
        }
    }
}

fn write_nary(arena: &TermArena, op: &str, args: &[TermId], out: &mut String) {
    out.push('(');
    out.push_str(op);
    for a in args {
        out.push(' ');
        write_term(arena, *a, out);
    }
    out.push(')');
}

/// `(declare-fun ...)` lines for the given relation symbols.
pub fn declare_rels(arena: &TermArena, rels: &[RelId]) -> String {
    let mut out = String::new();
    for rel in rels {
        let decl = arena.rel(*rel);
        let params: Vec<&str> = decl.params.iter().map(|s| s.to_smt_string()).collect();
        let _ = writeln!(
            out,
            "(declare-fun {} ({}) Bool)",
            decl.name,
            params.join(" ")
        );
    }
    out
}
