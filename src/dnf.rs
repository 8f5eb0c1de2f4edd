//! Disjunctive normal form for condition trees.
//!
//! A condition is translated into a small boolean algebra where every
//! predicate is an opaque symbol, normalised to an OR of ANDs of literals,
//! and translated back. Empty conjunctions are `true` and empty
//! disjunctions are `false`, matching how `All([])` and `Any([])` evaluate.

use crate::condition::{Condition, Predicate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Symbol(Predicate),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

/// Predicate or negated predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Literal {
    predicate: Predicate,
    negated: bool,
}

impl Literal {
    fn into_expr(self) -> Expr {
        let symbol = Expr::Symbol(self.predicate);
        if self.negated {
            Expr::Not(Box::new(symbol))
        } else {
            symbol
        }
    }
}

type Clause = Vec<Literal>;

/// Replace `All([x])` and `Any([x])` with `x`, recursively.
pub fn remove_singletons(condition: &Condition) -> Condition {
    match condition {
        Condition::Predicate(predicate) => Condition::Predicate(predicate.clone()),
        Condition::Not(child) => Condition::negate(remove_singletons(child)),
        Condition::All(children) if children.len() == 1 => remove_singletons(&children[0]),
        Condition::Any(children) if children.len() == 1 => remove_singletons(&children[0]),
        Condition::All(children) => Condition::All(children.iter().map(remove_singletons).collect()),
        Condition::Any(children) => Condition::Any(children.iter().map(remove_singletons).collect()),
    }
}

pub fn to_expr(condition: &Condition) -> Expr {
    match condition {
        Condition::Predicate(predicate) => Expr::Symbol(predicate.clone()),
        Condition::Not(child) => Expr::Not(Box::new(to_expr(child))),
        Condition::All(children) => Expr::And(children.iter().map(to_expr).collect()),
        Condition::Any(children) => Expr::Or(children.iter().map(to_expr).collect()),
    }
}

pub fn to_condition(expr: &Expr) -> Condition {
    match expr {
        Expr::Symbol(predicate) => Condition::Predicate(predicate.clone()),
        Expr::Not(child) => Condition::negate(to_condition(child)),
        Expr::And(children) => Condition::All(children.iter().map(to_condition).collect()),
        Expr::Or(children) => Condition::Any(children.iter().map(to_condition).collect()),
    }
}

/// Rewrite `expr` as an OR of ANDs.
///
/// `Not` is pushed down to the symbols (De Morgan, double negation), `And`
/// is distributed over `Or`, then duplicate literals, duplicate clauses and
/// clauses absorbed by a smaller one are dropped. Single-element
/// conjunctions and disjunctions are collapsed.
pub fn normalize(expr: &Expr) -> Expr {
    let clauses = absorb(clauses_of(expr, false));
    let mut disjuncts: Vec<Expr> = clauses
        .into_iter()
        .map(|clause| {
            let mut literals: Vec<Expr> = clause.into_iter().map(Literal::into_expr).collect();
            if literals.len() == 1 {
                literals.remove(0)
            } else {
                Expr::And(literals)
            }
        })
        .collect();
    if disjuncts.len() == 1 {
        disjuncts.remove(0)
    } else {
        Expr::Or(disjuncts)
    }
}

/// Clauses of the DNF of `expr`, or of its negation when `negated` is set.
fn clauses_of(expr: &Expr, negated: bool) -> Vec<Clause> {
    match (expr, negated) {
        (Expr::Symbol(predicate), _) => vec![vec![Literal {
            predicate: predicate.clone(),
            negated,
        }]],
        (Expr::Not(child), _) => clauses_of(child, !negated),
        (Expr::Or(children), false) | (Expr::And(children), true) => children
            .iter()
            .flat_map(|child| clauses_of(child, negated))
            .collect(),
        (Expr::And(children), false) | (Expr::Or(children), true) => {
            let mut product: Vec<Clause> = vec![Vec::new()];
            for child in children {
                let child_clauses = clauses_of(child, negated);
                let mut next = Vec::with_capacity(product.len() * child_clauses.len());
                for left in &product {
                    for right in &child_clauses {
                        let mut clause = left.clone();
                        for literal in right {
                            if !clause.contains(literal) {
                                clause.push(literal.clone());
                            }
                        }
                        next.push(clause);
                    }
                }
                product = next;
            }
            product
        }
    }
}

/// Drop duplicate clauses and clauses that contain every literal of another.
fn absorb(clauses: Vec<Clause>) -> Vec<Clause> {
    let subsumes = |small: &Clause, big: &Clause| small.iter().all(|l| big.contains(l));
    let mut kept: Vec<Clause> = Vec::with_capacity(clauses.len());
    for (index, clause) in clauses.iter().enumerate() {
        let absorbed = clauses.iter().enumerate().any(|(other_index, other)| {
            if other_index == index || !subsumes(other, clause) {
                return false;
            }
            // Equal clauses: keep the first occurrence only.
            other.len() < clause.len() || (subsumes(clause, other) && other_index < index)
        });
        if !absorbed {
            kept.push(clause.clone());
        }
    }
    kept
}

pub fn to_dnf(condition: &Condition) -> Condition {
    let expr = to_expr(&remove_singletons(condition));
    to_condition(&normalize(&expr))
}

/// Depth of a normalised condition: predicates and negated predicates are
/// 0, combinators are one more than their deepest child.
pub fn depth(condition: &Condition) -> usize {
    match condition {
        Condition::Predicate(_) | Condition::Not(_) => 0,
        Condition::All(children) | Condition::Any(children) => {
            1 + children.iter().map(depth).max().unwrap_or(0)
        }
    }
}
