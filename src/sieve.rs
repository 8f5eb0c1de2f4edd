//! Sieve script generation.
//!
//! Each rule condition is normalised to DNF and split into condition
//! blocks: one `anyof` block with every flat disjunct, plus one `allof`
//! block per conjunction. Every block carries the rule's actions.

use crate::action::{sieve_string, ActionRegistry};
use crate::condition::{Condition, Field, Operand, Predicate};
use crate::config::{ConfigError, SieveSettings};
use crate::dnf::{depth, to_dnf};
use crate::rule::Rule;
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error)]
pub enum SieveError {
    #[error("rule #{index} needs a name or a move_to destination to be exported")]
    UnnamedRule { index: usize },

    #[error(transparent)]
    Resolve(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    AnyOf,
    AllOf,
}

/// One `if anyof (...)` / `if allof (...)` test.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionGroup {
    pub kind: GroupKind,
    pub tests: Vec<Condition>,
}

impl ConditionGroup {
    pub fn dump(&self) -> String {
        if self.tests.is_empty() {
            // Empty test lists are not valid sieve.
            return match self.kind {
                GroupKind::AllOf => "if true".to_string(),
                GroupKind::AnyOf => "if false".to_string(),
            };
        }
        let keyword = match self.kind {
            GroupKind::AnyOf => "anyof",
            GroupKind::AllOf => "allof",
        };
        let tests: Vec<String> = self.tests.iter().map(sieve_test).collect();
        format!("if {} ({})", keyword, tests.join(", "))
    }
}

/// Split a condition into sieve condition groups, via its DNF.
pub fn condition_groups(condition: &Condition) -> Vec<ConditionGroup> {
    match to_dnf(condition) {
        Condition::All(children) => vec![ConditionGroup {
            kind: GroupKind::AllOf,
            tests: children,
        }],
        Condition::Any(children) => {
            let (flat, nested): (Vec<Condition>, Vec<Condition>) =
                children.into_iter().partition(|c| depth(c) == 0);
            let mut groups = Vec::new();
            if !flat.is_empty() || nested.is_empty() {
                groups.push(ConditionGroup {
                    kind: GroupKind::AnyOf,
                    tests: flat,
                });
            }
            for conjunct in nested {
                // In DNF every nested disjunct is a conjunction of literals.
                let tests = match conjunct {
                    Condition::All(literals) => literals,
                    other => vec![other],
                };
                groups.push(ConditionGroup {
                    kind: GroupKind::AllOf,
                    tests,
                });
            }
            groups
        }
        literal => vec![ConditionGroup {
            kind: GroupKind::AnyOf,
            tests: vec![literal],
        }],
    }
}

fn operand_string(operand: &Operand) -> String {
    match operand {
        Operand::One(value) => sieve_string(value),
        Operand::Many(values) => {
            let quoted: Vec<String> = values.iter().map(|v| sieve_string(v)).collect();
            format!("[{}]", quoted.join(", "))
        }
    }
}

fn predicate_test(predicate: &Predicate) -> String {
    let operand = operand_string(&predicate.operand);
    match predicate.field {
        Field::Body => format!("body :text {} {}", predicate.operator.sieve(), operand),
        field => format!(
            "header {} {} {}",
            predicate.operator.sieve(),
            sieve_string(field.header()),
            operand
        ),
    }
}

/// Render a condition as a single sieve test.
pub fn sieve_test(condition: &Condition) -> String {
    match condition {
        Condition::Predicate(predicate) => predicate_test(predicate),
        Condition::Not(child) => format!("not {}", sieve_test(child)),
        Condition::All(children) if children.is_empty() => "true".to_string(),
        Condition::Any(children) if children.is_empty() => "false".to_string(),
        Condition::All(children) => {
            let tests: Vec<String> = children.iter().map(sieve_test).collect();
            format!("allof ({})", tests.join(", "))
        }
        Condition::Any(children) => {
            let tests: Vec<String> = children.iter().map(sieve_test).collect();
            format!("anyof ({})", tests.join(", "))
        }
    }
}

/// Sieve blocks for the rule at position `index`.
pub fn rule_to_sieve(
    index: usize,
    rule: &Rule,
    registry: &ActionRegistry,
) -> Result<Vec<String>, SieveError> {
    let name = rule
        .name
        .as_deref()
        .or(rule.move_to.as_deref())
        .ok_or(SieveError::UnnamedRule { index })?;

    let mut statements: Vec<String> = rule
        .resolve_actions(registry)?
        .iter()
        .map(|action| action.to_sieve())
        .collect();
    if !rule.keep_evaluating {
        statements.push("stop".to_string());
    }
    let body: Vec<String> = statements.iter().map(|s| format!("  {s};")).collect();
    let body = body.join("\n");

    let groups = condition_groups(&rule.condition);
    let single = groups.len() == 1;
    Ok(groups
        .iter()
        .enumerate()
        .map(|(i, group)| {
            let label = if single {
                name.to_string()
            } else {
                format!("{name}_{i}")
            };
            format!("# rule:[{}]\n{}\n{{\n{}\n}}", label, group.dump(), body)
        })
        .collect())
}

/// Extensions the rules need to run on a sieve server.
pub fn required_extensions(
    rules: &[Rule],
    registry: &ActionRegistry,
) -> Result<BTreeSet<&'static str>, ConfigError> {
    let mut extensions = BTreeSet::new();
    for rule in rules {
        for action in rule.resolve_actions(registry)? {
            extensions.extend(action.sieve_extension());
        }
        if rule
            .condition
            .predicates()
            .iter()
            .any(|p| p.field == Field::Body)
        {
            extensions.insert("body");
        }
    }
    Ok(extensions)
}

/// Complete sieve script: the `require` preamble followed by every rule.
pub fn generate_script(
    rules: &[Rule],
    registry: &ActionRegistry,
    settings: &SieveSettings,
) -> Result<String, SieveError> {
    for extension in required_extensions(rules, registry)? {
        if !settings.extensions.iter().any(|e| e == extension) {
            log::warn!(
                "Rules need the sieve extension '{}' but it is not declared in settings.sieve.extensions",
                extension
            );
        }
    }

    let declared: Vec<String> = settings
        .extensions
        .iter()
        .map(|e| sieve_string(e))
        .collect();
    let mut blocks = Vec::new();
    for (index, rule) in rules.iter().enumerate() {
        blocks.extend(rule_to_sieve(index, rule, registry)?);
    }
    Ok(format!(
        "require [{}];\n{}\n",
        declared.join(", "),
        blocks.join("\n\n")
    ))
}
