use crate::mailbox::Message;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Message field a predicate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Field {
    From,
    To,
    Subject,
    Body,
}

impl Field {
    /// Key used for this field in the configuration file.
    pub fn key(self) -> &'static str {
        match self {
            Field::From => "FROM",
            Field::To => "TO",
            Field::Subject => "SUBJECT",
            Field::Body => "BODY",
        }
    }

    /// Header name used when rendering sieve tests.
    pub fn header(self) -> &'static str {
        match self {
            Field::From => "from",
            Field::To => "to",
            Field::Subject => "subject",
            Field::Body => "body",
        }
    }

    pub fn value_of(self, message: &Message) -> String {
        match self {
            Field::From => message.from.clone(),
            Field::To => message.to.join(" "),
            Field::Subject => message.subject.clone(),
            Field::Body => format!("{}{}", message.text, message.html),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    #[default]
    Contains,
    Equals,
}

impl Operator {
    /// Case-insensitive comparison of a single operand against a field value.
    pub fn eval(self, operand: &str, value: &str) -> bool {
        let operand = operand.to_lowercase();
        let value = value.to_lowercase();
        match self {
            Operator::Contains => value.contains(&operand),
            Operator::Equals => value == operand,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operator::Contains => "CONTAINS",
            Operator::Equals => "EQUALS",
        }
    }

    pub fn sieve(self) -> &'static str {
        match self {
            Operator::Contains => ":contains",
            Operator::Equals => ":is",
        }
    }
}

/// Right-hand side of a predicate. A set matches when any member matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Operand {
    One(String),
    Many(BTreeSet<String>),
}

impl Operand {
    pub fn iter(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Operand::One(value) => Box::new(std::iter::once(value.as_str())),
            Operand::Many(values) => Box::new(values.iter().map(String::as_str)),
        }
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Operand::One(value.to_string())
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Operand::One(value)
    }
}

impl<const N: usize> From<[&str; N]> for Operand {
    fn from(values: [&str; N]) -> Self {
        Operand::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Leaf condition: compare one message field against an operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Predicate {
    pub field: Field,
    pub operator: Operator,
    pub operand: Operand,
}

impl Predicate {
    pub fn new(field: Field, operand: impl Into<Operand>) -> Self {
        Predicate {
            field,
            operator: Operator::default(),
            operand: operand.into(),
        }
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    pub fn eval(&self, message: &Message) -> bool {
        let value = self.field.value_of(message);
        let matched = self
            .operand
            .iter()
            .any(|operand| self.operator.eval(operand, &value));
        log::debug!(
            "Eval {:?} <{}> {:?} -> {}",
            self.operand,
            self.operator.name(),
            value,
            matched
        );
        matched
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.field.key(), &self.operand)?;
        map.serialize_entry("operator", &self.operator)?;
        map.end()
    }
}

/// Boolean tree over predicates. Every node is owned by its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Condition {
    Predicate(Predicate),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn negate(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    /// Evaluate against a message. `All` and `Any` short-circuit.
    pub fn eval(&self, message: &Message) -> bool {
        match self {
            Condition::Predicate(predicate) => predicate.eval(message),
            Condition::All(children) => children.iter().all(|c| c.eval(message)),
            Condition::Any(children) => children.iter().any(|c| c.eval(message)),
            Condition::Not(child) => !child.eval(message),
        }
    }

    /// Visit every predicate of the tree, left to right.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        match self {
            Condition::Predicate(predicate) => out.push(predicate),
            Condition::All(children) | Condition::Any(children) => {
                for child in children {
                    child.collect_predicates(out);
                }
            }
            Condition::Not(child) => child.collect_predicates(out),
        }
    }
}

impl From<Predicate> for Condition {
    fn from(predicate: Predicate) -> Self {
        Condition::Predicate(predicate)
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Condition::Predicate(predicate) => predicate.serialize(serializer),
            Condition::All(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ALL", children)?;
                map.end()
            }
            Condition::Any(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ANY", children)?;
                map.end()
            }
            Condition::Not(child) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("NOT", child)?;
                map.end()
            }
        }
    }
}
