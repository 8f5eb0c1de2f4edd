//! Path-tracking validation of configuration entries.
//!
//! Every parser returns either the typed value or every error it found,
//! each located relative to the value it was given. Union types try their
//! alternatives in order and keep the first success; when all of them
//! fail, the errors of every alternative are reported together.

use super::diagnostic::{FieldError, PathSegment};
use super::{Settings, SieveSettings};
use crate::action::{Action, Flag, FlagName};
use crate::condition::{Condition, Field, Operand, Operator, Predicate};
use crate::rule::{ActionRef, Rule};
use serde_yaml::{Mapping, Value};

pub type Parsed<T> = Result<T, Vec<FieldError>>;

const FIELD_REQUIRED: &str = "field required";
const EXTRA_FIELD: &str = "extra fields not permitted";
const NOT_A_DICT: &str = "value is not a valid dict";
const NOT_A_LIST: &str = "value is not a valid list";
const NOT_A_STR: &str = "str type expected";
const NOT_A_BOOL: &str = "value could not be parsed to a boolean";
const NOT_AN_INT: &str = "value is not a valid integer";
const EMPTY_LIST: &str = "ensure this value has at least 1 items";

pub const SETTINGS_KEYS: [&str; 7] = [
    "server",
    "username",
    "password",
    "ssl_ciphers",
    "port",
    "wait_timeout",
    "sieve",
];
const RULE_KEYS: [&str; 5] = ["name", "condition", "move_to", "keep_evaluating", "actions"];

fn within(errors: Vec<FieldError>, segment: impl Into<PathSegment> + Clone) -> Vec<FieldError> {
    errors
        .into_iter()
        .map(|e| e.within(segment.clone()))
        .collect()
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Fields of a strict mapping entry, read one at a time.
struct Fields<'a> {
    map: &'a Mapping,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn new(value: &'a Value) -> Parsed<Self> {
        match value {
            Value::Mapping(map) => Ok(Fields {
                map,
                errors: Vec::new(),
            }),
            _ => Err(vec![FieldError::new(NOT_A_DICT)]),
        }
    }

    fn required<T>(&mut self, key: &str, parse: impl FnOnce(&'a Value) -> Parsed<T>) -> Option<T> {
        match self.map.get(key) {
            Some(value) => self.parse(key, value, parse),
            None => {
                self.errors.push(FieldError::new(FIELD_REQUIRED).within(key));
                None
            }
        }
    }

    fn optional<T>(&mut self, key: &str, parse: impl FnOnce(&'a Value) -> Parsed<T>) -> Option<T> {
        let value = self.map.get(key)?;
        self.parse(key, value, parse)
    }

    fn parse<T>(
        &mut self,
        key: &str,
        value: &'a Value,
        parse: impl FnOnce(&'a Value) -> Parsed<T>,
    ) -> Option<T> {
        match parse(value) {
            Ok(parsed) => Some(parsed),
            Err(errors) => {
                self.errors.extend(within(errors, key));
                None
            }
        }
    }

    /// Report keys outside `allowed`, then fail if anything went wrong.
    fn finish(mut self, allowed: &[&str]) -> Parsed<()> {
        for key in self.map.keys() {
            let name = key_name(key);
            if !allowed.contains(&name.as_str()) {
                self.errors
                    .push(FieldError::new(EXTRA_FIELD).within(name.as_str()));
            }
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Unwrap a required field after `Fields::finish` succeeded.
fn present<T>(value: Option<T>) -> Parsed<T> {
    value.ok_or_else(|| vec![FieldError::new(FIELD_REQUIRED)])
}

fn one_of<T>(value: &Value, alternatives: &[fn(&Value) -> Parsed<T>]) -> Parsed<T> {
    let mut errors = Vec::new();
    for alternative in alternatives {
        match alternative(value) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => errors.extend(e),
        }
    }
    Err(errors)
}

fn parse_str(value: &Value) -> Parsed<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(vec![FieldError::new(NOT_A_STR)]),
    }
}

fn parse_bool(value: &Value) -> Parsed<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(vec![FieldError::new(NOT_A_BOOL)]),
    }
}

/// Non-negative integers, also given as digit strings.
fn parse_unsigned<T: TryFrom<u64>>(value: &Value) -> Parsed<T> {
    let number = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    let number = number.ok_or_else(|| vec![FieldError::new(NOT_AN_INT)])?;
    T::try_from(number)
        .map_err(|_| vec![FieldError::new(format!("integer {number} is out of range"))])
}

fn parse_list<T>(value: &Value, item: impl Fn(&Value) -> Parsed<T>) -> Parsed<Vec<T>> {
    let Value::Sequence(items) = value else {
        return Err(vec![FieldError::new(NOT_A_LIST)]);
    };
    let mut parsed = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (index, value) in items.iter().enumerate() {
        match item(value) {
            Ok(p) => parsed.push(p),
            Err(e) => errors.extend(within(e, index)),
        }
    }
    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(errors)
    }
}

fn enumeration<T: Copy>(value: &Value, members: &[(&str, T)]) -> Parsed<T> {
    let name = parse_str(value)?;
    members
        .iter()
        .find(|(member, _)| *member == name)
        .map(|(_, parsed)| *parsed)
        .ok_or_else(|| {
            let permitted: Vec<String> = members.iter().map(|(m, _)| format!("'{m}'")).collect();
            vec![FieldError::new(format!(
                "value is not a valid enumeration member; permitted: {}",
                permitted.join(", ")
            ))]
        })
}

fn literal(value: &Value, expected: &str) -> Parsed<()> {
    match value {
        Value::String(s) if s == expected => Ok(()),
        _ => Err(vec![FieldError::new(format!(
            "unexpected value; permitted: '{expected}'"
        ))]),
    }
}

fn parse_operand(value: &Value) -> Parsed<Operand> {
    one_of(
        value,
        &[
            |v: &Value| parse_str(v).map(Operand::One),
            |v: &Value| {
                let items = parse_list(v, parse_str)?;
                if items.is_empty() {
                    return Err(vec![FieldError::new(EMPTY_LIST)]);
                }
                Ok(Operand::Many(items.into_iter().collect()))
            },
        ],
    )
}

fn parse_operator(value: &Value) -> Parsed<Operator> {
    enumeration(
        value,
        &[("CONTAINS", Operator::Contains), ("EQUALS", Operator::Equals)],
    )
}

fn parse_predicate(field: Field, value: &Value) -> Parsed<Condition> {
    let mut fields = Fields::new(value)?;
    let operand = fields.required(field.key(), parse_operand);
    let operator = fields.optional("operator", parse_operator);
    fields.finish(&[field.key(), "operator"])?;
    Ok(Predicate {
        field,
        operator: operator.unwrap_or_default(),
        operand: present(operand)?,
    }
    .into())
}

fn parse_from(value: &Value) -> Parsed<Condition> {
    parse_predicate(Field::From, value)
}

fn parse_to(value: &Value) -> Parsed<Condition> {
    parse_predicate(Field::To, value)
}

fn parse_subject(value: &Value) -> Parsed<Condition> {
    parse_predicate(Field::Subject, value)
}

fn parse_body(value: &Value) -> Parsed<Condition> {
    parse_predicate(Field::Body, value)
}

fn parse_all(value: &Value) -> Parsed<Condition> {
    let mut fields = Fields::new(value)?;
    let children = fields.required("ALL", |v| parse_list(v, parse_condition));
    fields.finish(&["ALL"])?;
    Ok(Condition::All(present(children)?))
}

fn parse_any(value: &Value) -> Parsed<Condition> {
    let mut fields = Fields::new(value)?;
    let children = fields.required("ANY", |v| parse_list(v, parse_condition));
    fields.finish(&["ANY"])?;
    Ok(Condition::Any(present(children)?))
}

fn parse_not(value: &Value) -> Parsed<Condition> {
    let mut fields = Fields::new(value)?;
    let child = fields.required("NOT", parse_condition);
    fields.finish(&["NOT"])?;
    Ok(Condition::negate(present(child)?))
}

/// `{FROM|TO|SUBJECT|BODY: str | [str], operator?}`, `{ALL: [..]}`,
/// `{ANY: [..]}` or `{NOT: condition}`.
pub fn parse_condition(value: &Value) -> Parsed<Condition> {
    one_of(
        value,
        &[
            parse_from,
            parse_to,
            parse_subject,
            parse_body,
            parse_all,
            parse_any,
            parse_not,
        ],
    )
}

fn parse_flag(value: &Value) -> Parsed<Flag> {
    let members: Vec<(&str, Flag)> = Flag::ALL.iter().map(|f| (f.name(), *f)).collect();
    enumeration(value, &members)
}

fn parse_move(value: &Value) -> Parsed<Action> {
    let mut fields = Fields::new(value)?;
    fields.required("action", |v| literal(v, "move"));
    let dest = fields.required("dest", parse_str);
    fields.finish(&["action", "dest"])?;
    Ok(Action::Move {
        dest: present(dest)?,
    })
}

fn parse_delete(value: &Value) -> Parsed<Action> {
    let mut fields = Fields::new(value)?;
    fields.required("action", |v| literal(v, "delete"));
    fields.finish(&["action"])?;
    Ok(Action::Delete)
}

fn parse_flag_target(value: &Value, kind: &str) -> Parsed<FlagName> {
    let mut fields = Fields::new(value)?;
    fields.required("action", |v| literal(v, kind));
    let flag = fields.optional("flag", parse_flag);
    let custom = fields.optional("custom_flag", parse_str);
    let has_flag = fields.map.contains_key("flag");
    let has_custom = fields.map.contains_key("custom_flag");
    if has_flag == has_custom {
        fields
            .errors
            .push(FieldError::new("exactly one of 'flag' or 'custom_flag' is required"));
    }
    fields.finish(&["action", "flag", "custom_flag"])?;
    match (flag, custom) {
        (Some(flag), None) => Ok(FlagName::System(flag)),
        (None, Some(custom)) => Ok(FlagName::Custom(custom)),
        _ => Err(vec![FieldError::new(
            "exactly one of 'flag' or 'custom_flag' is required",
        )]),
    }
}

fn parse_flag_action(value: &Value) -> Parsed<Action> {
    parse_flag_target(value, "flag").map(Action::Flag)
}

fn parse_unflag_action(value: &Value) -> Parsed<Action> {
    parse_flag_target(value, "unflag").map(Action::Unflag)
}

/// `{action: move, dest}`, `{action: delete}` or
/// `{action: flag|unflag, flag|custom_flag}`.
pub fn parse_action(value: &Value) -> Parsed<Action> {
    one_of(
        value,
        &[
            parse_move,
            parse_delete,
            parse_flag_action,
            parse_unflag_action,
        ],
    )
}

fn parse_action_ref(value: &Value) -> Parsed<ActionRef> {
    one_of(
        value,
        &[
            |v: &Value| parse_str(v).map(ActionRef::Named),
            |v: &Value| parse_action(v).map(ActionRef::Inline),
        ],
    )
}

pub fn parse_rule(value: &Value) -> Parsed<Rule> {
    let mut fields = Fields::new(value)?;
    let name = fields.optional("name", parse_str);
    let condition = fields.required("condition", parse_condition);
    let move_to = fields.optional("move_to", parse_str);
    let keep_evaluating = fields.optional("keep_evaluating", parse_bool);
    let actions = fields.optional("actions", |v| parse_list(v, parse_action_ref));
    fields.finish(&RULE_KEYS)?;
    Ok(Rule {
        name,
        condition: present(condition)?,
        move_to,
        keep_evaluating: keep_evaluating.unwrap_or(false),
        actions: actions.unwrap_or_default(),
    })
}

pub fn parse_settings(value: &Value) -> Parsed<Settings> {
    let mut fields = Fields::new(value)?;
    let server = fields.required("server", parse_str);
    let username = fields.required("username", parse_str);
    let password = fields.required("password", parse_str);
    let ssl_ciphers = fields.optional("ssl_ciphers", parse_str);
    let port = fields.optional("port", parse_unsigned::<u16>);
    let wait_timeout = fields.optional("wait_timeout", parse_unsigned::<u64>);
    let sieve = fields.optional("sieve", parse_sieve_settings);
    fields.finish(&SETTINGS_KEYS)?;
    Ok(Settings {
        server: present(server)?,
        username: present(username)?,
        password: present(password)?,
        ssl_ciphers,
        port: port.unwrap_or_else(super::default_port),
        wait_timeout: wait_timeout.unwrap_or_else(super::default_wait_timeout),
        sieve: sieve.unwrap_or_default(),
    })
}

fn parse_sieve_settings(value: &Value) -> Parsed<SieveSettings> {
    let mut fields = Fields::new(value)?;
    let name = fields.optional("name", parse_str);
    let extensions = fields.optional("extensions", |v| parse_list(v, parse_str));
    fields.finish(&["name", "extensions"])?;
    Ok(SieveSettings {
        name,
        extensions: extensions.unwrap_or_else(super::default_extensions),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::diagnostic::{format_location, likely_error_location, ParseFailure};

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn wrapped_condition_errors(text: &str) -> (Value, Vec<FieldError>) {
        let data = yaml(text);
        let errors = parse_condition(&data["condition"]).unwrap_err();
        (data, within(errors, "condition"))
    }

    #[test]
    fn test_parse_predicates_and_combinators() {
        let condition = parse_condition(&yaml(
            "ALL:\n  - FROM: a@b.c\n  - NOT:\n      SUBJECT: [x, y]\n      operator: EQUALS\n  - ANY: []\n",
        ))
        .unwrap();
        assert_eq!(
            condition,
            Condition::All(vec![
                Predicate::new(Field::From, "a@b.c").into(),
                Condition::negate(
                    Predicate::new(Field::Subject, ["x", "y"])
                        .with_operator(Operator::Equals)
                        .into()
                ),
                Condition::Any(vec![]),
            ])
        );
    }

    #[test]
    fn test_numbers_are_accepted_as_strings() {
        let condition = parse_condition(&yaml("SUBJECT: 2024")).unwrap();
        assert_eq!(condition, Predicate::new(Field::Subject, "2024").into());
    }

    #[test]
    fn test_union_typo_is_localised() {
        let (data, errors) =
            wrapped_condition_errors("condition:\n  ALL:\n    - FROM: ok\n    - SUBECT: ok\n");
        let (location, message) = likely_error_location(&errors);
        assert_eq!(format_location(&location), "condition.ALL[1].SUBECT");
        assert_eq!(message, "could not parse");

        let failure = ParseFailure::from_errors("rules", errors, data);
        assert_eq!(failure.fragment, yaml("SUBECT: ok"));
    }

    #[test]
    fn test_nested_union_errors_are_localised() {
        let (data, errors) = wrapped_condition_errors(
            "condition: {ALL: [{SUBECT: ok}, {SENDER: ok}, {ANY: [test, okok]}]}",
        );
        let failure = ParseFailure::from_errors("rules", errors, data);
        assert_eq!(format_location(&failure.location), "condition.ALL[2].ANY[0]");
        assert_eq!(failure.message, "could not parse");
        assert_eq!(failure.fragment, Value::String("test".to_string()));
    }

    #[test]
    fn test_nested_union_errors_with_empty_mapping() {
        let (data, errors) = wrapped_condition_errors(
            "condition: {ALL: [{SUBECT: ok}, {SENDER: ok}, {ANY: [{}, okok]}]}",
        );
        let failure = ParseFailure::from_errors("rules", errors, data);
        assert_eq!(format_location(&failure.location), "condition.ALL[2].ANY[0]");
        assert_eq!(failure.message, "could not parse");
        assert_eq!(failure.fragment, Value::Mapping(Mapping::new()));
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(
            parse_action(&yaml("{action: move, dest: Archive}")).unwrap(),
            Action::move_to("Archive")
        );
        assert_eq!(parse_action(&yaml("{action: delete}")).unwrap(), Action::Delete);
        assert_eq!(
            parse_action(&yaml("{action: flag, flag: FLAGGED}")).unwrap(),
            Action::Flag(Flag::Flagged.into())
        );
        assert_eq!(
            parse_action(&yaml("{action: unflag, custom_flag: todo}")).unwrap(),
            Action::Unflag(FlagName::Custom("todo".to_string()))
        );
    }

    #[test]
    fn test_flag_action_needs_exactly_one_target() {
        assert!(parse_action(&yaml("{action: flag}")).is_err());
        assert!(parse_action(&yaml("{action: flag, flag: SEEN, custom_flag: x}")).is_err());
        assert!(parse_action(&yaml("{action: flag, flag: seen}")).is_err());
    }

    #[test]
    fn test_unknown_action_kind() {
        let errors = parse_action(&yaml("{action: archive}")).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message == "unexpected value; permitted: 'move'"));
    }

    #[test]
    fn test_parse_rule() {
        let rule = parse_rule(&yaml(
            "name: lists\ncondition: {TO: lists@example.org}\nmove_to: Lists\nkeep_evaluating: true\nactions: [mark_read, {action: flag, flag: FLAGGED}]\n",
        ))
        .unwrap();
        assert_eq!(rule.name.as_deref(), Some("lists"));
        assert_eq!(rule.move_to.as_deref(), Some("Lists"));
        assert!(rule.keep_evaluating);
        assert_eq!(
            rule.actions,
            vec![
                ActionRef::Named("mark_read".to_string()),
                ActionRef::Inline(Action::Flag(Flag::Flagged.into())),
            ]
        );
    }

    #[test]
    fn test_rule_missing_condition_and_extra_key() {
        let errors = parse_rule(&yaml("name: x\nmove: Lists\n")).unwrap_err();
        assert_eq!(
            errors,
            vec![
                FieldError::new(FIELD_REQUIRED).within("condition"),
                FieldError::new(EXTRA_FIELD).within("move"),
            ]
        );
    }

    #[test]
    fn test_settings_keys() {
        let settings = parse_settings(&yaml(
            "server: imap.example.com\nusername: me\npassword: secret\nwait_timeout: 5\n",
        ))
        .unwrap();
        assert_eq!(settings.server, "imap.example.com");
        assert_eq!(settings.port, 993);
        assert_eq!(settings.wait_timeout, 5);

        let errors = parse_settings(&yaml("server: [a, b]\nusername: me\npassword: p\n")).unwrap_err();
        let (location, _) = likely_error_location(&errors);
        assert_eq!(format_location(&location), "server");
    }

    #[test]
    fn test_numeric_credentials_are_strings() {
        let settings = parse_settings(&yaml(
            "server: imap.example.com\nusername: 42\npassword: 123456\nport: \"1993\"\n",
        ))
        .unwrap();
        assert_eq!(settings.username, "42");
        assert_eq!(settings.password, "123456");
        assert_eq!(settings.port, 1993);
        assert_eq!(settings.sieve, SieveSettings::default());
    }

    #[test]
    fn test_bad_numbers_are_localised() {
        let data = yaml("settings: {server: s, username: u, password: p, port: abc}");
        let errors = within(parse_settings(&data["settings"]).unwrap_err(), "settings");
        let failure = ParseFailure::from_errors("settings", errors, data);
        assert_eq!(format_location(&failure.location), "settings.port");
        assert_eq!(failure.message, NOT_AN_INT);
        assert_eq!(failure.fragment, yaml("port: abc"));

        let errors = parse_settings(&yaml("server: s\nusername: u\npassword: p\nport: 70000\n"))
            .unwrap_err();
        assert_eq!(format_location(&errors[0].location), "port");

        let errors = parse_settings(&yaml(
            "server: s\nusername: u\npassword: p\nwait_timeout: x\nsieve: {extensions: fileinto}\n",
        ))
        .unwrap_err();
        let locations: Vec<String> = errors.iter().map(|e| format_location(&e.location)).collect();
        assert_eq!(locations, vec!["wait_timeout", "sieve.extensions"]);
    }

    #[test]
    fn test_empty_operand_list_is_rejected() {
        let (data, errors) = wrapped_condition_errors("condition: {ALL: [{FROM: []}]}");
        let failure = ParseFailure::from_errors("rules", errors, data);
        assert_eq!(format_location(&failure.location), "condition.ALL[0].FROM");
        assert!(parse_condition(&yaml("FROM: [a@b.c]")).is_ok());
    }
}
