//! Locating the most likely fault among the errors of a failed parse.
//!
//! Union-typed entries (conditions, actions) report one error per rejected
//! alternative, so a single typo produces many errors. The location that
//! most alternatives agree on is usually the one the user got wrong.

use serde_yaml::{Mapping, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{key}"),
            PathSegment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Render a location as `condition.ALL[1].SUBECT`.
pub fn format_location(location: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in location {
        if matches!(segment, PathSegment::Key(_)) && !out.is_empty() {
            out.push('.');
        }
        out.push_str(&segment.to_string());
    }
    out
}

/// A validation error at a path inside the parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub location: Vec<PathSegment>,
    pub message: String,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        FieldError {
            location: Vec::new(),
            message: message.into(),
        }
    }

    /// Prefix the location with `segment`.
    pub fn within(mut self, segment: impl Into<PathSegment>) -> Self {
        self.location.insert(0, segment.into());
        self
    }
}

/// Pick the most specific location shared by several errors, and the
/// message to report for it.
///
/// Every prefix of every location is counted. When no prefix repeats, the
/// longest one wins. Otherwise prefixes are visited by decreasing count
/// (first seen first on equal counts) and the longest prefix seen before
/// the counts drop to one is kept. The message is the error recorded
/// exactly at that location, or `could not parse` when there are zero or
/// several of them.
pub fn likely_error_location(errors: &[FieldError]) -> (Vec<PathSegment>, String) {
    let mut counts: Vec<(&[PathSegment], usize)> = Vec::new();
    for error in errors {
        for end in 1..=error.location.len() {
            let prefix = &error.location[..end];
            match counts.iter_mut().find(|(seen, _)| *seen == prefix) {
                Some((_, count)) => *count += 1,
                None => counts.push((prefix, 1)),
            }
        }
    }

    let mut chosen: &[PathSegment] = &[];
    if counts.iter().all(|(_, count)| *count == 1) {
        for (prefix, _) in &counts {
            if prefix.len() > chosen.len() {
                chosen = *prefix;
            }
        }
    } else {
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        for (prefix, count) in &counts {
            if *count == 1 {
                break;
            }
            if prefix.len() > chosen.len() {
                chosen = *prefix;
            }
        }
    }

    let mut at_location = errors.iter().filter(|e| e.location == chosen);
    let message = match (at_location.next(), at_location.next()) {
        (Some(error), None) => error.message.clone(),
        _ => "could not parse".to_string(),
    };
    (chosen.to_vec(), message)
}

fn value_at(data: &Value, location: &[PathSegment]) -> Value {
    let Some((first, rest)) = location.split_first() else {
        return data.clone();
    };
    let child = match (first, data) {
        (PathSegment::Key(key), Value::Mapping(map)) => map.get(key.as_str()),
        (PathSegment::Index(index), Value::Sequence(items)) => items.get(*index),
        _ => None,
    };
    match child {
        Some(child) => value_at(child, rest),
        None => Value::String("Missing field".to_string()),
    }
}

/// The part of `content` to show for an error at `location`.
///
/// A trailing key is kept next to its value, `{key: value}`, so the user
/// can see which field was rejected.
pub fn fragment_at(content: &Value, location: &[PathSegment]) -> Value {
    let value = value_at(content, location);
    match location.last() {
        Some(PathSegment::Key(key)) => {
            let mut map = Mapping::new();
            map.insert(Value::String(key.clone()), value);
            Value::Mapping(map)
        }
        _ => value,
    }
}

/// Dump `data` as YAML inside a box drawn in the left margin.
pub fn boxed_yaml(data: &Value) -> String {
    let text = serde_yaml::to_string(data).unwrap_or_else(|_| format!("{data:?}"));
    let mut out = String::from("╭\n");
    for line in text.lines() {
        out.push_str("│ ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('╰');
    out
}

/// A configuration section that failed validation, reduced to the most
/// likely culprit.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub section: String,
    pub location: Vec<PathSegment>,
    pub message: String,
    pub fragment: Value,
    pub content: Value,
    pub errors: Vec<FieldError>,
}

impl ParseFailure {
    pub fn from_errors(section: impl Into<String>, errors: Vec<FieldError>, content: Value) -> Self {
        let (location, message) = likely_error_location(&errors);
        let fragment = fragment_at(&content, &location);
        ParseFailure {
            section: section.into(),
            location,
            message,
            fragment,
            content,
            errors,
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Failed parsing the '{}' section:", self.section)?;
        writeln!(f, "{}", boxed_yaml(&self.content))?;
        if self.location.is_empty() {
            writeln!(f, "The malformed configuration may come from '{}' in", self.message)?;
        } else {
            writeln!(
                f,
                "The malformed configuration may come from '{}' at {} in",
                self.message,
                format_location(&self.location)
            )?;
        }
        write!(f, "{}", boxed_yaml(&self.fragment))
    }
}

impl std::error::Error for ParseFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(location: Vec<PathSegment>, message: &str) -> FieldError {
        FieldError {
            location,
            message: message.to_string(),
        }
    }

    fn key(k: &str) -> PathSegment {
        PathSegment::Key(k.to_string())
    }

    #[test]
    fn test_single_error() {
        let errors = vec![error(vec![key("b")], "field required")];
        let (location, message) = likely_error_location(&errors);
        assert_eq!(location, vec![key("b")]);
        assert_eq!(message, "field required");
    }

    #[test]
    fn test_two_unrelated_errors_pick_first_seen() {
        let errors = vec![
            error(vec![key("a")], "field required"),
            error(vec![key("b")], "field required"),
        ];
        let (location, message) = likely_error_location(&errors);
        assert_eq!(location, vec![key("a")]);
        assert_eq!(message, "field required");
    }

    #[test]
    fn test_repeated_location_wins() {
        let base = vec![key("condition"), key("ALL"), PathSegment::Index(1)];
        let mut errors = Vec::new();
        for alternative in ["FROM", "TO", "SUBJECT"] {
            let mut missing = base.clone();
            missing.push(key(alternative));
            errors.push(error(missing, "field required"));
            let mut extra = base.clone();
            extra.push(key("SUBECT"));
            errors.push(error(extra, "extra fields not permitted"));
        }
        let (location, message) = likely_error_location(&errors);
        assert_eq!(format_location(&location), "condition.ALL[1].SUBECT");
        assert_eq!(message, "could not parse");
    }

    #[test]
    fn test_no_errors_points_at_root() {
        let (location, message) = likely_error_location(&[]);
        assert!(location.is_empty());
        assert_eq!(message, "could not parse");
    }

    #[test]
    fn test_fragment_keeps_trailing_key() {
        let content: Value = serde_yaml::from_str("condition:\n  ALL:\n    - FROM: ok\n    - SUBECT: ok\n").unwrap();
        let location = vec![key("condition"), key("ALL"), PathSegment::Index(1), key("SUBECT")];
        let expected: Value = serde_yaml::from_str("SUBECT: ok").unwrap();
        assert_eq!(fragment_at(&content, &location), expected);
    }

    #[test]
    fn test_fragment_for_index_and_missing_key() {
        let content: Value = serde_yaml::from_str("ANY: [test, okok]").unwrap();
        assert_eq!(
            fragment_at(&content, &[key("ANY"), PathSegment::Index(0)]),
            Value::String("test".to_string())
        );
        let expected: Value = serde_yaml::from_str("ALL: Missing field").unwrap();
        assert_eq!(fragment_at(&content, &[key("ALL")]), expected);
    }

    #[test]
    fn test_boxed_yaml() {
        let data: Value = serde_yaml::from_str("a: 1\nb: 2").unwrap();
        assert_eq!(boxed_yaml(&data), "╭\n│ a: 1\n│ b: 2\n╰");
    }

    #[test]
    fn test_display_mentions_location_and_fragment() {
        let content: Value = serde_yaml::from_str("FROM: [1, 2]\nfoo: bar").unwrap();
        let failure = ParseFailure::from_errors(
            "rules",
            vec![error(vec![key("foo")], "extra fields not permitted")],
            content,
        );
        let text = failure.to_string();
        assert!(text.starts_with("Failed parsing the 'rules' section:\n╭\n"));
        assert!(text.contains("'extra fields not permitted' at foo in"));
        assert!(text.ends_with("╭\n│ foo: bar\n╰"));
    }
}
