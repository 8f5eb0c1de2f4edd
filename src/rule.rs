use crate::action::{Action, ActionRegistry};
use crate::condition::Condition;
use crate::config::ConfigError;
use crate::mailbox::{Mailbox, MailboxError, Message};
use serde::Serialize;

/// Action entry of a rule: a reference into the registry or an inline action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionRef {
    Named(String),
    Inline(Action),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub condition: Condition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_to: Option<String>,
    pub keep_evaluating: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionRef>,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

impl Rule {
    pub fn new(condition: impl Into<Condition>) -> Self {
        Rule {
            name: None,
            condition: condition.into(),
            move_to: None,
            keep_evaluating: false,
            actions: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn moving_to(mut self, dest: impl Into<String>) -> Self {
        self.move_to = Some(dest.into());
        self
    }

    pub fn keep_evaluating(mut self) -> Self {
        self.keep_evaluating = true;
        self
    }

    pub fn with_action(mut self, action: ActionRef) -> Self {
        self.actions.push(action);
        self
    }

    /// Name used in logs: the explicit name, else the shorthand destination.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.move_to.as_deref())
            .unwrap_or("<unnamed>")
    }

    /// Actions to run on match, in order. A `move_to` shorthand is appended last.
    pub fn resolve_actions(&self, registry: &ActionRegistry) -> Result<Vec<Action>, ConfigError> {
        let mut resolved = Vec::with_capacity(self.actions.len() + 1);
        for action in &self.actions {
            match action {
                ActionRef::Named(name) => {
                    let action =
                        registry
                            .get(name)
                            .cloned()
                            .ok_or_else(|| ConfigError::UnknownAction {
                                rule: self.label().to_string(),
                                name: name.clone(),
                            })?;
                    resolved.push(action);
                }
                ActionRef::Inline(action) => resolved.push(action.clone()),
            }
        }
        if let Some(dest) = &self.move_to {
            resolved.push(Action::move_to(dest.clone()));
        }
        Ok(resolved)
    }

    /// Every folder this rule may move messages into.
    pub fn destinations(&self, registry: &ActionRegistry) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .resolve_actions(registry)?
            .into_iter()
            .filter_map(|action| match action {
                Action::Move { dest } => Some(dest),
                _ => None,
            })
            .collect())
    }

    /// Evaluate the condition and, on match, run the actions. Returns whether it matched.
    pub async fn apply(
        &self,
        registry: &ActionRegistry,
        mailbox: &mut dyn Mailbox,
        message: &Message,
        dry_run: bool,
    ) -> Result<bool, RuleError> {
        if !self.condition.eval(message) {
            return Ok(false);
        }
        log::debug!("Rule '{}' matched {}", self.label(), message.summary());
        for action in self.resolve_actions(registry)? {
            action.apply(mailbox, message, dry_run).await?;
        }
        Ok(true)
    }
}

/// Run `rules` in order on one message.
///
/// Stops after the first matching rule unless that rule sets
/// `keep_evaluating`. Returns the labels of the rules that matched.
pub async fn apply_list(
    rules: &[Rule],
    registry: &ActionRegistry,
    mailbox: &mut dyn Mailbox,
    message: &Message,
    dry_run: bool,
) -> Result<Vec<String>, RuleError> {
    let mut matched = Vec::new();
    for rule in rules {
        let applied = rule.apply(registry, mailbox, message, dry_run).await?;
        if applied {
            matched.push(rule.label().to_string());
            if !rule.keep_evaluating {
                break;
            }
        }
    }
    if matched.is_empty() {
        log::debug!("No rule matched {}", message.summary());
    }
    Ok(matched)
}

/// Move destinations referenced by `rules` that are not in `existing`.
pub fn missing_destinations(
    rules: &[Rule],
    registry: &ActionRegistry,
    existing: &[String],
) -> Result<Vec<String>, ConfigError> {
    let mut missing: Vec<String> = Vec::new();
    for rule in rules {
        for dest in rule.destinations(registry)? {
            if !existing.contains(&dest) && !missing.contains(&dest) {
                missing.push(dest);
            }
        }
    }
    Ok(missing)
}
