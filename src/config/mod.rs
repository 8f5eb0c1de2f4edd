pub mod diagnostic;
pub mod schema;

pub use diagnostic::{FieldError, ParseFailure, PathSegment};

use crate::action::ActionRegistry;
use crate::rule::Rule;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const TOP_LEVEL_KEYS: [&str; 3] = ["settings", "rules", "actions"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Structure(String),

    #[error("{0}")]
    Invalid(ParseFailure),

    #[error("rule '{rule}' references unknown action '{name}'")]
    UnknownAction { rule: String, name: String },
}

fn default_port() -> u16 {
    993
}

fn default_wait_timeout() -> u64 {
    2
}

fn default_extensions() -> Vec<String> {
    vec!["fileinto".to_string(), "imap4flags".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SieveSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for SieveSettings {
    fn default() -> Self {
        SieveSettings {
            name: None,
            extensions: default_extensions(),
        }
    }
}

/// Connection settings of the `settings` section.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub server: String,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_ciphers: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds to wait for a mailbox notification before checking for reloads.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,
    #[serde(default)]
    pub sieve: SieveSettings,
}

impl Settings {
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Settings {
            server: server.into(),
            username: username.into(),
            password: password.into(),
            ssl_ciphers: None,
            port: default_port(),
            wait_timeout: default_wait_timeout(),
            sieve: SieveSettings::default(),
        }
    }

    pub fn wait_duration(&self) -> Duration {
        Duration::from_secs(self.wait_timeout)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl_ciphers", &self.ssl_ciphers)
            .field("port", &self.port)
            .field("wait_timeout", &self.wait_timeout)
            .field("sieve", &self.sieve)
            .finish()
    }
}

/// A fully validated configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub rules: Vec<Rule>,
    pub actions: ActionRegistry,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::info!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text.
    ///
    /// Named actions are resolved for every rule before returning, so a
    /// rule referencing an undefined action fails here rather than when a
    /// message matches.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_yaml::from_str(content)?;
        let Value::Mapping(map) = &document else {
            return Err(ConfigError::Structure(
                "the configuration should be a mapping with the keys 'rules', 'settings' and 'actions' (optional)"
                    .to_string(),
            ));
        };

        for key in map.keys() {
            match key.as_str() {
                Some(name) if TOP_LEVEL_KEYS.contains(&name) => {}
                _ => log::warn!("Ignoring unknown configuration key {:?}", key),
            }
        }

        let settings_value = map
            .get("settings")
            .ok_or_else(|| ConfigError::Structure("missing 'settings' section".to_string()))?;
        let settings = schema::parse_settings(settings_value).map_err(|errors| {
            ConfigError::Invalid(ParseFailure::from_errors(
                "settings",
                errors,
                settings_value.clone(),
            ))
        })?;

        let Some(Value::Sequence(rule_values)) = map.get("rules") else {
            return Err(ConfigError::Structure(
                "'rules' should be a list of rules".to_string(),
            ));
        };
        let mut rules = Vec::with_capacity(rule_values.len());
        for value in rule_values {
            let rule = schema::parse_rule(value).map_err(|errors| {
                ConfigError::Invalid(ParseFailure::from_errors("rules", errors, value.clone()))
            })?;
            rules.push(rule);
        }

        let mut actions = ActionRegistry::default();
        match map.get("actions") {
            None | Some(Value::Null) => {}
            Some(Value::Mapping(entries)) => {
                for (name, value) in entries {
                    let Some(name) = name.as_str() else {
                        return Err(ConfigError::Structure(format!(
                            "action names should be strings, got {name:?}"
                        )));
                    };
                    let action = schema::parse_action(value).map_err(|errors| {
                        ConfigError::Invalid(ParseFailure::from_errors(
                            "actions",
                            errors,
                            value.clone(),
                        ))
                    })?;
                    if actions.insert(name, action).is_some() {
                        log::warn!("Overriding default action {}", name);
                    }
                }
            }
            Some(other) => {
                return Err(ConfigError::Structure(format!(
                    "'actions' value is not a mapping: {other:?}"
                )))
            }
        }

        for rule in &rules {
            rule.resolve_actions(&actions)?;
        }

        log::debug!(
            "Parsed {} rules and {} named actions",
            rules.len(),
            actions.names().count()
        );
        Ok(Config {
            settings,
            rules,
            actions,
        })
    }
}
