//! Process-wide configuration state.
//!
//! The active settings, rules and named actions are held together in one
//! immutable [`Snapshot`]. A reload builds a complete new snapshot and
//! swaps it in with a single write; readers keep whatever `Arc` they
//! already hold, so no evaluation ever sees a half-applied configuration.

use crate::action::ActionRegistry;
use crate::config::{Config, ConfigError, Settings};
use crate::rule::Rule;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub settings: Settings,
    pub rules: Vec<Rule>,
    pub actions: ActionRegistry,
}

impl From<Config> for Snapshot {
    fn from(config: Config) -> Self {
        Snapshot {
            settings: config.settings,
            rules: config.rules,
            actions: config.actions,
        }
    }
}

#[derive(Debug)]
pub struct RuntimeState {
    config_path: PathBuf,
    current: RwLock<Arc<Snapshot>>,
}

impl RuntimeState {
    /// Load the configuration file for the first time.
    pub fn load(config_path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = config_path.into();
        let config = Config::from_file(&config_path)?;
        Ok(Self::with_config(config_path, config))
    }

    pub fn with_config(config_path: impl Into<PathBuf>, config: Config) -> Self {
        RuntimeState {
            config_path: config_path.into(),
            current: RwLock::new(Arc::new(config.into())),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// The configuration currently in force.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&current)
    }

    /// Re-read the configuration file.
    ///
    /// On failure the previous snapshot stays active and the error is
    /// returned after being logged.
    pub fn reload(&self) -> Result<(), ConfigError> {
        match Config::from_file(&self.config_path) {
            Ok(config) => {
                let snapshot = Arc::new(Snapshot::from(config));
                *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
                log::info!("Successfully parsed new configuration");
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "Failed loading new configuration, keeping the previous one: {}",
                    e
                );
                Err(e)
            }
        }
    }
}
