pub mod action;
pub mod condition;
pub mod config;
pub mod dnf;
pub mod mailbox;
pub mod rule;
pub mod sieve;
pub mod state;
pub mod worker;

pub use action::{Action, ActionRegistry, Flag, FlagName};
pub use condition::{Condition, Field, Operand, Operator, Predicate};
pub use config::{Config, ConfigError, Settings, SieveSettings};
pub use mailbox::{Connector, Mailbox, MailboxError, Message};
pub use rule::{apply_list, missing_destinations, ActionRef, Rule, RuleError};
pub use sieve::{generate_script, SieveError};
pub use state::{RuntimeState, Snapshot};
pub use worker::{tidy, ConfigWatcher, MessageScript, Monitor};
