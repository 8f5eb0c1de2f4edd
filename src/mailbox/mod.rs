//! Mailbox collaborator.
//!
//! The transport (connection, authentication, fetch and mutation primitives)
//! lives outside this crate. The rule engine and the monitor only talk to it
//! through the [`Mailbox`] and [`Connector`] traits.

pub mod memory;

use crate::config::Settings;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

pub use memory::{MemoryConnector, MemoryMailbox, MemoryStore, WaitOutcome};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub uid: String,
    /// Folder the message currently lives in.
    pub folder: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub flags: BTreeSet<String>,
}

impl Message {
    /// Short form used in log lines: `[{uid} from -> to 'subject']`.
    pub fn summary(&self) -> String {
        format!(
            "[{{{}}} {} -> {} '{}']",
            self.uid,
            self.from,
            self.to.join(", "),
            self.subject
        )
    }

    pub fn is_seen(&self) -> bool {
        self.flags.contains("\\Seen")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// The server dropped the connection.
    #[error("connection aborted: {0}")]
    Aborted(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no such folder: {0}")]
    NoSuchFolder(String),

    #[error("no such message: {0}")]
    NoSuchMessage(String),
}

/// Operations consumed from a live, authenticated mailbox connection.
#[async_trait]
pub trait Mailbox: Send {
    async fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError>;

    /// Unseen messages of the selected folder, without marking them seen.
    async fn fetch_unseen(&mut self) -> Result<Vec<Message>, MailboxError>;

    /// Every message of the selected folder, fetched `batch_size` at a time.
    async fn fetch_all(&mut self, batch_size: usize) -> Result<Vec<Message>, MailboxError>;

    async fn move_message(&mut self, uid: &str, dest: &str) -> Result<(), MailboxError>;

    async fn delete(&mut self, uids: &[String]) -> Result<(), MailboxError>;

    /// Add (`value = true`) or remove an IMAP flag or keyword.
    async fn set_flag(&mut self, uids: &[String], flag: &str, value: bool)
        -> Result<(), MailboxError>;

    /// Block until the server reports a change or the timeout expires.
    /// Returns whether a change was reported.
    async fn wait_for_change(&mut self, timeout: Duration) -> Result<bool, MailboxError>;

    async fn list_folders(&mut self) -> Result<Vec<String>, MailboxError>;

    async fn create_folder(&mut self, folder: &str) -> Result<(), MailboxError>;

    async fn delete_folder(&mut self, folder: &str) -> Result<(), MailboxError>;

    async fn rename_folder(&mut self, from: &str, to: &str) -> Result<(), MailboxError>;
}

/// Opens (and reopens) authenticated mailbox connections.
#[async_trait]
pub trait Connector: Send + Sync {
    type Mailbox: Mailbox;

    async fn connect(&self, settings: &Settings) -> Result<Self::Mailbox, MailboxError>;
}
