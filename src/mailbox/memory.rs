//! In-memory mailbox implementation
//!
//! Backs the single-pass and monitor tests, and the demonstration binary.
//! Every mutation is recorded as a [`MailboxCall`] and wait outcomes can be
//! scripted to simulate notifications, aborts and failures.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Connector, Mailbox, MailboxError, Message};
use crate::config::Settings;

pub const INBOX: &str = "INBOX";

/// Scripted result of the next `wait_for_change` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Changed,
    Timeout,
    /// The server drops the connection.
    Abort,
    /// Any other transport error.
    Fail,
}

/// Mutation issued against the store, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxCall {
    Move { uid: String, dest: String },
    Delete { uids: Vec<String> },
    SetFlag { uids: Vec<String>, flag: String, value: bool },
    CreateFolder(String),
    DeleteFolder(String),
    RenameFolder { from: String, to: String },
}

#[derive(Debug)]
pub struct MemoryStore {
    folders: BTreeMap<String, Vec<Message>>,
    next_uid: u64,
    changed: bool,
    waits: VecDeque<WaitOutcome>,
    calls: Vec<MailboxCall>,
    connects: usize,
    failing_connects: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert(INBOX.to_string(), Vec::new());
        Self {
            folders,
            next_uid: 1,
            changed: false,
            waits: VecDeque::new(),
            calls: Vec::new(),
            connects: 0,
            failing_connects: 0,
        }
    }

    /// Store a message in `folder` (created if needed) and return its uid.
    pub fn deliver(&mut self, folder: &str, mut message: Message) -> String {
        let uid = self.next_uid.to_string();
        self.next_uid += 1;
        message.uid = uid.clone();
        message.folder = folder.to_string();
        self.folders
            .entry(folder.to_string())
            .or_default()
            .push(message);
        self.changed = true;
        uid
    }

    pub fn add_folder(&mut self, folder: &str) {
        self.folders.entry(folder.to_string()).or_default();
    }

    pub fn messages(&self, folder: &str) -> Vec<Message> {
        self.folders.get(folder).cloned().unwrap_or_default()
    }

    fn find_mut(&mut self, uid: &str) -> Option<&mut Message> {
        self.folders
            .values_mut()
            .flat_map(|messages| messages.iter_mut())
            .find(|m| m.uid == uid)
    }
}

/// Connector handing out connections to one shared [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the store.
    pub fn with_store<T>(&self, f: impl FnOnce(&mut MemoryStore) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut store)
    }

    pub fn deliver(&self, folder: &str, message: Message) -> String {
        self.with_store(|s| s.deliver(folder, message))
    }

    pub fn queue_wait(&self, outcome: WaitOutcome) {
        self.with_store(|s| s.waits.push_back(outcome));
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_connects(&self, count: usize) {
        self.with_store(|s| s.failing_connects = count);
    }

    pub fn calls(&self) -> Vec<MailboxCall> {
        self.with_store(|s| s.calls.clone())
    }

    /// Number of connection attempts, failed ones included.
    pub fn connects(&self) -> usize {
        self.with_store(|s| s.connects)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Mailbox = MemoryMailbox;

    async fn connect(&self, settings: &Settings) -> Result<MemoryMailbox, MailboxError> {
        self.with_store(|s| {
            s.connects += 1;
            if s.failing_connects > 0 {
                s.failing_connects -= 1;
                return Err(MailboxError::Connection(format!(
                    "{} refused the connection",
                    settings.server
                )));
            }
            Ok(())
        })?;
        log::debug!("Opened in-memory mailbox for {}", settings.username);
        Ok(MemoryMailbox {
            store: self.store.clone(),
            selected: INBOX.to_string(),
        })
    }
}

/// One connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryMailbox {
    store: Arc<Mutex<MemoryStore>>,
    selected: String,
}

impl MemoryMailbox {
    fn store(&self) -> Result<MutexGuard<'_, MemoryStore>, MailboxError> {
        self.store
            .lock()
            .map_err(|_| MailboxError::Protocol("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        if !self.store()?.folders.contains_key(folder) {
            return Err(MailboxError::NoSuchFolder(folder.to_string()));
        }
        self.selected = folder.to_string();
        Ok(())
    }

    async fn fetch_unseen(&mut self) -> Result<Vec<Message>, MailboxError> {
        let store = self.store()?;
        Ok(store
            .messages(&self.selected)
            .into_iter()
            .filter(|m| !m.is_seen())
            .collect())
    }

    async fn fetch_all(&mut self, batch_size: usize) -> Result<Vec<Message>, MailboxError> {
        let store = self.store()?;
        let messages = store.messages(&self.selected);
        let mut out = Vec::with_capacity(messages.len());
        for batch in messages.chunks(batch_size.max(1)) {
            out.extend_from_slice(batch);
        }
        Ok(out)
    }

    async fn move_message(&mut self, uid: &str, dest: &str) -> Result<(), MailboxError> {
        let mut store = self.store()?;
        if !store.folders.contains_key(dest) {
            return Err(MailboxError::NoSuchFolder(dest.to_string()));
        }
        let source = store
            .folders
            .get_mut(&self.selected)
            .ok_or_else(|| MailboxError::NoSuchFolder(self.selected.clone()))?;
        let position = source
            .iter()
            .position(|m| m.uid == uid)
            .ok_or_else(|| MailboxError::NoSuchMessage(uid.to_string()))?;
        let mut message = source.remove(position);
        message.folder = dest.to_string();
        store.folders.entry(dest.to_string()).or_default().push(message);
        store.calls.push(MailboxCall::Move {
            uid: uid.to_string(),
            dest: dest.to_string(),
        });
        Ok(())
    }

    async fn delete(&mut self, uids: &[String]) -> Result<(), MailboxError> {
        let mut store = self.store()?;
        for messages in store.folders.values_mut() {
            messages.retain(|m| !uids.contains(&m.uid));
        }
        store.calls.push(MailboxCall::Delete {
            uids: uids.to_vec(),
        });
        Ok(())
    }

    async fn set_flag(
        &mut self,
        uids: &[String],
        flag: &str,
        value: bool,
    ) -> Result<(), MailboxError> {
        let mut store = self.store()?;
        for uid in uids {
            let message = store
                .find_mut(uid)
                .ok_or_else(|| MailboxError::NoSuchMessage(uid.clone()))?;
            if value {
                message.flags.insert(flag.to_string());
            } else {
                message.flags.remove(flag);
            }
        }
        store.calls.push(MailboxCall::SetFlag {
            uids: uids.to_vec(),
            flag: flag.to_string(),
            value,
        });
        Ok(())
    }

    async fn wait_for_change(&mut self, _timeout: Duration) -> Result<bool, MailboxError> {
        let mut store = self.store()?;
        match store.waits.pop_front() {
            Some(WaitOutcome::Changed) => Ok(true),
            Some(WaitOutcome::Timeout) => Ok(false),
            Some(WaitOutcome::Abort) => Err(MailboxError::Aborted("socket closed".to_string())),
            Some(WaitOutcome::Fail) => Err(MailboxError::Protocol("BAD IDLE".to_string())),
            None => Ok(std::mem::take(&mut store.changed)),
        }
    }

    async fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        Ok(self.store()?.folders.keys().cloned().collect())
    }

    async fn create_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        let mut store = self.store()?;
        store.add_folder(folder);
        store.calls.push(MailboxCall::CreateFolder(folder.to_string()));
        Ok(())
    }

    async fn delete_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        let mut store = self.store()?;
        if store.folders.remove(folder).is_none() {
            return Err(MailboxError::NoSuchFolder(folder.to_string()));
        }
        store.calls.push(MailboxCall::DeleteFolder(folder.to_string()));
        Ok(())
    }

    async fn rename_folder(&mut self, from: &str, to: &str) -> Result<(), MailboxError> {
        let mut store = self.store()?;
        let mut messages = store
            .folders
            .remove(from)
            .ok_or_else(|| MailboxError::NoSuchFolder(from.to_string()))?;
        for message in &mut messages {
            message.folder = to.to_string();
        }
        store.folders.insert(to.to_string(), messages);
        store.calls.push(MailboxCall::RenameFolder {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }
}
