//! Long-running monitor and configuration watcher.
//!
//! The monitor owns the mailbox connection. The watcher only ever sets a
//! shared flag; the monitor checks and clears it once per iteration and
//! reloads the configuration between two waits, never while a message is
//! being processed.

use crate::condition::Condition;
use crate::mailbox::{Connector, Mailbox, MailboxError, Message};
use crate::rule::{apply_list, missing_destinations, RuleError};
use crate::state::{RuntimeState, Snapshot};
use async_trait::async_trait;
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TIDY_BATCH_SIZE: usize = 100;
const LOOP_PAUSE: Duration = Duration::from_millis(100);
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Polls the configuration file and raises `flag` whenever it changes.
pub struct ConfigWatcher {
    _watcher: PollWatcher,
}

impl ConfigWatcher {
    pub fn spawn(path: &Path, flag: Arc<AtomicBool>) -> notify::Result<Self> {
        let config = notify::Config::default()
            .with_poll_interval(WATCH_INTERVAL)
            .with_compare_contents(true);
        let mut watcher = PollWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                    log::debug!("Configuration change: {:?}", event.kind);
                    flag.store(true, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => log::warn!("Configuration watcher error: {}", e),
            },
            config,
        )?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        log::info!("Watching {} for changes", path.display());
        Ok(ConfigWatcher { _watcher: watcher })
    }
}

/// Hook run on every message whose condition matches, after the rules.
#[async_trait]
pub trait MessageScript: Send + Sync {
    fn name(&self) -> &str;

    fn condition(&self) -> &Condition;

    async fn run(&self, message: &Message) -> anyhow::Result<()>;
}

pub struct Monitor<C: Connector> {
    connector: C,
    state: Arc<RuntimeState>,
    reload: Arc<AtomicBool>,
    scripts: Vec<Box<dyn MessageScript>>,
    folder: Option<String>,
    dry_run: bool,
    mailbox: Option<C::Mailbox>,
}

impl<C: Connector> Monitor<C> {
    pub fn new(connector: C, state: Arc<RuntimeState>, reload: Arc<AtomicBool>) -> Self {
        Monitor {
            connector,
            state,
            reload,
            scripts: Vec::new(),
            folder: None,
            dry_run: false,
            mailbox: None,
        }
    }

    pub fn with_script(mut self, script: impl MessageScript + 'static) -> Self {
        self.scripts.push(Box::new(script));
        self
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.mailbox.is_some()
    }

    async fn connect(&self) -> Result<C::Mailbox, MailboxError> {
        let settings = self.state.snapshot().settings.clone();
        log::debug!("Connecting to {} with {}", settings.server, settings.username);
        let mut mailbox = self.connector.connect(&settings).await?;
        if let Some(folder) = &self.folder {
            mailbox.select_folder(folder).await?;
        }
        log::info!("Connected to {} with {}", settings.server, settings.username);
        Ok(mailbox)
    }

    async fn reconnect(&mut self) {
        self.mailbox = None;
        match self.connect().await {
            Ok(mailbox) => self.mailbox = Some(mailbox),
            Err(e) => log::error!("Reconnection failed, retrying on the next iteration: {}", e),
        }
    }

    /// Open the first connection and report rule destinations that do not
    /// exist on the server.
    pub async fn start(&mut self) -> Result<(), MailboxError> {
        let mut mailbox = self.connect().await?;
        let snapshot = self.state.snapshot();
        let folders = mailbox.list_folders().await?;
        match missing_destinations(&snapshot.rules, &snapshot.actions, &folders) {
            Ok(missing) if !missing.is_empty() => log::warn!(
                "Rules move messages into folders that do not exist: {}",
                missing.join(", ")
            ),
            Ok(_) => {}
            Err(e) => log::error!("{}", e),
        }
        self.mailbox = Some(mailbox);
        Ok(())
    }

    /// One iteration of the monitor loop: handle a pending reload, wait for
    /// a change and process unseen messages. Returns how many messages were
    /// processed.
    ///
    /// Errors are logged and answered with exactly one reconnection
    /// attempt; a failed attempt is retried on the next iteration.
    pub async fn step(&mut self) -> usize {
        if self.reload.swap(false, Ordering::SeqCst) {
            log::info!("Config change detected, reloading");
            // A failed reload is logged by the state and the old rules stay.
            let _ = self.state.reload();
        }

        if self.mailbox.is_none() {
            self.reconnect().await;
            if self.mailbox.is_none() {
                return 0;
            }
        }

        let snapshot = self.state.snapshot();
        match self.poll(&snapshot).await {
            Ok(count) => count,
            Err(RuleError::Mailbox(MailboxError::Aborted(reason))) => {
                log::warn!("IMAP connection aborted ({}), reconnecting", reason);
                self.reconnect().await;
                0
            }
            Err(e) => {
                log::error!("An error occurred, reconnecting: {}", e);
                self.reconnect().await;
                0
            }
        }
    }

    async fn poll(&mut self, snapshot: &Snapshot) -> Result<usize, RuleError> {
        let Some(mailbox) = self.mailbox.as_mut() else {
            return Ok(0);
        };
        if !mailbox
            .wait_for_change(snapshot.settings.wait_duration())
            .await?
        {
            return Ok(0);
        }

        let messages = mailbox.fetch_unseen().await?;
        for message in &messages {
            log::info!("Found message {}", message.summary());
            apply_list(
                &snapshot.rules,
                &snapshot.actions,
                mailbox,
                message,
                self.dry_run,
            )
            .await?;
            for script in &self.scripts {
                if !script.condition().eval(message) {
                    continue;
                }
                log::info!("Executing script {}", script.name());
                if let Err(e) = script.run(message).await {
                    log::error!("Script {} failed on {}: {:#}", script.name(), message.summary(), e);
                }
            }
        }
        Ok(messages.len())
    }

    /// Connect and loop forever.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.start().await?;
        log::info!(
            "Starting monitoring {}",
            self.folder.as_deref().unwrap_or("INBOX")
        );
        loop {
            self.step().await;
            tokio::time::sleep(LOOP_PAUSE).await;
        }
    }
}

/// Run the rules once over every message of `folder` (the INBOX by
/// default). Returns the number of messages processed.
pub async fn tidy<C: Connector>(
    connector: &C,
    snapshot: &Snapshot,
    folder: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<usize> {
    let mut mailbox = connector.connect(&snapshot.settings).await?;
    if let Some(folder) = folder {
        mailbox.select_folder(folder).await?;
    }
    let messages = mailbox.fetch_all(TIDY_BATCH_SIZE).await?;
    for message in &messages {
        apply_list(
            &snapshot.rules,
            &snapshot.actions,
            &mut mailbox,
            message,
            dry_run,
        )
        .await?;
    }
    log::info!("{} messages parsed", messages.len());
    Ok(messages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Field, Predicate};
    use crate::mailbox::memory::{MailboxCall, INBOX};
    use crate::mailbox::{MemoryConnector, WaitOutcome};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"
settings: {server: imap.example.com, username: me, password: secret}
rules:
  - name: lists
    condition: {TO: lists@example.org}
    move_to: Lists
"#;

    fn list_message(subject: &str) -> Message {
        Message {
            from: "someone@example.com".to_string(),
            to: vec!["lists@example.org".to_string()],
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    fn setup() -> (NamedTempFile, Arc<RuntimeState>, MemoryConnector) {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), CONFIG).unwrap();
        let state = Arc::new(RuntimeState::load(file.path()).unwrap());
        let connector = MemoryConnector::new();
        connector.with_store(|s| s.add_folder("Lists"));
        (file, state, connector)
    }

    struct Recorder {
        condition: Condition,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageScript for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn condition(&self) -> &Condition {
            &self.condition
        }

        async fn run(&self, message: &Message) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(message.subject.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_step_processes_new_messages() {
        let (_file, state, connector) = setup();
        let mut monitor = Monitor::new(connector.clone(), state, Arc::new(AtomicBool::new(false)));
        monitor.start().await.unwrap();

        assert_eq!(monitor.step().await, 0);
        connector.deliver(INBOX, list_message("hello"));
        assert_eq!(monitor.step().await, 1);
        assert_eq!(connector.with_store(|s| s.messages("Lists")).len(), 1);
    }

    #[tokio::test]
    async fn test_abort_triggers_exactly_one_reconnect() {
        let (_file, state, connector) = setup();
        let mut monitor = Monitor::new(connector.clone(), state, Arc::new(AtomicBool::new(false)));
        monitor.start().await.unwrap();
        assert_eq!(connector.connects(), 1);

        connector.queue_wait(WaitOutcome::Abort);
        assert_eq!(monitor.step().await, 0);
        assert_eq!(connector.connects(), 2);
        assert!(monitor.is_connected());

        connector.deliver(INBOX, list_message("after abort"));
        assert_eq!(monitor.step().await, 1);
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.with_store(|s| s.messages("Lists")).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_retried_next_step() {
        let (_file, state, connector) = setup();
        let mut monitor = Monitor::new(connector.clone(), state, Arc::new(AtomicBool::new(false)));
        monitor.start().await.unwrap();

        connector.queue_wait(WaitOutcome::Fail);
        connector.fail_connects(1);
        monitor.step().await;
        assert!(!monitor.is_connected());
        assert_eq!(connector.connects(), 2);

        connector.deliver(INBOX, list_message("later"));
        assert_eq!(monitor.step().await, 1);
        assert_eq!(connector.connects(), 3);
    }

    #[tokio::test]
    async fn test_reload_flag_is_checked_and_cleared() {
        let (file, state, connector) = setup();
        let flag = Arc::new(AtomicBool::new(false));
        let mut monitor = Monitor::new(connector.clone(), state.clone(), flag.clone());
        monitor.start().await.unwrap();

        std::fs::write(
            file.path(),
            CONFIG.replace("move_to: Lists", "actions: [delete]"),
        )
        .unwrap();
        flag.store(true, Ordering::SeqCst);
        connector.deliver(INBOX, list_message("to delete"));

        assert_eq!(monitor.step().await, 1);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(connector.with_store(|s| s.messages("Lists")).is_empty());
        assert!(connector
            .calls()
            .iter()
            .any(|c| matches!(c, MailboxCall::Delete { .. })));
    }

    #[tokio::test]
    async fn test_scripts_run_on_matching_messages() {
        let (_file, state, connector) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut monitor = Monitor::new(connector.clone(), state, Arc::new(AtomicBool::new(false)))
            .dry_run(true)
            .with_script(Recorder {
                condition: Predicate::new(Field::Subject, "invoice").into(),
                seen: seen.clone(),
            });
        monitor.start().await.unwrap();

        connector.deliver(INBOX, list_message("Invoice #42"));
        connector.deliver(INBOX, list_message("weekly news"));
        assert_eq!(monitor.step().await, 2);

        assert_eq!(*seen.lock().unwrap(), vec!["Invoice #42"]);
        // Dry run: nothing was moved.
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tidy_processes_every_message_of_folder() {
        let (_file, state, connector) = setup();
        connector.with_store(|s| s.add_folder("Old"));
        for i in 0..3 {
            let mut message = list_message(&format!("old {i}"));
            message.flags.insert("\\Seen".to_string());
            connector.deliver("Old", message);
        }
        connector.deliver("Old", Message::default());

        let count = tidy(&connector, &state.snapshot(), Some("Old"), false)
            .await
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(connector.with_store(|s| s.messages("Lists")).len(), 3);
        assert_eq!(connector.with_store(|s| s.messages("Old")).len(), 1);
    }

    #[tokio::test]
    async fn test_watcher_raises_flag_on_change() {
        let (file, _state, _connector) = setup();
        let flag = Arc::new(AtomicBool::new(false));
        let _watcher = ConfigWatcher::spawn(file.path(), flag.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(file.path(), format!("{CONFIG}\n# edited\n")).unwrap();

        let mut raised = false;
        for _ in 0..50 {
            if flag.load(Ordering::SeqCst) {
                raised = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(raised);
    }
}
