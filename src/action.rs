use crate::mailbox::{Mailbox, MailboxError, Message};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// System flags understood by IMAP and the sieve `imap4flags` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
}

impl Flag {
    pub const ALL: [Flag; 5] = [
        Flag::Seen,
        Flag::Answered,
        Flag::Flagged,
        Flag::Deleted,
        Flag::Draft,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Flag::Seen => "SEEN",
            Flag::Answered => "ANSWERED",
            Flag::Flagged => "FLAGGED",
            Flag::Deleted => "DELETED",
            Flag::Draft => "DRAFT",
        }
    }

    pub fn imap(self) -> &'static str {
        match self {
            Flag::Seen => "\\Seen",
            Flag::Answered => "\\Answered",
            Flag::Flagged => "\\Flagged",
            Flag::Deleted => "\\Deleted",
            Flag::Draft => "\\Draft",
        }
    }
}

/// Target of a flag or unflag action: a system flag or a custom keyword.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlagName {
    System(Flag),
    Custom(String),
}

impl FlagName {
    /// Representation sent to the server.
    pub fn keyword(&self) -> &str {
        match self {
            FlagName::System(flag) => flag.imap(),
            FlagName::Custom(keyword) => keyword,
        }
    }

    fn serialize_into<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        match self {
            FlagName::System(flag) => map.serialize_entry("flag", flag),
            FlagName::Custom(keyword) => map.serialize_entry("custom_flag", keyword),
        }
    }
}

impl From<Flag> for FlagName {
    fn from(flag: Flag) -> Self {
        FlagName::System(flag)
    }
}

/// Mailbox-mutating action executed when a rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Move { dest: String },
    Delete,
    Flag(FlagName),
    Unflag(FlagName),
}

impl Action {
    pub fn move_to(dest: impl Into<String>) -> Self {
        Action::Move { dest: dest.into() }
    }

    /// Discriminant as written in the configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Move { .. } => "move",
            Action::Delete => "delete",
            Action::Flag(_) => "flag",
            Action::Unflag(_) => "unflag",
        }
    }

    /// True when applying the action would not change anything.
    pub fn skip(&self, message: &Message) -> bool {
        match self {
            Action::Move { dest } => message.folder == *dest,
            Action::Delete | Action::Flag(_) | Action::Unflag(_) => false,
        }
    }

    pub fn format(&self, message: &Message) -> String {
        match self {
            Action::Move { dest } => format!("MOVE {} --> {}", message.summary(), dest),
            Action::Delete => format!("DELETE {}", message.summary()),
            Action::Flag(flag) => format!("FLAG {} {}", message.summary(), flag.keyword()),
            Action::Unflag(flag) => format!("UNFLAG {} {}", message.summary(), flag.keyword()),
        }
    }

    pub async fn apply(
        &self,
        mailbox: &mut dyn Mailbox,
        message: &Message,
        dry_run: bool,
    ) -> Result<(), MailboxError> {
        if self.skip(message) {
            log::debug!("Skipping {}", self.format(message));
            return Ok(());
        }
        if dry_run {
            log::info!("[dry-run] {}", self.format(message));
            return Ok(());
        }
        log::info!("{}", self.format(message));

        let uids = [message.uid.clone()];
        match self {
            Action::Move { dest } => mailbox.move_message(&message.uid, dest).await,
            Action::Delete => mailbox.delete(&uids).await,
            Action::Flag(flag) => mailbox.set_flag(&uids, flag.keyword(), true).await,
            Action::Unflag(flag) => mailbox.set_flag(&uids, flag.keyword(), false).await,
        }
    }

    /// Sieve statement performing this action, without the trailing `;`.
    pub fn to_sieve(&self) -> String {
        match self {
            Action::Move { dest } => format!("fileinto {}", sieve_string(dest)),
            Action::Delete => "discard".to_string(),
            Action::Flag(flag) => format!("setflag {}", sieve_string(flag.keyword())),
            Action::Unflag(flag) => format!("removeflag {}", sieve_string(flag.keyword())),
        }
    }

    /// Sieve extension the statement depends on.
    pub fn sieve_extension(&self) -> Option<&'static str> {
        match self {
            Action::Move { .. } => Some("fileinto"),
            Action::Delete => None,
            Action::Flag(_) | Action::Unflag(_) => Some("imap4flags"),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("action", self.kind())?;
        match self {
            Action::Move { dest } => map.serialize_entry("dest", dest)?,
            Action::Delete => {}
            Action::Flag(flag) | Action::Unflag(flag) => flag.serialize_into(&mut map)?,
        }
        map.end()
    }
}

/// Quote a string for a sieve script.
pub fn sieve_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Actions that rules may reference by name.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Action>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut actions = BTreeMap::new();
        actions.insert("delete".to_string(), Action::Delete);
        actions.insert("trash".to_string(), Action::move_to("Trash"));
        actions.insert("mark_read".to_string(), Action::Flag(Flag::Seen.into()));
        ActionRegistry { actions }
    }
}

impl ActionRegistry {
    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Register an action, returning the one it replaces.
    pub fn insert(&mut self, name: impl Into<String>, action: Action) -> Option<Action> {
        self.actions.insert(name.into(), action)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::mailbox::memory::{MailboxCall, INBOX};
    use crate::mailbox::{Connector, MemoryConnector};

    async fn setup() -> (MemoryConnector, crate::mailbox::MemoryMailbox, Message) {
        let connector = MemoryConnector::new();
        connector.with_store(|s| s.add_folder("new_folder"));
        let uid = connector.deliver(
            INBOX,
            Message {
                from: "from@ok.com".to_string(),
                to: vec!["to@ok.com".to_string()],
                subject: "subject".to_string(),
                ..Default::default()
            },
        );
        let mailbox = connector
            .connect(&Settings::new("localhost", "u", "p"))
            .await
            .unwrap();
        let message = connector.with_store(|s| s.messages(INBOX)).remove(0);
        assert_eq!(message.uid, uid);
        (connector, mailbox, message)
    }

    #[tokio::test]
    async fn test_move_action() {
        let (connector, mut mailbox, message) = setup().await;
        Action::move_to("new_folder")
            .apply(&mut mailbox, &message, false)
            .await
            .unwrap();

        assert!(connector.with_store(|s| s.messages(INBOX)).is_empty());
        let moved = connector.with_store(|s| s.messages("new_folder"));
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].uid, message.uid);
    }

    #[tokio::test]
    async fn test_move_into_current_folder_is_skipped() {
        let (connector, mut mailbox, message) = setup().await;
        let action = Action::move_to(INBOX);
        assert!(action.skip(&message));
        action.apply(&mut mailbox, &message, false).await.unwrap();
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_action() {
        let (connector, mut mailbox, message) = setup().await;
        Action::Delete
            .apply(&mut mailbox, &message, false)
            .await
            .unwrap();
        assert!(connector.with_store(|s| s.messages(INBOX)).is_empty());
    }

    #[tokio::test]
    async fn test_flag_actions() {
        let (connector, mut mailbox, message) = setup().await;
        let flag = Action::Flag(Flag::Flagged.into());
        let unflag = Action::Unflag(Flag::Flagged.into());

        flag.apply(&mut mailbox, &message, false).await.unwrap();
        let flagged = connector.with_store(|s| s.messages(INBOX)).remove(0);
        assert!(flagged.flags.contains("\\Flagged"));

        unflag.apply(&mut mailbox, &flagged, false).await.unwrap();
        let unflagged = connector.with_store(|s| s.messages(INBOX)).remove(0);
        assert!(!unflagged.flags.contains("\\Flagged"));
    }

    #[tokio::test]
    async fn test_custom_flag_uses_keyword() {
        let (connector, mut mailbox, message) = setup().await;
        Action::Flag(FlagName::Custom("$Important".to_string()))
            .apply(&mut mailbox, &message, false)
            .await
            .unwrap();
        assert_eq!(
            connector.calls(),
            vec![MailboxCall::SetFlag {
                uids: vec![message.uid.clone()],
                flag: "$Important".to_string(),
                value: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_dry_run_does_not_touch_mailbox() {
        let (connector, mut mailbox, message) = setup().await;
        Action::Delete
            .apply(&mut mailbox, &message, true)
            .await
            .unwrap();
        assert!(connector.calls().is_empty());
        assert_eq!(connector.with_store(|s| s.messages(INBOX)).len(), 1);
    }

    #[test]
    fn test_format() {
        let message = Message {
            uid: "7".to_string(),
            from: "a@b.c".to_string(),
            to: vec!["d@e.f".to_string()],
            subject: "hi".to_string(),
            ..Default::default()
        };
        assert_eq!(
            Action::move_to("Archive").format(&message),
            "MOVE [{7} a@b.c -> d@e.f 'hi'] --> Archive"
        );
        assert_eq!(
            Action::Flag(Flag::Seen.into()).format(&message),
            "FLAG [{7} a@b.c -> d@e.f 'hi'] \\Seen"
        );
    }

    #[test]
    fn test_sieve_statements() {
        assert_eq!(Action::move_to("Lists/rust").to_sieve(), "fileinto \"Lists/rust\"");
        assert_eq!(Action::Delete.to_sieve(), "discard");
        assert_eq!(
            Action::Flag(Flag::Seen.into()).to_sieve(),
            "setflag \"\\\\Seen\""
        );
        assert_eq!(
            Action::Unflag(FlagName::Custom("todo".to_string())).to_sieve(),
            "removeflag \"todo\""
        );
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ActionRegistry::default();
        assert_eq!(registry.get("delete"), Some(&Action::Delete));
        assert_eq!(registry.get("trash"), Some(&Action::move_to("Trash")));
        assert_eq!(
            registry.get("mark_read"),
            Some(&Action::Flag(Flag::Seen.into()))
        );
        assert!(registry.get("archive").is_none());
    }
}
