//! Thread: a persistent unit of conversation between a user and an assistant
//! about a text span.
//!
//! Translated into tagged Rust enums rather than in-band string sniffing:
//! the `[Harlowe]: ... 🤖` wrapping used when narrating status to a user is
//! strictly a rendering convention and must never be parsed back out of
//! stored content.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{MessageId, ThreadId};

/// Lifecycle state of a [`Thread`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    /// Created, task not yet spawned or not yet running.
    Pending,
    /// A task is currently processing a message for this thread.
    Active,
    /// The user closed the thread; a follow-up reopens it.
    Completed,
    /// Terminal: an invocation raised an exception. Never transitions out.
    Failed,
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Who authored a [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A human editor participant.
    User,
    /// The external assistant subprocess.
    Assistant,
    /// A status annotation emitted by the core itself.
    System,
}

/// Host-presentation hint for how a thread's transcript should be shown.
/// The core stores and round-trips this value but never acts on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Transcript shown in full.
    #[default]
    Expanded,
    /// Transcript collapsed to a summary line.
    Collapsed,
}

/// One turn in a thread's transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Stable id for this message.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Message body. Never carries a rendering prefix — see the module docs.
    pub content: String,
    /// Unix timestamp (seconds) the message was appended.
    pub timestamp: i64,
    /// Whether this is a core-emitted status annotation rather than
    /// conversational content. Always `true` for `Role::System` messages
    /// produced by `ThreadManager::post_status`; kept as a distinct field
    /// (not inferred from `role`) since it's part of the wire shape
    /// external collaborators consume directly.
    pub is_system_flag: bool,
}

/// A persistent unit of conversation tied to a text selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    /// Stable unique identifier.
    pub id: ThreadId,
    /// Text snapshot at creation time.
    pub selected_text: String,
    /// The user's initial request.
    pub initial_request: String,
    /// 1-indexed inclusive `(start, end)`; `(0, 0)` means document-scoped.
    pub line_range: (u32, u32),
    /// Lifecycle state.
    pub status: ThreadStatus,
    /// Ordered transcript.
    pub messages: Vec<Message>,
    /// Whether a follow-up is currently awaiting an assistant response.
    pub awaiting_response: bool,
    /// Open metadata map. Reserved keys: `git_commit`, `reverted`,
    /// `revert_commit`, `redo_commit`, `is_system_thread`, `undo_target`.
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Host session grouping id; the core does not interpret it.
    pub session_id: Option<String>,
    /// Host presentation hint; the core does not act on it.
    pub view_mode: ViewMode,
    /// Creation time (Unix seconds).
    pub created_at: i64,
    /// Last mutation time (Unix seconds).
    pub updated_at: i64,
    /// Last time the host marked this thread as viewed (Unix seconds).
    pub last_viewed_at: i64,
    next_message_seq: u64,
}

/// A metadata value. Kept as a small closed enum (rather than
/// `serde_json::Value`) because every reserved key has one of these
/// shapes; external collaborators may still stash additional string/bool
/// entries for their own purposes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// A commit hash, thread id, or other string-shaped value.
    Text(String),
    /// A flag such as `reverted` or `is_system_thread`.
    Bool(bool),
}

impl MetadataValue {
    /// View this value as `&str`, if it is a [`Self::Text`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bool(_) => None,
        }
    }

    /// View this value as `bool`, if it is a [`Self::Bool`].
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(_) => None,
        }
    }
}

impl Thread {
    /// Construct a new thread in [`ThreadStatus::Pending`].
    #[must_use]
    pub fn new(selected_text: String, initial_request: String, line_range: (u32, u32), now: i64) -> Self {
        Self {
            id: ThreadId::random(),
            selected_text,
            initial_request,
            line_range,
            status: ThreadStatus::Pending,
            messages: Vec::new(),
            awaiting_response: false,
            metadata: BTreeMap::new(),
            session_id: None,
            view_mode: ViewMode::default(),
            created_at: now,
            updated_at: now,
            last_viewed_at: now,
            next_message_seq: 0,
        }
    }

    /// Construct a system-owned thread (a resolution thread), flagged via
    /// `metadata["is_system_thread"] = true`.
    #[must_use]
    pub fn new_system(initial_request: String, now: i64) -> Self {
        let mut thread = Self::new(String::new(), initial_request, (0, 0), now);
        thread
            .metadata
            .insert("is_system_thread".to_owned(), MetadataValue::Bool(true));
        thread
    }

    /// Append a message and bump `updated_at`. Returns the new message's id.
    pub fn append_message(&mut self, role: Role, content: String, is_system_flag: bool, now: i64) -> MessageId {
        self.next_message_seq += 1;
        let id = MessageId::new(u128::from(self.next_message_seq));
        self.messages.push(Message {
            id,
            role,
            content,
            timestamp: now,
            is_system_flag,
        });
        self.updated_at = now;
        id
    }

    /// Whether `metadata["is_system_thread"]` is set and true.
    #[must_use]
    pub fn is_system_thread(&self) -> bool {
        self.metadata
            .get("is_system_thread")
            .and_then(MetadataValue::as_bool)
            .unwrap_or(false)
    }

    /// Whether `metadata["reverted"]` is set and true.
    #[must_use]
    pub fn is_reverted(&self) -> bool {
        self.metadata
            .get("reverted")
            .and_then(MetadataValue::as_bool)
            .unwrap_or(false)
    }

    /// `metadata["git_commit"]`, if recorded.
    #[must_use]
    pub fn git_commit(&self) -> Option<&str> {
        self.metadata.get("git_commit").and_then(MetadataValue::as_str)
    }

    /// `metadata["revert_commit"]`, if recorded.
    #[must_use]
    pub fn revert_commit(&self) -> Option<&str> {
        self.metadata.get("revert_commit").and_then(MetadataValue::as_str)
    }

    /// Set `metadata["reverted"]` and record `metadata["revert_commit"]`.
    /// Per the invariant that `reverted` and `redo_commit` cannot both be
    /// true, this clears any prior `redo_commit`.
    pub fn record_revert(&mut self, revert_hash: String, now: i64) {
        self.metadata.insert("reverted".to_owned(), MetadataValue::Bool(true));
        self.metadata
            .insert("revert_commit".to_owned(), MetadataValue::Text(revert_hash));
        self.metadata.remove("redo_commit");
        self.updated_at = now;
    }

    /// Set `metadata["redo_commit"]` and clear `reverted`, per `undo(redo(T))`.
    pub fn record_redo(&mut self, redo_hash: String, now: i64) {
        self.metadata.insert("reverted".to_owned(), MetadataValue::Bool(false));
        self.metadata
            .insert("redo_commit".to_owned(), MetadataValue::Text(redo_hash));
        self.updated_at = now;
    }

    /// Record `git_commit`. Once recorded it is never overwritten: a
    /// second call is a no-op rather than a panic, degrading silently
    /// instead of raising on an internal invariant violation.
    pub fn record_git_commit(&mut self, hash: String, now: i64) {
        if self.metadata.contains_key("git_commit") {
            return;
        }
        self.metadata.insert("git_commit".to_owned(), MetadataValue::Text(hash));
        self.updated_at = now;
    }

    /// Mark this thread as viewed at `now`.
    pub fn mark_viewed(&mut self, now: i64) {
        self.last_viewed_at = now;
    }

    /// Whether any message postdates the last viewed time.
    #[must_use]
    pub fn has_unread_updates(&self) -> bool {
        self.messages.iter().any(|m| m.timestamp > self.last_viewed_at)
    }

    /// Serialize to a self-describing JSON value for external persistence.
    /// The core does not write this to disk; that is a host collaborator's
    /// responsibility.
    ///
    /// # Panics
    /// Never panics for well-formed `Thread` values: all fields derive
    /// `Serialize`.
    #[must_use]
    pub fn to_serializable(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Deserialize a thread previously produced by [`Self::to_serializable`].
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if `value` is not a well-formed thread.
    pub fn from_serializable(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_is_pending() {
        let t = Thread::new("hi".to_owned(), "fix this".to_owned(), (1, 1), 100);
        assert_eq!(t.status, ThreadStatus::Pending);
        assert!(!t.is_reverted());
        assert!(!t.is_system_thread());
    }

    #[test]
    fn system_thread_flag_set() {
        let t = Thread::new_system("conflict!".to_owned(), 100);
        assert!(t.is_system_thread());
    }

    #[test]
    fn append_message_bumps_updated_at() {
        let mut t = Thread::new(String::new(), String::new(), (0, 0), 100);
        t.append_message(Role::User, "hello".to_owned(), false, 200);
        assert_eq!(t.updated_at, 200);
        assert_eq!(t.messages.len(), 1);
    }

    #[test]
    fn git_commit_cannot_be_overwritten() {
        let mut t = Thread::new(String::new(), String::new(), (0, 0), 100);
        t.record_git_commit("abc123".to_owned(), 100);
        t.record_git_commit("def456".to_owned(), 101);
        assert_eq!(t.git_commit(), Some("abc123"));
        assert_eq!(t.updated_at, 100);
    }

    #[test]
    fn serializable_round_trip() {
        let mut t = Thread::new("sel".to_owned(), "req".to_owned(), (1, 5), 100);
        t.append_message(Role::Assistant, "done".to_owned(), false, 150);
        let value = t.to_serializable();
        let restored = Thread::from_serializable(value).unwrap();
        assert_eq!(restored.id, t.id);
        assert_eq!(restored.messages.len(), 1);
    }

    #[test]
    fn unread_updates_detected() {
        let mut t = Thread::new(String::new(), String::new(), (0, 0), 100);
        t.mark_viewed(100);
        t.append_message(Role::Assistant, "hi".to_owned(), false, 200);
        assert!(t.has_unread_updates());
        t.mark_viewed(200);
        assert!(!t.has_unread_updates());
    }
}
