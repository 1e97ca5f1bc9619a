//! Session state: identity, transcript and extracted fields.

use crate::util::timestamp_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Extracted structured fields, keyed by field name.
///
/// Ordered so that serialization is deterministic.
pub type Fields = BTreeMap<String, Value>;

/// Field names a scoping session must fill before it is complete.
pub const DEFAULT_REQUIRED_FIELDS: [&str; 5] = ["name", "domain", "owner", "purpose", "upstreams"];

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The agent.
    Assistant,
    /// Out-of-band notices (for example a session restart).
    System,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the message.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Timestamp (Unix milliseconds).
    pub timestamp: u64,
}

impl Message {
    /// Create a new message stamped with the current time.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: timestamp_ms(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Whether every required field has been captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// At least one required field is missing or empty.
    #[default]
    Incomplete,
    /// All required fields hold non-empty values.
    Complete,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => f.write_str("incomplete"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

/// Status before and after a field merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// Status before the merge.
    pub before: SessionStatus,
    /// Status after the merge.
    pub after: SessionStatus,
}

impl StatusChange {
    /// The merge filled the last missing required field.
    #[must_use]
    pub fn became_complete(self) -> bool {
        self.before == SessionStatus::Incomplete && self.after == SessionStatus::Complete
    }

    /// The merge emptied a required field of a complete session.
    #[must_use]
    pub fn became_incomplete(self) -> bool {
        self.before == SessionStatus::Complete && self.after == SessionStatus::Incomplete
    }
}

/// `null`, blank strings, empty arrays and empty objects count as empty.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// One conversation session and its derived structured state.
///
/// Sessions are plain values handed to [`SessionStore`](super::SessionStore)
/// operations; mutation goes through the store so every change is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    session_id: Uuid,
    created_at: u64,
    updated_at: u64,
    messages: Vec<Message>,
    #[serde(default)]
    fields: Fields,
    #[serde(default)]
    status: SessionStatus,
}

impl Session {
    /// Create an empty session with a fresh id.
    pub(crate) fn new(required: &[String]) -> Self {
        let now = timestamp_ms();
        let mut session = Self {
            session_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            fields: Fields::new(),
            status: SessionStatus::Incomplete,
        };
        session.refresh_status(required);
        session
    }

    /// The immutable session id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.session_id
    }

    /// Creation time (Unix milliseconds).
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Time of the last mutation (Unix milliseconds).
    #[must_use]
    pub const fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// The transcript in chronological order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Extracted fields.
    #[must_use]
    pub const fn fields(&self) -> &Fields {
        &self.fields
    }

    /// A single extracted field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Derived completion status.
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// Whether all required fields are filled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Complete
    }

    /// Required fields that are absent or empty, in `required` order.
    #[must_use]
    pub fn missing_fields(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.fields.get(*name).is_none_or(is_empty_value))
            .cloned()
            .collect()
    }

    /// Transcript formatted for chat-completion style APIs.
    #[must_use]
    pub fn chat_history(&self) -> Vec<Value> {
        self.messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role.as_str(),
                    "content": msg.content
                })
            })
            .collect()
    }

    pub(crate) fn push_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
        self.touch();
    }

    /// Overwrite every key in `partial`, leaving other keys alone.
    pub(crate) fn apply_fields(&mut self, partial: Fields, required: &[String]) -> StatusChange {
        let before = self.status;
        self.fields.extend(partial);
        self.refresh_status(required);
        self.touch();
        StatusChange {
            before,
            after: self.status,
        }
    }

    pub(crate) fn refresh_status(&mut self, required: &[String]) {
        self.status = if self.missing_fields(required).is_empty() {
            SessionStatus::Complete
        } else {
            SessionStatus::Incomplete
        };
    }

    fn touch(&mut self) {
        self.updated_at = timestamp_ms().max(self.updated_at);
    }
}
