//! The agent seam.
//!
//! The language model that reads the conversation and extracts fields lives
//! outside this crate. It is reached through the [`Agent`] trait, which
//! receives the transcript and current state and returns a reply plus the
//! fields it extracted.

use crate::error::AgentResult;
use crate::session::{Fields, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything an agent sees for one turn.
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    /// Transcript preceding the latest message.
    pub history: &'a [Message],
    /// The message being answered.
    pub latest: &'a str,
    /// Fields extracted so far.
    pub fields: &'a Fields,
    /// Required fields that are still missing or empty.
    pub missing: &'a [String],
}

/// Structured agent output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    /// Text shown to the user.
    #[serde(default, alias = "clean_reply_message")]
    pub reply: String,
    /// Fields to merge into the session.
    #[serde(default, alias = "extracted_fields")]
    pub extracted_data: Fields,
    /// Fields the agent believes are still missing.
    #[serde(default)]
    pub missing_fields: Vec<String>,
    /// Suggested next step, e.g. `"ask_owner"` or `"complete"`.
    #[serde(default)]
    pub next_action: Option<String>,
    /// Self-reported confidence in `0.0..=1.0`.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl AgentReply {
    /// A reply with no extracted data.
    #[must_use]
    pub fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            ..Self::default()
        }
    }

    /// Add an extracted field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.extracted_data.insert(name.into(), value);
        self
    }
}

/// An external agent that answers one conversational turn.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce a reply and extracted fields for the latest message.
    async fn invoke(&self, request: AgentRequest<'_>) -> AgentResult<AgentReply>;
}

#[async_trait]
impl<A: Agent + ?Sized> Agent for std::sync::Arc<A> {
    async fn invoke(&self, request: AgentRequest<'_>) -> AgentResult<AgentReply> {
        (**self).invoke(request).await
    }
}
