//! dpscope - durable conversation state for data product scoping agents.
//!
//! A scoping conversation gathers a handful of structured fields (name,
//! domain, owner, purpose, upstreams) from free-form chat with an LLM agent.
//! This crate owns the state of those conversations and keeps it on disk.
//!
//! # Architecture
//!
//! - **Session** ([`session`]) - session model, JSON file store, per-session locks
//! - **Agent** ([`agent`]) - the seam to the external language model
//! - **Conversation** ([`conversation`]) - one turn: append, invoke, merge, persist
//! - **Config** ([`config`]) - `~/.dpscope/config.json`
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dpscope::prelude::*;
//!
//! let store = SessionStore::new(SessionConfig::new("sessions"));
//! let conversation = Conversation::new(store, my_agent);
//! let (session, outcome, _) = conversation.handle(None, "I want customer analytics").await?;
//! println!("{} -> {}", session.id(), outcome.reply);
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod session;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{
        AgentError, AgentResult, ConfigError, ConfigResult, DisplayError, Result, ScopeError,
        StorageError, StorageResult,
    };

    pub use crate::agent::{Agent, AgentReply, AgentRequest};

    pub use crate::config::{
        AgentConfig, ScopeConfig, config_path, init_config, load_config, load_config_from,
        save_config,
    };

    pub use crate::conversation::{Conversation, TurnOutcome};

    pub use crate::session::{
        Fields, Message, Resumed, Role, Session, SessionConfig, SessionGuard, SessionLocks,
        SessionOrigin, SessionStatus, SessionStore, SessionSummary, StatusChange,
        parse_session_id,
    };

    pub use crate::util::{timestamp_ms, truncate_str};
}
