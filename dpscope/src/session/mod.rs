//! Session management for conversation state.
//!
//! A [`Session`] is a plain value: identity, transcript and extracted
//! fields. The [`SessionStore`] owns its durable JSON representation and is
//! the only way to mutate it, so the file on disk matches memory after every
//! successful operation. [`SessionLocks`] serializes turns per session.

mod lock;
mod model;
mod store;

pub use lock::{SessionGuard, SessionLocks};
pub use model::{
    DEFAULT_REQUIRED_FIELDS, Fields, Message, Role, Session, SessionStatus, StatusChange,
    is_empty_value,
};
pub use store::{
    Resumed, SessionConfig, SessionOrigin, SessionStore, SessionSummary, parse_session_id,
};
