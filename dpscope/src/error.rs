//! Unified error types for dpscope.
//!
//! Each concern (session storage, agent invocation, configuration) has its
//! own error enum. All of them convert into [`ScopeError`], which is what the
//! turn runner and the CLI deal in.

use std::fmt;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for dpscope operations.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// Session storage error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Agent invocation error.
    #[error("agent: {0}")]
    Agent(#[from] AgentError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// IO error outside of session storage (terminal, stdin).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ScopeError {
    /// Create a config error from a string.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }
}

/// Result type alias for dpscope operations.
pub type Result<T> = std::result::Result<T, ScopeError>;

// ============================================================================
// Storage Errors
// ============================================================================

/// Error type for session storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No session file exists for the id.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The session file exists but does not hold a valid session.
    #[error("session {id} is corrupted: {reason}")]
    Corrupted {
        /// Session id whose file failed to parse.
        id: String,
        /// Parser or validation message.
        reason: String,
    },

    /// The supplied text is not a session id.
    #[error("invalid session id: {0:?}")]
    InvalidId(String),

    /// Write, rename or directory access failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing a session failed.
    #[error("json: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    /// Create a not found error.
    #[inline]
    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }

    /// Create a corruption error.
    #[inline]
    pub fn corrupted(id: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a caller should fall back to a fresh session instead of
    /// failing the conversation.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Corrupted { .. } | Self::InvalidId(_)
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Agent Errors
// ============================================================================

/// Error type for agent invocation.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The credential environment variable is not set.
    #[error("missing credential: set {0}")]
    MissingCredential(String),

    /// The request could not be sent or the body not read.
    #[error("request: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The reply did not match the expected structure.
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

impl AgentError {
    /// Create a request error.
    #[inline]
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    /// Create a malformed reply error.
    #[inline]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedReply(msg.into())
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Display Helpers
// ============================================================================

/// A wrapper that displays errors in a user-friendly format.
#[derive(Debug)]
pub struct DisplayError<'a>(pub &'a ScopeError);

impl fmt::Display for DisplayError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ScopeError::Storage(StorageError::Io(e)) => {
                write!(f, "Could not save the session ({e}). Your message is kept; try again.")
            }
            ScopeError::Storage(e) => write!(f, "Session error: {e}"),
            ScopeError::Agent(e) => write!(f, "Agent error: {e}"),
            ScopeError::Config(e) => write!(f, "Configuration error: {e}"),
            ScopeError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
