//! Turn processing: the path from a user message to a persisted reply.

use crate::agent::{Agent, AgentRequest};
use crate::error::Result;
use crate::session::{
    Role, Session, SessionLocks, SessionOrigin, SessionStatus, SessionStore,
};
use tracing::{debug, info, warn};

/// Result of one conversational turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Reply appended to the transcript.
    pub reply: String,
    /// Session status after the turn.
    pub status: SessionStatus,
    /// The turn filled the last required field.
    pub completed: bool,
    /// Required fields still missing.
    pub missing_fields: Vec<String>,
    /// Next step suggested by the agent.
    pub next_action: Option<String>,
}

/// Drives turns against a session store with an agent.
///
/// Holds no "current session": every call names the session it works on,
/// so one `Conversation` can serve many clients at once.
#[derive(Debug)]
pub struct Conversation<A> {
    store: SessionStore,
    locks: SessionLocks,
    agent: A,
    completion_message: Option<String>,
}

impl<A: Agent> Conversation<A> {
    /// Create a conversation driver.
    pub fn new(store: SessionStore, agent: A) -> Self {
        Self {
            store,
            locks: SessionLocks::new(),
            agent,
            completion_message: None,
        }
    }

    /// Reply to send instead of the agent's when a session becomes complete.
    #[must_use]
    pub fn completion_message(mut self, message: impl Into<String>) -> Self {
        self.completion_message = Some(message.into());
        self
    }

    /// Share a lock registry with other drivers over the same store.
    #[must_use]
    pub fn with_locks(mut self, locks: SessionLocks) -> Self {
        self.locks = locks;
        self
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The lock registry.
    #[must_use]
    pub const fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Run one turn on a session held by the caller.
    ///
    /// Under the session lock, `session` is first brought up to date with
    /// its file, so turns persisted through another handle are kept. The
    /// user message is persisted before the agent is called, so a failing
    /// agent does not lose what the user typed.
    ///
    /// # Errors
    ///
    /// Storage failures and agent failures are returned as-is; `session`
    /// keeps every change made before the failure.
    pub async fn run_turn(&self, session: &mut Session, message: &str) -> Result<TurnOutcome> {
        let _guard = self.locks.acquire(session.id()).await;
        self.refresh(session).await?;
        self.turn_locked(session, message).await
    }

    /// Resume (or start) a session by id and run one turn on it.
    ///
    /// This is the entry point for request handlers that only carry a
    /// session id between calls.
    ///
    /// # Errors
    ///
    /// As [`run_turn`](Self::run_turn); unusable ids fall back to a fresh
    /// session reported through the returned [`SessionOrigin`].
    pub async fn handle(
        &self,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<(Session, TurnOutcome, SessionOrigin)> {
        let parsed = session_id.and_then(|id| crate::session::parse_session_id(id).ok());
        let _guard = match parsed {
            Some(id) => Some(self.locks.acquire(id).await),
            None => None,
        };

        let resumed = self.store.resume_or_create(session_id).await?;
        let mut session = resumed.session;
        let outcome = self.turn_locked(&mut session, message).await?;
        Ok((session, outcome, resumed.origin))
    }

    /// Reset a session under its lock, returning the replacement.
    ///
    /// # Errors
    ///
    /// Returns storage errors from deleting or creating.
    pub async fn reset(&self, session: &Session) -> Result<Session> {
        let _guard = self.locks.acquire(session.id()).await;
        Ok(self.store.reset(session.id()).await?)
    }

    /// Replace a caller-held session with its stored copy when the file is
    /// at least as recent. A newer in-memory copy holds unsaved changes and
    /// is kept; a missing or unreadable file is rewritten by the next save.
    async fn refresh(&self, session: &mut Session) -> Result<()> {
        match self.store.load(session.id()).await {
            Ok(stored) if stored.updated_at() >= session.updated_at() => {
                if stored != *session {
                    debug!(
                        session_id = %session.id(),
                        stored = stored.messages().len(),
                        held = session.messages().len(),
                        "adopting newer stored session"
                    );
                }
                *session = stored;
            }
            Ok(_) => debug!(session_id = %session.id(), "keeping unsaved changes"),
            Err(e) if e.is_recoverable() => {
                warn!(session_id = %session.id(), error = %e, "stored session unusable; keeping held copy");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn turn_locked(&self, session: &mut Session, message: &str) -> Result<TurnOutcome> {
        let required = self.store.required_fields();

        self.store
            .append_message(session, Role::User, message)
            .await?;

        let missing = session.missing_fields(required);
        let history = &session.messages()[..session.messages().len() - 1];
        let request = AgentRequest {
            history,
            latest: message,
            fields: session.fields(),
            missing: &missing,
        };

        debug!(session_id = %session.id(), history = history.len(), "invoking agent");
        let reply = match self.agent.invoke(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "agent failed; state preserved");
                return Err(e.into());
            }
        };

        let change = self
            .store
            .merge_fields(session, reply.extracted_data)
            .await?;

        let completed = change.became_complete();
        let mut next_action = reply.next_action;
        let text = match (&self.completion_message, completed) {
            (Some(done), true) => {
                next_action = Some("complete".to_string());
                done.clone()
            }
            _ => reply.reply,
        };

        self.store
            .append_message(session, Role::Assistant, text.as_str())
            .await?;

        if completed {
            info!(session_id = %session.id(), "scope captured");
        }

        Ok(TurnOutcome {
            reply: text,
            status: session.status(),
            completed,
            missing_fields: session.missing_fields(required),
            next_action,
        })
    }
}
