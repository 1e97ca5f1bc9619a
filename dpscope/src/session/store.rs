//! File-backed session store.
//!
//! Each session lives in `{dir}/conversation_state_{session_id}.json`.
//! Writes go to a hidden sibling temp file which is fsynced and then renamed
//! over the target, so a crash mid-write leaves the previous file intact.

use super::model::{Fields, Role, Session, SessionStatus, StatusChange};
use crate::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const FILE_PREFIX: &str = "conversation_state_";
const FILE_SUFFIX: &str = ".json";

/// Session store configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding one JSON file per session.
    pub dir: PathBuf,
    /// Field names that must be non-empty for a session to be complete.
    pub required_fields: Vec<String>,
}

impl SessionConfig {
    /// Configuration with the default scoping fields.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            required_fields: super::DEFAULT_REQUIRED_FIELDS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Replace the required field set.
    #[must_use]
    pub fn required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// How [`SessionStore::resume_or_create`] obtained its session.
#[derive(Debug)]
pub enum SessionOrigin {
    /// The requested session was loaded from disk.
    Resumed,
    /// No id was supplied; a new session was created.
    Created,
    /// The requested session could not be used and a fresh one replaced it.
    Replaced {
        /// The id the caller asked for.
        requested: String,
        /// Why it could not be loaded.
        reason: StorageError,
    },
}

/// A session together with how it was obtained.
#[derive(Debug)]
pub struct Resumed {
    /// The session to continue with.
    pub session: Session,
    /// Where it came from.
    pub origin: SessionOrigin,
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session id.
    pub id: Uuid,
    /// Creation time (Unix milliseconds).
    pub created_at: u64,
    /// Last mutation time (Unix milliseconds).
    pub updated_at: u64,
    /// Number of transcript messages.
    pub message_count: usize,
    /// Completion status.
    pub status: SessionStatus,
}

/// Parse a textual session id.
///
/// # Errors
///
/// Returns [`StorageError::InvalidId`] when `text` is not a UUID.
pub fn parse_session_id(text: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(text.trim()).map_err(|_| StorageError::InvalidId(text.to_string()))
}

/// Durable JSON store for conversation sessions.
///
/// Cheap to clone; clones share configuration.
#[derive(Debug, Clone)]
pub struct SessionStore {
    config: Arc<SessionConfig>,
}

impl SessionStore {
    /// Create a store over the given configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Required field names.
    #[must_use]
    pub fn required_fields(&self) -> &[String] {
        &self.config.required_fields
    }

    /// File path for a session id.
    #[must_use]
    pub fn session_path(&self, id: Uuid) -> PathBuf {
        self.config.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}"))
    }

    fn temp_path(&self, id: Uuid) -> PathBuf {
        self.config
            .dir
            .join(format!(".{FILE_PREFIX}{id}{FILE_SUFFIX}.tmp"))
    }

    /// Create and persist a new, empty session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory is not writable.
    pub async fn create(&self) -> StorageResult<Session> {
        let session = Session::new(&self.config.required_fields);
        self.save(&session).await?;
        info!(session_id = %session.id(), "created session");
        Ok(session)
    }

    /// Load a session from disk.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if there is no file for `id`.
    /// - [`StorageError::Corrupted`] if the file does not hold a session for `id`.
    /// - [`StorageError::Io`] if the file cannot be read.
    pub async fn load(&self, id: Uuid) -> StorageResult<Session> {
        let path = self.session_path(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(id));
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(StorageError::corrupted(id, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut session: Session = serde_json::from_str(&content)
            .map_err(|e| StorageError::corrupted(id, e.to_string()))?;

        if session.id() != id {
            return Err(StorageError::corrupted(
                id,
                format!("file holds session {}", session.id()),
            ));
        }

        session.refresh_status(&self.config.required_fields);
        debug!(session_id = %id, messages = session.messages().len(), "loaded session");
        Ok(session)
    }

    /// Load a session by its textual id.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load), plus [`StorageError::InvalidId`].
    pub async fn load_str(&self, id: &str) -> StorageResult<Session> {
        self.load(parse_session_id(id)?).await
    }

    /// Load the requested session, or start a fresh one when that is not
    /// possible.
    ///
    /// Missing, corrupted and malformed ids all fall back to a new session;
    /// the reason is reported in [`SessionOrigin::Replaced`].
    ///
    /// # Errors
    ///
    /// Only I/O failures propagate.
    pub async fn resume_or_create(&self, id: Option<&str>) -> StorageResult<Resumed> {
        let Some(requested) = id else {
            return Ok(Resumed {
                session: self.create().await?,
                origin: SessionOrigin::Created,
            });
        };

        match self.load_str(requested).await {
            Ok(session) => Ok(Resumed {
                session,
                origin: SessionOrigin::Resumed,
            }),
            Err(reason) if reason.is_recoverable() => {
                warn!(requested = %requested, error = %reason, "starting fresh session");
                Ok(Resumed {
                    session: self.create().await?,
                    origin: SessionOrigin::Replaced {
                        requested: requested.to_string(),
                        reason,
                    },
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Append a message and persist.
    ///
    /// The message stays in `session` even if persisting fails, so the
    /// caller can retry with [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the write fails.
    pub async fn append_message(
        &self,
        session: &mut Session,
        role: Role,
        content: impl Into<String>,
    ) -> StorageResult<()> {
        session.push_message(role, content);
        self.save(session).await
    }

    /// Merge a partial field update and persist.
    ///
    /// Keys present in `partial` overwrite existing values; all other keys
    /// are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the write fails.
    pub async fn merge_fields(
        &self,
        session: &mut Session,
        partial: Fields,
    ) -> StorageResult<StatusChange> {
        let keys: Vec<String> = partial.keys().cloned().collect();
        let change = session.apply_fields(partial, &self.config.required_fields);
        self.save(session).await?;

        debug!(session_id = %session.id(), ?keys, status = %change.after, "merged fields");
        if change.became_complete() {
            info!(session_id = %session.id(), "session complete");
        }
        Ok(change)
    }

    /// Write the session to its file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory, temp file or rename
    /// fails.
    pub async fn save(&self, session: &Session) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.config.dir).await?;

        let mut content = serde_json::to_string_pretty(session)?;
        content.push('\n');

        let tmp_path = self.temp_path(session.id());
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, self.session_path(session.id())).await?;
        debug!(session_id = %session.id(), "saved session");
        Ok(())
    }

    /// Delete a session file.
    ///
    /// Returns `false` when there was nothing to delete.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if removal fails for another reason.
    pub async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        match tokio::fs::remove_file(self.temp_path(id)).await {
            Ok(()) => debug!(session_id = %id, "removed leftover temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        match tokio::fs::remove_file(self.session_path(id)).await {
            Ok(()) => {
                info!(session_id = %id, "deleted session");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Discard a session and start over under a new id.
    ///
    /// The old file is removed if present; the returned session has a
    /// freshly generated id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the old file cannot be removed or
    /// the new one cannot be written.
    pub async fn reset(&self, id: Uuid) -> StorageResult<Session> {
        if !self.delete(id).await? {
            debug!(session_id = %id, "reset of absent session");
        }
        let session = self.create().await?;
        info!(old = %id, new = %session.id(), "session reset");
        Ok(session)
    }

    /// Summaries of all readable sessions, most recently updated first.
    ///
    /// Unreadable or corrupted files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be read.
    pub async fn list(&self) -> StorageResult<Vec<SessionSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.config.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(FILE_PREFIX))
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
                .and_then(|id| Uuid::parse_str(id).ok())
            else {
                continue;
            };

            match self.load(id).await {
                Ok(session) => summaries.push(SessionSummary {
                    id,
                    created_at: session.created_at(),
                    updated_at: session.updated_at(),
                    message_count: session.messages().len(),
                    status: session.status(),
                }),
                Err(e) => warn!(session_id = %id, error = %e, "skipping unreadable session"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(SessionConfig::new(temp.path().join("sessions")));
        (temp, store)
    }

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_writes_file() {
        let (_temp, store) = store();
        let session = store.create().await.unwrap();

        let path = store.session_path(session.id());
        assert!(path.exists());
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("conversation_state_")
        );
        assert_eq!(session.status(), SessionStatus::Incomplete);
    }

    #[tokio::test]
    async fn test_create_issues_unique_ids() {
        let (_temp, store) = store();
        let a = store.create().await.unwrap();
        let b = store.create().await.unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_create_fails_when_dir_unwritable() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = SessionStore::new(SessionConfig::new(blocker.join("sessions")));
        let err = store.create().await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_temp, store) = store();
        let created = store.create().await.unwrap();
        let loaded = store.load(created.id()).await.unwrap();
        assert_eq!(created, loaded);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let (_temp, store) = store();
        let err = store.load(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_corrupted() {
        let (_temp, store) = store();
        let session = store.create().await.unwrap();
        std::fs::write(store.session_path(session.id()), "{ not json").unwrap();

        let err = store.load(session.id()).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_load_rejects_mismatched_id() {
        let (_temp, store) = store();
        let session = store.create().await.unwrap();
        let other = Uuid::new_v4();
        std::fs::copy(store.session_path(session.id()), store.session_path(other)).unwrap();

        let err = store.load(other).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_load_str_rejects_path_like_ids() {
        let (_temp, store) = store();
        let err = store.load_str("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidId(_)));
    }

    #[tokio::test]
    async fn test_append_preserves_order_and_count() {
        let (_temp, store) = store();
        let mut session = store.create().await.unwrap();

        let inputs = ["one", "two", "three", "four", "five"];
        for (i, text) in inputs.iter().enumerate() {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append_message(&mut session, role, *text).await.unwrap();
        }

        let loaded = store.load(session.id()).await.unwrap();
        assert_eq!(loaded.messages().len(), inputs.len());
        let contents: Vec<&str> = loaded.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, inputs);
        assert!(loaded.updated_at() >= loaded.created_at());
    }

    #[tokio::test]
    async fn test_merge_does_not_clobber() {
        let (_temp, store) = store();
        let mut session = store.create().await.unwrap();

        store
            .merge_fields(&mut session, fields(&[("name", json!("A")), ("domain", json!("d"))]))
            .await
            .unwrap();
        store
            .merge_fields(&mut session, fields(&[("owner", json!("team"))]))
            .await
            .unwrap();
        store
            .merge_fields(&mut session, fields(&[("name", json!("B"))]))
            .await
            .unwrap();

        let loaded = store.load(session.id()).await.unwrap();
        assert_eq!(loaded.field("name"), Some(&json!("B")));
        assert_eq!(loaded.field("domain"), Some(&json!("d")));
        assert_eq!(loaded.field("owner"), Some(&json!("team")));
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let (_temp, store) = store();
        let mut session = store.create().await.unwrap();
        store
            .append_message(&mut session, Role::User, "hello")
            .await
            .unwrap();
        let path = store.session_path(session.id());

        store.save(&session).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        store.save(&session).await.unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let (_temp, store) = store();
        let mut session = store.create().await.unwrap();

        let steps = [
            ("name", json!("CustomerAnalytics")),
            ("domain", json!("analytics")),
            ("owner", json!("DataTeam")),
            ("purpose", json!("Churn insight")),
        ];
        for (key, value) in steps {
            let change = store
                .merge_fields(&mut session, fields(&[(key, value)]))
                .await
                .unwrap();
            assert_eq!(change.after, SessionStatus::Incomplete);
        }

        let change = store
            .merge_fields(&mut session, fields(&[("upstreams", json!(["crm_db"]))]))
            .await
            .unwrap();
        assert!(change.became_complete());

        let change = store
            .merge_fields(&mut session, fields(&[("purpose", json!(""))]))
            .await
            .unwrap();
        assert!(change.became_incomplete());
        assert_eq!(
            store.load(session.id()).await.unwrap().status(),
            SessionStatus::Incomplete
        );
    }

    #[tokio::test]
    async fn test_customer_analytics_scenario() {
        let (_temp, store) = store();
        let mut session = store.create().await.unwrap();

        store
            .append_message(&mut session, Role::User, "I want customer analytics")
            .await
            .unwrap();
        store
            .merge_fields(
                &mut session,
                fields(&[("name", json!("CustomerAnalytics")), ("domain", json!("analytics"))]),
            )
            .await
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Incomplete);
        assert_eq!(
            session.missing_fields(store.required_fields()),
            vec!["owner", "purpose", "upstreams"]
        );

        store
            .merge_fields(
                &mut session,
                fields(&[
                    ("owner", json!("DataTeam")),
                    ("purpose", json!("Understand customer behaviour")),
                    ("upstreams", json!(["crm_db"])),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Complete);
        assert_eq!(store.load(session.id()).await.unwrap(), session);
    }

    #[tokio::test]
    async fn test_interrupted_write_keeps_previous_file() {
        let (_temp, store) = store();
        let mut session = store.create().await.unwrap();
        store
            .append_message(&mut session, Role::User, "persisted")
            .await
            .unwrap();
        let before = std::fs::read(store.session_path(session.id())).unwrap();

        // A crash between temp write and rename leaves a partial temp file.
        std::fs::write(store.temp_path(session.id()), "{\"session_id\": \"trunc").unwrap();

        let after = std::fs::read(store.session_path(session.id())).unwrap();
        assert_eq!(before, after);
        let loaded = store.load(session.id()).await.unwrap();
        assert_eq!(loaded.messages().len(), 1);

        store
            .append_message(&mut session, Role::Assistant, "recovered")
            .await
            .unwrap();
        assert!(!store.temp_path(session.id()).exists());
        assert_eq!(store.load(session.id()).await.unwrap().messages().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_in_memory_state() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("sessions");
        let store = SessionStore::new(SessionConfig::new(&dir));
        let mut session = store.create().await.unwrap();

        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, "blocks the directory").unwrap();

        let err = store
            .append_message(&mut session, Role::User, "typed before the failure")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert_eq!(session.messages().len(), 1);

        std::fs::remove_file(&dir).unwrap();
        store.save(&session).await.unwrap();
        assert_eq!(store.load(session.id()).await.unwrap().messages().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_or_create() {
        let (_temp, store) = store();

        let fresh = store.resume_or_create(None).await.unwrap();
        assert!(matches!(fresh.origin, SessionOrigin::Created));

        let id = fresh.session.id().to_string();
        let resumed = store.resume_or_create(Some(&id)).await.unwrap();
        assert!(matches!(resumed.origin, SessionOrigin::Resumed));
        assert_eq!(resumed.session.id(), fresh.session.id());

        let missing = Uuid::new_v4().to_string();
        let replaced = store.resume_or_create(Some(&missing)).await.unwrap();
        assert!(matches!(
            replaced.origin,
            SessionOrigin::Replaced {
                reason: StorageError::NotFound(_),
                ..
            }
        ));

        std::fs::write(store.session_path(fresh.session.id()), "garbage").unwrap();
        let replaced = store.resume_or_create(Some(&id)).await.unwrap();
        assert!(matches!(
            replaced.origin,
            SessionOrigin::Replaced {
                reason: StorageError::Corrupted { .. },
                ..
            }
        ));
        assert_ne!(replaced.session.id(), fresh.session.id());

        let replaced = store.resume_or_create(Some("not-a-uuid")).await.unwrap();
        assert!(matches!(
            replaced.origin,
            SessionOrigin::Replaced {
                reason: StorageError::InvalidId(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reset_reissues_id() {
        let (_temp, store) = store();
        let mut session = store.create().await.unwrap();
        store
            .append_message(&mut session, Role::User, "hello")
            .await
            .unwrap();

        let fresh = store.reset(session.id()).await.unwrap();
        assert_ne!(fresh.id(), session.id());
        assert!(fresh.messages().is_empty());
        assert!(!store.session_path(session.id()).exists());
        assert!(store.session_path(fresh.id()).exists());

        // Absent target is not an error.
        let again = store.reset(session.id()).await.unwrap();
        assert_ne!(again.id(), session.id());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_temp, store) = store();
        let session = store.create().await.unwrap();
        assert!(store.delete(session.id()).await.unwrap());
        assert!(!store.delete(session.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_clears_temp_file() {
        let (_temp, store) = store();
        let session = store.create().await.unwrap();
        std::fs::write(store.temp_path(session.id()), "partial").unwrap();

        assert!(store.delete(session.id()).await.unwrap());
        assert!(!store.temp_path(session.id()).exists());
    }

    #[tokio::test]
    async fn test_delete_reports_temp_removal_failure() {
        let (_temp, store) = store();
        let session = store.create().await.unwrap();
        // A directory in the temp file's place cannot be removed as a file.
        std::fs::create_dir(store.temp_path(session.id())).unwrap();

        let err = store.delete(session.id()).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(store.session_path(session.id()).exists());
    }

    #[tokio::test]
    async fn test_list_skips_foreign_and_broken_files() {
        let (_temp, store) = store();
        assert!(store.list().await.unwrap().is_empty());

        let mut first = store.create().await.unwrap();
        let broken = store.create().await.unwrap();
        std::fs::write(store.session_path(broken.id()), "[]").unwrap();
        std::fs::write(store.dir().join("notes.txt"), "ignore me").unwrap();
        std::fs::write(store.temp_path(first.id()), "partial").unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .append_message(&mut first, Role::User, "bump")
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
        assert_eq!(listed[0].message_count, 1);
    }

    #[tokio::test]
    async fn test_custom_required_fields() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::new(SessionConfig::new(temp.path()).required_fields(["name"]));
        let mut session = store.create().await.unwrap();

        let change = store
            .merge_fields(&mut session, fields(&[("name", json!("Solo"))]))
            .await
            .unwrap();
        assert!(change.became_complete());
    }
}
