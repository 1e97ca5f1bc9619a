//! Configuration file handling.
//!
//! The configuration lives in `~/.dpscope/config.json`. Every field has a
//! default, so a partial (or missing) file is valid.

use crate::error::{ConfigError, ConfigResult};
use crate::session::{DEFAULT_REQUIRED_FIELDS, SessionConfig};
use crate::util;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model name.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default credential variable.
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Default instruction sent ahead of the conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You help users scope a data product. \
Ask for one missing field at a time. Respond with a JSON object containing \
\"reply\" (text for the user), \"extracted_data\" (object of fields you learned \
from the latest message), \"missing_fields\" (array of field names still needed), \
\"next_action\" and \"confidence\" (0 to 1).";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Session directory; `~/.dpscope/sessions` when unset.
    pub sessions_dir: Option<PathBuf>,
    /// Fields that must be filled for a session to be complete.
    pub required_fields: Vec<String>,
    /// Reply sent when a session becomes complete.
    pub completion_message: Option<String>,
    /// Agent endpoint settings.
    pub agent: AgentConfig,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            sessions_dir: None,
            required_fields: DEFAULT_REQUIRED_FIELDS
                .iter()
                .map(ToString::to_string)
                .collect(),
            completion_message: Some("Scope captured.".to_string()),
            agent: AgentConfig::default(),
        }
    }
}

impl ScopeConfig {
    /// Effective session directory.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions_dir.clone().unwrap_or_else(util::sessions_dir)
    }

    /// Session store configuration derived from this file.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.sessions_dir()).required_fields(self.required_fields.iter().cloned())
    }

    /// Use a different model, re-checking the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the resulting configuration is
    /// not valid, for example when `model` is blank.
    pub fn with_model(mut self, model: impl Into<String>) -> ConfigResult<Self> {
        self.agent.model = model.into();
        self.validate()?;
        Ok(self)
    }

    /// Check values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for name in &self.required_fields {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("required_fields contains an empty name"));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "required field {name:?} listed twice"
                )));
            }
        }
        self.agent.validate()
    }
}

/// Settings for the OpenAI-compatible agent endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// API base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Model name passed through verbatim.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// System instruction.
    pub system_prompt: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout_secs: 120,
            temperature: 0.1,
        }
    }
}

impl AgentConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(format!(
                "agent.base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("agent.model is empty"));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(ConfigError::invalid("agent.api_key_env is empty"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid("agent.timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// `~/.dpscope/config.json`
#[must_use]
pub fn config_path() -> PathBuf {
    util::config_dir().join("config.json")
}

/// Load the configuration from the default path.
///
/// # Errors
///
/// See [`load_config_from`].
pub async fn load_config() -> ConfigResult<ScopeConfig> {
    load_config_from(&config_path()).await
}

/// Load and validate a configuration file; a missing file yields defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
pub async fn load_config_from(path: &Path) -> ConfigResult<ScopeConfig> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(ScopeConfig::default());
        }
        Err(e) => return Err(e.into()),
    };

    let config: ScopeConfig = serde_json::from_str(&content)?;
    config.validate()?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Write a configuration file, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError`] if serialization or the write fails.
pub async fn save_config(config: &ScopeConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Write a default configuration file unless one exists.
///
/// Returns `false` when a file was already present and `force` is unset.
///
/// # Errors
///
/// Returns [`ConfigError`] if the write fails.
pub async fn init_config(path: &Path, force: bool) -> ConfigResult<bool> {
    if !force && tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    save_config(&ScopeConfig::default(), path).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ScopeConfig::default();
        assert_eq!(config.required_fields.len(), 5);
        assert_eq!(config.agent.model, DEFAULT_MODEL);
        assert!(config.validate().is_ok());
        assert!(config.sessions_dir().ends_with("sessions"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: ScopeConfig =
            serde_json::from_str(r#"{"agent": {"model": "deepseek-chat"}}"#).unwrap();
        assert_eq!(config.agent.model, "deepseek-chat");
        assert_eq!(config.agent.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.required_fields[0], "name");
    }

    #[test]
    fn test_model_override_is_validated() {
        let config = ScopeConfig::default().with_model("deepseek-chat").unwrap();
        assert_eq!(config.agent.model, "deepseek-chat");

        let err = ScopeConfig::default().with_model("  ").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_urls() {
        let mut config = ScopeConfig::default();
        config.required_fields.push("name".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ScopeConfig::default();
        config.agent.base_url = "ftp://example".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_config_follows_file() {
        let config = ScopeConfig {
            sessions_dir: Some(PathBuf::from("/tmp/scoping")),
            required_fields: vec!["name".into()],
            ..ScopeConfig::default()
        };
        let session = config.session_config();
        assert_eq!(session.dir, PathBuf::from("/tmp/scoping"));
        assert_eq!(session.required_fields, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn test_save_load_and_init() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.json");

        assert_eq!(load_config_from(&path).await.unwrap(), ScopeConfig::default());

        assert!(init_config(&path, false).await.unwrap());
        assert!(!init_config(&path, false).await.unwrap());

        let mut config = ScopeConfig::default();
        config.completion_message = None;
        save_config(&config, &path).await.unwrap();
        assert_eq!(load_config_from(&path).await.unwrap(), config);

        assert!(init_config(&path, true).await.unwrap());
        assert_eq!(load_config_from(&path).await.unwrap(), ScopeConfig::default());
    }

    #[tokio::test]
    async fn test_load_reports_parse_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            load_config_from(&path).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
