//! Agent backed by an OpenAI-compatible chat-completions endpoint.
//!
//! Works with OpenAI itself and the many providers that mirror its API
//! (OpenRouter, DeepSeek, local proxies). The model is asked for a JSON
//! object which is parsed into an [`AgentReply`].

use async_trait::async_trait;
use dpscope::agent::{Agent, AgentReply, AgentRequest};
use dpscope::config::AgentConfig;
use dpscope::error::{AgentError, AgentResult};
use dpscope::util::truncate_str;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Longest error body kept in [`AgentError::Status`].
const MAX_ERROR_BODY: usize = 500;

/// OpenAI-compatible chat agent.
#[derive(Clone)]
pub struct OpenAiCompatibleAgent {
    http_client: reqwest::Client,
    api_key: Arc<str>,
    base_url: Arc<str>,
    model: String,
    system_prompt: String,
    temperature: f32,
}

impl std::fmt::Debug for OpenAiCompatibleAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleAgent")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleAgent {
    /// Build an agent from configuration, reading the key from the
    /// configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingCredential`] if the variable is unset or
    /// empty, or [`AgentError::Request`] if the HTTP client cannot be built.
    pub fn from_config(config: &AgentConfig) -> AgentResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AgentError::MissingCredential(config.api_key_env.clone()))?;
        Self::with_api_key(config, api_key)
    }

    /// Build an agent with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Request`] if the HTTP client cannot be built.
    pub fn with_api_key(config: &AgentConfig, api_key: impl Into<String>) -> AgentResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::request(e.to_string()))?;

        let api_key: String = api_key.into();
        Ok(Self {
            http_client,
            api_key: Arc::from(api_key),
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
        })
    }

    /// Model name sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Chat messages for one request: system context, prior turns, latest.
    fn build_messages(&self, request: &AgentRequest<'_>) -> Vec<Value> {
        let fields = serde_json::to_string(request.fields).unwrap_or_else(|_| "{}".to_string());
        let missing = if request.missing.is_empty() {
            "none".to_string()
        } else {
            request.missing.join(", ")
        };
        let system = format!(
            "{}\n\nCurrent fields: {fields}\nMissing required fields: {missing}",
            self.system_prompt
        );

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(json!({"role": "system", "content": system}));
        messages.extend(
            request
                .history
                .iter()
                .map(|msg| json!({"role": msg.role.as_str(), "content": msg.content})),
        );
        messages.push(json!({"role": "user", "content": request.latest}));
        messages
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Parse the model's JSON content, tolerating a Markdown code fence.
///
/// # Errors
///
/// Returns [`AgentError::MalformedReply`] if the content is not a reply object.
pub fn parse_reply(content: &str) -> AgentResult<AgentReply> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).map_err(|e| AgentError::malformed(e.to_string()))
}

#[async_trait]
impl Agent for OpenAiCompatibleAgent {
    async fn invoke(&self, request: AgentRequest<'_>) -> AgentResult<AgentReply> {
        let body = json!({
            "model": self.model,
            "messages": self.build_messages(&request),
            "temperature": self.temperature,
            "response_format": {"type": "json_object"},
        });

        debug!(model = %self.model, history = request.history.len(), "sending completion request");
        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&*self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: truncate_str(&text, MAX_ERROR_BODY),
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::malformed(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AgentError::malformed("response has no message content"))?;

        parse_reply(&content)
    }
}
