//! JSON-mode LLM caller.
//!
//! One small capability: `call_json({system, user, deadline, temperature})`
//! returns parsed JSON or `None`. Timeouts, HTTP failures, and unparseable
//! output all collapse to `None`; every pipeline has a documented fallback
//! for that case. Provider selection is a tagged value resolved from
//! `ai_mode` (auto prefers primary, then secondary, then none).

use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{AiConfig, AiMode, LlmEndpointConfig};

/// A single structured-JSON request.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub deadline: Duration,
}

struct Endpoint {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

enum Provider {
    Primary(Endpoint),
    Secondary(Endpoint),
    /// No LLM configured; every call returns `None`.
    None,
    /// Canned responses popped in order, for tests.
    Scripted(Mutex<VecDeque<Option<serde_json::Value>>>),
}

/// Shared LLM capability.
pub struct LlmClient {
    provider: Provider,
    /// Optional model passthrough overriding the endpoint default.
    model_override: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

fn endpoint_from_config(config: &LlmEndpointConfig) -> Option<Endpoint> {
    let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty())?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client");
    Some(Endpoint {
        client,
        api_url: config.api_url.trim_end_matches('/').to_string(),
        api_key,
        model: config.model.clone(),
    })
}

impl LlmClient {
    /// Resolve the provider from config. `auto` prefers primary, then
    /// secondary; `simple` (or no usable key) yields the disabled client.
    pub fn from_config(config: &AiConfig) -> Self {
        let provider = match config.mode {
            AiMode::Simple => Provider::None,
            AiMode::PrimaryLlm => endpoint_from_config(&config.primary)
                .map(Provider::Primary)
                .unwrap_or(Provider::None),
            AiMode::SecondaryLlm => endpoint_from_config(&config.secondary)
                .map(Provider::Secondary)
                .unwrap_or(Provider::None),
            AiMode::Auto => {
                if let Some(endpoint) = endpoint_from_config(&config.primary) {
                    Provider::Primary(endpoint)
                } else if let Some(endpoint) = endpoint_from_config(&config.secondary) {
                    Provider::Secondary(endpoint)
                } else {
                    Provider::None
                }
            }
        };
        match &provider {
            Provider::None => tracing::info!("no LLM configured — running in simple mode"),
            p => tracing::info!(provider = p.name(), "LLM client ready"),
        }
        Self {
            provider,
            model_override: config.retrieval_model.clone(),
        }
    }

    /// A disabled client (every call returns `None`).
    pub fn disabled() -> Self {
        Self {
            provider: Provider::None,
            model_override: None,
        }
    }

    /// A scripted client for tests: responses are popped in call order.
    /// `None` entries simulate a failed/timed-out call.
    pub fn scripted(responses: Vec<Option<serde_json::Value>>) -> Self {
        Self {
            provider: Provider::Scripted(Mutex::new(responses.into())),
            model_override: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.provider, Provider::None)
    }

    /// Display string for observability only.
    pub fn display_name(&self) -> &'static str {
        self.provider.name()
    }

    /// The model id recalls are attributed to.
    pub fn model_id(&self) -> Option<String> {
        if let Some(ref m) = self.model_override {
            return Some(m.clone());
        }
        match &self.provider {
            Provider::Primary(e) | Provider::Secondary(e) => Some(e.model.clone()),
            Provider::Scripted(_) => Some("scripted".into()),
            Provider::None => None,
        }
    }

    /// Issue a JSON-mode chat call bounded by the request deadline.
    /// Returns parsed JSON, or `None` on timeout, transport error, non-2xx,
    /// or unparseable content.
    pub async fn call_json(&self, request: &JsonRequest) -> Option<serde_json::Value> {
        let endpoint = match &self.provider {
            Provider::None => return None,
            Provider::Scripted(queue) => {
                return queue.lock().ok()?.pop_front().flatten();
            }
            Provider::Primary(e) | Provider::Secondary(e) => e,
        };

        let model = self.model_override.as_deref().unwrap_or(&endpoint.model);
        let body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature,
            "response_format": { "type": "json_object" },
        });
        let url = format!("{}/chat/completions", endpoint.api_url);

        let send = endpoint
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", endpoint.api_key))
            .json(&body)
            .send();

        let response = match tokio::time::timeout(request.deadline, send).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!("LLM request failed: {e}");
                return None;
            }
            Err(_) => {
                warn!(deadline_ms = request.deadline.as_millis() as u64, "LLM call timed out");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "LLM endpoint returned error");
            return None;
        }

        let parsed: ChatCompletionResponse =
            match tokio::time::timeout(request.deadline, response.json()).await {
                Ok(Ok(p)) => p,
                _ => {
                    warn!("LLM response body unreadable");
                    return None;
                }
            };
        let content = parsed.choices.into_iter().next()?.message.content;
        match serde_json::from_str(&content) {
            Ok(value) => {
                debug!("LLM JSON call succeeded");
                Some(value)
            }
            Err(e) => {
                warn!("LLM returned non-JSON content: {e}");
                None
            }
        }
    }
}

impl Provider {
    fn name(&self) -> &'static str {
        match self {
            Self::Primary(_) => "primary",
            Self::Secondary(_) => "secondary",
            Self::None => "none",
            Self::Scripted(_) => "scripted",
        }
    }
}
