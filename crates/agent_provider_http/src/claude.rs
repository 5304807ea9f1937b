//! Anthropic Messages API adapter.

use std::sync::Arc;
use std::time::Duration;

use agent_provider::{
    Capabilities, ContentBlock, GenerateRequest, GenerateResponse, LlmProvider, ModelInfo,
    ProviderError, StopReason, Usage,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::error_from_response;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::url::normalize_base_url;

pub const CLAUDE_PROVIDER_ID: &str = "claude";
pub const DEFAULT_CLAUDE_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const CLAUDE_CONTEXT_TOKENS: u64 = 200_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl ClaudeConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct ClaudeProvider {
    api_key: String,
    base_url: String,
    transport: Arc<dyn Transport>,
}

impl ClaudeProvider {
    pub fn new(config: ClaudeConfig) -> Result<Self, ProviderError> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: ClaudeConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::new("Claude API key must not be empty"));
        }

        Ok(Self {
            api_key: config.api_key,
            base_url: normalize_base_url(config.base_url.as_deref(), DEFAULT_CLAUDE_BASE_URL)?,
            transport,
        })
    }

    fn request(&self, method: HttpMethod, path: &str, body: Option<Value>) -> HttpRequest {
        HttpRequest {
            method,
            url: format!("{}{path}", self.base_url),
            headers: vec![
                ("x-api-key".to_string(), self.api_key.clone()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }
}

/// Builds the `/v1/messages` body. Tools and system are omitted when empty.
pub fn messages_payload(request: &GenerateRequest) -> Value {
    let mut payload = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "messages": request.messages,
    });

    if let Some(system) = request.system.as_deref().filter(|system| !system.is_empty()) {
        payload["system"] = Value::String(system.to_string());
    }

    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.input_schema,
                    })
                })
                .collect(),
        );
    }

    payload
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Vec<Value>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct WireModelList {
    #[serde(default)]
    data: Vec<WireModel>,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    id: String,
    display_name: Option<String>,
}

fn decode_messages_response(response: &HttpResponse) -> Result<GenerateResponse, ProviderError> {
    let raw: Value = serde_json::from_str(&response.body).map_err(|error| {
        ProviderError::new(format!("invalid Messages API response: {error}"))
            .with_status(response.status)
    })?;

    if raw.get("type").and_then(Value::as_str) == Some("error") {
        return Err(error_from_response(response));
    }

    let message: WireMessage = serde_json::from_value(raw.clone()).map_err(|error| {
        ProviderError::new(format!("invalid Messages API response: {error}")).with_raw(raw.clone())
    })?;
    let stop_reason = message.stop_reason.ok_or_else(|| {
        ProviderError::new("Messages API response has no stop_reason").with_raw(raw.clone())
    })?;

    let content = message
        .content
        .into_iter()
        .filter_map(|block| match serde_json::from_value::<ContentBlock>(block) {
            Ok(block) => Some(block),
            Err(error) => {
                debug!(%error, "skipping unsupported content block");
                None
            }
        })
        .collect();

    Ok(GenerateResponse {
        content,
        stop_reason: StopReason::from(stop_reason),
        usage: message.usage,
    })
}

impl LlmProvider for ClaudeProvider {
    fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let http = self.request(
            HttpMethod::Post,
            "/v1/messages",
            Some(messages_payload(&request)),
        );
        let response = self.transport.send(&http)?;
        if !response.is_success() {
            return Err(error_from_response(&response));
        }
        decode_messages_response(&response)
    }

    fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let http = self.request(HttpMethod::Get, "/v1/models?limit=100", None);
        let response = self.transport.send(&http)?;
        if !response.is_success() {
            return Err(error_from_response(&response));
        }

        let list: WireModelList = serde_json::from_str(&response.body)
            .map_err(|error| ProviderError::new(format!("invalid model list: {error}")))?;
        Ok(list
            .data
            .into_iter()
            .map(|model| ModelInfo {
                id: model.id,
                display_name: model.display_name,
            })
            .collect())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: true,
            supports_vision: true,
            max_context_tokens: CLAUDE_CONTEXT_TOKENS,
            provider: CLAUDE_PROVIDER_ID.to_string(),
        }
    }
}
