//! Ollama `/api/chat` adapter.
//!
//! Ollama has no tool call ids, so every returned call gets a generated
//! `toolu_<uuid>` id and tool results are sent back as `tool` role messages
//! named after the call they answer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_provider::{
    Capabilities, ContentBlock, GenerateRequest, GenerateResponse, LlmProvider, Message, ModelInfo,
    ProviderError, Role, StopReason, Usage,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{error_from_response, error_message_from_payload};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::url::normalize_base_url;

pub const OLLAMA_PROVIDER_ID: &str = "ollama";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const OLLAMA_CONTEXT_TOKENS: u64 = 32_768;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OllamaConfig {
    pub host: Option<String>,
    pub timeout: Option<Duration>,
}

impl OllamaConfig {
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct OllamaProvider {
    host: String,
    transport: Arc<dyn Transport>,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self, ProviderError> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: OllamaConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            host: normalize_base_url(config.host.as_deref(), DEFAULT_OLLAMA_HOST)?,
            transport,
        })
    }

    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<HttpResponse, ProviderError> {
        let request = HttpRequest {
            method,
            url: format!("{}{path}", self.host),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body,
        };
        let response = self.transport.send(&request)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(&response))
        }
    }
}

/// Builds the non-streaming `/api/chat` body.
pub fn chat_payload(request: &GenerateRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = request.system.as_deref().filter(|system| !system.is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }

    let mut tool_names: HashMap<&str, &str> = HashMap::new();
    for message in &request.messages {
        append_chat_messages(message, &mut tool_names, &mut messages);
    }

    let mut payload = json!({
        "model": request.model,
        "messages": messages,
        "stream": false,
        "options": {"num_predict": request.max_tokens},
    });

    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect(),
        );
    }

    payload
}

fn append_chat_messages<'a>(
    message: &'a Message,
    tool_names: &mut HashMap<&'a str, &'a str>,
    out: &mut Vec<Value>,
) {
    let mut text = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text { text: value } => text.push(value.as_str()),
            ContentBlock::ToolUse { id, name, input } => {
                tool_names.insert(id.as_str(), name.as_str());
                tool_calls.push(json!({"function": {"name": name, "arguments": input}}));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let mut tool_message = json!({"role": "tool", "content": content});
                if let Some(name) = tool_names.get(tool_use_id.as_str()) {
                    tool_message["tool_name"] = Value::String((*name).to_string());
                }
                out.push(tool_message);
            }
        }
    }

    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    if text.is_empty() && tool_calls.is_empty() {
        return;
    }

    let mut chat_message = json!({"role": role, "content": text.join("\n")});
    if !tool_calls.is_empty() {
        chat_message["tool_calls"] = Value::Array(tool_calls);
    }
    out.push(chat_message);
}

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    message: WireChatMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct WireChatMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct WireTags {
    #[serde(default)]
    models: Vec<WireTag>,
}

#[derive(Debug, Deserialize)]
struct WireTag {
    name: String,
}

fn decode_chat_response(body: &str) -> Result<GenerateResponse, ProviderError> {
    let raw: Value = serde_json::from_str(body)
        .map_err(|error| ProviderError::new(format!("invalid Ollama chat response: {error}")))?;

    if let Some(message) = error_message_from_payload(&raw) {
        return Err(ProviderError::new(message).with_raw(raw));
    }

    let chat: WireChatResponse = serde_json::from_value(raw.clone()).map_err(|error| {
        ProviderError::new(format!("invalid Ollama chat response: {error}")).with_raw(raw)
    })?;

    let mut content = Vec::new();
    if !chat.message.content.is_empty() || chat.message.tool_calls.is_empty() {
        content.push(ContentBlock::text(chat.message.content));
    }

    let stop_reason = if !chat.message.tool_calls.is_empty() {
        StopReason::ToolUse
    } else if chat.done_reason.as_deref() == Some("length") {
        StopReason::MaxTokens
    } else {
        StopReason::EndTurn
    };

    for call in chat.message.tool_calls {
        let input = match call.function.arguments {
            Value::Null => json!({}),
            // Some models return arguments as an encoded JSON string.
            Value::String(encoded) => {
                serde_json::from_str(&encoded).unwrap_or(Value::String(encoded))
            }
            other => other,
        };
        content.push(ContentBlock::tool_use(
            format!("toolu_{}", Uuid::new_v4().simple()),
            call.function.name,
            input,
        ));
    }

    Ok(GenerateResponse {
        content,
        stop_reason,
        usage: Usage {
            input_tokens: chat.prompt_eval_count,
            output_tokens: chat.eval_count,
        },
    })
}

impl LlmProvider for OllamaProvider {
    fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let response = self.send(HttpMethod::Post, "/api/chat", Some(chat_payload(&request)))?;
        decode_chat_response(&response.body)
    }

    fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let response = self.send(HttpMethod::Get, "/api/tags", None)?;
        let tags: WireTags = serde_json::from_str(&response.body)
            .map_err(|error| ProviderError::new(format!("invalid Ollama tag list: {error}")))?;
        Ok(tags
            .models
            .into_iter()
            .map(|tag| ModelInfo::new(tag.name))
            .collect())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: true,
            supports_vision: false,
            max_context_tokens: OLLAMA_CONTEXT_TOKENS,
            provider: OLLAMA_PROVIDER_ID.to_string(),
        }
    }
}
