//! Deterministic scripted implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use agent_provider::{
    Capabilities, ContentBlock, GenerateRequest, GenerateResponse, LlmProvider, ModelInfo,
    ProviderError, Role, StopReason, Usage,
};
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// One scripted provider outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedStep {
    Respond(GenerateResponse),
    Fail(ProviderError),
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<ScriptedStep>,
    last: Option<ScriptedStep>,
    requests: Vec<GenerateRequest>,
}

/// Deterministic provider that replays a fixed script of outcomes.
///
/// With an empty script every call echoes the latest user text and ends the
/// turn, which keeps local runs usable without credentials.
#[derive(Debug)]
pub struct ScriptedProvider {
    state: Mutex<ScriptState>,
    repeat_last: bool,
    model_ids: Vec<String>,
}

impl ScriptedProvider {
    /// Creates a provider that plays `steps` once, then reports exhaustion.
    #[must_use]
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                steps: steps.into(),
                ..ScriptState::default()
            }),
            repeat_last: false,
            model_ids: vec!["mock".to_string(), "mock-alt".to_string()],
        }
    }

    /// Creates a provider that returns `response` on every call.
    #[must_use]
    pub fn repeating(response: GenerateResponse) -> Self {
        Self::new(vec![ScriptedStep::Respond(response)]).with_repeat_last()
    }

    /// Keeps returning the final scripted step once the script runs out.
    #[must_use]
    pub fn with_repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    #[must_use]
    pub fn with_models(mut self, model_ids: Vec<String>) -> Self {
        self.model_ids = sanitize_model_ids(model_ids);
        self
    }

    /// Returns every request received so far, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock_unpoisoned(&self.state).requests.clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        lock_unpoisoned(&self.state).requests.len()
    }

    fn next_step(state: &mut ScriptState, repeat_last: bool) -> Option<ScriptedStep> {
        match state.steps.pop_front() {
            Some(step) => {
                state.last = Some(step.clone());
                Some(step)
            }
            None if repeat_last => state.last.clone(),
            None => None,
        }
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl LlmProvider for ScriptedProvider {
    fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let mut state = lock_unpoisoned(&self.state);
        let scripted = !state.steps.is_empty() || state.last.is_some();
        let echo = latest_user_text(&request);
        state.requests.push(request);

        match Self::next_step(&mut state, self.repeat_last) {
            Some(ScriptedStep::Respond(response)) => Ok(response),
            Some(ScriptedStep::Fail(error)) => Err(error),
            None if scripted => Err(ProviderError::new(format!(
                "mock script exhausted after {} calls",
                state.requests.len() - 1
            ))),
            None => Ok(text_response(format!("mock reply: {echo}"), Usage::default())),
        }
    }

    fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(self.model_ids.iter().map(ModelInfo::new).collect())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_tools: true,
            supports_vision: false,
            max_context_tokens: 200_000,
            provider: MOCK_PROVIDER_ID.to_string(),
        }
    }
}

/// Builds an `end_turn` response carrying one text block.
#[must_use]
pub fn text_response(text: impl Into<String>, usage: Usage) -> GenerateResponse {
    GenerateResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
        usage,
    }
}

/// Builds a `tool_use` response requesting exactly one tool call.
#[must_use]
pub fn tool_use_response(
    id: impl Into<String>,
    name: impl Into<String>,
    input: Value,
    usage: Usage,
) -> GenerateResponse {
    GenerateResponse {
        content: vec![ContentBlock::tool_use(id, name, input)],
        stop_reason: StopReason::ToolUse,
        usage,
    }
}

fn latest_user_text(request: &GenerateRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .filter(|message| message.role == Role::User)
        .find_map(|message| message.first_text())
        .unwrap_or_default()
        .to_string()
}

fn sanitize_model_ids(model_ids: Vec<String>) -> Vec<String> {
    let mut sanitized: Vec<String> = model_ids
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();

    if sanitized.is_empty() {
        sanitized.push("mock".to_string());
    }

    sanitized
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
