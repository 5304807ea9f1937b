//! The agentic loop: provider calls alternate with sandboxed tool execution
//! until the model ends its turn or a ceiling is hit.
//!
//! The request for a turn is written before the first provider call and the
//! response buffer only after the loop reaches `end_turn`, so a crash or a
//! failure leaves an orphaned request that never enters replayed history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_provider::{
    ContentBlock, GenerateRequest, GenerateResponse, LlmProvider, Message, ProviderError, Role,
    StopReason, Usage,
};
use conversation_store::{
    now_rfc3339, AuditLogEntry, ConversationStore, ConversationStoreError, TurnId,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::budget::{BudgetGuard, Cost};
use crate::pricing::price_for_model;
use crate::tools::{tool_definitions, ToolExecutor, ToolOutput};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub tools_enabled: bool,
    /// Dollar ceiling per turn; zero is unlimited.
    pub max_cost_usd: f64,
    /// Provider calls per turn; zero is unlimited.
    pub max_iterations: u32,
    /// Complete turns to keep after a successful turn; `None` never prunes.
    pub keep_last: Option<usize>,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 4096,
            system_prompt: None,
            tools_enabled: true,
            max_cost_usd: 0.0,
            max_iterations: 25,
            keep_last: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("storage failure: {0}")]
    Storage(#[from] ConversationStoreError),

    #[error("provider call failed: {0}")]
    Provider(#[source] ProviderError),

    #[error("cost ceiling of ${ceiling_usd} exceeded after {iterations} iteration(s): spent {cost}")]
    BudgetExceeded {
        iterations: u32,
        cost: Cost,
        ceiling_usd: f64,
    },

    #[error("iteration cap reached after {iterations} iteration(s) (spent {cost})")]
    IterationCapReached { iterations: u32, cost: Cost },

    #[error("provider stopped with unexpected reason '{reason}' after {iterations} iteration(s)")]
    UnexpectedStopReason { reason: String, iterations: u32 },

    #[error("provider stopped for tool_use without requesting any tool")]
    MissingToolUse { iterations: u32 },

    #[error("no orphaned request is newer than the last complete turn")]
    NoOrphanedRequest,
}

impl SessionError {
    /// Raw provider payload, when the failure came with one.
    pub fn raw_payload(&self) -> Option<&Value> {
        match self {
            Self::Provider(error) => error.raw(),
            _ => None,
        }
    }
}

/// Progress notifications for presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    ProviderCall {
        turn_id: TurnId,
        iteration: u32,
    },
    ToolStarted {
        name: String,
        input: Value,
    },
    ToolFinished {
        name: String,
        output: ToolOutput,
        duration: Duration,
    },
}

pub trait TurnObserver {
    fn on_event(&mut self, event: &TurnEvent);
}

impl<F> TurnObserver for F
where
    F: FnMut(&TurnEvent),
{
    fn on_event(&mut self, event: &TurnEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub answer: String,
    pub iterations: u32,
    pub cost: Cost,
    pub usage: Usage,
}

enum LoopState {
    AwaitProvider,
    ExecuteTools(Message),
    Done(String),
}

pub struct Session {
    provider: Arc<dyn LlmProvider>,
    store: ConversationStore,
    tools: Box<dyn ToolExecutor>,
    config: SessionConfig,
    observer: Option<Box<dyn TurnObserver>>,
}

impl Session {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: ConversationStore,
        tools: Box<dyn ToolExecutor>,
        config: SessionConfig,
    ) -> Self {
        Self {
            provider,
            store,
            tools,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl TurnObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs one user turn to completion against the replayed history.
    pub fn run_turn(&mut self, user_text: &str) -> Result<TurnOutcome, SessionError> {
        let mut messages = self.store.load_history()?;
        messages.push(Message::user_text(user_text));

        let turn_id = self.store.next_turn_id()?;
        self.store.save_request(&turn_id, &messages)?;
        info!(turn_id = %turn_id, history = messages.len() - 1, "starting turn");

        self.drive(turn_id, messages)
    }

    /// Re-runs the newest interrupted turn from its saved request.
    pub fn resume_orphan(&mut self) -> Result<TurnOutcome, SessionError> {
        let turn_id = self
            .store
            .latest_resumable_request()?
            .ok_or(SessionError::NoOrphanedRequest)?;
        let request = self.store.load_request(&turn_id)?;
        info!(turn_id = %turn_id, messages = request.messages.len(), "resuming turn");

        self.drive(turn_id, request.messages)
    }

    /// Deletes every orphaned request and returns how many were removed.
    pub fn discard_orphans(&self) -> Result<usize, SessionError> {
        let orphans = self.store.orphan_requests()?;
        for turn_id in &orphans {
            self.store.discard_request(turn_id)?;
            debug!(turn_id = %turn_id, "discarded orphaned request");
        }
        Ok(orphans.len())
    }

    fn drive(
        &mut self,
        turn_id: TurnId,
        messages: Vec<Message>,
    ) -> Result<TurnOutcome, SessionError> {
        let mut budget = BudgetGuard::new(self.config.max_cost_usd, self.config.max_iterations);

        let (answer, responses) = match self.run_loop(&turn_id, messages, &mut budget) {
            Ok(finished) => finished,
            Err(error) => {
                if budget.iterations() > 0 {
                    if let Err(accounting) = self.record_accounting(&budget) {
                        warn!(turn_id = %turn_id, error = %accounting, "failed to record usage for failed turn");
                    }
                }
                return Err(error);
            }
        };

        self.store.save_response(&turn_id, &responses)?;
        self.record_accounting(&budget)?;
        self.prune_after_turn();
        info!(turn_id = %turn_id, iterations = budget.iterations(), cost = %budget.cost(), "turn complete");

        Ok(TurnOutcome {
            turn_id,
            answer,
            iterations: budget.iterations(),
            cost: budget.cost(),
            usage: budget.usage(),
        })
    }

    /// Alternates provider calls and tool execution until `end_turn`, returning
    /// the final answer and every response of the turn.
    fn run_loop(
        &mut self,
        turn_id: &TurnId,
        mut messages: Vec<Message>,
        budget: &mut BudgetGuard,
    ) -> Result<(String, Vec<GenerateResponse>), SessionError> {
        let price = price_for_model(&self.config.model);
        let tools = if self.config.tools_enabled {
            tool_definitions()
        } else {
            Vec::new()
        };
        let mut responses: Vec<GenerateResponse> = Vec::new();
        let mut state = LoopState::AwaitProvider;

        loop {
            state = match state {
                LoopState::AwaitProvider => {
                    if budget.iteration_cap_reached() {
                        warn!(turn_id = %turn_id, iterations = budget.iterations(), "iteration cap reached");
                        return Err(SessionError::IterationCapReached {
                            iterations: budget.iterations(),
                            cost: budget.cost(),
                        });
                    }

                    let iteration = budget.iterations() + 1;
                    self.emit(TurnEvent::ProviderCall {
                        turn_id: turn_id.clone(),
                        iteration,
                    });

                    let request = GenerateRequest {
                        model: self.config.model.clone(),
                        messages: messages.clone(),
                        tools: tools.clone(),
                        max_tokens: self.config.max_tokens,
                        system: self.config.system_prompt.clone(),
                    };
                    let response = self.provider.generate(request).map_err(|source| {
                        error!(turn_id = %turn_id, iteration, error = %source, "provider call failed");
                        SessionError::Provider(source)
                    })?;

                    let cost = budget.record_iteration(response.usage, price);
                    info!(
                        turn_id = %turn_id,
                        iteration,
                        stop_reason = %response.stop_reason,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        %cost,
                        "provider call finished"
                    );
                    if budget.ceiling_exceeded() {
                        warn!(turn_id = %turn_id, %cost, "cost ceiling exceeded");
                        return Err(SessionError::BudgetExceeded {
                            iterations: budget.iterations(),
                            cost,
                            ceiling_usd: budget.ceiling_dollars(),
                        });
                    }

                    let reply = Message::assistant(response.content.clone());
                    messages.push(reply.clone());
                    let next = match &response.stop_reason {
                        StopReason::EndTurn => LoopState::Done(
                            response.first_text().unwrap_or_default().to_string(),
                        ),
                        StopReason::ToolUse => LoopState::ExecuteTools(reply),
                        other => {
                            return Err(SessionError::UnexpectedStopReason {
                                reason: other.to_string(),
                                iterations: budget.iterations(),
                            });
                        }
                    };
                    responses.push(response);
                    next
                }
                LoopState::ExecuteTools(reply) => {
                    let results = self.execute_tool_uses(turn_id, &reply)?;
                    if results.is_empty() {
                        return Err(SessionError::MissingToolUse {
                            iterations: budget.iterations(),
                        });
                    }
                    messages.push(Message {
                        role: Role::User,
                        content: results,
                    });
                    LoopState::AwaitProvider
                }
                LoopState::Done(answer) => return Ok((answer, responses)),
            };
        }
    }

    /// Runs every `tool_use` block of `reply` in order and returns one result
    /// per block.
    fn execute_tool_uses(
        &mut self,
        turn_id: &TurnId,
        reply: &Message,
    ) -> Result<Vec<ContentBlock>, SessionError> {
        let mut results = Vec::new();

        for (id, name, input) in reply.tool_uses() {
            self.emit(TurnEvent::ToolStarted {
                name: name.to_string(),
                input: input.clone(),
            });

            let started = Instant::now();
            let output = if self.config.tools_enabled {
                self.tools.execute_tool_use(name, input)
            } else {
                ToolOutput {
                    ok: false,
                    content: "Error: tools are disabled for this session".to_string(),
                    dry_run: false,
                    diff: None,
                    error: Some("tools are disabled for this session".to_string()),
                }
            };
            let duration = started.elapsed();
            info!(tool = %name, ok = output.ok, dry_run = output.dry_run, duration_ms = duration.as_millis() as u64, "tool finished");

            self.store.append_audit_log(&AuditLogEntry {
                timestamp: now_rfc3339()?,
                turn_id: turn_id.to_string(),
                tool: name.to_string(),
                input: input.clone(),
                result_summary: output.summary(),
                success: output.ok,
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                dry_run: output.dry_run,
                error: output.error.clone(),
            })?;

            results.push(output.to_content_block(id));
            self.emit(TurnEvent::ToolFinished {
                name: name.to_string(),
                output,
                duration,
            });
        }

        Ok(results)
    }

    fn record_accounting(&self, budget: &BudgetGuard) -> Result<(), SessionError> {
        let mut config = self.store.load_config()?;
        config.record_run(
            &self.config.model,
            budget.usage(),
            budget.cost().dollars(),
            &now_rfc3339()?,
        );
        self.store.save_config(&config)?;
        Ok(())
    }

    /// Prune failures leave the finished turn intact; prune is idempotent and
    /// runs again after the next turn.
    fn prune_after_turn(&self) {
        let Some(keep_last) = self.config.keep_last else {
            return;
        };

        match self.store.prune(keep_last) {
            Ok(report) => debug!(pruned = report.pruned, kept = report.kept, "auto-prune finished"),
            Err(error) => warn!(%error, "auto-prune incomplete"),
        }
    }

    fn emit(&mut self, event: TurnEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
    }
}
