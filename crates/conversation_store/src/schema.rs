use std::time::Duration;

use agent_provider::{GenerateResponse, Message, ModelInfo, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// On-disk shape of `request_<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: String,
    pub messages: Vec<Message>,
}

/// On-disk shape of `response_<id>.json`: one entry per loop iteration.
pub type ResponseRecord = Vec<GenerateResponse>;

/// One line of `tool_log.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: String,
    pub turn_id: String,
    pub tool: String,
    pub input: Value,
    pub result_summary: String,
    pub success: bool,
    pub duration_ms: u64,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate state persisted in `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: Option<String>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub first_run: Option<String>,
    pub last_run: Option<String>,
    pub run_count: u64,
}

impl Config {
    /// Folds one finished session into the running totals.
    pub fn record_run(&mut self, model: &str, usage: Usage, cost_usd: f64, at: &str) {
        self.model = Some(model.to_string());
        self.total_input_tokens = self.total_input_tokens.saturating_add(usage.input_tokens);
        self.total_output_tokens = self.total_output_tokens.saturating_add(usage.output_tokens);
        self.total_cost_usd += cost_usd;
        if self.first_run.is_none() {
            self.first_run = Some(at.to_string());
        }
        self.last_run = Some(at.to_string());
        self.run_count += 1;
    }
}

/// Cached provider model listing persisted in `models.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCache {
    pub last_updated: String,
    pub provider: String,
    pub models: Vec<ModelInfo>,
}

impl ModelCache {
    /// Returns true when the listing is younger than `max_age` at `now`.
    ///
    /// Unparseable timestamps count as stale.
    #[must_use]
    pub fn is_fresh(&self, now: OffsetDateTime, max_age: Duration) -> bool {
        let Ok(updated) = OffsetDateTime::parse(&self.last_updated, &Rfc3339) else {
            return false;
        };

        let age = now - updated;
        !age.is_negative() && age.unsigned_abs() < max_age
    }
}
