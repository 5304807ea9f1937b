//! Runtime settings read from `AGENT_LOOP_*` environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::policy::PermissionPolicy;
use crate::session::SessionConfig;

pub const PROVIDER_ENV_VAR: &str = "AGENT_LOOP_PROVIDER";
pub const MODEL_ENV_VAR: &str = "AGENT_LOOP_MODEL";
pub const DIR_ENV_VAR: &str = "AGENT_LOOP_DIR";
pub const PERMISSIONS_ENV_VAR: &str = "AGENT_LOOP_PERMISSIONS";
pub const TOOLS_ENV_VAR: &str = "AGENT_LOOP_TOOLS";
pub const MAX_TOKENS_ENV_VAR: &str = "AGENT_LOOP_MAX_TOKENS";
pub const MAX_COST_ENV_VAR: &str = "AGENT_LOOP_MAX_COST";
pub const MAX_ITERATIONS_ENV_VAR: &str = "AGENT_LOOP_MAX_ITERATIONS";
pub const KEEP_LAST_ENV_VAR: &str = "AGENT_LOOP_KEEP_LAST";
pub const SYSTEM_PROMPT_ENV_VAR: &str = "AGENT_LOOP_SYSTEM_PROMPT";
pub const TIMEOUT_ENV_VAR: &str = "AGENT_LOOP_TIMEOUT_SEC";
pub const JSON_ENV_VAR: &str = "AGENT_LOOP_JSON";
pub const LOG_ENV_VAR: &str = "AGENT_LOOP_LOG";
pub const ANTHROPIC_API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_BASE_URL_ENV_VAR: &str = "ANTHROPIC_BASE_URL";
pub const OLLAMA_HOST_ENV_VAR: &str = "OLLAMA_HOST";

pub const DEFAULT_CONVERSATION_DIR: &str = ".agent_loop";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;
pub const DEFAULT_TIMEOUT_SEC: u64 = 120;
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a careful assistant working inside a sandboxed project directory. Use the provided tools to inspect files before answering, keep changes minimal, and say so plainly when a tool refuses an action.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    Ollama,
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Ollama => "ollama",
            Self::Mock => "mock",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Claude => DEFAULT_CLAUDE_MODEL,
            Self::Ollama => DEFAULT_OLLAMA_MODEL,
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "ollama" => Ok(Self::Ollama),
            "mock" => Ok(Self::Mock),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("invalid {var}='{value}': expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{var} must be set when {provider_var}={provider}")]
    Missing {
        var: &'static str,
        provider_var: &'static str,
        provider: ProviderKind,
    },
}

impl SettingsError {
    fn invalid(var: &'static str, value: &str, expected: &'static str) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub provider: ProviderKind,
    pub model: String,
    pub conversation_dir: PathBuf,
    pub permissions: PermissionPolicy,
    pub tools_enabled: bool,
    pub max_tokens: u32,
    pub max_cost_usd: f64,
    pub max_iterations: u32,
    pub keep_last: Option<usize>,
    pub system_prompt: String,
    pub request_timeout: Duration,
    pub json_output: bool,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub ollama_host: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let provider = match read(PROVIDER_ENV_VAR) {
            Some(value) => value.parse::<ProviderKind>().map_err(|()| {
                SettingsError::invalid(PROVIDER_ENV_VAR, &value, "claude, ollama or mock")
            })?,
            None => ProviderKind::Claude,
        };

        let permissions = match read(PERMISSIONS_ENV_VAR) {
            Some(value) => value.parse::<PermissionPolicy>().map_err(|_| {
                SettingsError::invalid(PERMISSIONS_ENV_VAR, &value, "read, write, execute or all")
            })?,
            None => PermissionPolicy::READ,
        };

        let anthropic_api_key = read(ANTHROPIC_API_KEY_ENV_VAR);
        if provider == ProviderKind::Claude && anthropic_api_key.is_none() {
            return Err(SettingsError::Missing {
                var: ANTHROPIC_API_KEY_ENV_VAR,
                provider_var: PROVIDER_ENV_VAR,
                provider,
            });
        }

        Ok(Self {
            model: read(MODEL_ENV_VAR).unwrap_or_else(|| provider.default_model().to_string()),
            provider,
            conversation_dir: read(DIR_ENV_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONVERSATION_DIR)),
            permissions,
            tools_enabled: parse_flag(TOOLS_ENV_VAR, read(TOOLS_ENV_VAR), true)?,
            max_tokens: parse_number(MAX_TOKENS_ENV_VAR, read(MAX_TOKENS_ENV_VAR))?
                .unwrap_or(DEFAULT_MAX_TOKENS),
            max_cost_usd: parse_cost(read(MAX_COST_ENV_VAR))?,
            max_iterations: parse_number(MAX_ITERATIONS_ENV_VAR, read(MAX_ITERATIONS_ENV_VAR))?
                .unwrap_or(DEFAULT_MAX_ITERATIONS),
            keep_last: parse_number(KEEP_LAST_ENV_VAR, read(KEEP_LAST_ENV_VAR))?,
            system_prompt: read(SYSTEM_PROMPT_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            request_timeout: Duration::from_secs(
                parse_timeout(read(TIMEOUT_ENV_VAR))?.unwrap_or(DEFAULT_TIMEOUT_SEC),
            ),
            json_output: parse_flag(JSON_ENV_VAR, read(JSON_ENV_VAR), false)?,
            anthropic_api_key,
            anthropic_base_url: read(ANTHROPIC_BASE_URL_ENV_VAR),
            ollama_host: read(OLLAMA_HOST_ENV_VAR),
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system_prompt: Some(self.system_prompt.clone()),
            tools_enabled: self.tools_enabled,
            max_cost_usd: self.max_cost_usd,
            max_iterations: self.max_iterations,
            keep_last: self.keep_last,
        }
    }
}

fn parse_flag(var: &'static str, value: Option<String>, default: bool) -> Result<bool, SettingsError> {
    let Some(value) = value else {
        return Ok(default);
    };

    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::invalid(var, &value, "a boolean (1/0, true/false)")),
    }
}

fn parse_number<T: FromStr>(
    var: &'static str,
    value: Option<String>,
) -> Result<Option<T>, SettingsError> {
    value
        .map(|value| {
            value
                .parse()
                .map_err(|_| SettingsError::invalid(var, &value, "a non-negative integer"))
        })
        .transpose()
}

fn parse_cost(value: Option<String>) -> Result<f64, SettingsError> {
    let Some(value) = value else {
        return Ok(0.0);
    };

    match value.parse::<f64>() {
        Ok(cost) if cost.is_finite() && cost >= 0.0 => Ok(cost),
        _ => Err(SettingsError::invalid(
            MAX_COST_ENV_VAR,
            &value,
            "a non-negative dollar amount",
        )),
    }
}

fn parse_timeout(value: Option<String>) -> Result<Option<u64>, SettingsError> {
    match parse_number::<u64>(TIMEOUT_ENV_VAR, value.clone())? {
        Some(0) => Err(SettingsError::invalid(
            TIMEOUT_ENV_VAR,
            value.as_deref().unwrap_or_default(),
            "a positive number of seconds",
        )),
        other => Ok(other),
    }
}
