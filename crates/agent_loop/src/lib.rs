//! Agentic execution engine: a turn-taking loop that drives an LLM provider,
//! executes the tools it requests inside a sandbox, and persists every round
//! trip through `conversation_store`.
//!
//! ## Provider bootstrap
//!
//! The provider is chosen explicitly with `AGENT_LOOP_PROVIDER`:
//!
//! - `claude` (default) talks to the Anthropic Messages API and requires
//!   `ANTHROPIC_API_KEY`; `ANTHROPIC_BASE_URL` overrides the endpoint.
//! - `ollama` talks to a local Ollama server at `OLLAMA_HOST`.
//! - `mock` answers deterministically without network access.
//!
//! See [`settings`] for the remaining `AGENT_LOOP_*` variables.
//!
//! ## Sandbox contract
//!
//! Tool calls never abort a turn. Rejections, containment violations and
//! command failures come back to the model as `tool_result` blocks starting
//! with `Error:`; actions the permission policy forbids come back as dry-run
//! descriptions.

pub mod budget;
pub mod containment;
pub mod logging;
pub mod models;
pub mod policy;
pub mod pricing;
pub mod providers;
pub mod session;
pub mod settings;
pub mod tools;
pub mod validator;
