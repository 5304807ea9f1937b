//! HTTP-backed implementations of the `agent_provider` contract.
//!
//! Request building and response decoding are plain functions over
//! [`HttpRequest`]/[`HttpResponse`]; the network sits behind [`Transport`], so
//! both adapters are testable without a server.

mod claude;
mod error;
mod ollama;
mod transport;
mod url;

pub use claude::{
    messages_payload, ClaudeConfig, ClaudeProvider, ANTHROPIC_VERSION, CLAUDE_PROVIDER_ID,
    DEFAULT_CLAUDE_BASE_URL,
};
pub use ollama::{
    chat_payload, OllamaConfig, OllamaProvider, DEFAULT_OLLAMA_HOST, OLLAMA_PROVIDER_ID,
};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use url::normalize_base_url;
