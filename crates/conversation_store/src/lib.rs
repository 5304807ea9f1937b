//! Crash-safe on-disk store for agent conversations.
//!
//! Each turn is an immutable `request_<id>.json` written before the provider is
//! called and a `response_<id>.json` written once the turn resolves. A request
//! without a response is an interrupted turn and never enters replayed history.

mod audit;
mod error;
mod paths;
mod prune;
mod schema;
mod store;
mod turn_id;

pub use error::{ConversationStoreError, PruneFailure};
pub use paths::{
    request_file_name, response_file_name, AUDIT_LOG_FILE, CONFIG_FILE, DELETING_SUFFIX,
    MODEL_CACHE_FILE,
};
pub use prune::PruneReport;
pub use schema::{AuditLogEntry, Config, ModelCache, RequestRecord, ResponseRecord};
pub use store::{now_rfc3339, ConversationStore};
pub use turn_id::TurnId;
