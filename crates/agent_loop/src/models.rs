use std::time::Duration;

use agent_provider::LlmProvider;
use conversation_store::{now_rfc3339, ConversationStore, ModelCache};
use time::OffsetDateTime;
use tracing::debug;

use crate::session::SessionError;

pub const MODEL_CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Returns the cached model listing for this provider when it is younger than
/// `max_age`, otherwise asks the provider and rewrites `models.json`.
pub fn refresh_model_cache(
    provider: &dyn LlmProvider,
    store: &ConversationStore,
    max_age: Duration,
    now: OffsetDateTime,
) -> Result<ModelCache, SessionError> {
    let provider_id = provider.capabilities().provider;

    if let Some(cache) = store.load_model_cache()? {
        if cache.provider == provider_id && cache.is_fresh(now, max_age) {
            debug!(provider = %provider_id, models = cache.models.len(), "model cache is fresh");
            return Ok(cache);
        }
    }

    let models = provider.list_models().map_err(SessionError::Provider)?;
    let cache = ModelCache {
        last_updated: now_rfc3339()?,
        provider: provider_id,
        models,
    };
    store.save_model_cache(&cache)?;
    debug!(provider = %cache.provider, models = cache.models.len(), "refreshed model cache");

    Ok(cache)
}
