use std::sync::Arc;

use agent_provider::{LlmProvider, ProviderError};
use agent_provider_http::{ClaudeConfig, ClaudeProvider, OllamaConfig, OllamaProvider};
use agent_provider_mock::ScriptedProvider;

use crate::settings::{ProviderKind, Settings, ANTHROPIC_API_KEY_ENV_VAR};

/// Builds the provider selected by `settings`.
pub fn provider_for_settings(settings: &Settings) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match settings.provider {
        ProviderKind::Claude => {
            let api_key = settings.anthropic_api_key.clone().ok_or_else(|| {
                ProviderError::new(format!("{ANTHROPIC_API_KEY_ENV_VAR} is not set"))
            })?;
            let mut config = ClaudeConfig::new(api_key).with_timeout(settings.request_timeout);
            if let Some(base_url) = &settings.anthropic_base_url {
                config = config.with_base_url(base_url.clone());
            }
            Ok(Arc::new(ClaudeProvider::new(config)?))
        }
        ProviderKind::Ollama => {
            let mut config = OllamaConfig::default().with_timeout(settings.request_timeout);
            if let Some(host) = &settings.ollama_host {
                config = config.with_host(host.clone());
            }
            Ok(Arc::new(OllamaProvider::new(config)?))
        }
        ProviderKind::Mock => Ok(Arc::new(ScriptedProvider::default())),
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::{GenerateRequest, Message};

    use super::*;
    use crate::settings::PROVIDER_ENV_VAR;

    fn settings(provider: &str) -> Settings {
        Settings::from_lookup(|key| match key {
            PROVIDER_ENV_VAR => Some(provider.to_string()),
            ANTHROPIC_API_KEY_ENV_VAR => Some("sk-test".to_string()),
            _ => None,
        })
        .expect("settings")
    }

    #[test]
    fn every_provider_kind_resolves() {
        for (name, expected) in [("mock", "mock"), ("claude", "claude"), ("ollama", "ollama")] {
            let provider = provider_for_settings(&settings(name)).expect("provider");
            assert_eq!(provider.capabilities().provider, expected);
        }
    }

    #[test]
    fn mock_provider_echoes_without_credentials() {
        let provider = provider_for_settings(&settings("mock")).expect("mock");
        let response = provider
            .generate(GenerateRequest {
                model: "mock".to_string(),
                messages: vec![Message::user_text("ping")],
                tools: Vec::new(),
                max_tokens: 16,
                system: None,
            })
            .expect("generate");
        assert_eq!(response.first_text(), Some("mock reply: ping"));
    }
}
