//! Language model provider implementations.
//!
//! Every backend speaks the OpenAI chat completions format:
//! - `"openai"` → api.openai.com
//! - `"ollama"` → a local Ollama server's OpenAI shim
//! - anything else → `OpenAiCompatibleProvider` against `base_url` (vLLM, LM Studio, ...)
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod openai_compat;

use crate::brain::LanguageModel;
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatibleProvider;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Create a language model provider based on the configuration.
///
/// Returns an error if the provider cannot be initialized (for example a
/// remote endpoint without an API key).
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let default_base_url = match config.provider.as_str() {
        "ollama" => OLLAMA_BASE_URL,
        "openai" => OPENAI_BASE_URL,
        other => {
            if config.base_url.is_none() {
                tracing::warn!(
                    provider = other,
                    "Unknown provider without base_url, assuming the OpenAI endpoint"
                );
            }
            OPENAI_BASE_URL
        }
    };
    let provider = OpenAiCompatibleProvider::new(config, default_base_url)?;
    tracing::info!(
        provider = %config.provider,
        model = %config.model,
        "Language model provider initialized"
    );
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(provider: &str, key_env: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            model: "test-model".to_string(),
            api_key_env: key_env.to_string(),
            base_url: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_provider_openai() {
        // SAFETY: test-only env var manipulation
        unsafe { std::env::set_var("GROUNDRAG_TEST_API_KEY", "test-key-123") };
        let provider = create_provider(&test_config("openai", "GROUNDRAG_TEST_API_KEY")).unwrap();
        assert_eq!(provider.model_name(), "test-model");
        assert!(provider.supports_structured_output());
    }

    #[test]
    fn test_create_provider_ollama_without_key() {
        let provider =
            create_provider(&test_config("ollama", "GROUNDRAG_TEST_UNSET_OLLAMA_KEY")).unwrap();
        assert_eq!(provider.model_name(), "test-model");
    }

    #[test]
    fn test_create_provider_missing_key() {
        // SAFETY: test-only env var manipulation
        unsafe { std::env::remove_var("GROUNDRAG_NONEXISTENT_KEY") };
        let result = create_provider(&test_config("openai", "GROUNDRAG_NONEXISTENT_KEY"));
        match result.err() {
            Some(LlmError::AuthFailed { provider }) => {
                assert!(provider.contains("GROUNDRAG_NONEXISTENT_KEY"));
            }
            other => panic!("Expected AuthFailed, got {:?}", other.map(|e| e.to_string())),
        }
    }
}
