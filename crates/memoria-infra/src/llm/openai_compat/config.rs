//! Connection settings for OpenAI-compatible chat endpoints.
//!
//! Query rewriting and fact extraction each point at their own endpoint
//! (typically a local vLLM or llama.cpp server), so a config is built per
//! purpose from the deployment sections.

use secrecy::SecretString;

use memoria_types::config::{ExtractionConfig, QueryRewriteConfig};

/// Configuration for an [`super::OpenAiCompatibleProvider`].
pub struct OpenAiCompatConfig {
    /// Short label used in logs ("extraction", "query_rewrite").
    pub provider_name: String,
    /// Base URL, e.g. `http://localhost:8000/v1`.
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
}

/// Read the API key from `env_var`. Local servers usually need none, so an
/// unset variable yields an empty key.
fn api_key_from_env(purpose: &str, env_var: Option<&str>) -> SecretString {
    match env_var {
        Some(name) => match std::env::var(name) {
            Ok(key) => SecretString::from(key),
            Err(_) => {
                tracing::warn!(purpose, env_var = name, "API key variable not set; sending no key");
                SecretString::from(String::new())
            }
        },
        None => SecretString::from(String::new()),
    }
}

pub fn extraction_config(config: &ExtractionConfig) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "extraction".into(),
        base_url: config.endpoint.clone(),
        api_key: api_key_from_env("extraction", config.api_key_env.as_deref()),
        model: config.model.clone(),
    }
}

pub fn query_rewrite_config(config: &QueryRewriteConfig) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "query_rewrite".into(),
        base_url: config.endpoint.clone(),
        api_key: api_key_from_env("query_rewrite", config.api_key_env.as_deref()),
        model: config.model.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_extraction_config_uses_section_values() {
        let section = ExtractionConfig {
            endpoint: "http://llm.internal:9000/v1".into(),
            model: "qwen3-8b".into(),
            api_key_env: None,
            ..ExtractionConfig::default()
        };
        let config = extraction_config(&section);
        assert_eq!(config.provider_name, "extraction");
        assert_eq!(config.base_url, "http://llm.internal:9000/v1");
        assert_eq!(config.model, "qwen3-8b");
        assert!(config.api_key.expose_secret().is_empty());
    }

    #[test]
    fn test_missing_key_variable_yields_empty_key() {
        let section = QueryRewriteConfig {
            api_key_env: Some("MEMORIA_TEST_KEY_THAT_IS_NEVER_SET".into()),
            ..QueryRewriteConfig::default()
        };
        let config = query_rewrite_config(&section);
        assert_eq!(config.provider_name, "query_rewrite");
        assert!(config.api_key.expose_secret().is_empty());
    }
}
