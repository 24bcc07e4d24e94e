//! LLM provider implementations.
//!
//! Both memory jobs that need a model (query rewriting and fact extraction)
//! talk to OpenAI-compatible endpoints. The factories here build a
//! [`BoxLlmProvider`] per deployment section.

pub mod openai_compat;

use memoria_core::llm::box_provider::BoxLlmProvider;
use memoria_types::config::{ExtractionConfig, QueryRewriteConfig};

use self::openai_compat::OpenAiCompatibleProvider;

pub fn create_extraction_provider(config: &ExtractionConfig) -> BoxLlmProvider {
    BoxLlmProvider::new(OpenAiCompatibleProvider::new(
        openai_compat::config::extraction_config(config),
    ))
}

pub fn create_rewrite_provider(config: &QueryRewriteConfig) -> BoxLlmProvider {
    BoxLlmProvider::new(OpenAiCompatibleProvider::new(
        openai_compat::config::query_rewrite_config(config),
    ))
}
