//! Query rewriting for memory search.
//!
//! Follow-ups like "how much was it again?" embed poorly on their own. The
//! rewriter asks an LLM to restate the query as a self-contained question
//! using the last few turns. Any failure (error, timeout, empty or runaway
//! output) falls back to the raw query; rewriting never fails a retrieval.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info_span, Instrument};

use memoria_types::config::QueryRewriteConfig;
use memoria_types::llm::{CompletionRequest, Message};
use memoria_types::memory::{ConversationTurn, UserScope};

use crate::llm::box_provider::BoxLlmProvider;

const REWRITE_SYSTEM_PROMPT: &str = r#"You rewrite a user's latest message into a standalone search query for a personal memory store.

Rules:
1. Resolve pronouns and references ("it", "that", "there", "again") using the conversation
2. Keep the user's intent; do not answer the question
3. Keep it short: one sentence, no preamble, no quotes
4. If the message is already self-contained, return it unchanged

Return ONLY the rewritten query."#;

/// Rewrites longer than this multiple of the raw query (plus slack) are
/// treated as the model rambling.
const MAX_GROWTH_FACTOR: usize = 4;
const GROWTH_SLACK_CHARS: usize = 200;

pub struct QueryRewriter {
    provider: Arc<BoxLlmProvider>,
    timeout: Duration,
    history_turns: usize,
    max_tokens: u32,
}

impl QueryRewriter {
    pub fn new(provider: Arc<BoxLlmProvider>, config: &QueryRewriteConfig) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(config.timeout_seconds),
            history_turns: config.history_turns,
            max_tokens: config.max_tokens,
        }
    }

    /// Override the timeout (tests use sub-second values).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Self-contained form of `raw_query`, or `raw_query` itself on any failure.
    #[tracing::instrument(
        name = "memory.rewrite",
        skip(self, raw_query, recent_turns),
        fields(user_scope = %user_scope, history = recent_turns.len())
    )]
    pub async fn rewrite(
        &self,
        user_scope: &UserScope,
        raw_query: &str,
        recent_turns: &[ConversationTurn],
    ) -> String {
        let history_start = recent_turns.len().saturating_sub(self.history_turns);
        let history = &recent_turns[history_start..];
        if history.is_empty() {
            return raw_query.to_string();
        }

        let request = CompletionRequest {
            model: String::new(),
            messages: vec![Message::user(build_rewrite_prompt(raw_query, history))],
            system: Some(REWRITE_SYSTEM_PROMPT.to_string()),
            max_tokens: self.max_tokens,
            temperature: Some(0.0),
        };

        let span = info_span!(
            "gen_ai.complete",
            gen_ai.operation.name = "rewrite_query",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = self.provider.model(),
            gen_ai.request.max_tokens = request.max_tokens,
        );
        let call = self.provider.complete(&request).instrument(span);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Query rewrite failed; using raw query");
                return raw_query.to_string();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Query rewrite timed out; using raw query"
                );
                return raw_query.to_string();
            }
        };

        match clean_rewrite(&response.content, raw_query) {
            Some(rewritten) => {
                tracing::debug!(rewritten = %rewritten, "Query rewritten");
                rewritten
            }
            None => {
                tracing::warn!("Query rewrite returned unusable output; using raw query");
                raw_query.to_string()
            }
        }
    }
}

fn build_rewrite_prompt(raw_query: &str, history: &[ConversationTurn]) -> String {
    let conversation = history
        .iter()
        .map(|t| format!("[{}]: {}", t.role, t.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Conversation:\n{conversation}\n\nLatest message: {raw_query}\n\nStandalone query:")
}

/// Strip wrapping quotes and whitespace; reject empty or oversized output.
fn clean_rewrite(content: &str, raw_query: &str) -> Option<String> {
    let cleaned = content
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if cleaned.is_empty() {
        return None;
    }
    let budget = raw_query.chars().count() * MAX_GROWTH_FACTOR + GROWTH_SLACK_CHARS;
    if cleaned.chars().count() > budget {
        return None;
    }
    Some(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::{last_user_message, scope, ScriptedProvider};

    fn history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("I'm planning a trip to Hawaii"),
            ConversationTurn::assistant("Sounds great! What's your budget?"),
        ]
    }

    fn rewriter(provider: ScriptedProvider) -> QueryRewriter {
        QueryRewriter::new(
            Arc::new(BoxLlmProvider::new(provider)),
            &QueryRewriteConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_rewrite_uses_llm_output() {
        let provider = ScriptedProvider::fixed("\"What is my budget for the Hawaii trip?\"\n");
        let rewriter = rewriter(provider.clone());
        let out = rewriter
            .rewrite(&scope("alice"), "how much was it again?", &history())
            .await;
        assert_eq!(out, "What is my budget for the Hawaii trip?");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, Some(0.0));
        let prompt = last_user_message(&requests[0]);
        assert!(prompt.contains("[user]: I'm planning a trip to Hawaii"));
        assert!(prompt.contains("Latest message: how much was it again?"));
    }

    #[tokio::test]
    async fn test_rewrite_without_history_skips_llm() {
        let provider = ScriptedProvider::fixed("should not be used");
        let rewriter = rewriter(provider.clone());
        let out = rewriter.rewrite(&scope("alice"), "my budget?", &[]).await;
        assert_eq!(out, "my budget?");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_failure_falls_back() {
        let rewriter = rewriter(ScriptedProvider::failing());
        let out = rewriter.rewrite(&scope("alice"), "and that one?", &history()).await;
        assert_eq!(out, "and that one?");
    }

    #[tokio::test]
    async fn test_rewrite_timeout_falls_back() {
        let provider = ScriptedProvider::fixed("late answer").with_delay(Duration::from_millis(500));
        let rewriter = rewriter(provider).with_timeout(Duration::from_millis(20));
        let out = rewriter.rewrite(&scope("alice"), "and that one?", &history()).await;
        assert_eq!(out, "and that one?");
    }

    #[tokio::test]
    async fn test_rewrite_empty_output_falls_back() {
        let rewriter = rewriter(ScriptedProvider::fixed("  \"\" "));
        let out = rewriter.rewrite(&scope("alice"), "what about it?", &history()).await;
        assert_eq!(out, "what about it?");
    }

    #[tokio::test]
    async fn test_history_is_truncated_to_recent_turns() {
        let provider = ScriptedProvider::fixed("rewritten");
        let rewriter = QueryRewriter::new(
            Arc::new(BoxLlmProvider::new(provider.clone())),
            &QueryRewriteConfig {
                history_turns: 1,
                ..QueryRewriteConfig::default()
            },
        );
        rewriter.rewrite(&scope("alice"), "q", &history()).await;
        let prompt = last_user_message(&provider.requests()[0]);
        assert!(!prompt.contains("Hawaii"));
        assert!(prompt.contains("What's your budget?"));
    }

    #[test]
    fn test_clean_rewrite_rejects_runaway_output() {
        let long = "word ".repeat(200);
        assert!(clean_rewrite(&long, "short").is_none());
        assert_eq!(clean_rewrite(" `ok` ", "q").as_deref(), Some("ok"));
    }
}
