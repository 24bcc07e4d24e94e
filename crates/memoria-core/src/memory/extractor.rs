//! Fact extraction via LLM.
//!
//! `FactExtractor` sends a batch of conversation turns to an LLM with a
//! prompt asking for a JSON array of `{"type", "content"}` objects, then
//! parses the reply into [`ExtractedFact`]s. Markdown code fences around the
//! JSON are tolerated. Entries with an unknown type or empty content are
//! skipped; output that is not a JSON array at all is an
//! [`MemoryError::ExtractionParse`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info_span, Instrument};

use memoria_types::config::ExtractionConfig;
use memoria_types::error::MemoryError;
use memoria_types::llm::{CompletionRequest, Message};
use memoria_types::memory::{ConversationTurn, ExtractedFact, MemoryType};

use super::fingerprint::{canonical_form, normalize_fact_text};
use crate::llm::box_provider::BoxLlmProvider;

/// System prompt for the extraction LLM call.
const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract durable facts about the USER from a conversation so they can be remembered in future conversations.

Rules:
1. Only facts stated by or about the user; never the assistant's suggestions or general knowledge
2. Each fact must make sense on its own, without the conversation (include what a value refers to)
3. Phrase facts as statements, never as questions
4. Keep constraints explicit ("cannot", "must not", "only")
5. Skip greetings, hypotheticals and small talk

Types:
- "semantic": facts, preferences, constraints and knowledge about the user
  e.g. "User is allergic to shellfish", "User's budget for the Hawaii trip is $10,000"
- "procedural": routines or processes the user explicitly describes as their own
  e.g. "User deploys by running tests, then pushing to staging, then production"

Return ONLY a JSON array, no prose and no markdown:
[{"type": "semantic", "content": "User's name is Alex"}]

Return [] if there is nothing worth remembering."#;

/// Preview length for unparseable output in logs and errors.
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct RawFact {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: String,
}

pub struct FactExtractor {
    provider: Arc<BoxLlmProvider>,
    max_tokens: u32,
    temperature: f64,
}

impl FactExtractor {
    pub fn new(provider: Arc<BoxLlmProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Ask the LLM for facts in `turns` and parse its reply.
    #[tracing::instrument(
        name = "memory.extract",
        skip(self, turns),
        fields(turn_count = turns.len(), provider = self.provider.name())
    )]
    pub async fn extract(&self, turns: &[ConversationTurn]) -> Result<Vec<ExtractedFact>, MemoryError> {
        if turns.is_empty() {
            return Ok(Vec::new());
        }

        let request = CompletionRequest {
            model: String::new(),
            messages: vec![Message::user(build_extraction_prompt(turns))],
            system: Some(EXTRACTION_SYSTEM_PROMPT.to_string()),
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
        };

        let span = info_span!(
            "gen_ai.complete",
            gen_ai.operation.name = "extract_memory",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = self.provider.model(),
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
        );
        let response = self.provider.complete(&request).instrument(span).await?;
        let facts = parse_extracted_facts(&response.content)?;
        tracing::debug!(fact_count = facts.len(), "Extraction parsed");
        Ok(facts)
    }
}

fn build_extraction_prompt(turns: &[ConversationTurn]) -> String {
    let conversation = turns
        .iter()
        .map(|t| format!("[{}]: {}", t.role, t.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Extract important information about the user from this conversation:\n\n{conversation}\n\nReturn JSON array:"
    )
}

/// Parse extraction output into facts.
///
/// Candidates whose canonical forms collide are collapsed to the first.
pub fn parse_extracted_facts(content: &str) -> Result<Vec<ExtractedFact>, MemoryError> {
    let cleaned = extract_json_array(content);
    if cleaned.is_empty() || cleaned == "[]" {
        return Ok(Vec::new());
    }

    let raw: Vec<RawFact> = serde_json::from_str(cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(PREVIEW_CHARS).collect();
        MemoryError::ExtractionParse {
            reason: e.to_string(),
            preview,
        }
    })?;

    let mut seen = HashSet::new();
    let mut facts = Vec::with_capacity(raw.len());
    for entry in raw {
        let content = normalize_fact_text(&entry.content);
        if content.is_empty() {
            continue;
        }
        let Some(memory_type) = MemoryType::normalize(&entry.kind) else {
            tracing::warn!(kind = %entry.kind, "Skipping extracted fact with invalid type");
            continue;
        };
        if !seen.insert(canonical_form(&content)) {
            continue;
        }
        facts.push(ExtractedFact {
            memory_type,
            content,
        });
    }
    Ok(facts)
}

/// Remove a surrounding markdown code fence (```json ... ``` or ``` ... ```)
/// and any prose around the outermost JSON array.
fn extract_json_array(content: &str) -> &str {
    let mut body = content.trim();

    if let Some(open) = body.find("```") {
        let after_fence = &body[open + 3..];
        // Skip an info string such as `json` on the opening fence line.
        let inner_start = after_fence
            .find(|c: char| c == '\n' || c == '[' || c == '{')
            .unwrap_or(0);
        let inner = &after_fence[inner_start..];
        body = match inner.find("```") {
            Some(close) => &inner[..close],
            None => inner,
        };
        body = body.trim();
    }

    if !body.starts_with('[') {
        if let (Some(start), Some(end)) = (body.find('['), body.rfind(']')) {
            if start < end {
                return body[start..=end].trim();
            }
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::{last_user_message, ScriptedProvider};
    use memoria_types::llm::LlmError;

    #[test]
    fn test_parse_plain_array() {
        let facts = parse_extracted_facts(
            r#"[{"type": "semantic", "content": "User is lactose intolerant"},
                {"type": "procedural", "content": "User reviews tests, then logic, then style"}]"#,
        )
        .unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].memory_type, MemoryType::Semantic);
        assert_eq!(facts[1].memory_type, MemoryType::Procedural);
    }

    #[test]
    fn test_parse_code_fenced() {
        let content = "```json\n[{\"type\": \"semantic\", \"content\": \"User's budget is $5000\"}]\n```";
        let facts = parse_extracted_facts(content).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "User's budget is $5000");

        let bare_fence = "```\n[]\n```";
        assert!(parse_extracted_facts(bare_fence).unwrap().is_empty());
    }

    #[test]
    fn test_parse_with_surrounding_prose() {
        let content = "Here is what I found:\n[{\"type\": \"semantic\", \"content\": \"User lives in Berlin\"}]\nDone.";
        let facts = parse_extracted_facts(content).unwrap();
        assert_eq!(facts[0].content, "User lives in Berlin");
    }

    #[test]
    fn test_parse_empty_outputs() {
        assert!(parse_extracted_facts("").unwrap().is_empty());
        assert!(parse_extracted_facts("  []  ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_skips_invalid_entries() {
        let content = r#"[
            {"type": "semantic", "content": "   "},
            {"type": "opinion", "content": "User thinks Go is great"},
            {"type": "SEMANTIC", "content": "  User  works at Acme Corp "},
            {"content": "no type at all"}
        ]"#;
        let facts = parse_extracted_facts(content).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "User works at Acme Corp");
    }

    #[test]
    fn test_parse_collapses_batch_duplicates() {
        let content = r#"[
            {"type": "semantic", "content": "User likes green tea."},
            {"type": "semantic", "content": "user likes green tea"}
        ]"#;
        assert_eq!(parse_extracted_facts(content).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_malformed_is_error() {
        let err = parse_extracted_facts("I could not find any facts.").unwrap_err();
        assert!(matches!(err, MemoryError::ExtractionParse { .. }));

        let err = parse_extracted_facts(r#"{"type": "semantic", "content": "not an array"}"#).unwrap_err();
        assert!(matches!(err, MemoryError::ExtractionParse { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_prompt_mentions_types_and_format() {
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("\"semantic\""));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("\"procedural\""));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("JSON array"));
    }

    #[tokio::test]
    async fn test_extract_sends_formatted_turns() {
        let provider =
            ScriptedProvider::fixed(r#"[{"type": "semantic", "content": "User's name is Alex"}]"#);
        let extractor = FactExtractor::new(
            Arc::new(BoxLlmProvider::new(provider.clone())),
            &ExtractionConfig::default(),
        );
        let facts = extractor
            .extract(&[
                ConversationTurn::user("Hi, I'm Alex"),
                ConversationTurn::assistant("Nice to meet you, Alex!"),
            ])
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);

        let request = &provider.requests()[0];
        assert_eq!(request.max_tokens, 500);
        assert_eq!(request.temperature, Some(0.1));
        let prompt = last_user_message(request);
        assert!(prompt.contains("[user]: Hi, I'm Alex"));
        assert!(prompt.contains("[assistant]: Nice to meet you, Alex!"));
    }

    #[tokio::test]
    async fn test_extract_provider_error() {
        let extractor = FactExtractor::new(
            Arc::new(BoxLlmProvider::new(ScriptedProvider::failing())),
            &ExtractionConfig::default(),
        );
        let err = extractor
            .extract(&[ConversationTurn::user("hello")])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Llm(LlmError::Provider { .. })));
    }
}
