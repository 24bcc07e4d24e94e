//! Memory types for Memoria.
//!
//! These types model a user's long-term memory: facts extracted from
//! conversations, the queries used to retrieve them, and the per-user
//! extraction window that batches turns before extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::error::MemoryError;

/// Opaque identifier that partitions all memory data.
///
/// Every store operation takes a `UserScope`; there is no unscoped path.
/// Construction rejects empty or whitespace-only identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserScope(String);

impl UserScope {
    pub fn new(id: impl Into<String>) -> Result<Self, MemoryError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(MemoryError::InvalidScope(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserScope {
    type Error = MemoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserScope> for String {
    fn from(scope: UserScope) -> Self {
        scope.0
    }
}

impl FromStr for UserScope {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Classification of a stored memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Facts, preferences and constraints about the user.
    #[default]
    Semantic,
    /// Workflows and routines the user described explicitly.
    Procedural,
    /// Past events and conversations.
    Episodic,
    /// Temporary session context. Never produced by extraction.
    Working,
}

impl MemoryType {
    /// Lenient parse used on extraction output.
    ///
    /// Case and surrounding whitespace are ignored. Only the types the
    /// extraction prompt may emit are accepted; anything else is `None`.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "semantic" => Some(MemoryType::Semantic),
            "procedural" => Some(MemoryType::Procedural),
            "episodic" => Some(MemoryType::Episodic),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryType::Semantic => write!(f, "semantic"),
            MemoryType::Procedural => write!(f, "procedural"),
            MemoryType::Episodic => write!(f, "episodic"),
            MemoryType::Working => write!(f, "working"),
        }
    }
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "semantic" => Ok(MemoryType::Semantic),
            "procedural" => Ok(MemoryType::Procedural),
            "episodic" => Ok(MemoryType::Episodic),
            "working" => Ok(MemoryType::Working),
            other => Err(format!("invalid memory type: '{other}'")),
        }
    }
}

/// Inclusive range of turn indices that an extraction batch covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRange {
    pub first: u64,
    pub last: u64,
}

impl TurnRange {
    pub fn new(first: u64, last: u64) -> Self {
        Self { first, last }
    }

    /// Number of turns covered, always at least one.
    pub fn turn_count(&self) -> u64 {
        self.last.saturating_sub(self.first) + 1
    }
}

impl fmt::Display for TurnRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}

/// One stored fact.
///
/// The owning scope is fixed at construction: the field is private and
/// there is no setter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    user_scope: UserScope,
    /// Normalized fact text.
    pub text: String,
    pub memory_type: MemoryType,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    /// Model that produced `embedding`.
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 hex of the canonical form of `text`.
    pub dedup_fingerprint: String,
    pub source_turn_range: TurnRange,
}

impl MemoryRecord {
    /// Build a record with a fresh time-sortable id and the current time.
    pub fn new(
        user_scope: UserScope,
        text: String,
        memory_type: MemoryType,
        embedding: Vec<f32>,
        embedding_model: String,
        dedup_fingerprint: String,
        source_turn_range: TurnRange,
    ) -> Self {
        Self::with_id(
            Uuid::now_v7(),
            user_scope,
            text,
            memory_type,
            embedding,
            embedding_model,
            Utc::now(),
            dedup_fingerprint,
            source_turn_range,
        )
    }

    /// Rehydrate a record read back from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn with_id(
        id: Uuid,
        user_scope: UserScope,
        text: String,
        memory_type: MemoryType,
        embedding: Vec<f32>,
        embedding_model: String,
        created_at: DateTime<Utc>,
        dedup_fingerprint: String,
        source_turn_range: TurnRange,
    ) -> Self {
        Self {
            id,
            user_scope,
            text,
            memory_type,
            embedding,
            embedding_model,
            created_at,
            dedup_fingerprint,
            source_turn_range,
        }
    }

    pub fn user_scope(&self) -> &UserScope {
        &self.user_scope
    }
}

/// A memory paired with its cosine similarity to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    /// Cosine similarity in [0.0, 1.0].
    pub similarity: f32,
}

/// Input to a retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub user_scope: UserScope,
    pub raw_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    pub limit: usize,
    pub similarity_threshold: f32,
}

impl RetrievalQuery {
    /// The text that should be embedded: the rewrite when one exists.
    pub fn effective_query(&self) -> &str {
        self.rewritten_query.as_deref().unwrap_or(&self.raw_query)
    }
}

/// Ranked output of a retrieval.
///
/// Sorted by descending similarity, at most `limit` long, every score at or
/// above the query's threshold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub memories: Vec<ScoredMemory>,
    /// The text that was actually embedded, if retrieval got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_query: Option<String>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
            TurnRole::System => write!(f, "system"),
        }
    }
}

impl FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            "system" => Ok(TurnRole::System),
            other => Err(format!("invalid turn role: '{other}'")),
        }
    }
}

/// One message of a conversation as seen by the memory subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

/// A candidate fact parsed from extraction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub memory_type: MemoryType,
    pub content: String,
}

/// Read-only view of a user's pending extraction window.
///
/// A window turn is one exchange (the user's message and the reply to it),
/// so `turn_count` and `next_turn_index` count exchanges while
/// `pending_turns` holds every message of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionWindow {
    pub user_scope: UserScope,
    pub pending_turns: Vec<ConversationTurn>,
    /// Exchanges accumulated since the last extraction.
    pub turn_count: usize,
    pub batch_size: usize,
    /// Index the next arriving exchange will receive.
    pub next_turn_index: u64,
}

/// Outcome of one extraction batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub user_scope: UserScope,
    pub turn_range: TurnRange,
    /// Distinct candidates parsed from the LLM output.
    pub candidates: usize,
    pub stored: usize,
    pub duplicates: usize,
    /// Candidates lost to embedding or store failures.
    pub dropped: usize,
    /// Why the whole batch was abandoned (LLM error, parse error, timeout).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ExtractionReport {
    pub fn new(user_scope: UserScope, turn_range: TurnRange) -> Self {
        Self {
            user_scope,
            turn_range,
            candidates: 0,
            stored: 0,
            duplicates: 0,
            dropped: 0,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_scope_rejects_blank() {
        assert!(UserScope::new("").is_err());
        assert!(UserScope::new("   ").is_err());
        assert_eq!(UserScope::new(" alice ").unwrap().as_str(), "alice");
    }

    #[test]
    fn user_scope_deserialize_validates() {
        let ok: UserScope = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<UserScope>("\"  \"").is_err());
    }

    #[test]
    fn memory_type_normalize() {
        assert_eq!(MemoryType::normalize("SEMANTIC"), Some(MemoryType::Semantic));
        assert_eq!(MemoryType::normalize("  procedural "), Some(MemoryType::Procedural));
        assert_eq!(MemoryType::normalize("Episodic"), Some(MemoryType::Episodic));
        assert_eq!(MemoryType::normalize("working"), None);
        assert_eq!(MemoryType::normalize("unknown_type"), None);
        assert_eq!(MemoryType::normalize(""), None);
    }

    #[test]
    fn memory_type_display_fromstr() {
        for t in [
            MemoryType::Semantic,
            MemoryType::Procedural,
            MemoryType::Episodic,
            MemoryType::Working,
        ] {
            assert_eq!(t.to_string().parse::<MemoryType>().unwrap(), t);
        }
        assert!("fact".parse::<MemoryType>().is_err());
    }

    #[test]
    fn turn_range_count() {
        assert_eq!(TurnRange::new(3, 3).turn_count(), 1);
        assert_eq!(TurnRange::new(2, 5).turn_count(), 4);
        assert_eq!(TurnRange::new(0, 9).to_string(), "0..=9");
    }

    #[test]
    fn record_scope_is_fixed() {
        let scope = UserScope::new("alice").unwrap();
        let record = MemoryRecord::new(
            scope.clone(),
            "User likes tea".to_string(),
            MemoryType::Semantic,
            vec![0.0; 4],
            "test".to_string(),
            "fp".to_string(),
            TurnRange::new(0, 1),
        );
        assert_eq!(record.user_scope(), &scope);
        assert_eq!(record.id.get_version_num(), 7);
    }

    #[test]
    fn effective_query_prefers_rewrite() {
        let mut query = RetrievalQuery {
            user_scope: UserScope::new("u").unwrap(),
            raw_query: "what about it?".to_string(),
            rewritten_query: None,
            limit: 5,
            similarity_threshold: 0.7,
        };
        assert_eq!(query.effective_query(), "what about it?");
        query.rewritten_query = Some("what is the user's budget for Hawaii?".to_string());
        assert_eq!(query.effective_query(), "what is the user's budget for Hawaii?");
    }
}
