//! Deterministic collaborators for core tests.
//!
//! `HashEmbedder` hashes lowercase word tokens into buckets so texts sharing
//! words have high cosine similarity. `ScriptedProvider` answers completions
//! from a closure and records every request it saw.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use memoria_types::error::{EmbeddingError, VectorStoreError};
use memoria_types::llm::{CompletionRequest, CompletionResponse, LlmError, StopReason, Usage};
use memoria_types::memory::{MemoryRecord, MemoryType, ScoredMemory, UserScope};

use super::embedder::Embedder;
use super::fingerprint::ContentHasher;
use super::vector::VectorStore;
use crate::llm::provider::LlmProvider;

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Bag-of-words embedder over hashed tokens, L2-normalized.
pub struct HashEmbedder {
    dimension: usize,
    fail: bool,
    delay: Option<Duration>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
            delay: None,
        }
    }

    pub fn failing(dimension: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dimension)
        }
    }

    pub fn slow(dimension: usize, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(dimension)
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            v[(fnv1a(token) % self.dimension as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(EmbeddingError::Backend("embedding server unavailable".to_string()));
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "test-hash-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Identity hasher: the canonical form is its own fingerprint.
pub struct PlainHasher;

impl ContentHasher for PlainHasher {
    fn compute_hash(&self, content: &str) -> String {
        content.to_string()
    }
}

type Responder = dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync;

/// LLM provider driven by a closure. Clones share the request log.
#[derive(Clone)]
pub struct ScriptedProvider {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(
        responder: impl Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    pub fn fixed(content: &str) -> Self {
        let content = content.to_string();
        Self::new(move |_| Ok(content.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| {
            Err(LlmError::Provider {
                message: "connection refused".to_string(),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = (self.responder)(request)?;
        Ok(CompletionResponse {
            id: "scripted".to_string(),
            content,
            model: "scripted-model".to_string(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }
}

/// Text of the last user message in a request.
pub fn last_user_message(request: &CompletionRequest) -> String {
    request
        .messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

/// Vector store whose every call fails, for fail-open / fail-drop paths.
pub struct UnavailableStore;

fn unavailable() -> VectorStoreError {
    VectorStoreError::Connection("vector store unreachable".to_string())
}

impl VectorStore for UnavailableStore {
    async fn insert(&self, _record: &MemoryRecord) -> Result<(), VectorStoreError> {
        Err(unavailable())
    }

    async fn search(
        &self,
        _user_scope: &UserScope,
        _query_embedding: &[f32],
        _limit: usize,
        _min_score: f32,
    ) -> Result<Vec<ScoredMemory>, VectorStoreError> {
        Err(unavailable())
    }

    async fn find_by_fingerprint(
        &self,
        _user_scope: &UserScope,
        _fingerprint: &str,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        Err(unavailable())
    }

    async fn get(
        &self,
        _user_scope: &UserScope,
        _id: &Uuid,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        Err(unavailable())
    }

    async fn list(
        &self,
        _user_scope: &UserScope,
        _limit: usize,
    ) -> Result<Vec<MemoryRecord>, VectorStoreError> {
        Err(unavailable())
    }

    async fn delete(&self, _user_scope: &UserScope, _id: &Uuid) -> Result<bool, VectorStoreError> {
        Err(unavailable())
    }

    async fn delete_scope(
        &self,
        _user_scope: &UserScope,
        _memory_type: Option<MemoryType>,
    ) -> Result<u64, VectorStoreError> {
        Err(unavailable())
    }

    async fn count(&self, _user_scope: &UserScope) -> Result<u64, VectorStoreError> {
        Err(unavailable())
    }
}

/// Store that ignores the requested scope and returns whatever it holds.
///
/// Simulates a broken backend filter so the isolation check can be
/// exercised end to end.
pub struct LeakyStore {
    pub records: Vec<MemoryRecord>,
}

impl VectorStore for LeakyStore {
    async fn insert(&self, _record: &MemoryRecord) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn search(
        &self,
        _user_scope: &UserScope,
        _query_embedding: &[f32],
        limit: usize,
        _min_score: f32,
    ) -> Result<Vec<ScoredMemory>, VectorStoreError> {
        Ok(self
            .records
            .iter()
            .take(limit)
            .map(|r| ScoredMemory {
                record: r.clone(),
                similarity: 0.99,
            })
            .collect())
    }

    async fn find_by_fingerprint(
        &self,
        _user_scope: &UserScope,
        fingerprint: &str,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        Ok(self
            .records
            .iter()
            .find(|r| r.dedup_fingerprint == fingerprint)
            .cloned())
    }

    async fn get(
        &self,
        _user_scope: &UserScope,
        _id: &Uuid,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        Ok(None)
    }

    async fn list(
        &self,
        _user_scope: &UserScope,
        _limit: usize,
    ) -> Result<Vec<MemoryRecord>, VectorStoreError> {
        Ok(self.records.clone())
    }

    async fn delete(&self, _user_scope: &UserScope, _id: &Uuid) -> Result<bool, VectorStoreError> {
        Ok(false)
    }

    async fn delete_scope(
        &self,
        _user_scope: &UserScope,
        _memory_type: Option<MemoryType>,
    ) -> Result<u64, VectorStoreError> {
        Ok(0)
    }

    async fn count(&self, _user_scope: &UserScope) -> Result<u64, VectorStoreError> {
        Ok(self.records.len() as u64)
    }
}

/// Shorthand for building a scope in tests.
pub fn scope(id: &str) -> UserScope {
    UserScope::new(id).unwrap()
}
