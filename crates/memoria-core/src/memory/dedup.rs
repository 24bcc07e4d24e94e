//! Near-duplicate suppression for memory writes.
//!
//! A candidate is rejected when its fingerprint already exists in the same
//! scope, or when its nearest scoped neighbour scores at or above the dedup
//! threshold. The dedup threshold is separate from (and by default higher
//! than) the retrieval threshold: "related" is not "duplicate", so two
//! distinct values on the same topic are both kept.

use std::sync::Arc;

use uuid::Uuid;

use memoria_types::config::DeduplicationConfig;
use memoria_types::error::MemoryError;
use memoria_types::memory::UserScope;

use super::box_vector::BoxVectorStore;
use super::fingerprint::{fingerprint, ContentHasher};
use super::isolation::{assert_isolated, assert_records_isolated};

/// Outcome of a dedup check.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    Store,
    ExactDuplicate { existing_id: Uuid },
    NearDuplicate { existing_id: Uuid, similarity: f32 },
}

impl DedupDecision {
    pub fn is_store(&self) -> bool {
        matches!(self, DedupDecision::Store)
    }
}

pub struct DeduplicationEngine {
    store: Arc<BoxVectorStore>,
    hasher: Arc<dyn ContentHasher>,
    threshold: f32,
    neighbors: usize,
}

impl DeduplicationEngine {
    pub fn new(
        store: Arc<BoxVectorStore>,
        hasher: Arc<dyn ContentHasher>,
        config: &DeduplicationConfig,
    ) -> Self {
        Self {
            store,
            hasher,
            threshold: config.threshold,
            neighbors: config.neighbors.max(1),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Fingerprint of `text` as stored in `dedup_fingerprint`.
    pub fn fingerprint(&self, text: &str) -> String {
        fingerprint(self.hasher.as_ref(), text)
    }

    /// Classify a candidate against what `user_scope` already has.
    ///
    /// Store failures propagate: the caller drops the candidate rather than
    /// writing it unchecked.
    #[tracing::instrument(
        name = "memory.dedup",
        skip(self, candidate_text, candidate_embedding),
        fields(user_scope = %user_scope, threshold = self.threshold)
    )]
    pub async fn check(
        &self,
        user_scope: &UserScope,
        candidate_text: &str,
        candidate_embedding: &[f32],
    ) -> Result<DedupDecision, MemoryError> {
        let fp = self.fingerprint(candidate_text);
        if let Some(existing) = self.store.find_by_fingerprint(user_scope, &fp).await? {
            assert_records_isolated(user_scope, [&existing])?;
            tracing::debug!(existing_id = %existing.id, "Exact duplicate by fingerprint");
            return Ok(DedupDecision::ExactDuplicate {
                existing_id: existing.id,
            });
        }

        let neighbours = self
            .store
            .search(user_scope, candidate_embedding, self.neighbors, self.threshold)
            .await?;
        assert_isolated(user_scope, &neighbours)?;

        match neighbours
            .into_iter()
            .find(|n| n.similarity >= self.threshold)
        {
            Some(nearest) => {
                tracing::debug!(
                    existing_id = %nearest.record.id,
                    similarity = nearest.similarity,
                    "Near duplicate above dedup threshold"
                );
                Ok(DedupDecision::NearDuplicate {
                    existing_id: nearest.record.id,
                    similarity: nearest.similarity,
                })
            }
            None => Ok(DedupDecision::Store),
        }
    }

    /// True if the candidate should be written.
    pub async fn should_store(
        &self,
        user_scope: &UserScope,
        candidate_text: &str,
        candidate_embedding: &[f32],
    ) -> Result<bool, MemoryError> {
        Ok(self
            .check(user_scope, candidate_text, candidate_embedding)
            .await?
            .is_store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::in_memory::InMemoryVectorStore;
    use crate::memory::test_support::{scope, HashEmbedder, LeakyStore, PlainHasher, UnavailableStore};
    use memoria_types::memory::{MemoryRecord, MemoryType, TurnRange};

    const DIM: usize = 384;

    struct Fixture {
        store: Arc<BoxVectorStore>,
        engine: DeduplicationEngine,
        embedder: HashEmbedder,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(BoxVectorStore::new(InMemoryVectorStore::new(DIM)));
        let engine = DeduplicationEngine::new(
            store.clone(),
            Arc::new(PlainHasher),
            &DeduplicationConfig::default(),
        );
        Fixture {
            store,
            engine,
            embedder: HashEmbedder::new(DIM),
        }
    }

    impl Fixture {
        async fn put(&self, user: &str, text: &str) -> MemoryRecord {
            let record = MemoryRecord::new(
                scope(user),
                text.to_string(),
                MemoryType::Semantic,
                self.embedder.vector(text),
                "test".to_string(),
                self.engine.fingerprint(text),
                TurnRange::new(0, 1),
            );
            self.store.insert(&record).await.unwrap();
            record
        }

        async fn check(&self, user: &str, text: &str) -> DedupDecision {
            self.engine
                .check(&scope(user), text, &self.embedder.vector(text))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_empty_scope_stores() {
        let f = fixture();
        assert_eq!(f.check("alice", "User likes green tea").await, DedupDecision::Store);
    }

    #[tokio::test]
    async fn test_exact_duplicate_by_fingerprint() {
        let f = fixture();
        let existing = f.put("alice", "User likes green tea.").await;
        assert_eq!(
            f.check("alice", "user likes   green TEA").await,
            DedupDecision::ExactDuplicate {
                existing_id: existing.id
            }
        );
    }

    #[tokio::test]
    async fn test_near_duplicate_above_threshold() {
        let f = fixture();
        let existing = f.put("alice", "User prefers window seats on long flights").await;
        match f
            .check("alice", "User prefers window seats on long flights always")
            .await
        {
            DedupDecision::NearDuplicate {
                existing_id,
                similarity,
            } => {
                assert_eq!(existing_id, existing.id);
                assert!(similarity >= f.engine.threshold());
            }
            other => panic!("expected near duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_distinct_values_on_same_topic_are_kept() {
        let f = fixture();
        f.put("alice", "User's home address is 12 Oak Street").await;
        assert!(
            f.engine
                .should_store(
                    &scope("alice"),
                    "User's work address is 500 Market Street",
                    &f.embedder.vector("User's work address is 500 Market Street"),
                )
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_dedup_is_scoped_per_user() {
        let f = fixture();
        f.put("alice", "User likes green tea").await;
        assert_eq!(f.check("bob", "User likes green tea").await, DedupDecision::Store);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let engine = DeduplicationEngine::new(
            Arc::new(BoxVectorStore::new(UnavailableStore)),
            Arc::new(PlainHasher),
            &DeduplicationConfig::default(),
        );
        let err = engine
            .check(&scope("alice"), "anything", &vec![0.0; DIM])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::VectorStore(_)));
    }

    #[tokio::test]
    async fn test_foreign_neighbour_is_isolation_violation() {
        let leaked = MemoryRecord::new(
            scope("alice"),
            "My secret PIN is 9876".to_string(),
            MemoryType::Semantic,
            vec![0.0; DIM],
            "test".to_string(),
            "my secret pin is 9876".to_string(),
            TurnRange::new(0, 0),
        );
        let engine = DeduplicationEngine::new(
            Arc::new(BoxVectorStore::new(LeakyStore {
                records: vec![leaked],
            })),
            Arc::new(PlainHasher),
            &DeduplicationConfig::default(),
        );
        let err = engine
            .check(&scope("bob"), "something else entirely", &vec![0.0; DIM])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::IsolationViolation { .. }));
    }
}
