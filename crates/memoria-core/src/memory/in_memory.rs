//! Process-local vector store.
//!
//! Brute-force cosine search over per-user partitions held in a `DashMap`.
//! Used for development deployments (`store.backend = "memory"`) and as the
//! store behind core tests. Contents do not survive a restart.

use dashmap::DashMap;
use uuid::Uuid;

use memoria_types::error::VectorStoreError;
use memoria_types::memory::{MemoryRecord, MemoryType, ScoredMemory, UserScope};

use super::vector::VectorStore;

/// Cosine similarity clamped to [0, 1].
///
/// Opposed vectors score 0 rather than negative so scores compare directly
/// with thresholds. Zero-length vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

pub struct InMemoryVectorStore {
    partitions: DashMap<UserScope, Vec<MemoryRecord>>,
    dimension: usize,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            partitions: DashMap::new(),
            dimension,
        }
    }

    fn check_dimension(&self, len: usize) -> Result<(), VectorStoreError> {
        if len != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }
}

impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, record: &MemoryRecord) -> Result<(), VectorStoreError> {
        self.check_dimension(record.embedding.len())?;
        self.partitions
            .entry(record.user_scope().clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn search(
        &self,
        user_scope: &UserScope,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>, VectorStoreError> {
        self.check_dimension(query_embedding.len())?;
        let Some(partition) = self.partitions.get(user_scope) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredMemory> = partition
            .iter()
            .map(|record| ScoredMemory {
                similarity: cosine_similarity(query_embedding, &record.embedding),
                record: record.clone(),
            })
            .filter(|m| m.similarity >= min_score)
            .collect();

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn find_by_fingerprint(
        &self,
        user_scope: &UserScope,
        fingerprint: &str,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        Ok(self.partitions.get(user_scope).and_then(|partition| {
            partition
                .iter()
                .find(|r| r.dedup_fingerprint == fingerprint)
                .cloned()
        }))
    }

    async fn get(
        &self,
        user_scope: &UserScope,
        id: &Uuid,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        Ok(self
            .partitions
            .get(user_scope)
            .and_then(|partition| partition.iter().find(|r| &r.id == id).cloned()))
    }

    async fn list(
        &self,
        user_scope: &UserScope,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, VectorStoreError> {
        let mut records = self
            .partitions
            .get(user_scope)
            .map(|partition| partition.value().clone())
            .unwrap_or_default();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn delete(&self, user_scope: &UserScope, id: &Uuid) -> Result<bool, VectorStoreError> {
        let Some(mut partition) = self.partitions.get_mut(user_scope) else {
            return Ok(false);
        };
        let before = partition.len();
        partition.retain(|r| &r.id != id);
        Ok(partition.len() < before)
    }

    async fn delete_scope(
        &self,
        user_scope: &UserScope,
        memory_type: Option<MemoryType>,
    ) -> Result<u64, VectorStoreError> {
        match memory_type {
            None => Ok(self
                .partitions
                .remove(user_scope)
                .map(|(_, records)| records.len() as u64)
                .unwrap_or(0)),
            Some(kind) => {
                let Some(mut partition) = self.partitions.get_mut(user_scope) else {
                    return Ok(0);
                };
                let before = partition.len();
                partition.retain(|r| r.memory_type != kind);
                Ok((before - partition.len()) as u64)
            }
        }
    }

    async fn count(&self, user_scope: &UserScope) -> Result<u64, VectorStoreError> {
        Ok(self
            .partitions
            .get(user_scope)
            .map(|p| p.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_types::memory::TurnRange;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    fn record(scope: &str, text: &str, embedding: Vec<f32>, kind: MemoryType) -> MemoryRecord {
        MemoryRecord::new(
            UserScope::new(scope).unwrap(),
            text.to_string(),
            kind,
            embedding,
            "test".to_string(),
            format!("fp:{text}"),
            TurnRange::new(0, 1),
        )
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_is_scoped_and_ranked() {
        let store = InMemoryVectorStore::new(4);
        let mut close = unit(4, 0);
        close[1] = 0.2;
        store
            .insert(&record("alice", "exact", unit(4, 0), MemoryType::Semantic))
            .await
            .unwrap();
        store
            .insert(&record("alice", "close", close, MemoryType::Semantic))
            .await
            .unwrap();
        store
            .insert(&record("alice", "far", unit(4, 2), MemoryType::Semantic))
            .await
            .unwrap();
        store
            .insert(&record("bob", "bob exact", unit(4, 0), MemoryType::Semantic))
            .await
            .unwrap();

        let alice = UserScope::new("alice").unwrap();
        let results = store.search(&alice, &unit(4, 0), 10, 0.5).await.unwrap();
        let texts: Vec<&str> = results.iter().map(|m| m.record.text.as_str()).collect();
        assert_eq!(texts, vec!["exact", "close"]);
        assert!(results.iter().all(|m| m.record.user_scope() == &alice));

        let limited = store.search(&alice, &unit(4, 0), 1, 0.0).await.unwrap();
        assert_eq!(limited.len(), 1);

        let carol = UserScope::new("carol").unwrap();
        assert!(store.search(&carol, &unit(4, 0), 10, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_checked() {
        let store = InMemoryVectorStore::new(4);
        let err = store
            .insert(&record("alice", "bad", vec![1.0; 3], MemoryType::Semantic))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_fingerprint_get_delete() {
        let store = InMemoryVectorStore::new(4);
        let rec = record("alice", "tea", unit(4, 1), MemoryType::Semantic);
        store.insert(&rec).await.unwrap();

        let alice = UserScope::new("alice").unwrap();
        let bob = UserScope::new("bob").unwrap();
        assert!(store.find_by_fingerprint(&alice, "fp:tea").await.unwrap().is_some());
        assert!(store.find_by_fingerprint(&bob, "fp:tea").await.unwrap().is_none());
        assert!(store.get(&alice, &rec.id).await.unwrap().is_some());
        assert!(store.get(&bob, &rec.id).await.unwrap().is_none());

        assert!(!store.delete(&bob, &rec.id).await.unwrap());
        assert!(store.delete(&alice, &rec.id).await.unwrap());
        assert_eq!(store.count(&alice).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_scope_by_type() {
        let store = InMemoryVectorStore::new(4);
        store
            .insert(&record("alice", "a", unit(4, 0), MemoryType::Semantic))
            .await
            .unwrap();
        store
            .insert(&record("alice", "b", unit(4, 1), MemoryType::Procedural))
            .await
            .unwrap();
        store
            .insert(&record("bob", "c", unit(4, 1), MemoryType::Procedural))
            .await
            .unwrap();

        let alice = UserScope::new("alice").unwrap();
        let bob = UserScope::new("bob").unwrap();
        assert_eq!(
            store
                .delete_scope(&alice, Some(MemoryType::Procedural))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.count(&alice).await.unwrap(), 1);
        assert_eq!(store.delete_scope(&alice, None).await.unwrap(), 1);
        assert_eq!(store.count(&alice).await.unwrap(), 0);
        assert_eq!(store.count(&bob).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = InMemoryVectorStore::new(4);
        for text in ["first", "second", "third"] {
            store
                .insert(&record("alice", text, unit(4, 0), MemoryType::Semantic))
                .await
                .unwrap();
        }
        let alice = UserScope::new("alice").unwrap();
        let listed = store.list(&alice, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].text, "third");
    }
}
