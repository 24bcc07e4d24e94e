//! Vector store trait.
//!
//! Defines the interface for scoped semantic search over user memories.
//! Implementations (LanceDB, in-process) live in memoria-infra and
//! [`super::in_memory`].
//!
//! Every method takes the owning [`UserScope`]. There is deliberately no
//! method that reads or writes across scopes.

use memoria_types::error::VectorStoreError;
use memoria_types::memory::{MemoryRecord, MemoryType, ScoredMemory, UserScope};
use uuid::Uuid;

/// Trait for vector-indexed memory storage partitioned by user.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait VectorStore: Send + Sync {
    /// Persist one record under `record.user_scope()`.
    fn insert(
        &self,
        record: &MemoryRecord,
    ) -> impl std::future::Future<Output = Result<(), VectorStoreError>> + Send;

    /// Nearest neighbours of `query_embedding` within `user_scope`.
    ///
    /// Results are sorted by descending cosine similarity in [0, 1], at most
    /// `limit` long, and exclude anything scoring below `min_score`.
    fn search(
        &self,
        user_scope: &UserScope,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> impl std::future::Future<Output = Result<Vec<ScoredMemory>, VectorStoreError>> + Send;

    /// Exact-match lookup on the dedup fingerprint.
    fn find_by_fingerprint(
        &self,
        user_scope: &UserScope,
        fingerprint: &str,
    ) -> impl std::future::Future<Output = Result<Option<MemoryRecord>, VectorStoreError>> + Send;

    fn get(
        &self,
        user_scope: &UserScope,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<MemoryRecord>, VectorStoreError>> + Send;

    /// Most recent records first, at most `limit`.
    fn list(
        &self,
        user_scope: &UserScope,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<MemoryRecord>, VectorStoreError>> + Send;

    /// Delete one record. Returns whether it existed.
    fn delete(
        &self,
        user_scope: &UserScope,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, VectorStoreError>> + Send;

    /// Delete every record of the scope, optionally only one memory type.
    /// Returns the number of deleted records.
    fn delete_scope(
        &self,
        user_scope: &UserScope,
        memory_type: Option<MemoryType>,
    ) -> impl std::future::Future<Output = Result<u64, VectorStoreError>> + Send;

    fn count(
        &self,
        user_scope: &UserScope,
    ) -> impl std::future::Future<Output = Result<u64, VectorStoreError>> + Send;
}
