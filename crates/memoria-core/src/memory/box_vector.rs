//! BoxVectorStore -- object-safe dynamic dispatch wrapper for VectorStore.
//!
//! 1. Define an object-safe `VectorStoreDyn` trait with boxed futures
//! 2. Blanket-impl `VectorStoreDyn` for all `T: VectorStore`
//! 3. `BoxVectorStore` wraps `Box<dyn VectorStoreDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use memoria_types::error::VectorStoreError;
use memoria_types::memory::{MemoryRecord, MemoryType, ScoredMemory, UserScope};
use uuid::Uuid;

use super::vector::VectorStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VectorStoreError>> + Send + 'a>>;

/// Object-safe version of [`VectorStore`] with boxed futures.
pub trait VectorStoreDyn: Send + Sync {
    fn insert_boxed<'a>(&'a self, record: &'a MemoryRecord) -> BoxFuture<'a, ()>;

    fn search_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        query_embedding: &'a [f32],
        limit: usize,
        min_score: f32,
    ) -> BoxFuture<'a, Vec<ScoredMemory>>;

    fn find_by_fingerprint_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Option<MemoryRecord>>;

    fn get_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        id: &'a Uuid,
    ) -> BoxFuture<'a, Option<MemoryRecord>>;

    fn list_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        limit: usize,
    ) -> BoxFuture<'a, Vec<MemoryRecord>>;

    fn delete_boxed<'a>(&'a self, user_scope: &'a UserScope, id: &'a Uuid) -> BoxFuture<'a, bool>;

    fn delete_scope_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        memory_type: Option<MemoryType>,
    ) -> BoxFuture<'a, u64>;

    fn count_boxed<'a>(&'a self, user_scope: &'a UserScope) -> BoxFuture<'a, u64>;
}

impl<T: VectorStore> VectorStoreDyn for T {
    fn insert_boxed<'a>(&'a self, record: &'a MemoryRecord) -> BoxFuture<'a, ()> {
        Box::pin(self.insert(record))
    }

    fn search_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        query_embedding: &'a [f32],
        limit: usize,
        min_score: f32,
    ) -> BoxFuture<'a, Vec<ScoredMemory>> {
        Box::pin(self.search(user_scope, query_embedding, limit, min_score))
    }

    fn find_by_fingerprint_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Option<MemoryRecord>> {
        Box::pin(self.find_by_fingerprint(user_scope, fingerprint))
    }

    fn get_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        id: &'a Uuid,
    ) -> BoxFuture<'a, Option<MemoryRecord>> {
        Box::pin(self.get(user_scope, id))
    }

    fn list_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        limit: usize,
    ) -> BoxFuture<'a, Vec<MemoryRecord>> {
        Box::pin(self.list(user_scope, limit))
    }

    fn delete_boxed<'a>(&'a self, user_scope: &'a UserScope, id: &'a Uuid) -> BoxFuture<'a, bool> {
        Box::pin(self.delete(user_scope, id))
    }

    fn delete_scope_boxed<'a>(
        &'a self,
        user_scope: &'a UserScope,
        memory_type: Option<MemoryType>,
    ) -> BoxFuture<'a, u64> {
        Box::pin(self.delete_scope(user_scope, memory_type))
    }

    fn count_boxed<'a>(&'a self, user_scope: &'a UserScope) -> BoxFuture<'a, u64> {
        Box::pin(self.count(user_scope))
    }
}

/// Type-erased vector store for runtime backend selection (LanceDB or
/// in-process).
pub struct BoxVectorStore {
    inner: Box<dyn VectorStoreDyn + Send + Sync>,
}

impl BoxVectorStore {
    /// Wrap a concrete `VectorStore` in a type-erased box.
    pub fn new<T: VectorStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub async fn insert(&self, record: &MemoryRecord) -> Result<(), VectorStoreError> {
        self.inner.insert_boxed(record).await
    }

    pub async fn search(
        &self,
        user_scope: &UserScope,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>, VectorStoreError> {
        self.inner
            .search_boxed(user_scope, query_embedding, limit, min_score)
            .await
    }

    pub async fn find_by_fingerprint(
        &self,
        user_scope: &UserScope,
        fingerprint: &str,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        self.inner
            .find_by_fingerprint_boxed(user_scope, fingerprint)
            .await
    }

    pub async fn get(
        &self,
        user_scope: &UserScope,
        id: &Uuid,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        self.inner.get_boxed(user_scope, id).await
    }

    pub async fn list(
        &self,
        user_scope: &UserScope,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, VectorStoreError> {
        self.inner.list_boxed(user_scope, limit).await
    }

    pub async fn delete(&self, user_scope: &UserScope, id: &Uuid) -> Result<bool, VectorStoreError> {
        self.inner.delete_boxed(user_scope, id).await
    }

    pub async fn delete_scope(
        &self,
        user_scope: &UserScope,
        memory_type: Option<MemoryType>,
    ) -> Result<u64, VectorStoreError> {
        self.inner.delete_scope_boxed(user_scope, memory_type).await
    }

    pub async fn count(&self, user_scope: &UserScope) -> Result<u64, VectorStoreError> {
        self.inner.count_boxed(user_scope).await
    }
}
