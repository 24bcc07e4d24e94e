//! BoxEmbedder -- object-safe dynamic dispatch wrapper for Embedder.
//!
//! 1. Define an object-safe `EmbedderDyn` trait with boxed futures
//! 2. Blanket-impl `EmbedderDyn` for all `T: Embedder`
//! 3. `BoxEmbedder` wraps `Box<dyn EmbedderDyn>` and delegates
//!
//! `BoxEmbedder` is also where the deployment dimension is enforced: every
//! vector it hands out has exactly `expected_dimension` components.

use std::future::Future;
use std::pin::Pin;

use memoria_types::error::EmbeddingError;

use super::embedder::Embedder;

/// Object-safe version of [`Embedder`] with boxed futures.
pub trait EmbedderDyn: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send + 'a>>;

    fn model_name_dyn(&self) -> &str;

    fn dimension_dyn(&self) -> usize;
}

impl<T: Embedder> EmbedderDyn for T {
    fn embed_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send + 'a>> {
        Box::pin(self.embed(texts))
    }

    fn model_name_dyn(&self) -> &str {
        self.model_name()
    }

    fn dimension_dyn(&self) -> usize {
        self.dimension()
    }
}

/// Type-erased embedder with dimension enforcement.
///
/// Since `Embedder` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxEmbedder` provides equivalent methods that delegate to the
/// inner `EmbedderDyn` trait object.
pub struct BoxEmbedder {
    inner: Box<dyn EmbedderDyn + Send + Sync>,
    expected_dimension: usize,
}

impl BoxEmbedder {
    /// Wrap a concrete `Embedder`; vectors must match the model's own dimension.
    pub fn new<T: Embedder + 'static>(embedder: T) -> Self {
        let expected_dimension = embedder.dimension();
        Self {
            inner: Box::new(embedder),
            expected_dimension,
        }
    }

    /// Wrap a concrete `Embedder` and require `dimension` components per vector.
    pub fn with_dimension<T: Embedder + 'static>(embedder: T, dimension: usize) -> Self {
        Self {
            inner: Box::new(embedder),
            expected_dimension: dimension,
        }
    }

    /// Embed a batch of non-empty texts.
    ///
    /// Fails with `DimensionMismatch` if any vector has the wrong length.
    /// Vectors are never truncated or padded.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }

        let vectors = self.inner.embed_boxed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Backend(format!(
                "expected {} vectors, backend returned {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.expected_dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.expected_dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Backend("backend returned no vector".to_string()))
    }

    /// The model name used for embeddings.
    pub fn model_name(&self) -> &str {
        self.inner.model_name_dyn()
    }

    /// The dimension every returned vector is guaranteed to have.
    pub fn dimension(&self) -> usize {
        self.expected_dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::HashEmbedder;

    #[tokio::test]
    async fn test_embed_one_returns_configured_dimension() {
        let embedder = BoxEmbedder::new(HashEmbedder::new(384));
        let v = embedder.embed_one("User likes green tea").await.unwrap();
        assert_eq!(v.len(), 384);
        assert_eq!(embedder.model_name(), "test-hash-embedder");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let embedder = BoxEmbedder::with_dimension(HashEmbedder::new(128), 384);
        let err = embedder.embed_one("anything").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 384,
                actual: 128
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let embedder = BoxEmbedder::new(HashEmbedder::new(384));
        assert!(matches!(
            embedder.embed_one("   ").await,
            Err(EmbeddingError::EmptyInput)
        ));
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let embedder = BoxEmbedder::new(HashEmbedder::failing(384));
        assert!(matches!(
            embedder.embed_one("hello").await,
            Err(EmbeddingError::Backend(_))
        ));
    }
}
