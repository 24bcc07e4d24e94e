//! Embedder trait for text-to-vector conversion.
//!
//! Implementations (e.g., local fastembed models) live in memoria-infra.

use memoria_types::error::EmbeddingError;

/// Trait for converting text into embedding vectors.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations do not retry; a failed or timed-out call surfaces as
/// [`EmbeddingError`] and the caller decides how to degrade.
pub trait Embedder: Send + Sync {
    /// Embed one or more texts into vectors.
    ///
    /// Returns one vector per input text, in input order.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send;

    /// The model name used for embeddings (e.g., "bge-small-en-v1.5").
    fn model_name(&self) -> &str;

    /// The dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}
