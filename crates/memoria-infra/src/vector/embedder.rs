//! FastEmbed-based local embedding generator.
//!
//! Implements the `Embedder` trait from `memoria-core` with fastembed's ONNX
//! models. Inference is CPU-bound and blocking, so it runs on the blocking
//! pool under the configured timeout.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use memoria_core::memory::embedder::Embedder;
use memoria_types::config::EmbeddingModelKind;
use memoria_types::error::EmbeddingError;

pub struct FastEmbedEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    kind: EmbeddingModelKind,
    timeout: Duration,
}

fn fastembed_model(kind: EmbeddingModelKind) -> EmbeddingModel {
    match kind {
        EmbeddingModelKind::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
        EmbeddingModelKind::BgeBaseEnV15 => EmbeddingModel::BGEBaseENV15,
        EmbeddingModelKind::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
    }
}

/// Where downloaded model files are cached: `~/.memoria/models`.
pub fn default_model_cache() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memoria")
        .join("models")
}

impl FastEmbedEmbedder {
    /// Load (downloading on first use) the given model. Blocking.
    pub fn new(
        kind: EmbeddingModelKind,
        cache_dir: PathBuf,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let options = InitOptions::new(fastembed_model(kind))
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::Backend(format!("failed to load {kind}: {e}")))?;

        tracing::info!(model = %kind, dimension = kind.dimension(), "Loaded embedding model");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            kind,
            timeout,
        })
    }
}

impl Embedder for FastEmbedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = self.model.clone();
        let batch = texts.to_vec();
        let task = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Backend("embedding model lock poisoned".to_string()))?;
            model
                .embed(batch, None)
                .map_err(|e| EmbeddingError::Backend(e.to_string()))
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EmbeddingError::Backend(format!(
                "embedding task failed: {join_err}"
            ))),
            Err(_) => Err(EmbeddingError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    fn model_name(&self) -> &str {
        self.kind.as_str()
    }

    fn dimension(&self) -> usize {
        self.kind.dimension()
    }
}
