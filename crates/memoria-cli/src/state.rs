//! Application state wiring the memory subsystem together.
//!
//! Pins the core orchestration types to the concrete infra implementations
//! chosen by `memoria.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;

use memoria_core::memory::box_embedder::BoxEmbedder;
use memoria_core::memory::box_vector::BoxVectorStore;
use memoria_core::memory::dedup::DeduplicationEngine;
use memoria_core::memory::extractor::FactExtractor;
use memoria_core::memory::in_memory::InMemoryVectorStore;
use memoria_core::memory::retrieval::RetrievalEngine;
use memoria_core::memory::rewriter::QueryRewriter;
use memoria_core::memory::scheduler::{ExtractionPipeline, ExtractionScheduler};
use memoria_core::memory::service::MemoryService;
use memoria_infra::config::load_memory_config;
use memoria_infra::hash::Sha256ContentHasher;
use memoria_infra::llm::{create_extraction_provider, create_rewrite_provider};
use memoria_infra::vector::embedder::{default_model_cache, FastEmbedEmbedder};
use memoria_infra::vector::lance::LanceConnection;
use memoria_infra::vector::memory::LanceMemoryStore;
use memoria_types::config::{MemoryConfig, StoreBackend};
use memoria_types::memory::ExtractionReport;

pub struct AppState {
    pub service: MemoryService,
    pub config_path: PathBuf,
    /// Batch reports from the extraction workers.
    pub reports: mpsc::UnboundedReceiver<ExtractionReport>,
}

async fn open_store(config: &MemoryConfig) -> anyhow::Result<BoxVectorStore> {
    match config.store.backend {
        StoreBackend::Memory => Ok(BoxVectorStore::new(InMemoryVectorStore::new(
            config.store.dimension,
        ))),
        StoreBackend::LanceDb => {
            let conn = LanceConnection::open(&config.store.uri)
                .await
                .with_context(|| format!("Failed to open vector store at '{}'", config.store.uri))?;
            let store =
                LanceMemoryStore::open(conn, &config.store.collection, config.store.dimension)
                    .await?;
            Ok(BoxVectorStore::new(store))
        }
    }
}

async fn load_embedder(config: &MemoryConfig) -> anyhow::Result<BoxEmbedder> {
    let kind = config.embedding.model;
    let timeout = Duration::from_secs(config.embedding.timeout_seconds);
    let embedder = tokio::task::spawn_blocking(move || {
        FastEmbedEmbedder::new(kind, default_model_cache(), timeout)
    })
    .await
    .context("Embedding model loader panicked")??;
    Ok(BoxEmbedder::with_dimension(embedder, config.store.dimension))
}

impl AppState {
    /// Load configuration and wire every component.
    pub async fn init(config_path: &Path) -> anyhow::Result<Self> {
        let config = load_memory_config(config_path)
            .await
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

        let store = Arc::new(open_store(&config).await?);
        let embedder = Arc::new(load_embedder(&config).await?);
        let (report_tx, reports) = mpsc::unbounded_channel();

        let scheduler = config.extraction.enabled.then(|| {
            let provider = Arc::new(create_extraction_provider(&config.extraction));
            let pipeline = ExtractionPipeline::new(
                FactExtractor::new(provider, &config.extraction),
                embedder.clone(),
                store.clone(),
                DeduplicationEngine::new(
                    store.clone(),
                    Arc::new(Sha256ContentHasher::new()),
                    &config.deduplication,
                ),
            );
            ExtractionScheduler::with_report_sink(pipeline, &config.extraction, report_tx)
        });

        let mut retrieval = RetrievalEngine::new(store.clone(), embedder);
        if config.query_rewrite.enabled {
            let provider = Arc::new(create_rewrite_provider(&config.query_rewrite));
            retrieval = retrieval.with_rewriter(QueryRewriter::new(provider, &config.query_rewrite));
        }

        tracing::debug!(
            backend = ?config.store.backend,
            collection = %config.store.collection,
            extraction = config.extraction.enabled,
            query_rewrite = config.query_rewrite.enabled,
            "Memory subsystem ready"
        );

        Ok(Self {
            service: MemoryService::new(config, store, retrieval, scheduler),
            config_path: config_path.to_path_buf(),
            reports,
        })
    }
}
