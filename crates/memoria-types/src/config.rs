//! Configuration types for Memoria.
//!
//! `MemoryConfig` is the deployment-level `memoria.toml`. Every field has a
//! default so an empty file is valid. `RequestMemoryConfig` is the per-request
//! override a caller attaches to a single chat turn.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Deployment configuration for the memory subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Master switch. When false, requests never touch memory.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_retrieval_limit")]
    pub default_retrieval_limit: usize,

    #[serde(default = "default_similarity_threshold")]
    pub default_similarity_threshold: f32,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub deduplication: DeduplicationConfig,

    #[serde(default)]
    pub query_rewrite: QueryRewriteConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,
}

fn default_true() -> bool {
    true
}

fn default_retrieval_limit() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.70
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_retrieval_limit: default_retrieval_limit(),
            default_similarity_threshold: default_similarity_threshold(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            deduplication: DeduplicationConfig::default(),
            query_rewrite: QueryRewriteConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

/// Which vector store implementation backs the subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Embedded LanceDB tables on disk (or a remote LanceDB URI).
    #[default]
    LanceDb,
    /// Process-local store. Contents are lost on restart.
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::LanceDb => write!(f, "lancedb"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lancedb" => Ok(StoreBackend::LanceDb),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("invalid store backend: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// LanceDB URI or directory. Relative paths resolve against the data dir.
    #[serde(default = "default_store_uri")]
    pub uri: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_store_uri() -> String {
    "vector_store".to_string()
}

fn default_collection() -> String {
    "agentic_memory".to_string()
}

fn default_dimension() -> usize {
    384
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            uri: default_store_uri(),
            collection: default_collection(),
            dimension: default_dimension(),
        }
    }
}

/// Local embedding models the subsystem knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmbeddingModelKind {
    #[default]
    #[serde(rename = "bge-small-en-v1.5")]
    BgeSmallEnV15,
    #[serde(rename = "bge-base-en-v1.5")]
    BgeBaseEnV15,
    #[serde(rename = "all-minilm-l6-v2")]
    AllMiniLmL6V2,
}

impl EmbeddingModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingModelKind::BgeSmallEnV15 => "bge-small-en-v1.5",
            EmbeddingModelKind::BgeBaseEnV15 => "bge-base-en-v1.5",
            EmbeddingModelKind::AllMiniLmL6V2 => "all-minilm-l6-v2",
        }
    }

    /// Output dimension the model produces.
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingModelKind::BgeSmallEnV15 => 384,
            EmbeddingModelKind::BgeBaseEnV15 => 768,
            EmbeddingModelKind::AllMiniLmL6V2 => 384,
        }
    }
}

impl fmt::Display for EmbeddingModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub model: EmbeddingModelKind,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_seconds: u64,
}

fn default_embedding_timeout() -> u64 {
    10
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: EmbeddingModelKind::default(),
            dimension: default_dimension(),
            timeout_seconds: default_embedding_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeduplicationConfig {
    /// Similarity at or above which a candidate counts as already stored.
    #[serde(default = "default_dedup_threshold")]
    pub threshold: f32,

    /// Neighbours inspected by the near-duplicate search.
    #[serde(default = "default_dedup_neighbors")]
    pub neighbors: usize,
}

fn default_dedup_threshold() -> f32 {
    0.92
}

fn default_dedup_neighbors() -> usize {
    3
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            threshold: default_dedup_threshold(),
            neighbors: default_dedup_neighbors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRewriteConfig {
    #[serde(default)]
    pub enabled: bool,

    /// OpenAI-compatible base URL, e.g. `http://localhost:8000/v1`.
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub model: String,

    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_rewrite_timeout")]
    pub timeout_seconds: u64,

    /// How many recent turns are shown to the rewriter.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    #[serde(default = "default_rewrite_max_tokens")]
    pub max_tokens: u32,
}

fn default_rewrite_timeout() -> u64 {
    5
}

fn default_history_turns() -> usize {
    6
}

fn default_rewrite_max_tokens() -> u32 {
    128
}

impl Default for QueryRewriteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            model: String::new(),
            api_key_env: None,
            timeout_seconds: default_rewrite_timeout(),
            history_turns: default_history_turns(),
            max_tokens: default_rewrite_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Exchanges accumulated per user before an extraction fires.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_extraction_timeout")]
    pub timeout_seconds: u64,

    /// A user's window is extracted and its worker stopped after this long
    /// without traffic. 0 keeps workers for the scheduler's lifetime.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    #[serde(default = "default_extraction_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_extraction_temperature")]
    pub temperature: f64,
}

fn default_llm_endpoint() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_llm_model() -> String {
    "qwen3".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_extraction_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    1800
}

fn default_extraction_max_tokens() -> u32 {
    500
}

fn default_extraction_temperature() -> f64 {
    0.1
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key_env: None,
            batch_size: default_batch_size(),
            timeout_seconds: default_extraction_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
            max_tokens: default_extraction_max_tokens(),
            temperature: default_extraction_temperature(),
        }
    }
}

fn check_unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            reason: format!("{value} is outside (0, 1]"),
        })
    }
}

impl MemoryConfig {
    /// Reject configurations the subsystem cannot run with.
    ///
    /// The embedding dimension must equal the store dimension: vectors are
    /// never truncated or padded to fit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store.dimension",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.embedding.dimension != self.store.dimension {
            return Err(ConfigError::DimensionMismatch {
                embedding: self.embedding.dimension,
                store: self.store.dimension,
            });
        }
        if self.embedding.model.dimension() != self.embedding.dimension {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimension",
                reason: format!(
                    "model '{}' produces {} dimensions, configured {}",
                    self.embedding.model,
                    self.embedding.model.dimension(),
                    self.embedding.dimension
                ),
            });
        }
        if self.store.collection.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.collection",
                reason: "must not be empty".to_string(),
            });
        }
        if self.default_retrieval_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_retrieval_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        check_unit_interval("default_similarity_threshold", self.default_similarity_threshold)?;
        check_unit_interval("deduplication.threshold", self.deduplication.threshold)?;
        if self.deduplication.neighbors == 0 {
            return Err(ConfigError::InvalidValue {
                field: "deduplication.neighbors",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.extraction.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "extraction.batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.query_rewrite.enabled {
            if self.query_rewrite.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    section: "query_rewrite",
                    field: "endpoint",
                });
            }
            if self.query_rewrite.model.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    section: "query_rewrite",
                    field: "model",
                });
            }
        }
        if self.extraction.enabled {
            if self.extraction.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    section: "extraction",
                    field: "endpoint",
                });
            }
            if self.extraction.model.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    section: "extraction",
                    field: "model",
                });
            }
        }
        Ok(())
    }

    /// Dedup threshold at or below the retrieval threshold collapses facts a
    /// query would consider merely related. Allowed, but worth a warning.
    pub fn dedup_threshold_overlaps_retrieval(&self) -> bool {
        self.deduplication.threshold <= self.default_similarity_threshold
    }
}

/// Per-request memory options sent alongside a chat turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMemoryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub auto_store: bool,

    #[serde(default)]
    pub retrieval_limit: Option<usize>,

    #[serde(default)]
    pub similarity_threshold: Option<f32>,
}

/// Identity attached to a request; `user_id` becomes the user scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMemoryContext {
    #[serde(default)]
    pub user_id: String,
}

/// Request options after deployment defaults were applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveMemorySettings {
    pub retrieve: bool,
    pub auto_store: bool,
    pub retrieval_limit: usize,
    pub similarity_threshold: f32,
}

impl RequestMemoryConfig {
    /// Merge with deployment defaults.
    ///
    /// Absent or non-positive numeric fields fall back to the defaults. A
    /// globally disabled subsystem disables both retrieval and storage.
    pub fn resolve(&self, deployment: &MemoryConfig) -> EffectiveMemorySettings {
        let active = deployment.enabled && self.enabled;
        EffectiveMemorySettings {
            retrieve: active,
            auto_store: deployment.enabled && self.auto_store,
            retrieval_limit: self
                .retrieval_limit
                .filter(|limit| *limit > 0)
                .unwrap_or(deployment.default_retrieval_limit),
            similarity_threshold: self
                .similarity_threshold
                .filter(|t| *t > 0.0)
                .unwrap_or(deployment.default_similarity_threshold),
        }
    }
}
