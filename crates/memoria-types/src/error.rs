use thiserror::Error;

use crate::llm::LlmError;

/// Invalid deployment configuration. The subsystem refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("embedding dimension {embedding} does not match vector store dimension {store}")]
    DimensionMismatch { embedding: usize, store: usize },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("'{section}' is enabled but '{field}' is empty")]
    MissingField {
        section: &'static str,
        field: &'static str,
    },

    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

/// Errors from turning text into a vector.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding input is empty")]
    EmptyInput,

    #[error("embedding backend error: {0}")]
    Backend(String),

    #[error("embedding timed out after {0}ms")]
    Timeout(u64),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors from the vector store adapter.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector store connection error: {0}")]
    Connection(String),

    #[error("vector store query error: {0}")]
    Query(String),

    #[error("vector store overloaded: {0}")]
    Overloaded(String),

    #[error("memory not found")]
    NotFound,

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Top-level error for memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("extraction output could not be parsed: {reason}")]
    ExtractionParse { reason: String, preview: String },

    #[error("isolation violation: request for '{requested}' produced a record owned by '{found}'")]
    IsolationViolation { requested: String, found: String },

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("invalid user scope: '{0}'")]
    InvalidScope(String),
}

impl MemoryError {
    /// Errors that must stop the caller rather than degrade gracefully.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MemoryError::Config(_) | MemoryError::IsolationViolation { .. }
        )
    }
}
