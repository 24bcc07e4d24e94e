//! Long-term memory for Memoria.
//!
//! Ports (`Embedder`, `VectorStore`, `ContentHasher`) are implemented in
//! `memoria-infra`. Everything here is pure orchestration: retrieval on the
//! request path, batched extraction in per-user background workers, and the
//! deduplication and isolation checks both rely on.

pub mod box_embedder;
pub mod box_vector;
pub mod context;
pub mod dedup;
pub mod embedder;
pub mod extractor;
pub mod fingerprint;
pub mod in_memory;
pub mod isolation;
pub mod retrieval;
pub mod rewriter;
pub mod scheduler;
pub mod service;
pub mod vector;

#[cfg(test)]
pub(crate) mod test_support;
