//! Vector database infrastructure for memory embeddings.
//!
//! Provides LanceDB connection management, the `VectorStore` implementation
//! over a single collection table, and fastembed-based local embedding
//! generation. Arrow schemas define the table structure.

pub mod embedder;
pub mod lance;
pub mod memory;
pub mod schema;
