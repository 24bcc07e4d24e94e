//! Infrastructure layer for Memoria.
//!
//! Implements the ports defined in `memoria-core`: LanceDB vector storage,
//! fastembed local embeddings, OpenAI-compatible LLM endpoints, SHA-256
//! fingerprint hashing, and the TOML configuration loader.

pub mod config;
pub mod hash;
pub mod llm;
pub mod vector;
