//! Shared domain types for Memoria.
//!
//! This crate contains the core domain types of the memory subsystem:
//! memory records, retrieval queries and results, conversation turns,
//! configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
