//! Memory orchestration and port traits for Memoria.
//!
//! This crate defines the traits the infrastructure layer implements
//! (embedding, vector storage, LLM completion, hashing). It depends only on
//! `memoria-types`, never on `memoria-infra` or any model or database crate.

pub mod llm;
pub mod memory;
