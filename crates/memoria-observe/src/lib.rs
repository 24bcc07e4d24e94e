//! Observability setup for Memoria binaries.

pub mod tracing_setup;
