//! Observability setup for Datumflow binaries.

pub mod tracing_setup;
