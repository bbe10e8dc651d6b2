//! Shared domain types for Datumflow.
//!
//! This crate contains the pipeline graph model, the per-kind node
//! configurations, run reports, run events and the global configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono.

pub mod config;
pub mod event;
pub mod node_config;
pub mod pipeline;
pub mod run;
