//! Pipeline orchestration core for Datumflow.
//!
//! This crate defines the capability traits ("ports") that external
//! collaborators implement -- dataset probes, script runners and versioning
//! services -- and everything that drives a run on top of them. It depends
//! only on `datumflow-types`; no storage or process-execution code lives here.

pub mod config;
pub mod event;
pub mod pipeline;
