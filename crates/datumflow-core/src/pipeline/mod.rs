//! Pipeline engine core: definition loading, topology, variable binding,
//! node dispatch and run orchestration.
//!
//! - `definition` -- JSON/YAML parsing, structural validation
//! - `topology` -- deterministic Kahn ordering, cycle handling
//! - `binding` -- run-scoped output table and `{{sourceNode.<NAME>}}` resolution
//! - `capability` -- external collaborator contracts
//! - `dispatch` -- per-kind node executors normalizing capability results
//! - `orchestrator` -- sequential and parallel fail-fast run loops

pub mod binding;
pub mod capability;
pub mod definition;
pub mod dispatch;
pub mod orchestrator;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;
