//! Case workflow engine for Tramita.
//!
//! Entity-agnostic finite-state-machine runtime: drives a protocol/case
//! through a dynamically defined stage graph, enforces legal transitions,
//! records an immutable audit trail, and exposes lifecycle control and
//! aggregate statistics. Department modules are thin callers; all state
//! machine semantics live here.
//!
//! This crate defines the repository traits (ports) that tramita-infra
//! implements. It never depends on any specific storage technology.

pub mod clock;
pub mod engine;
pub mod graph;
pub mod repository;
