//! Observability setup for Tramita.

pub mod tracing_setup;
