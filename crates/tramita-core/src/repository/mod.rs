//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (tramita-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod definition;
pub mod history;
pub mod instance;

/// Sort order for list queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}
