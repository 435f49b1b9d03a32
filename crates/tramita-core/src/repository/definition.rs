//! Definition repository trait.

use tramita_types::definition::WorkflowDefinition;
use tramita_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for workflow definition persistence.
///
/// Definitions are immutable per version; the only in-place mutation is the
/// active flag. Uses native async fn in traits (Rust 2024 edition, no
/// async_trait macro).
pub trait DefinitionRepository: Send + Sync {
    /// Persist a new definition.
    fn create(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a definition by its UUID.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List all definitions, ordered by name then version.
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Flip the active flag. Returns `NotFound` if the definition is missing.
    fn set_active(
        &self,
        id: &Uuid,
        is_active: bool,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
