//! History repository trait.

use tramita_types::error::RepositoryError;
use tramita_types::history::WorkflowHistory;
use uuid::Uuid;

use super::SortOrder;

/// Repository trait for the append-only audit ledger.
///
/// Appends happen inside [`InstanceRepository::commit`]; this trait only
/// covers reads.
///
/// [`InstanceRepository::commit`]: super::instance::InstanceRepository::commit
pub trait HistoryRepository: Send + Sync {
    /// All entries for an instance, ordered by timestamp.
    fn list(
        &self,
        instance_id: &Uuid,
        order: SortOrder,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowHistory>, RepositoryError>> + Send;

    /// The most recent entry for an instance, if any.
    fn last_entry(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowHistory>, RepositoryError>> + Send;
}
