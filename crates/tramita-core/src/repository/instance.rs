//! Instance repository trait.

use chrono::{DateTime, Utc};
use tramita_types::error::RepositoryError;
use tramita_types::history::WorkflowHistory;
use tramita_types::instance::{WorkflowInstance, WorkflowStatus};
use uuid::Uuid;

/// Repository trait for workflow instance persistence.
///
/// All mutating writes are guarded by the instance's `revision` counter:
/// the caller passes the revision it read, the store applies the write only
/// if it still matches, and returns `Conflict` otherwise. [`commit`] applies
/// the instance update and the history append in a single transaction so the
/// audit trail and instance state can never diverge.
///
/// [`commit`]: InstanceRepository::commit
pub trait InstanceRepository: Send + Sync {
    /// Persist a new instance at revision 0.
    fn create(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an instance by its UUID.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Atomically append a history entry and overwrite the instance,
    /// conditional on `expected_revision`. The passed instance must already
    /// carry `expected_revision + 1`.
    fn commit(
        &self,
        instance: &WorkflowInstance,
        expected_revision: i64,
        entry: &WorkflowHistory,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite the instance without a history entry, conditional on
    /// `expected_revision`. Used only for the entity-id backfill.
    fn update(
        &self,
        instance: &WorkflowInstance,
        expected_revision: i64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All instances bound to the given domain record, newest first.
    fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// All instances for a citizen, optionally filtered by status, newest first.
    fn find_by_citizen(
        &self,
        citizen_id: &str,
        status: Option<WorkflowStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// ACTIVE instances of a definition sitting at the given stage,
    /// ordered by priority DESC then created_at ASC (work queue order).
    fn find_by_stage(
        &self,
        definition_id: &Uuid,
        stage: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// ACTIVE instances of a definition with `updated_at <= cutoff`,
    /// ordered by updated_at ASC (stalest first).
    fn find_stale(
        &self,
        definition_id: &Uuid,
        cutoff: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// All instances of a definition, optionally bounded by created_at,
    /// for statistics aggregation.
    fn list_by_definition(
        &self,
        definition_id: &Uuid,
        created_from: Option<DateTime<Utc>>,
        created_to: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;
}
