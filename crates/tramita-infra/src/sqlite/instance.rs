//! SQLite instance repository implementation.
//!
//! All conditional writes check the revision column inside the WHERE clause;
//! `commit` additionally couples the history append and the instance
//! overwrite in one transaction so the audit trail can never diverge from
//! instance state.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tramita_core::repository::instance::InstanceRepository;
use tramita_types::error::RepositoryError;
use tramita_types::history::WorkflowHistory;
use tramita_types::instance::{WorkflowInstance, WorkflowStatus};
use uuid::Uuid;

use super::history::bind_history_insert;
use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `InstanceRepository`.
pub struct SqliteInstanceRepository {
    pool: DatabasePool,
}

impl SqliteInstanceRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct InstanceRow {
    id: String,
    definition_id: String,
    entity_type: String,
    entity_id: String,
    citizen_id: Option<String>,
    current_stage: String,
    status: String,
    priority: i64,
    metadata: String,
    revision: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            definition_id: row.try_get("definition_id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            citizen_id: row.try_get("citizen_id")?,
            current_stage: row.try_get("current_stage")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            metadata: row.try_get("metadata")?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        let status: WorkflowStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid metadata JSON: {e}")))?;
        let completed_at = self
            .completed_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(WorkflowInstance {
            id: parse_uuid(&self.id)?,
            definition_id: parse_uuid(&self.definition_id)?,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            citizen_id: self.citizen_id,
            current_stage: self.current_stage,
            status,
            priority: self.priority,
            metadata,
            revision: self.revision,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            completed_at,
        })
    }
}

fn rows_to_instances(
    rows: Vec<sqlx::sqlite::SqliteRow>,
) -> Result<Vec<WorkflowInstance>, RepositoryError> {
    rows.iter()
        .map(|row| {
            InstanceRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_instance()
        })
        .collect()
}

fn metadata_json(instance: &WorkflowInstance) -> Result<String, RepositoryError> {
    serde_json::to_string(&instance.metadata)
        .map_err(|e| RepositoryError::Query(format!("serialize metadata: {e}")))
}

// ---------------------------------------------------------------------------
// InstanceRepository impl
// ---------------------------------------------------------------------------

impl InstanceRepository for SqliteInstanceRepository {
    async fn create(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_instances
               (id, definition_id, entity_type, entity_id, citizen_id, current_stage,
                status, priority, metadata, revision, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance.id.to_string())
        .bind(instance.definition_id.to_string())
        .bind(&instance.entity_type)
        .bind(&instance.entity_id)
        .bind(&instance.citizen_id)
        .bind(&instance.current_stage)
        .bind(instance.status.as_str())
        .bind(instance.priority)
        .bind(metadata_json(instance)?)
        .bind(instance.revision)
        .bind(format_datetime(&instance.created_at))
        .bind(format_datetime(&instance.updated_at))
        .bind(instance.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = InstanceRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn commit(
        &self,
        instance: &WorkflowInstance,
        expected_revision: i64,
        entry: &WorkflowHistory,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        bind_history_insert(entry)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = bind_instance_update(instance, expected_revision)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Rolls back the history insert too
            tx.rollback()
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            return Err(RepositoryError::Conflict(format!(
                "instance {} revision {} is stale",
                instance.id, expected_revision
            )));
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn update(
        &self,
        instance: &WorkflowInstance,
        expected_revision: i64,
    ) -> Result<(), RepositoryError> {
        let result = bind_instance_update(instance, expected_revision)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "instance {} revision {} is stale",
                instance.id, expected_revision
            )));
        }
        Ok(())
    }

    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_instances
               WHERE entity_type = ? AND entity_id = ?
               ORDER BY created_at DESC"#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_instances(rows)
    }

    async fn find_by_citizen(
        &self,
        citizen_id: &str,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"SELECT * FROM workflow_instances
                       WHERE citizen_id = ? AND status = ?
                       ORDER BY created_at DESC"#,
                )
                .bind(citizen_id)
                .bind(status.as_str())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    r#"SELECT * FROM workflow_instances
                       WHERE citizen_id = ?
                       ORDER BY created_at DESC"#,
                )
                .bind(citizen_id)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_instances(rows)
    }

    async fn find_by_stage(
        &self,
        definition_id: &Uuid,
        stage: &str,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_instances
               WHERE definition_id = ? AND current_stage = ? AND status = 'ACTIVE'
               ORDER BY priority DESC, created_at ASC"#,
        )
        .bind(definition_id.to_string())
        .bind(stage)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_instances(rows)
    }

    async fn find_stale(
        &self,
        definition_id: &Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_instances
               WHERE definition_id = ? AND status = 'ACTIVE' AND updated_at <= ?
               ORDER BY updated_at ASC"#,
        )
        .bind(definition_id.to_string())
        .bind(format_datetime(&cutoff))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_instances(rows)
    }

    async fn list_by_definition(
        &self,
        definition_id: &Uuid,
        created_from: Option<DateTime<Utc>>,
        created_to: Option<DateTime<Utc>>,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        // Open bounds collapse to the full text range
        let from = created_from
            .as_ref()
            .map(format_datetime)
            .unwrap_or_else(|| "0000".to_string());
        let to = created_to
            .as_ref()
            .map(format_datetime)
            .unwrap_or_else(|| "9999".to_string());

        let rows = sqlx::query(
            r#"SELECT * FROM workflow_instances
               WHERE definition_id = ? AND created_at >= ? AND created_at <= ?
               ORDER BY created_at ASC"#,
        )
        .bind(definition_id.to_string())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_instances(rows)
    }
}

/// Conditional instance overwrite, shared by `commit` and `update`.
fn bind_instance_update(
    instance: &WorkflowInstance,
    expected_revision: i64,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"UPDATE workflow_instances
           SET entity_id = ?, citizen_id = ?, current_stage = ?, status = ?,
               priority = ?, metadata = ?, revision = ?, updated_at = ?, completed_at = ?
           WHERE id = ? AND revision = ?"#,
    )
    .bind(&instance.entity_id)
    .bind(&instance.citizen_id)
    .bind(&instance.current_stage)
    .bind(instance.status.as_str())
    .bind(instance.priority)
    .bind(
        serde_json::to_string(&instance.metadata)
            .unwrap_or_else(|_| "{}".to_string()),
    )
    .bind(instance.revision)
    .bind(format_datetime(&instance.updated_at))
    .bind(instance.completed_at.as_ref().map(format_datetime))
    .bind(instance.id.to_string())
    .bind(expected_revision)
}
