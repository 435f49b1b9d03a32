//! SQLite definition repository implementation.
//!
//! Stage lists are stored as JSON blobs; the definition row otherwise
//! carries the columns the engine filters on.

use sqlx::Row;
use tramita_core::repository::definition::DefinitionRepository;
use tramita_types::definition::{Stage, WorkflowDefinition};
use tramita_types::error::RepositoryError;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `DefinitionRepository`.
pub struct SqliteDefinitionRepository {
    pool: DatabasePool,
}

impl SqliteDefinitionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct DefinitionRow {
    id: String,
    name: String,
    version: i64,
    is_active: i64,
    stages: String,
    created_at: String,
    updated_at: String,
}

impl DefinitionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            is_active: row.try_get("is_active")?,
            stages: row.try_get("stages")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        let stages: Vec<Stage> = serde_json::from_str(&self.stages)
            .map_err(|e| RepositoryError::Query(format!("invalid stages JSON: {e}")))?;
        Ok(WorkflowDefinition {
            id: parse_uuid(&self.id)?,
            name: self.name,
            version: self.version as u32,
            is_active: self.is_active != 0,
            stages,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

impl DefinitionRepository for SqliteDefinitionRepository {
    async fn create(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let stages_json = serde_json::to_string(&def.stages)
            .map_err(|e| RepositoryError::Query(format!("serialize stages: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_definitions
               (id, name, version, is_active, stages, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(def.id.to_string())
        .bind(&def.name)
        .bind(def.version as i64)
        .bind(def.is_active as i64)
        .bind(&stages_json)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = DefinitionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_definitions ORDER BY name, version")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                DefinitionRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_definition()
            })
            .collect()
    }

    async fn set_active(&self, id: &Uuid, is_active: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_definitions SET is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(is_active as i64)
        .bind(format_datetime(&chrono::Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
