//! SQLite history repository implementation.
//!
//! Read side of the append-only ledger. Appends happen through
//! [`SqliteInstanceRepository::commit`], which shares [`bind_history_insert`]
//! so the same INSERT runs inside the commit transaction.
//!
//! [`SqliteInstanceRepository::commit`]: super::instance::SqliteInstanceRepository

use sqlx::Row;
use tramita_core::repository::history::HistoryRepository;
use tramita_core::repository::SortOrder;
use tramita_types::error::RepositoryError;
use tramita_types::history::WorkflowHistory;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `HistoryRepository`.
pub struct SqliteHistoryRepository {
    pool: DatabasePool,
}

impl SqliteHistoryRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct HistoryRow {
    id: String,
    instance_id: String,
    from_stage: String,
    to_stage: String,
    action: String,
    user_id: String,
    user_name: Option<String>,
    notes: Option<String>,
    attachments: Option<String>,
    timestamp: String,
    duration_secs: Option<i64>,
}

impl HistoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            from_stage: row.try_get("from_stage")?,
            to_stage: row.try_get("to_stage")?,
            action: row.try_get("action")?,
            user_id: row.try_get("user_id")?,
            user_name: row.try_get("user_name")?,
            notes: row.try_get("notes")?,
            attachments: row.try_get("attachments")?,
            timestamp: row.try_get("timestamp")?,
            duration_secs: row.try_get("duration_secs")?,
        })
    }

    fn into_entry(self) -> Result<WorkflowHistory, RepositoryError> {
        let attachments = self
            .attachments
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid attachments JSON: {e}")))
            })
            .transpose()?;

        Ok(WorkflowHistory {
            id: parse_uuid(&self.id)?,
            instance_id: parse_uuid(&self.instance_id)?,
            from_stage: self.from_stage,
            to_stage: self.to_stage,
            action: self.action,
            user_id: self.user_id,
            user_name: self.user_name,
            notes: self.notes,
            attachments,
            timestamp: parse_datetime(&self.timestamp)?,
            duration_secs: self.duration_secs,
        })
    }
}

/// Bind the ledger INSERT for a history entry. Used by the instance
/// repository inside its commit transaction.
pub(crate) fn bind_history_insert(
    entry: &WorkflowHistory,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"INSERT INTO workflow_history
           (id, instance_id, from_stage, to_stage, action, user_id, user_name,
            notes, attachments, timestamp, duration_secs)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(entry.id.to_string())
    .bind(entry.instance_id.to_string())
    .bind(&entry.from_stage)
    .bind(&entry.to_stage)
    .bind(&entry.action)
    .bind(&entry.user_id)
    .bind(&entry.user_name)
    .bind(&entry.notes)
    .bind(
        entry
            .attachments
            .as_ref()
            .map(|a| a.to_string()),
    )
    .bind(format_datetime(&entry.timestamp))
    .bind(entry.duration_secs)
}

impl HistoryRepository for SqliteHistoryRepository {
    async fn list(
        &self,
        instance_id: &Uuid,
        order: SortOrder,
    ) -> Result<Vec<WorkflowHistory>, RepositoryError> {
        let sql = match order {
            SortOrder::Asc => {
                "SELECT * FROM workflow_history WHERE instance_id = ? ORDER BY timestamp ASC"
            }
            SortOrder::Desc => {
                "SELECT * FROM workflow_history WHERE instance_id = ? ORDER BY timestamp DESC"
            }
        };

        let rows = sqlx::query(sql)
            .bind(instance_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                HistoryRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_entry()
            })
            .collect()
    }

    async fn last_entry(
        &self,
        instance_id: &Uuid,
    ) -> Result<Option<WorkflowHistory>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_history WHERE instance_id = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = HistoryRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_entry()?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::definition::SqliteDefinitionRepository;
    use crate::sqlite::instance::SqliteInstanceRepository;
    use chrono::Utc;
    use std::collections::HashMap;
    use tramita_core::repository::definition::DefinitionRepository;
    use tramita_core::repository::instance::InstanceRepository;
    use tramita_types::definition::{Stage, WorkflowDefinition};
    use tramita_types::instance::{WorkflowInstance, WorkflowStatus};

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        // Leak tempdir so it lives for the test
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    async fn seed_instance(pool: &DatabasePool) -> WorkflowInstance {
        let now = Utc::now();
        let def = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "tfd".to_string(),
            version: 1,
            is_active: true,
            stages: vec![Stage {
                id: "A".to_string(),
                name: "Abertura".to_string(),
                allowed_transitions: vec![],
            }],
            created_at: now,
            updated_at: now,
        };
        SqliteDefinitionRepository::new(pool.clone())
            .create(&def)
            .await
            .unwrap();

        let instance = WorkflowInstance {
            id: Uuid::now_v7(),
            definition_id: def.id,
            entity_type: "tfd".to_string(),
            entity_id: "1".to_string(),
            citizen_id: None,
            current_stage: "A".to_string(),
            status: WorkflowStatus::Active,
            priority: 0,
            metadata: HashMap::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        SqliteInstanceRepository::new(pool.clone())
            .create(&instance)
            .await
            .unwrap();
        instance
    }

    fn make_entry(instance_id: Uuid, minutes_ago: i64, action: &str) -> WorkflowHistory {
        WorkflowHistory {
            id: Uuid::now_v7(),
            instance_id,
            from_stage: "A".to_string(),
            to_stage: "A".to_string(),
            action: action.to_string(),
            user_id: "u1".to_string(),
            user_name: None,
            notes: Some("nota".to_string()),
            attachments: Some(serde_json::json!({"files": ["laudo.pdf"]})),
            timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
            duration_secs: None,
        }
    }

    #[tokio::test]
    async fn test_list_orders_by_timestamp() {
        let pool = test_pool().await;
        let instance = seed_instance(&pool).await;
        let repo = SqliteHistoryRepository::new(pool.clone());

        // Inserted out of chronological order
        for (minutes_ago, action) in [(5, "SECOND"), (10, "FIRST"), (1, "THIRD")] {
            bind_history_insert(&make_entry(instance.id, minutes_ago, action))
                .execute(&pool.writer)
                .await
                .unwrap();
        }

        let asc = repo.list(&instance.id, SortOrder::Asc).await.unwrap();
        assert_eq!(
            asc.iter().map(|e| e.action.as_str()).collect::<Vec<_>>(),
            vec!["FIRST", "SECOND", "THIRD"]
        );

        let desc = repo.list(&instance.id, SortOrder::Desc).await.unwrap();
        assert_eq!(desc[0].action, "THIRD");

        let last = repo.last_entry(&instance.id).await.unwrap().unwrap();
        assert_eq!(last.action, "THIRD");
        assert_eq!(
            last.attachments.unwrap()["files"][0],
            serde_json::json!("laudo.pdf")
        );
    }

    #[tokio::test]
    async fn test_last_entry_none_for_fresh_instance() {
        let pool = test_pool().await;
        let instance = seed_instance(&pool).await;
        let repo = SqliteHistoryRepository::new(pool);

        assert!(repo.last_entry(&instance.id).await.unwrap().is_none());
        assert!(repo
            .list(&instance.id, SortOrder::Asc)
            .await
            .unwrap()
            .is_empty());
    }
}
