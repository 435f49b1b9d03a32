//! The case workflow engine.
//!
//! Stateless service driving `WorkflowInstance` records through their
//! definition's stage graph. Every mutation appends exactly one audit entry
//! and updates the instance in a single repository transaction; per-instance
//! read-modify-write sequences are serialized through a keyed lock table,
//! with the instance revision counter as the storage-level backstop.
//!
//! Mutations on different instances proceed fully in parallel; reads are
//! uncoordinated and may observe a slightly stale snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tramita_types::definition::{CreateDefinitionRequest, WorkflowDefinition};
use tramita_types::error::WorkflowError;
use tramita_types::history::{actions, CANCELLED_STAGE, COMPLETED_STAGE, WorkflowHistory};
use tramita_types::instance::{Actor, CreateInstanceRequest, WorkflowInstance, WorkflowStatus};
use tramita_types::stats::{StatisticsPeriod, StatusCounts, WorkflowStatistics};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::graph::{self, StageGraph};
use crate::repository::definition::DefinitionRepository;
use crate::repository::history::HistoryRepository;
use crate::repository::instance::InstanceRepository;
use crate::repository::SortOrder;

/// The generic case workflow engine.
///
/// Generic over repository traits to maintain clean architecture --
/// tramita-core never depends on tramita-infra. The clock is injected so
/// durations and staleness are deterministic under test.
pub struct WorkflowEngine<D, I, H, C = SystemClock> {
    definitions: D,
    instances: I,
    history: H,
    clock: C,
    /// Per-instance mutation locks. Entries are created on first touch and
    /// kept for the process lifetime; one case never outlives its protocol.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<D, I, H, C> WorkflowEngine<D, I, H, C>
where
    D: DefinitionRepository,
    I: InstanceRepository,
    H: HistoryRepository,
    C: Clock,
{
    pub fn new(definitions: D, instances: I, history: H, clock: C) -> Self {
        Self {
            definitions,
            instances,
            history,
            clock,
            locks: DashMap::new(),
        }
    }

    fn instance_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Create a new definition after validating its stage graph.
    pub async fn create_definition(
        &self,
        request: CreateDefinitionRequest,
    ) -> Result<WorkflowDefinition, WorkflowError> {
        let now = self.clock.now();
        let def = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: request.name,
            version: request.version,
            is_active: request.is_active,
            stages: request.stages,
            created_at: now,
            updated_at: now,
        };
        graph::validate_definition(&def)?;

        self.definitions.create(&def).await?;
        tracing::info!(definition_id = %def.id, name = %def.name, "workflow definition created");
        Ok(def)
    }

    pub async fn get_definition(&self, id: &Uuid) -> Result<WorkflowDefinition, WorkflowError> {
        self.definitions
            .get(id)
            .await?
            .ok_or(WorkflowError::DefinitionNotFound)
    }

    pub async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, WorkflowError> {
        Ok(self.definitions.list().await?)
    }

    /// Activate or deactivate a definition. Deactivation only blocks new
    /// instances; running instances keep transitioning.
    pub async fn set_definition_active(
        &self,
        id: &Uuid,
        is_active: bool,
    ) -> Result<WorkflowDefinition, WorkflowError> {
        self.definitions
            .set_active(id, is_active)
            .await
            .map_err(|e| match e {
                tramita_types::error::RepositoryError::NotFound => {
                    WorkflowError::DefinitionNotFound
                }
                other => other.into(),
            })?;
        self.get_definition(id).await
    }

    /// Resolve a definition and its validated stage graph.
    async fn resolve_graph(
        &self,
        definition_id: &Uuid,
    ) -> Result<(WorkflowDefinition, StageGraph), WorkflowError> {
        let def = self.get_definition(definition_id).await?;
        let graph = StageGraph::build(&def.stages)?;
        Ok((def, graph))
    }

    // -----------------------------------------------------------------------
    // Instance creation and entity backfill
    // -----------------------------------------------------------------------

    /// Create a new instance bound to an active definition.
    ///
    /// The initial stage is validated against the definition's stage set, so
    /// an instance can never start outside its graph.
    pub async fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let def = self.get_definition(&request.definition_id).await?;
        if !def.is_active {
            return Err(WorkflowError::DefinitionInactive);
        }
        if !def.has_stage(&request.current_stage) {
            return Err(WorkflowError::UnknownStage(request.current_stage));
        }

        let now = self.clock.now();
        let instance = WorkflowInstance {
            id: Uuid::now_v7(),
            definition_id: request.definition_id,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            citizen_id: request.citizen_id,
            current_stage: request.current_stage,
            status: WorkflowStatus::Active,
            priority: request.priority.unwrap_or(0),
            metadata: request.metadata.unwrap_or_default(),
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.instances.create(&instance).await?;
        tracing::info!(
            instance_id = %instance.id,
            definition_id = %instance.definition_id,
            entity_type = %instance.entity_type,
            stage = %instance.current_stage,
            "workflow instance created"
        );
        Ok(instance)
    }

    /// Backfill the owning domain record's id (two-phase link).
    ///
    /// The domain record and the instance reference each other and cannot be
    /// created atomically; this narrow operation completes the link without
    /// exposing a general unconditional patch.
    pub async fn attach_entity(
        &self,
        id: &Uuid,
        entity_id: &str,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let lock = self.instance_lock(*id);
        let _guard = lock.lock().await;

        let mut instance = self.load(id).await?;
        let expected = instance.revision;
        instance.entity_id = entity_id.to_string();
        instance.updated_at = self.clock.now();
        instance.revision += 1;

        self.instances.update(&instance, expected).await?;
        Ok(instance)
    }

    // -----------------------------------------------------------------------
    // Transitions and lifecycle
    // -----------------------------------------------------------------------

    /// Move an ACTIVE instance to another stage of its definition.
    ///
    /// Precondition order: instance exists, status is ACTIVE, target stage
    /// exists in the definition, target is in the current stage's allowed
    /// set (empty set = unrestricted). The audit entry is written together
    /// with the instance update; a failed precondition leaves both untouched.
    pub async fn transition(
        &self,
        id: &Uuid,
        to_stage: &str,
        action: &str,
        actor: &Actor,
        notes: Option<String>,
        attachments: Option<serde_json::Value>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let lock = self.instance_lock(*id);
        let _guard = lock.lock().await;

        let mut instance = self.load(id).await?;
        if instance.status != WorkflowStatus::Active {
            return Err(self.status_error(&instance));
        }

        let (_, graph) = self.resolve_graph(&instance.definition_id).await?;
        if !graph.contains(to_stage) {
            return Err(WorkflowError::UnknownStage(to_stage.to_string()));
        }
        if !graph.allows(&instance.current_stage, to_stage) {
            return Err(WorkflowError::IllegalTransition {
                from: instance.current_stage.clone(),
                to: to_stage.to_string(),
            });
        }

        let now = self.clock.now();
        let duration_secs = self.seconds_since_last_entry(id, now).await?;

        let entry = WorkflowHistory {
            id: Uuid::now_v7(),
            instance_id: *id,
            from_stage: instance.current_stage.clone(),
            to_stage: to_stage.to_string(),
            action: action.to_string(),
            user_id: actor.user_id.clone(),
            user_name: actor.user_name.clone(),
            notes,
            attachments,
            timestamp: now,
            duration_secs,
        };

        let expected = instance.revision;
        instance.current_stage = to_stage.to_string();
        instance.updated_at = now;
        instance.revision += 1;

        self.instances.commit(&instance, expected, &entry).await?;
        tracing::debug!(
            instance_id = %id,
            from = %entry.from_stage,
            to = %entry.to_stage,
            action = %entry.action,
            "workflow transition"
        );
        Ok(instance)
    }

    /// Pause an ACTIVE instance.
    pub async fn pause(
        &self,
        id: &Uuid,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.lifecycle(id, actor, LifecycleOp::Pause, reason).await
    }

    /// Resume a PAUSED instance.
    pub async fn resume(
        &self,
        id: &Uuid,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.lifecycle(id, actor, LifecycleOp::Resume, notes).await
    }

    /// Complete an instance. Terminal: nothing may mutate it afterwards.
    pub async fn complete(
        &self,
        id: &Uuid,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.lifecycle(id, actor, LifecycleOp::Complete, notes).await
    }

    /// Cancel an instance. Terminal: nothing may mutate it afterwards.
    pub async fn cancel(
        &self,
        id: &Uuid,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.lifecycle(id, actor, LifecycleOp::Cancel, reason).await
    }

    /// Record an out-of-band failure signal from the calling service.
    /// Keeps the current stage; the instance must be explicitly recovered.
    pub async fn register_error(
        &self,
        id: &Uuid,
        actor: &Actor,
        error_message: Option<String>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.lifecycle(id, actor, LifecycleOp::RegisterError, error_message)
            .await
    }

    /// Recover an ERROR instance back to ACTIVE.
    pub async fn recover(
        &self,
        id: &Uuid,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.lifecycle(id, actor, LifecycleOp::Recover, notes).await
    }

    /// Shared read-modify-write for the lifecycle operations. Each one is a
    /// degenerate transition record plus a status flip.
    async fn lifecycle(
        &self,
        id: &Uuid,
        actor: &Actor,
        op: LifecycleOp,
        notes: Option<String>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let lock = self.instance_lock(*id);
        let _guard = lock.lock().await;

        let mut instance = self.load(id).await?;
        op.check(instance.status)?;

        let now = self.clock.now();
        let entry = WorkflowHistory {
            id: Uuid::now_v7(),
            instance_id: *id,
            from_stage: instance.current_stage.clone(),
            to_stage: op
                .sentinel_stage()
                .unwrap_or(&instance.current_stage)
                .to_string(),
            action: op.action().to_string(),
            user_id: actor.user_id.clone(),
            user_name: actor.user_name.clone(),
            notes: notes.or_else(|| Some(op.default_notes().to_string())),
            attachments: None,
            timestamp: now,
            duration_secs: None,
        };

        let expected = instance.revision;
        instance.status = op.target_status();
        instance.updated_at = now;
        instance.revision += 1;
        if matches!(op, LifecycleOp::Complete) {
            instance.completed_at = Some(now);
        }

        self.instances.commit(&instance, expected, &entry).await?;
        tracing::info!(
            instance_id = %id,
            action = op.action(),
            status = %instance.status,
            "workflow lifecycle change"
        );
        Ok(instance)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn find_by_id(&self, id: &Uuid) -> Result<WorkflowInstance, WorkflowError> {
        self.load(id).await
    }

    pub async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowInstance>, WorkflowError> {
        Ok(self.instances.find_by_entity(entity_type, entity_id).await?)
    }

    pub async fn find_by_citizen(
        &self,
        citizen_id: &str,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowInstance>, WorkflowError> {
        Ok(self.instances.find_by_citizen(citizen_id, status).await?)
    }

    pub async fn find_by_stage(
        &self,
        definition_id: &Uuid,
        stage: &str,
    ) -> Result<Vec<WorkflowInstance>, WorkflowError> {
        Ok(self.instances.find_by_stage(definition_id, stage).await?)
    }

    /// Full audit trail of an instance, oldest entry first.
    pub async fn get_history(&self, id: &Uuid) -> Result<Vec<WorkflowHistory>, WorkflowError> {
        self.load(id).await?;
        Ok(self.history.list(id, SortOrder::Asc).await?)
    }

    /// ACTIVE instances of a definition untouched for at least
    /// `threshold_minutes` (inclusive boundary), stalest first.
    pub async fn find_stale_workflows(
        &self,
        definition_id: &Uuid,
        threshold_minutes: i64,
    ) -> Result<Vec<WorkflowInstance>, WorkflowError> {
        let cutoff = self.clock.now() - Duration::minutes(threshold_minutes);
        Ok(self.instances.find_stale(definition_id, cutoff).await?)
    }

    /// Aggregate statistics over a definition's instances, optionally
    /// bounded by creation time.
    pub async fn get_statistics(
        &self,
        definition_id: &Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<WorkflowStatistics, WorkflowError> {
        self.get_definition(definition_id).await?;
        let instances = self
            .instances
            .list_by_definition(definition_id, from, to)
            .await?;

        let mut by_status = StatusCounts::default();
        let mut active_by_stage: HashMap<String, u64> = HashMap::new();
        let mut completion_minutes = 0.0_f64;
        let mut completed_with_time = 0u64;

        for instance in &instances {
            match instance.status {
                WorkflowStatus::Active => {
                    by_status.active += 1;
                    *active_by_stage
                        .entry(instance.current_stage.clone())
                        .or_insert(0) += 1;
                }
                WorkflowStatus::Paused => by_status.paused += 1,
                WorkflowStatus::Completed => by_status.completed += 1,
                WorkflowStatus::Cancelled => by_status.cancelled += 1,
                WorkflowStatus::Error => by_status.error += 1,
            }

            if instance.status == WorkflowStatus::Completed {
                if let Some(completed_at) = instance.completed_at {
                    completion_minutes +=
                        (completed_at - instance.created_at).num_seconds() as f64 / 60.0;
                    completed_with_time += 1;
                }
            }
        }

        let mean_completion_minutes = if completed_with_time > 0 {
            (completion_minutes / completed_with_time as f64).round() as u64
        } else {
            0
        };

        let period = if from.is_some() || to.is_some() {
            Some(StatisticsPeriod { from, to })
        } else {
            None
        };

        Ok(WorkflowStatistics {
            total: instances.len() as u64,
            by_status,
            mean_completion_minutes,
            active_by_stage,
            period,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn load(&self, id: &Uuid) -> Result<WorkflowInstance, WorkflowError> {
        self.instances
            .get(id)
            .await?
            .ok_or(WorkflowError::InstanceNotFound)
    }

    /// Map a wrong-status precondition: terminal statuses report
    /// `TerminalState`, everything else reports `InvalidStatus`.
    fn status_error(&self, instance: &WorkflowInstance) -> WorkflowError {
        if instance.status.is_terminal() {
            WorkflowError::TerminalState(instance.status)
        } else {
            WorkflowError::InvalidStatus(instance.status)
        }
    }

    async fn seconds_since_last_entry(
        &self,
        id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, WorkflowError> {
        let last = self.history.last_entry(id).await?;
        Ok(last.map(|entry| (now - entry.timestamp).num_seconds()))
    }
}

/// The five status-flipping operations, factored so `lifecycle` can share
/// the audit/commit plumbing.
#[derive(Debug, Clone, Copy)]
enum LifecycleOp {
    Pause,
    Resume,
    Complete,
    Cancel,
    RegisterError,
    Recover,
}

impl LifecycleOp {
    /// Validate the current status against the operation.
    fn check(&self, status: WorkflowStatus) -> Result<(), WorkflowError> {
        if status.is_terminal() {
            // A second complete reports the more specific error.
            if matches!(self, LifecycleOp::Complete) && status == WorkflowStatus::Completed {
                return Err(WorkflowError::AlreadyCompleted);
            }
            return Err(WorkflowError::TerminalState(status));
        }
        match self {
            LifecycleOp::Pause => (status == WorkflowStatus::Active)
                .then_some(())
                .ok_or(WorkflowError::InvalidStatus(status)),
            LifecycleOp::Resume => (status == WorkflowStatus::Paused)
                .then_some(())
                .ok_or(WorkflowError::InvalidStatus(status)),
            LifecycleOp::Recover => (status == WorkflowStatus::Error)
                .then_some(())
                .ok_or(WorkflowError::InvalidStatus(status)),
            // Complete, cancel, and error registration are permitted from
            // any non-terminal status.
            LifecycleOp::Complete | LifecycleOp::Cancel | LifecycleOp::RegisterError => Ok(()),
        }
    }

    fn target_status(&self) -> WorkflowStatus {
        match self {
            LifecycleOp::Pause => WorkflowStatus::Paused,
            LifecycleOp::Resume | LifecycleOp::Recover => WorkflowStatus::Active,
            LifecycleOp::Complete => WorkflowStatus::Completed,
            LifecycleOp::Cancel => WorkflowStatus::Cancelled,
            LifecycleOp::RegisterError => WorkflowStatus::Error,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            LifecycleOp::Pause => actions::PAUSE,
            LifecycleOp::Resume => actions::RESUME,
            LifecycleOp::Complete => actions::COMPLETE,
            LifecycleOp::Cancel => actions::CANCEL,
            LifecycleOp::RegisterError => actions::ERROR,
            LifecycleOp::Recover => actions::RECOVER,
        }
    }

    /// Sentinel `to_stage` for the terminal operations; the rest record a
    /// degenerate `from == to` entry.
    fn sentinel_stage(&self) -> Option<&'static str> {
        match self {
            LifecycleOp::Complete => Some(COMPLETED_STAGE),
            LifecycleOp::Cancel => Some(CANCELLED_STAGE),
            _ => None,
        }
    }

    fn default_notes(&self) -> &'static str {
        match self {
            LifecycleOp::Pause => "Workflow pausado",
            LifecycleOp::Resume => "Workflow retomado",
            LifecycleOp::Complete => "Workflow completado",
            LifecycleOp::Cancel => "Workflow cancelado",
            LifecycleOp::RegisterError => "Erro no workflow",
            LifecycleOp::Recover => "Workflow recuperado",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex as StdMutex;
    use tramita_types::definition::Stage;
    use tramita_types::error::RepositoryError;

    // -----------------------------------------------------------------------
    // In-memory repository double shared by all three ports
    // -----------------------------------------------------------------------

    #[derive(Clone, Default)]
    struct MemRepo {
        definitions: Arc<StdMutex<HashMap<Uuid, WorkflowDefinition>>>,
        instances: Arc<StdMutex<HashMap<Uuid, WorkflowInstance>>>,
        history: Arc<StdMutex<Vec<WorkflowHistory>>>,
    }

    impl DefinitionRepository for MemRepo {
        async fn create(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
            self.definitions.lock().unwrap().insert(def.id, def.clone());
            Ok(())
        }

        async fn get(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
            Ok(self.definitions.lock().unwrap().get(id).cloned())
        }

        async fn list(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
            let mut defs: Vec<_> = self.definitions.lock().unwrap().values().cloned().collect();
            defs.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
            Ok(defs)
        }

        async fn set_active(&self, id: &Uuid, is_active: bool) -> Result<(), RepositoryError> {
            let mut defs = self.definitions.lock().unwrap();
            let def = defs.get_mut(id).ok_or(RepositoryError::NotFound)?;
            def.is_active = is_active;
            Ok(())
        }
    }

    impl InstanceRepository for MemRepo {
        async fn create(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
            self.instances
                .lock()
                .unwrap()
                .insert(instance.id, instance.clone());
            Ok(())
        }

        async fn get(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
            Ok(self.instances.lock().unwrap().get(id).cloned())
        }

        async fn commit(
            &self,
            instance: &WorkflowInstance,
            expected_revision: i64,
            entry: &WorkflowHistory,
        ) -> Result<(), RepositoryError> {
            let mut instances = self.instances.lock().unwrap();
            let current = instances
                .get(&instance.id)
                .ok_or(RepositoryError::NotFound)?;
            if current.revision != expected_revision {
                return Err(RepositoryError::Conflict("revision mismatch".to_string()));
            }
            self.history.lock().unwrap().push(entry.clone());
            instances.insert(instance.id, instance.clone());
            Ok(())
        }

        async fn update(
            &self,
            instance: &WorkflowInstance,
            expected_revision: i64,
        ) -> Result<(), RepositoryError> {
            let mut instances = self.instances.lock().unwrap();
            let current = instances
                .get(&instance.id)
                .ok_or(RepositoryError::NotFound)?;
            if current.revision != expected_revision {
                return Err(RepositoryError::Conflict("revision mismatch".to_string()));
            }
            instances.insert(instance.id, instance.clone());
            Ok(())
        }

        async fn find_by_entity(
            &self,
            entity_type: &str,
            entity_id: &str,
        ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
            let mut found: Vec<_> = self
                .instances
                .lock()
                .unwrap()
                .values()
                .filter(|i| i.entity_type == entity_type && i.entity_id == entity_id)
                .cloned()
                .collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(found)
        }

        async fn find_by_citizen(
            &self,
            citizen_id: &str,
            status: Option<WorkflowStatus>,
        ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
            let mut found: Vec<_> = self
                .instances
                .lock()
                .unwrap()
                .values()
                .filter(|i| i.citizen_id.as_deref() == Some(citizen_id))
                .filter(|i| status.is_none_or(|s| i.status == s))
                .cloned()
                .collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(found)
        }

        async fn find_by_stage(
            &self,
            definition_id: &Uuid,
            stage: &str,
        ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
            let mut found: Vec<_> = self
                .instances
                .lock()
                .unwrap()
                .values()
                .filter(|i| {
                    i.definition_id == *definition_id
                        && i.current_stage == stage
                        && i.status == WorkflowStatus::Active
                })
                .cloned()
                .collect();
            found.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
            Ok(found)
        }

        async fn find_stale(
            &self,
            definition_id: &Uuid,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
            let mut found: Vec<_> = self
                .instances
                .lock()
                .unwrap()
                .values()
                .filter(|i| {
                    i.definition_id == *definition_id
                        && i.status == WorkflowStatus::Active
                        && i.updated_at <= cutoff
                })
                .cloned()
                .collect();
            found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
            Ok(found)
        }

        async fn list_by_definition(
            &self,
            definition_id: &Uuid,
            created_from: Option<DateTime<Utc>>,
            created_to: Option<DateTime<Utc>>,
        ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
            Ok(self
                .instances
                .lock()
                .unwrap()
                .values()
                .filter(|i| i.definition_id == *definition_id)
                .filter(|i| created_from.is_none_or(|f| i.created_at >= f))
                .filter(|i| created_to.is_none_or(|t| i.created_at <= t))
                .cloned()
                .collect())
        }
    }

    impl HistoryRepository for MemRepo {
        async fn list(
            &self,
            instance_id: &Uuid,
            order: SortOrder,
        ) -> Result<Vec<WorkflowHistory>, RepositoryError> {
            let mut entries: Vec<_> = self
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.instance_id == *instance_id)
                .cloned()
                .collect();
            entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            if order == SortOrder::Desc {
                entries.reverse();
            }
            Ok(entries)
        }

        async fn last_entry(
            &self,
            instance_id: &Uuid,
        ) -> Result<Option<WorkflowHistory>, RepositoryError> {
            Ok(self
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.instance_id == *instance_id)
                .max_by_key(|e| e.timestamp)
                .cloned())
        }
    }

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    type TestEngine = WorkflowEngine<MemRepo, MemRepo, MemRepo, ManualClock>;

    fn stage(id: &str, allowed: &[&str]) -> Stage {
        Stage {
            id: id.to_string(),
            name: id.to_string(),
            allowed_transitions: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn abc_stages() -> Vec<Stage> {
        vec![stage("A", &["B"]), stage("B", &["C"]), stage("C", &[])]
    }

    fn engine() -> (TestEngine, ManualClock) {
        let repo = MemRepo::default();
        let clock = ManualClock::new(Utc::now());
        let engine = WorkflowEngine::new(repo.clone(), repo.clone(), repo, clock.clone());
        (engine, clock)
    }

    async fn setup_definition(engine: &TestEngine, stages: Vec<Stage>) -> WorkflowDefinition {
        engine
            .create_definition(CreateDefinitionRequest {
                name: "matricula-escolar".to_string(),
                version: 1,
                is_active: true,
                stages,
            })
            .await
            .unwrap()
    }

    async fn setup_instance(engine: &TestEngine, def: &WorkflowDefinition) -> WorkflowInstance {
        engine
            .create_instance(CreateInstanceRequest {
                definition_id: def.id,
                entity_type: "matricula".to_string(),
                entity_id: "pending".to_string(),
                citizen_id: Some("cidadao-1".to_string()),
                current_stage: "A".to_string(),
                priority: None,
                metadata: None,
            })
            .await
            .unwrap()
    }

    fn actor() -> Actor {
        Actor::named("u1", "Maria")
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_requires_existing_definition() {
        let (engine, _) = engine();
        let err = engine
            .create_instance(CreateInstanceRequest {
                definition_id: Uuid::now_v7(),
                entity_type: "tfd".to_string(),
                entity_id: "1".to_string(),
                citizen_id: None,
                current_stage: "A".to_string(),
                priority: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DefinitionNotFound));
    }

    #[tokio::test]
    async fn test_create_requires_active_definition() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        engine.set_definition_active(&def.id, false).await.unwrap();

        let err = engine
            .create_instance(CreateInstanceRequest {
                definition_id: def.id,
                entity_type: "tfd".to_string(),
                entity_id: "1".to_string(),
                citizen_id: None,
                current_stage: "A".to_string(),
                priority: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DefinitionInactive));
    }

    #[tokio::test]
    async fn test_create_validates_initial_stage() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;

        let err = engine
            .create_instance(CreateInstanceRequest {
                definition_id: def.id,
                entity_type: "tfd".to_string(),
                entity_id: "1".to_string(),
                citizen_id: None,
                current_stage: "NOPE".to_string(),
                priority: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownStage(s) if s == "NOPE"));
    }

    #[tokio::test]
    async fn test_attach_entity_backfills_id() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;
        assert_eq!(instance.entity_id, "pending");

        let updated = engine.attach_entity(&instance.id, "matricula-42").await.unwrap();
        assert_eq!(updated.entity_id, "matricula-42");
        assert_eq!(updated.revision, 1);

        let reloaded = engine.find_by_id(&instance.id).await.unwrap();
        assert_eq!(reloaded.entity_id, "matricula-42");
    }

    // -----------------------------------------------------------------------
    // The A -> B -> C scenario
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_full_scenario() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;
        assert_eq!(instance.status, WorkflowStatus::Active);
        assert_eq!(instance.current_stage, "A");

        let instance = engine
            .transition(&instance.id, "B", "ADVANCE", &actor(), None, None)
            .await
            .unwrap();
        assert_eq!(instance.current_stage, "B");
        assert_eq!(engine.get_history(&instance.id).await.unwrap().len(), 1);

        // A is not in B's allowed set
        let err = engine
            .transition(&instance.id, "A", "BACK", &actor(), None, None)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, WorkflowError::IllegalTransition { from, to } if from == "B" && to == "A")
        );

        let instance = engine
            .transition(&instance.id, "C", "ADVANCE", &actor(), None, None)
            .await
            .unwrap();
        assert_eq!(instance.current_stage, "C");
        assert_eq!(engine.get_history(&instance.id).await.unwrap().len(), 2);

        let instance = engine.complete(&instance.id, &actor(), None).await.unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert!(instance.completed_at.is_some());

        let history = engine.get_history(&instance.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].to_stage, COMPLETED_STAGE);
        assert_eq!(instance.completed_at, Some(history[2].timestamp));
    }

    #[tokio::test]
    async fn test_transition_to_unknown_stage() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        let err = engine
            .transition(&instance.id, "Z", "ADVANCE", &actor(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownStage(s) if s == "Z"));

        // Nothing changed, nothing recorded
        let reloaded = engine.find_by_id(&instance.id).await.unwrap();
        assert_eq!(reloaded.current_stage, "A");
        assert!(engine.get_history(&instance.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_allowed_set_is_unrestricted() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, vec![stage("A", &[]), stage("B", &[])]).await;
        let instance = setup_instance(&engine, &def).await;

        let instance = engine
            .transition(&instance.id, "B", "ADVANCE", &actor(), None, None)
            .await
            .unwrap();
        assert_eq!(instance.current_stage, "B");
    }

    // -----------------------------------------------------------------------
    // Durations and history ordering
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_history_durations() {
        let (engine, clock) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        engine
            .transition(&instance.id, "B", "ADVANCE", &actor(), None, None)
            .await
            .unwrap();
        clock.advance_secs(90);
        engine
            .transition(&instance.id, "C", "ADVANCE", &actor(), None, None)
            .await
            .unwrap();

        let history = engine.get_history(&instance.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].duration_secs, None);
        assert_eq!(history[1].duration_secs, Some(90));
        assert_eq!(
            history[1].duration_secs,
            Some((history[1].timestamp - history[0].timestamp).num_seconds())
        );
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        let paused = engine.pause(&instance.id, &actor(), None).await.unwrap();
        assert_eq!(paused.status, WorkflowStatus::Paused);

        // Transitions are rejected while paused
        let err = engine
            .transition(&instance.id, "B", "ADVANCE", &actor(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStatus(WorkflowStatus::Paused)));

        // Pausing twice is rejected
        let err = engine.pause(&instance.id, &actor(), None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStatus(WorkflowStatus::Paused)));

        let resumed = engine.resume(&instance.id, &actor(), None).await.unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Active);

        let history = engine.get_history(&instance.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, actions::PAUSE);
        assert_eq!(history[0].from_stage, history[0].to_stage);
        assert_eq!(history[1].action, actions::RESUME);
        assert_eq!(history[0].notes.as_deref(), Some("Workflow pausado"));
    }

    #[tokio::test]
    async fn test_complete_from_paused() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        engine.pause(&instance.id, &actor(), None).await.unwrap();
        let completed = engine.complete(&instance.id, &actor(), None).await.unwrap();
        assert_eq!(completed.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_double_complete_fails_without_history() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        engine.complete(&instance.id, &actor(), None).await.unwrap();
        let before = engine.get_history(&instance.id).await.unwrap().len();

        let err = engine.complete(&instance.id, &actor(), None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyCompleted));
        assert_eq!(engine.get_history(&instance.id).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        let cancelled = engine.cancel(&instance.id, &actor(), None).await.unwrap();
        assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
        assert!(cancelled.completed_at.is_none());

        let history = engine.get_history(&instance.id).await.unwrap();
        assert_eq!(history[0].to_stage, CANCELLED_STAGE);

        for result in [
            engine.cancel(&instance.id, &actor(), None).await,
            engine.complete(&instance.id, &actor(), None).await,
            engine.pause(&instance.id, &actor(), None).await,
            engine.resume(&instance.id, &actor(), None).await,
            engine.register_error(&instance.id, &actor(), None).await,
            engine
                .transition(&instance.id, "B", "ADVANCE", &actor(), None, None)
                .await,
        ] {
            assert!(matches!(
                result.unwrap_err(),
                WorkflowError::TerminalState(WorkflowStatus::Cancelled)
            ));
        }

        // Unchanged after all the rejections
        let reloaded = engine.find_by_id(&instance.id).await.unwrap();
        assert_eq!(reloaded.status, WorkflowStatus::Cancelled);
        assert_eq!(engine.get_history(&instance.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_error_and_recover() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        let errored = engine
            .register_error(&instance.id, &actor(), Some("integração falhou".to_string()))
            .await
            .unwrap();
        assert_eq!(errored.status, WorkflowStatus::Error);
        assert_eq!(errored.current_stage, "A");

        // ERROR is not transitionable until recovered
        let err = engine
            .transition(&instance.id, "B", "ADVANCE", &actor(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStatus(WorkflowStatus::Error)));

        let recovered = engine.recover(&instance.id, &actor(), None).await.unwrap();
        assert_eq!(recovered.status, WorkflowStatus::Active);

        // Recover only applies to ERROR
        let err = engine.recover(&instance.id, &actor(), None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStatus(WorkflowStatus::Active)));

        let history = engine.get_history(&instance.id).await.unwrap();
        assert_eq!(history[0].action, actions::ERROR);
        assert_eq!(history[0].notes.as_deref(), Some("integração falhou"));
        assert_eq!(history[1].action, actions::RECOVER);
    }

    #[tokio::test]
    async fn test_register_error_from_paused_and_error() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        // A failure signal can land while the case is paused
        engine.pause(&instance.id, &actor(), None).await.unwrap();
        let errored = engine.register_error(&instance.id, &actor(), None).await.unwrap();
        assert_eq!(errored.status, WorkflowStatus::Error);
        assert_eq!(errored.current_stage, "A");

        // And again while already in ERROR
        let again = engine.register_error(&instance.id, &actor(), None).await.unwrap();
        assert_eq!(again.status, WorkflowStatus::Error);

        let history = engine.get_history(&instance.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].action, actions::ERROR);
        assert_eq!(history[2].action, actions::ERROR);
        assert_eq!(history[2].notes.as_deref(), Some("Erro no workflow"));
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_find_by_entity_and_citizen() {
        let (engine, _) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;
        engine.attach_entity(&instance.id, "rec-7").await.unwrap();

        let by_entity = engine.find_by_entity("matricula", "rec-7").await.unwrap();
        assert_eq!(by_entity.len(), 1);
        assert_eq!(by_entity[0].id, instance.id);

        let by_citizen = engine.find_by_citizen("cidadao-1", None).await.unwrap();
        assert_eq!(by_citizen.len(), 1);

        engine.pause(&instance.id, &actor(), None).await.unwrap();
        let active_only = engine
            .find_by_citizen("cidadao-1", Some(WorkflowStatus::Active))
            .await
            .unwrap();
        assert!(active_only.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_stage_orders_by_priority() {
        let (engine, clock) = engine();
        let def = setup_definition(&engine, abc_stages()).await;

        let mut ids = Vec::new();
        for priority in [0, 5, 5] {
            let instance = engine
                .create_instance(CreateInstanceRequest {
                    definition_id: def.id,
                    entity_type: "tfd".to_string(),
                    entity_id: "x".to_string(),
                    citizen_id: None,
                    current_stage: "A".to_string(),
                    priority: Some(priority),
                    metadata: None,
                })
                .await
                .unwrap();
            ids.push(instance.id);
            clock.advance_secs(1);
        }

        let queue = engine.find_by_stage(&def.id, "A").await.unwrap();
        // priority DESC, then created_at ASC
        assert_eq!(
            queue.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![ids[1], ids[2], ids[0]]
        );
    }

    #[tokio::test]
    async fn test_stale_boundary_is_inclusive() {
        let (engine, clock) = engine();
        let def = setup_definition(&engine, abc_stages()).await;

        let stale = setup_instance(&engine, &def).await;
        clock.advance_minutes(1);
        let fresh = setup_instance(&engine, &def).await;
        clock.advance_minutes(59);

        // stale: updated 60 min ago (== cutoff, included)
        // fresh: updated 59 min ago (excluded)
        let found = engine.find_stale_workflows(&def.id, 60).await.unwrap();
        assert_eq!(found.iter().map(|i| i.id).collect::<Vec<_>>(), vec![stale.id]);

        clock.advance_minutes(2);
        let found = engine.find_stale_workflows(&def.id, 60).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, stale.id);
        let _ = fresh;
    }

    #[tokio::test]
    async fn test_stale_excludes_non_active() {
        let (engine, clock) = engine();
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;
        engine.pause(&instance.id, &actor(), None).await.unwrap();

        clock.advance_minutes(120);
        assert!(engine.find_stale_workflows(&def.id, 60).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_statistics() {
        let (engine, clock) = engine();
        let def = setup_definition(&engine, abc_stages()).await;

        let completed = setup_instance(&engine, &def).await;
        let active_a = setup_instance(&engine, &def).await;
        let active_b = setup_instance(&engine, &def).await;
        let cancelled = setup_instance(&engine, &def).await;

        engine
            .transition(&active_b.id, "B", "ADVANCE", &actor(), None, None)
            .await
            .unwrap();
        engine.cancel(&cancelled.id, &actor(), None).await.unwrap();
        clock.advance_minutes(30);
        engine.complete(&completed.id, &actor(), None).await.unwrap();

        let stats = engine.get_statistics(&def.id, None, None).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_status.active, 2);
        assert_eq!(stats.by_status.completed, 1);
        assert_eq!(stats.by_status.cancelled, 1);
        assert_eq!(stats.by_status.paused, 0);
        assert_eq!(stats.mean_completion_minutes, 30);
        assert_eq!(stats.active_by_stage.get("A"), Some(&1));
        assert_eq!(stats.active_by_stage.get("B"), Some(&1));
        assert!(stats.period.is_none());
        let _ = active_a;
    }

    #[tokio::test]
    async fn test_statistics_period_filter() {
        let (engine, clock) = engine();
        let def = setup_definition(&engine, abc_stages()).await;

        let early = clock.now();
        setup_instance(&engine, &def).await;
        clock.advance_minutes(60);
        setup_instance(&engine, &def).await;

        let stats = engine
            .get_statistics(&def.id, None, Some(early + Duration::minutes(30)))
            .await
            .unwrap();
        assert_eq!(stats.total, 1);
        assert!(stats.period.is_some());
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_racing_transitions_never_both_succeed_from_same_stage() {
        let (engine, _) = engine();
        let def =
            setup_definition(&engine, vec![stage("A", &["B", "C"]), stage("B", &[]), stage("C", &[])])
                .await;
        // B and C allow nothing, so whichever transition runs second must fail.
        let instance = setup_instance(&engine, &def).await;
        let engine = Arc::new(engine);

        let (e1, e2) = (engine.clone(), engine.clone());
        let id = instance.id;
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move {
                e1.transition(&id, "B", "ADVANCE", &Actor::new("u1"), None, None)
                    .await
            }),
            tokio::spawn(async move {
                e2.transition(&id, "C", "ADVANCE", &Actor::new("u2"), None, None)
                    .await
            }),
        );

        let results = [r1.unwrap(), r2.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let history = engine.get_history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_revision_commit_is_rejected() {
        let repo = MemRepo::default();
        let clock = ManualClock::new(Utc::now());
        let engine: TestEngine =
            WorkflowEngine::new(repo.clone(), repo.clone(), repo.clone(), clock);
        let def = setup_definition(&engine, abc_stages()).await;
        let instance = setup_instance(&engine, &def).await;

        // Simulate a writer that bumps the revision behind the engine's back.
        {
            let mut instances = repo.instances.lock().unwrap();
            instances.get_mut(&instance.id).unwrap().revision += 1;
        }

        let mut moved = instance.clone();
        moved.current_stage = "B".to_string();
        moved.revision = instance.revision + 1;
        let entry = WorkflowHistory {
            id: Uuid::now_v7(),
            instance_id: instance.id,
            from_stage: "A".to_string(),
            to_stage: "B".to_string(),
            action: "ADVANCE".to_string(),
            user_id: "u1".to_string(),
            user_name: None,
            notes: None,
            attachments: None,
            timestamp: Utc::now(),
            duration_secs: None,
        };

        let err = InstanceRepository::commit(&repo, &moved, instance.revision, &entry)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        // History untouched on the failed commit
        assert!(repo.history.lock().unwrap().is_empty());
    }
}
