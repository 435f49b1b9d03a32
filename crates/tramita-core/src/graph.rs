//! Stage graph validation and transition checks.
//!
//! The stage graph is loaded as data: node id -> set of allowed successor
//! ids. Structural constraints are checked once at definition-load time, so
//! the per-transition check is a plain set lookup. Cycles are legal here
//! (A ⇄ B is a valid back-and-forth between stages), unlike a dependency DAG.

use std::collections::{HashMap, HashSet};

use tramita_types::definition::{Stage, WorkflowDefinition};
use tramita_types::error::WorkflowError;

/// Validated transition graph of a definition's stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Stage id -> allowed successor ids. An empty set means unrestricted.
    edges: HashMap<String, HashSet<String>>,
}

impl StageGraph {
    /// Build and validate a graph from a definition's stage list.
    ///
    /// Checks:
    /// - At least one stage exists
    /// - No empty stage ids
    /// - All stage ids are unique
    /// - Every `allowed_transitions` entry references an existing stage id
    pub fn build(stages: &[Stage]) -> Result<Self, WorkflowError> {
        if stages.is_empty() {
            return Err(WorkflowError::DefinitionInvalid(
                "definition must contain at least one stage".to_string(),
            ));
        }

        let mut edges: HashMap<String, HashSet<String>> = HashMap::new();
        for stage in stages {
            if stage.id.trim().is_empty() {
                return Err(WorkflowError::DefinitionInvalid(
                    "stage id must not be empty".to_string(),
                ));
            }
            let prior = edges.insert(
                stage.id.clone(),
                stage.allowed_transitions.iter().cloned().collect(),
            );
            if prior.is_some() {
                return Err(WorkflowError::DefinitionInvalid(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
        }

        for stage in stages {
            for target in &stage.allowed_transitions {
                if !edges.contains_key(target.as_str()) {
                    return Err(WorkflowError::DefinitionInvalid(format!(
                        "stage '{}' allows transition to unknown stage '{}'",
                        stage.id, target
                    )));
                }
            }
        }

        Ok(Self { edges })
    }

    /// Whether the graph contains the given stage id.
    pub fn contains(&self, stage_id: &str) -> bool {
        self.edges.contains_key(stage_id)
    }

    /// Whether a transition from `from` to `to` is permitted.
    ///
    /// A stage with an empty allowed set is unrestricted; a stage id absent
    /// from the graph (should not happen on validated instances) is treated
    /// as unrestricted too, matching the engine's lenient source-side check.
    pub fn allows(&self, from: &str, to: &str) -> bool {
        match self.edges.get(from) {
            Some(allowed) if !allowed.is_empty() => allowed.contains(to),
            _ => true,
        }
    }
}

/// Validate a full definition, returning its stage graph.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<StageGraph, WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::DefinitionInvalid(
            "definition name must not be empty".to_string(),
        ));
    }
    StageGraph::build(&def.stages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: &str, allowed: &[&str]) -> Stage {
        Stage {
            id: id.to_string(),
            name: id.to_string(),
            allowed_transitions: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_valid_graph() {
        let graph =
            StageGraph::build(&[stage("A", &["B"]), stage("B", &["C", "A"]), stage("C", &[])])
                .unwrap();
        assert!(graph.contains("A"));
        assert!(graph.allows("A", "B"));
        assert!(!graph.allows("A", "C"));
        assert!(graph.allows("B", "A"));
    }

    #[test]
    fn test_empty_allowed_set_is_unrestricted() {
        let graph = StageGraph::build(&[stage("A", &[]), stage("B", &[])]).unwrap();
        assert!(graph.allows("A", "B"));
        assert!(graph.allows("B", "A"));
    }

    #[test]
    fn test_duplicate_stage_id_rejected() {
        let err = StageGraph::build(&[stage("A", &[]), stage("A", &[])]).unwrap_err();
        assert!(err.to_string().contains("duplicate stage id 'A'"));
    }

    #[test]
    fn test_unknown_transition_target_rejected() {
        let err = StageGraph::build(&[stage("A", &["Z"])]).unwrap_err();
        assert!(err.to_string().contains("unknown stage 'Z'"));
    }

    #[test]
    fn test_empty_definition_rejected() {
        assert!(StageGraph::build(&[]).is_err());
    }

    #[test]
    fn test_cycles_are_legal() {
        // Back-and-forth between review stages is a normal process shape.
        let graph = StageGraph::build(&[stage("A", &["B"]), stage("B", &["A"])]).unwrap();
        assert!(graph.allows("A", "B"));
        assert!(graph.allows("B", "A"));
    }
}
