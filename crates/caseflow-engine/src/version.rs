//! Workflow versioning
//!
//! Definitions register as named versions (v1, v2, …). The manager is
//! assembled at startup and frozen; only the deprecation flag flips
//! afterwards. Deprecated versions refuse new root initializations but
//! keep servicing in-flight instances.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use caseflow_net::{StructureGraph, WorkflowDefinition};

use crate::error::EngineError;

/// One registered `(name, version)` pair with its sub-workflow definitions
pub struct WorkflowVersion {
    name: String,
    version: u32,
    definition: Arc<WorkflowDefinition>,
    sub_definitions: HashMap<String, Arc<WorkflowDefinition>>,
    deprecated: AtomicBool,
}

impl WorkflowVersion {
    pub fn new(version: u32, definition: WorkflowDefinition) -> Self {
        Self {
            name: definition.name().to_string(),
            version,
            definition: Arc::new(definition),
            sub_definitions: HashMap::new(),
            deprecated: AtomicBool::new(false),
        }
    }

    /// Register a sub-workflow definition referenced by composite tasks
    pub fn with_sub_workflow(mut self, definition: WorkflowDefinition) -> Self {
        self.sub_definitions
            .insert(definition.name().to_string(), Arc::new(definition));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn sub_definition(&self, name: &str) -> Option<&Arc<WorkflowDefinition>> {
        self.sub_definitions.get(name)
    }

    /// Definition for any workflow name this version can instantiate
    pub fn definition_named(&self, name: &str) -> Option<&Arc<WorkflowDefinition>> {
        if name == self.name {
            Some(&self.definition)
        } else {
            self.sub_definitions.get(name)
        }
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated.load(Ordering::Relaxed)
    }

    pub fn deprecate(&self) {
        self.deprecated.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for WorkflowVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowVersion")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("sub_workflows", &self.sub_definitions.keys().collect::<Vec<_>>())
            .field("deprecated", &self.is_deprecated())
            .finish()
    }
}

/// Registry of workflow versions, frozen after construction
#[derive(Debug, Default)]
pub struct VersionManager {
    versions: HashMap<String, BTreeMap<u32, Arc<WorkflowVersion>>>,
}

impl VersionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a version; duplicate `(name, version)` is a data-integrity
    /// error
    pub fn register(&mut self, version: WorkflowVersion) -> Result<(), EngineError> {
        let by_version = self.versions.entry(version.name.clone()).or_default();
        if by_version.contains_key(&version.version) {
            return Err(EngineError::DataIntegrity {
                message: format!(
                    "workflow '{}' version {} already registered",
                    version.name, version.version
                ),
            });
        }
        by_version.insert(version.version, Arc::new(version));
        Ok(())
    }

    pub fn get(&self, name: &str, version: u32) -> Option<&Arc<WorkflowVersion>> {
        self.versions.get(name)?.get(&version)
    }

    /// Highest registered version of a name
    pub fn latest(&self, name: &str) -> Option<&Arc<WorkflowVersion>> {
        self.versions.get(name)?.values().next_back()
    }

    /// All versions of a name, ascending
    pub fn versions_of(&self, name: &str) -> impl Iterator<Item = &Arc<WorkflowVersion>> {
        self.versions.get(name).into_iter().flat_map(|m| m.values())
    }

    /// Flag a version as deprecated
    pub fn deprecate(&self, name: &str, version: u32) -> Result<(), EngineError> {
        let entry = self
            .get(name, version)
            .ok_or_else(|| EngineError::not_found("workflow version", format!("{name} v{version}")))?;
        entry.deprecate();
        Ok(())
    }

    /// Static graph for a `(name, version)` pair, for visualizers
    pub fn structure(&self, name: &str, version: u32) -> Result<StructureGraph, EngineError> {
        let entry = self
            .get(name, version)
            .ok_or_else(|| EngineError::not_found("workflow version", format!("{name} v{version}")))?;
        Ok(StructureGraph::from_definition(entry.definition()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_net::{TaskBuilder, WorkflowBuilder};

    fn definition(name: &str) -> WorkflowDefinition {
        WorkflowBuilder::new(name)
            .start_condition("start")
            .end_condition("end")
            .task(TaskBuilder::regular("a"))
            .condition_to_task("start", "a")
            .task_to_condition("a", "end")
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut manager = VersionManager::new();
        manager
            .register(WorkflowVersion::new(1, definition("order")))
            .unwrap();
        manager
            .register(WorkflowVersion::new(2, definition("order")))
            .unwrap();

        assert_eq!(manager.get("order", 1).unwrap().version(), 1);
        assert_eq!(manager.latest("order").unwrap().version(), 2);
        assert_eq!(manager.versions_of("order").count(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut manager = VersionManager::new();
        manager
            .register(WorkflowVersion::new(1, definition("order")))
            .unwrap();

        let err = manager
            .register(WorkflowVersion::new(1, definition("order")))
            .unwrap_err();
        assert_eq!(err.code(), "DATA_INTEGRITY");
    }

    #[test]
    fn test_deprecation_flag() {
        let mut manager = VersionManager::new();
        manager
            .register(WorkflowVersion::new(1, definition("order")))
            .unwrap();

        assert!(!manager.get("order", 1).unwrap().is_deprecated());
        manager.deprecate("order", 1).unwrap();
        assert!(manager.get("order", 1).unwrap().is_deprecated());
    }

    #[test]
    fn test_sub_definitions_resolve() {
        let version = WorkflowVersion::new(1, definition("parent"))
            .with_sub_workflow(definition("child"));

        assert!(version.definition_named("parent").is_some());
        assert!(version.definition_named("child").is_some());
        assert!(version.definition_named("ghost").is_none());
    }

    #[test]
    fn test_structure_query() {
        let mut manager = VersionManager::new();
        manager
            .register(WorkflowVersion::new(1, definition("order")))
            .unwrap();

        let graph = manager.structure("order", 1).unwrap();
        assert_eq!(graph.workflow, "order");

        let err = manager.structure("order", 9).unwrap_err();
        assert_eq!(err.code(), "ENTITY_NOT_FOUND");
    }
}
