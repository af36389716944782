//! JSON workflow definition documents
//!
//! The scaffolding input format: one document carries the main workflow,
//! any sub-workflows referenced by composite tasks, and a flat scope list.
//! Tasks are discriminated by `type`; flows are typed edges; scope names
//! use colon-separated paths (`er:triage:claim`).
//!
//! ```
//! use caseflow_net::DefinitionDocument;
//!
//! let doc: DefinitionDocument = serde_json::from_str(r#"{
//!     "mainWorkflow": {
//!         "name": "triage",
//!         "tasks": [{ "type": "task", "name": "assess" }],
//!         "conditions": [
//!             { "name": "start", "isStartCondition": true },
//!             { "name": "end", "isEndCondition": true }
//!         ],
//!         "flows": [
//!             { "type": "conditionToTask", "condition": "start", "task": "assess" },
//!             { "type": "taskToCondition", "task": "assess", "condition": "end" }
//!         ]
//!     }
//! }"#).unwrap();
//!
//! let definition = doc.main_workflow.to_definition().unwrap();
//! assert_eq!(definition.name(), "triage");
//! ```

use serde::{Deserialize, Serialize};

use crate::builder::{TaskBuilder, WorkflowBuilder};
use crate::definition::{
    AutoTriggerKind, JoinKind, OfferTemplate, RegionOwner, RouterSpec, SplitKind,
    WorkflowDefinition,
};
use crate::error::DefinitionError;

/// Top-level definition document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionDocument {
    pub main_workflow: WorkflowDoc,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_workflows: Vec<WorkflowDoc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<ScopeEntry>,
}

impl DefinitionDocument {
    /// Parse a document from JSON text
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Build the main and all sub-workflow definitions
    pub fn to_definitions(
        &self,
    ) -> Result<(WorkflowDefinition, Vec<WorkflowDefinition>), DefinitionError> {
        let main = self.main_workflow.to_definition()?;
        let subs = self
            .sub_workflows
            .iter()
            .map(WorkflowDoc::to_definition)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((main, subs))
    }
}

/// A scope declaration: colon-separated path plus a description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub name: String,

    #[serde(default)]
    pub description: String,
}

/// One workflow inside a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDoc {
    pub name: String,
    pub tasks: Vec<TaskDoc>,
    pub conditions: Vec<ConditionDoc>,
    pub flows: Vec<FlowDoc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancellation_regions: Vec<RegionDoc>,
}

impl WorkflowDoc {
    /// Convert to a validated [`WorkflowDefinition`]
    pub fn to_definition(&self) -> Result<WorkflowDefinition, DefinitionError> {
        let mut builder = WorkflowBuilder::new(&self.name);

        for condition in &self.conditions {
            if condition.is_start_condition {
                builder = builder.start_condition(&condition.name);
            } else if condition.is_end_condition {
                builder = builder.end_condition(&condition.name);
            } else {
                builder = builder.condition(&condition.name);
            }
        }

        for task in &self.tasks {
            builder = builder.task(task.to_builder());
        }

        for flow in &self.flows {
            builder = match flow {
                FlowDoc::ConditionToTask { condition, task } => {
                    builder.condition_to_task(condition, task)
                }
                FlowDoc::TaskToCondition { task, condition } => {
                    builder.task_to_condition(task, condition)
                }
                FlowDoc::TaskToTask { from, to } => builder.task_to_task(from, to),
            };
        }

        for region in &self.cancellation_regions {
            builder = builder.cancellation_region(
                &region.name,
                region.owner.to_owner(),
                region.tasks.iter().map(String::as_str),
                region.conditions.iter().map(String::as_str),
            );
        }

        builder.build()
    }
}

/// A task declaration, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TaskDoc {
    Task {
        name: String,

        #[serde(default = "default_join")]
        join: JoinKind,

        #[serde(default = "default_split")]
        split: SplitKind,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        router: Option<RouterSpec>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        offer: Option<OfferTemplate>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<i32>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_trigger: Option<AutoTriggerKind>,
    },
    DummyTask {
        name: String,

        #[serde(default = "default_join")]
        join: JoinKind,

        #[serde(default = "default_split")]
        split: SplitKind,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        router: Option<RouterSpec>,
    },
    CompositeTask {
        name: String,
        workflow: String,

        #[serde(default = "default_join")]
        join: JoinKind,

        #[serde(default = "default_split")]
        split: SplitKind,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        router: Option<RouterSpec>,
    },
    DynamicCompositeTask {
        name: String,
        candidates: Vec<String>,

        #[serde(default = "default_join")]
        join: JoinKind,

        #[serde(default = "default_split")]
        split: SplitKind,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        router: Option<RouterSpec>,
    },
}

fn default_join() -> JoinKind {
    JoinKind::And
}

fn default_split() -> SplitKind {
    SplitKind::And
}

impl TaskDoc {
    fn to_builder(&self) -> TaskBuilder {
        match self {
            Self::Task {
                name,
                join,
                split,
                router,
                offer,
                priority,
                auto_trigger,
            } => {
                let mut builder = TaskBuilder::regular(name).join(*join).split(*split);
                if let Some(OfferTemplate::Human {
                    required_scope,
                    required_group_id,
                }) = offer
                {
                    builder = builder.human_offer(required_scope, required_group_id.clone());
                }
                if let Some(router) = router {
                    builder = builder.router(router.clone());
                }
                if let Some(priority) = priority {
                    builder = builder.priority(*priority);
                }
                if let Some(trigger) = auto_trigger {
                    builder = builder.auto_trigger(*trigger);
                }
                builder
            }
            Self::DummyTask {
                name,
                join,
                split,
                router,
            } => {
                let mut builder = TaskBuilder::dummy(name).join(*join).split(*split);
                if let Some(router) = router {
                    builder = builder.router(router.clone());
                }
                builder
            }
            Self::CompositeTask {
                name,
                workflow,
                join,
                split,
                router,
            } => {
                let mut builder = TaskBuilder::composite(name, workflow).join(*join).split(*split);
                if let Some(router) = router {
                    builder = builder.router(router.clone());
                }
                builder
            }
            Self::DynamicCompositeTask {
                name,
                candidates,
                join,
                split,
                router,
            } => {
                let mut builder = TaskBuilder::dynamic_composite(name, candidates.clone())
                    .join(*join)
                    .split(*split);
                if let Some(router) = router {
                    builder = builder.router(router.clone());
                }
                builder
            }
        }
    }
}

/// A condition declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionDoc {
    pub name: String,

    #[serde(default)]
    pub is_start_condition: bool,

    #[serde(default)]
    pub is_end_condition: bool,

    #[serde(default)]
    pub is_implicit_condition: bool,
}

/// A typed flow edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FlowDoc {
    ConditionToTask { condition: String, task: String },
    TaskToCondition { task: String, condition: String },
    TaskToTask { from: String, to: String },
}

/// A cancellation-region declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionDoc {
    pub name: String,
    pub owner: OwnerDoc,

    #[serde(default)]
    pub tasks: Vec<String>,

    #[serde(default)]
    pub conditions: Vec<String>,
}

/// Region owner reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OwnerDoc {
    Task { name: String },
    Condition { name: String },
}

impl OwnerDoc {
    fn to_owner(&self) -> RegionOwner {
        match self {
            Self::Task { name } => RegionOwner::Task(name.clone()),
            Self::Condition { name } => RegionOwner::Condition(name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TaskKind;

    const DOC: &str = r#"{
        "mainWorkflow": {
            "name": "intake",
            "tasks": [
                {
                    "type": "task",
                    "name": "register",
                    "offer": { "type": "human", "requiredScope": "intake.staff" },
                    "priority": 5
                },
                { "type": "dummyTask", "name": "route" },
                { "type": "compositeTask", "name": "treat", "workflow": "treatment" }
            ],
            "conditions": [
                { "name": "start", "isStartCondition": true },
                { "name": "registered" },
                { "name": "routed" },
                { "name": "end", "isEndCondition": true }
            ],
            "flows": [
                { "type": "conditionToTask", "condition": "start", "task": "register" },
                { "type": "taskToCondition", "task": "register", "condition": "registered" },
                { "type": "conditionToTask", "condition": "registered", "task": "route" },
                { "type": "taskToCondition", "task": "route", "condition": "routed" },
                { "type": "conditionToTask", "condition": "routed", "task": "treat" },
                { "type": "taskToCondition", "task": "treat", "condition": "end" }
            ],
            "cancellationRegions": [
                {
                    "name": "intake-region",
                    "owner": { "type": "task", "name": "treat" },
                    "tasks": ["register"],
                    "conditions": ["registered"]
                }
            ]
        },
        "subWorkflows": [
            {
                "name": "treatment",
                "tasks": [{ "type": "task", "name": "administer" }],
                "conditions": [
                    { "name": "start", "isStartCondition": true },
                    { "name": "end", "isEndCondition": true }
                ],
                "flows": [
                    { "type": "conditionToTask", "condition": "start", "task": "administer" },
                    { "type": "taskToCondition", "task": "administer", "condition": "end" }
                ]
            }
        ],
        "scopes": [
            { "name": "intake:staff", "description": "Front-desk staff" }
        ]
    }"#;

    #[test]
    fn test_parse_document() {
        let doc = DefinitionDocument::from_json(DOC).expect("should parse");

        assert_eq!(doc.main_workflow.name, "intake");
        assert_eq!(doc.sub_workflows.len(), 1);
        assert_eq!(doc.scopes[0].name, "intake:staff");
    }

    #[test]
    fn test_document_to_definitions() {
        let doc = DefinitionDocument::from_json(DOC).unwrap();
        let (main, subs) = doc.to_definitions().expect("should build");

        assert_eq!(main.name(), "intake");
        assert_eq!(subs[0].name(), "treatment");

        let register = main.task("register").unwrap();
        match &register.kind {
            TaskKind::Regular { work_item } => {
                assert_eq!(work_item.priority, Some(5));
                assert!(matches!(work_item.offer, OfferTemplate::Human { .. }));
            }
            other => panic!("expected regular task, got {other:?}"),
        }

        let region = main.region_owned_by_task("treat").expect("region");
        assert_eq!(region.tasks, vec!["register".to_string()]);
    }

    #[test]
    fn test_task_type_tags_roundtrip() {
        let task = TaskDoc::CompositeTask {
            name: "treat".into(),
            workflow: "treatment".into(),
            join: JoinKind::And,
            split: SplitKind::And,
            router: None,
        };

        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"type\":\"compositeTask\""));

        let parsed: TaskDoc = serde_json::from_str(&json).unwrap();
        assert_eq!(task, parsed);
    }

    #[test]
    fn test_invalid_document_surfaces_builder_error() {
        let doc = DefinitionDocument::from_json(
            r#"{
                "mainWorkflow": {
                    "name": "broken",
                    "tasks": [{ "type": "task", "name": "a" }],
                    "conditions": [{ "name": "start", "isStartCondition": true }],
                    "flows": [
                        { "type": "conditionToTask", "condition": "start", "task": "a" }
                    ]
                }
            }"#,
        )
        .unwrap();

        assert!(matches!(
            doc.to_definitions(),
            Err(DefinitionError::MissingEndCondition { .. })
        ));
    }
}
