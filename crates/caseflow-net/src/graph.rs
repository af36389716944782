//! Serializable structure graphs
//!
//! The static projection of a definition consumed by visualizers and the
//! debugger UI: nodes, edges, and regions by name, with no run-time state.

use serde::{Deserialize, Serialize};

use crate::definition::{FlowDef, JoinKind, RegionOwner, SplitKind, WorkflowDefinition};

/// Static graph for one `(workflow, version)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureGraph {
    pub workflow: String,
    pub nodes: Vec<StructureNode>,
    pub edges: Vec<StructureEdge>,
    pub regions: Vec<StructureRegion>,
}

/// A node of the bipartite graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StructureNode {
    Task {
        name: String,
        task_type: String,
        join: JoinKind,
        split: SplitKind,
    },
    Condition {
        name: String,
        is_start: bool,
        is_end: bool,
        is_implicit: bool,
    },
}

/// A directed edge between two named elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureEdge {
    pub from: String,
    pub to: String,
}

/// A cancellation region with its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureRegion {
    pub name: String,
    pub owner: String,
    pub tasks: Vec<String>,
    pub conditions: Vec<String>,
}

impl StructureGraph {
    /// Project a definition into its static graph
    pub fn from_definition(def: &WorkflowDefinition) -> Self {
        let mut nodes = Vec::with_capacity(def.tasks().len() + def.conditions().len());

        for task in def.tasks() {
            nodes.push(StructureNode::Task {
                name: task.name.clone(),
                task_type: task.kind.tag().to_string(),
                join: task.join,
                split: task.split,
            });
        }
        for condition in def.conditions() {
            nodes.push(StructureNode::Condition {
                name: condition.name.clone(),
                is_start: condition.is_start,
                is_end: condition.is_end,
                is_implicit: condition.is_implicit,
            });
        }

        let edges = def
            .flows()
            .iter()
            .map(|flow| match flow {
                FlowDef::ConditionToTask { condition, task } => StructureEdge {
                    from: condition.clone(),
                    to: task.clone(),
                },
                FlowDef::TaskToCondition { task, condition } => StructureEdge {
                    from: task.clone(),
                    to: condition.clone(),
                },
            })
            .collect();

        let regions = def
            .regions()
            .iter()
            .map(|region| StructureRegion {
                name: region.name.clone(),
                owner: match &region.owner {
                    RegionOwner::Task(name) | RegionOwner::Condition(name) => name.clone(),
                },
                tasks: region.tasks.clone(),
                conditions: region.conditions.clone(),
            })
            .collect();

        Self {
            workflow: def.name().to_string(),
            nodes,
            edges,
            regions,
        }
    }
}
