//! Time-travel state reconstruction
//!
//! Folding a case's key events in sequence order, keeping those with
//! timestamps at or before a target instant, rebuilds the element states
//! as they were persisted at that instant. The debugger UI drives its
//! replay off these folds; the engine itself never reads them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{KeyEventKind, KeyEventRow};
use crate::store::{ParentRef, TaskState, WorkItemState, WorkflowState};

/// One workflow's reconstructed state at an instant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStateAt {
    pub workflow_id: Uuid,
    pub name: String,
    pub version: u32,
    pub parent: Option<ParentRef>,
    pub state: WorkflowState,

    /// Task states by element name
    pub tasks: HashMap<String, TaskState>,

    /// Condition markings by element name
    pub markings: HashMap<String, u32>,

    /// Work-item states by id
    pub work_items: HashMap<Uuid, WorkItemState>,
}

/// A whole case's reconstructed state at an instant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseStateAt {
    pub at: DateTime<Utc>,
    pub workflows: HashMap<Uuid, WorkflowStateAt>,
}

impl CaseStateAt {
    pub fn workflow(&self, workflow_id: Uuid) -> Option<&WorkflowStateAt> {
        self.workflows.get(&workflow_id)
    }
}

/// A child workflow observed under a composite task at an instant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildInstanceAt {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub task_name: String,
    pub generation: u32,
    pub state: WorkflowState,
}

/// Fold key events with `timestamp ≤ at` into a case state
///
/// Events must arrive in sequence order, which is how the store returns
/// them.
pub fn fold_case_state(events: &[KeyEventRow], at: DateTime<Utc>) -> CaseStateAt {
    let mut workflows: HashMap<Uuid, WorkflowStateAt> = HashMap::new();

    for event in events.iter().filter(|event| event.timestamp <= at) {
        if let KeyEventKind::WorkflowInitialized {
            name,
            version,
            parent,
        } = &event.kind
        {
            workflows.insert(
                event.workflow_id,
                WorkflowStateAt {
                    workflow_id: event.workflow_id,
                    name: name.clone(),
                    version: *version,
                    parent: parent.clone(),
                    state: WorkflowState::Initialized,
                    tasks: HashMap::new(),
                    markings: HashMap::new(),
                    work_items: HashMap::new(),
                },
            );
            continue;
        }

        let Some(workflow) = workflows.get_mut(&event.workflow_id) else {
            continue;
        };
        let element_name = event.element.name.clone();
        let element_id = event.element.id;

        match &event.kind {
            KeyEventKind::WorkflowInitialized { .. } => {}
            KeyEventKind::WorkflowStarted => workflow.state = WorkflowState::Started,
            KeyEventKind::WorkflowCompleted => workflow.state = WorkflowState::Completed,
            KeyEventKind::WorkflowCanceled { .. } => workflow.state = WorkflowState::Canceled,

            KeyEventKind::TaskEnabled => {
                workflow.tasks.insert(element_name, TaskState::Enabled);
            }
            KeyEventKind::TaskDisabled => {
                workflow.tasks.insert(element_name, TaskState::Disabled);
            }
            KeyEventKind::TaskFired { .. } => {
                workflow.tasks.insert(element_name, TaskState::Started);
            }
            KeyEventKind::TaskCompleted => {
                workflow.tasks.insert(element_name, TaskState::Completed);
            }
            KeyEventKind::TaskFailed => {
                workflow.tasks.insert(element_name, TaskState::Failed);
            }
            KeyEventKind::TaskCanceled { .. } => {
                workflow.tasks.insert(element_name, TaskState::Canceled);
            }

            KeyEventKind::ConditionMarked { marking } => {
                workflow.markings.insert(element_name, *marking);
            }
            KeyEventKind::ConditionReset { .. } => {
                workflow.markings.insert(element_name, 0);
            }

            KeyEventKind::WorkItemInitialized { .. } => {
                workflow
                    .work_items
                    .insert(element_id, WorkItemState::Initialized);
            }
            KeyEventKind::WorkItemClaimed { .. } | KeyEventKind::WorkItemReleased => {
                // Claim changes do not move the stored state machine.
            }
            KeyEventKind::WorkItemStarted => {
                workflow.work_items.insert(element_id, WorkItemState::Started);
            }
            KeyEventKind::WorkItemCompleted => {
                workflow
                    .work_items
                    .insert(element_id, WorkItemState::Completed);
            }
            KeyEventKind::WorkItemFailed => {
                workflow.work_items.insert(element_id, WorkItemState::Failed);
            }
            KeyEventKind::WorkItemCanceled { .. } => {
                workflow
                    .work_items
                    .insert(element_id, WorkItemState::Canceled);
            }

            KeyEventKind::ChildWorkflowSpawned { .. } => {
                // The child's own lifecycle events carry its state.
            }
        }
    }

    CaseStateAt { at, workflows }
}

/// Children of a composite task live at an instant
///
/// Filters by parent task name and, when given, the child workflow name;
/// only non-terminal children count as live. Results come back in id
/// order.
pub fn child_instances_at(
    events: &[KeyEventRow],
    task_name: &str,
    workflow_name: Option<&str>,
    at: DateTime<Utc>,
) -> Vec<ChildInstanceAt> {
    let state = fold_case_state(events, at);

    let mut children: Vec<ChildInstanceAt> = state
        .workflows
        .values()
        .filter_map(|workflow| {
            let parent = workflow.parent.as_ref()?;
            if parent.task_name != task_name {
                return None;
            }
            if workflow_name.is_some_and(|name| name != workflow.name) {
                return None;
            }
            if workflow.state.is_terminal() {
                return None;
            }
            Some(ChildInstanceAt {
                workflow_id: workflow.workflow_id,
                workflow_name: workflow.name.clone(),
                task_name: parent.task_name.clone(),
                generation: parent.generation,
                state: workflow.state,
            })
        })
        .collect();

    children.sort_by_key(|child| child.workflow_id);
    children
}
