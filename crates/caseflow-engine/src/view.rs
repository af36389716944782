//! External read models
//!
//! Projections handed to worklist UIs and host services. The `status`
//! union is derived, never stored: `completed` if the row completed, else
//! `claimed` if a claim exists, else `pending`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use caseflow_net::OfferTemplate;

use crate::store::{ParentRef, WorkItemRow, WorkItemState, WorkflowRow, WorkflowState};

/// Derived worklist status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Claimed,
    Completed,
}

/// Work-item metadata exposed to external consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemView {
    pub id: Uuid,
    pub work_item_id: Uuid,
    pub workflow_id: Uuid,
    pub aggregate_id: Option<String>,
    pub task_name: String,
    pub task_type: String,
    pub status: WorkItemStatus,
    pub state: WorkItemState,
    pub required_scope: Option<String>,
    pub required_group_id: Option<String>,
    pub claimed_by: Option<String>,
    pub priority: Option<i32>,
    pub payload: Value,
}

/// Project a work-item row into its external metadata
pub fn work_item_view(row: &WorkItemRow) -> WorkItemView {
    let status = if row.state == WorkItemState::Completed {
        WorkItemStatus::Completed
    } else if row.claim.is_some() {
        WorkItemStatus::Claimed
    } else {
        WorkItemStatus::Pending
    };

    let (required_scope, required_group_id) = match &row.offer {
        Some(OfferTemplate::Human {
            required_scope,
            required_group_id,
        }) => (Some(required_scope.clone()), required_group_id.clone()),
        _ => (None, None),
    };

    WorkItemView {
        id: row.id,
        work_item_id: row.id,
        workflow_id: row.workflow_id,
        aggregate_id: row.aggregate_id.clone(),
        task_name: row.task_name.clone(),
        task_type: "task".to_string(),
        status,
        state: row.state,
        required_scope,
        required_group_id,
        claimed_by: row.claim.as_ref().map(|claim| claim.claimant().to_string()),
        priority: row.priority,
        payload: row.payload.clone(),
    }
}

/// Workflow metadata exposed to external consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub state: WorkflowState,
    pub parent: Option<ParentRef>,
    pub created_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

/// Project a workflow row into its external metadata
pub fn workflow_view(row: &WorkflowRow) -> WorkflowView {
    WorkflowView {
        id: row.id,
        name: row.name.clone(),
        version: row.version,
        state: row.state,
        parent: row.parent.clone(),
        created_at: row.created_at,
        terminated_at: row.terminated_at,
    }
}
