//! Persisted row types and element states
//!
//! One row per live element. Rows are plain data; the state machines that
//! guard their transitions live in [`crate::element`], and only the
//! execution context writes them back through a commit batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use caseflow_net::{AutoTriggerKind, OfferTemplate};

/// Workflow instance lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Initialized,
    Started,
    Completed,
    Canceled,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Task (transition) lifecycle
///
/// Progression is monotonic with one exception: `canceled` may interrupt
/// `enabled` and `started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Disabled,
    Enabled,
    Started,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// In-flight states a cancellation region sweeps up
    pub fn is_active(self) -> bool {
        matches!(self, Self::Enabled | Self::Started)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Enabled => write!(f, "enabled"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Work-item lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    Initialized,
    Started,
    Completed,
    Failed,
    Canceled,
}

impl WorkItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// In-flight states a cancellation region sweeps up
    pub fn is_live(self) -> bool {
        matches!(self, Self::Initialized | Self::Started)
    }
}

impl std::fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Binding of a work item to the actor executing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Claim {
    /// Synthesized by the engine for automated offers at fire time
    Automated,

    /// A human actor bound by a successful claim
    Human { user_id: String },
}

impl Claim {
    /// Display identity of the claimant
    pub fn claimant(&self) -> &str {
        match self {
            Self::Automated => "system",
            Self::Human { user_id } => user_id,
        }
    }
}

/// Pointer from a child workflow to the composite task that spawned it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    pub workflow_id: Uuid,
    pub task_name: String,

    /// Fire counter of the parent task; distinguishes loop iterations
    pub generation: u32,
}

/// A workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: Uuid,

    /// Root workflow id; every row of one case shares it
    pub case_id: Uuid,

    pub name: String,
    pub version: u32,

    /// Empty for roots; exactly one composite parent otherwise
    pub parent: Option<ParentRef>,

    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

impl WorkflowRow {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A condition (place) instance holding a token marking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionRow {
    pub id: Uuid,
    pub case_id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,

    /// Non-negative token count; overflow is a structural-integrity failure
    pub marking: u32,

    pub is_start: bool,
    pub is_end: bool,
    pub is_implicit: bool,
}

impl ConditionRow {
    pub fn is_marked(&self) -> bool {
        self.marking > 0
    }
}

/// A task (transition) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: Uuid,
    pub case_id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub state: TaskState,

    /// Fire counter; stamps child workflows of composite tasks
    pub generation: u32,
}

/// A work item spawned by firing a regular task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemRow {
    pub id: Uuid,
    pub case_id: Uuid,
    pub workflow_id: Uuid,
    pub task_id: Uuid,
    pub task_name: String,
    pub state: WorkItemState,

    /// Who may pick this item up; set at fire time from the template
    pub offer: Option<OfferTemplate>,

    /// At most one claim over the item's lifetime
    pub claim: Option<Claim>,

    pub payload: serde_json::Value,

    /// May be set at most once
    pub auto_trigger: Option<AutoTriggerKind>,

    /// Domain entity id for external joins
    pub aggregate_id: Option<String>,

    pub priority: Option<i32>,
    pub created_at: DateTime<Utc>,
}
