//! Audit model: traces, spans, and key events
//!
//! Every API call opens one trace with a span tree under it. Key events are
//! compact projections of significant transitions, kept as an append-only
//! log indexed by trace and by case. They are the substrate for the
//! time-travel reads in [`replay`].
//!
//! Events are immutable once written; the store assigns each a per-case
//! sequence number at commit, so folding them in sequence order up to a
//! timestamp reconstructs the persisted state at that instant.

pub mod replay;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use caseflow_net::OfferTemplate;

use crate::store::{Claim, ParentRef};

pub use replay::{CaseStateAt, ChildInstanceAt, WorkflowStateAt};

/// Element kinds referenced by events and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Workflow,
    Task,
    Condition,
    WorkItem,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Task => "task",
            Self::Condition => "condition",
            Self::WorkItem => "work_item",
        }
    }
}

/// Reference to a single element, carried by key events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef {
    pub kind: ElementKind,
    pub id: Uuid,
    pub name: String,
}

impl ElementRef {
    pub fn workflow(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::Workflow,
            id,
            name: name.into(),
        }
    }

    pub fn task(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::Task,
            id,
            name: name.into(),
        }
    }

    pub fn condition(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::Condition,
            id,
            name: name.into(),
        }
    }

    pub fn work_item(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::WorkItem,
            id,
            name: name.into(),
        }
    }
}

/// Envelope for one user-initiated operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRow {
    pub trace_id: Uuid,
    pub case_id: Uuid,
    pub operation: String,
    pub workflow_name: String,
    pub workflow_version: u32,
    pub started_at: DateTime<Utc>,
}

/// One node of a trace's span tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRow {
    pub span_id: Uuid,
    pub trace_id: Uuid,

    /// Empty for the single root span of the trace
    pub parent_span_id: Option<Uuid>,

    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

/// Append-only audit record of one significant transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEventRow {
    /// Per-case sequence number, assigned by the store at commit
    pub seq: u64,

    pub trace_id: Uuid,
    pub case_id: Uuid,

    /// Workflow owning the referenced element
    pub workflow_id: Uuid,

    pub element: ElementRef,
    pub timestamp: DateTime<Utc>,
    pub kind: KeyEventKind,
}

/// The transition a key event records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyEventKind {
    WorkflowInitialized {
        name: String,
        version: u32,
        parent: Option<ParentRef>,
    },
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowCanceled {
        canceled_by: Option<ElementRef>,
    },

    TaskEnabled,
    TaskDisabled,
    TaskFired {
        generation: u32,
    },
    TaskCompleted,
    TaskFailed,
    TaskCanceled {
        canceled_by: Option<ElementRef>,
    },

    /// Absolute marking after a produce or consume
    ConditionMarked {
        marking: u32,
    },

    /// Marking reset to zero by a cancellation sweep
    ConditionReset {
        canceled_by: ElementRef,
    },

    WorkItemInitialized {
        offer: Option<OfferTemplate>,
    },
    WorkItemClaimed {
        claim: Claim,
    },
    WorkItemReleased,
    WorkItemStarted,
    WorkItemCompleted,
    WorkItemFailed,
    WorkItemCanceled {
        canceled_by: Option<ElementRef>,
    },

    ChildWorkflowSpawned {
        child_workflow_id: Uuid,
        workflow_name: String,
        generation: u32,
    },
}

/// Hex digest of a payload, for span attributes
///
/// Payloads themselves never land in spans; only their hashes do.
pub fn payload_hash(payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    hex::encode(Sha256::digest(bytes))
}
