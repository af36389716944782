//! State store: snapshots, commit batches, and the persistence seam
//!
//! The store is transactional per case (one root workflow and everything
//! under it). An execution context loads one consistent [`CaseSnapshot`],
//! stages every write, and commits a single [`CommitBatch`] guarded by the
//! snapshot version — a mismatch means another writer won and the whole
//! mutation retries against a fresh snapshot.

mod memory;
mod rows;

pub use memory::InMemoryStateStore;
pub use rows::{
    Claim, ConditionRow, ParentRef, TaskRow, TaskState, WorkItemRow, WorkItemState, WorkflowRow,
    WorkflowState,
};

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::audit::{KeyEventRow, SpanRow, TraceRow};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Case not found
    #[error("case not found: {0}")]
    CaseNotFound(Uuid),

    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Work item not found
    #[error("work item not found: {0}")]
    WorkItemNotFound(Uuid),

    /// Trace not found
    #[error("trace not found: {0}")]
    TraceNotFound(Uuid),

    /// A case with this id already exists
    #[error("case already exists: {0}")]
    DuplicateCase(Uuid),

    /// Concurrency conflict (optimistic version check failed)
    #[error("concurrency conflict: expected version {expected}, got {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// Backend failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Consistent view of one case at a store version
///
/// Rows are keyed by id — the arena the execution context traverses.
/// Cross-element references stay ids; nothing chains object pointers.
#[derive(Debug, Clone)]
pub struct CaseSnapshot {
    pub case_id: Uuid,

    /// Store version this snapshot was taken at; commits must present it
    pub version: u64,

    pub workflows: HashMap<Uuid, WorkflowRow>,
    pub conditions: HashMap<Uuid, ConditionRow>,
    pub tasks: HashMap<Uuid, TaskRow>,
    pub work_items: HashMap<Uuid, WorkItemRow>,
}

impl CaseSnapshot {
    /// Snapshot of a case with no rows yet
    pub fn empty(case_id: Uuid) -> Self {
        Self {
            case_id,
            version: 0,
            workflows: HashMap::new(),
            conditions: HashMap::new(),
            tasks: HashMap::new(),
            work_items: HashMap::new(),
        }
    }
}

/// Staged writes of one transaction, applied atomically
#[derive(Debug, Default)]
pub struct CommitBatch {
    pub workflows: Vec<WorkflowRow>,
    pub conditions: Vec<ConditionRow>,
    pub tasks: Vec<TaskRow>,
    pub work_items: Vec<WorkItemRow>,

    pub trace: Option<TraceRow>,
    pub spans: Vec<SpanRow>,

    /// Sequence numbers are assigned by the store at commit
    pub key_events: Vec<KeyEventRow>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
            && self.conditions.is_empty()
            && self.tasks.is_empty()
            && self.work_items.is_empty()
            && self.trace.is_none()
            && self.spans.is_empty()
            && self.key_events.is_empty()
    }
}

/// Store for case state, work-item queues, and the audit log
///
/// Implementations must be thread-safe. Reads within one snapshot are
/// consistent; writes only land through [`commit`](StateStore::commit),
/// which must reject stale versions with [`StoreError::Conflict`].
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    // =========================================================================
    // Case Operations
    // =========================================================================

    /// Register a new case (id of its root workflow)
    async fn create_case(&self, case_id: Uuid) -> Result<(), StoreError>;

    /// Load a consistent snapshot of a whole case
    async fn load_case(&self, case_id: Uuid) -> Result<CaseSnapshot, StoreError>;

    /// Atomically apply a batch guarded by the snapshot version
    ///
    /// Returns the new case version.
    async fn commit(
        &self,
        case_id: Uuid,
        expected_version: u64,
        batch: CommitBatch,
    ) -> Result<u64, StoreError>;

    // =========================================================================
    // Lookup Indexes
    // =========================================================================

    /// Case owning a workflow
    async fn case_of_workflow(&self, workflow_id: Uuid) -> Result<Uuid, StoreError>;

    /// Case owning a work item
    async fn case_of_work_item(&self, work_item_id: Uuid) -> Result<Uuid, StoreError>;

    /// Read a single workflow row
    async fn workflow(&self, workflow_id: Uuid) -> Result<WorkflowRow, StoreError>;

    /// Read a single work-item row
    async fn work_item(&self, work_item_id: Uuid) -> Result<WorkItemRow, StoreError>;

    // =========================================================================
    // Queue Views
    // =========================================================================

    /// Work items of one workflow, id order
    async fn list_work_items(&self, workflow_id: Uuid) -> Result<Vec<WorkItemRow>, StoreError>;

    /// Unclaimed human-offered items gated by a scope, id order
    async fn list_offered_work_items(
        &self,
        required_scope: &str,
    ) -> Result<Vec<WorkItemRow>, StoreError>;

    /// Items joined to a domain entity, id order
    async fn work_items_by_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<WorkItemRow>, StoreError>;

    // =========================================================================
    // Audit Reads
    // =========================================================================

    /// Trace envelope
    async fn trace(&self, trace_id: Uuid) -> Result<TraceRow, StoreError>;

    /// Spans of a trace with no parent
    async fn root_spans(&self, trace_id: Uuid) -> Result<Vec<SpanRow>, StoreError>;

    /// Direct children of a span
    async fn child_spans(
        &self,
        trace_id: Uuid,
        parent_span_id: Uuid,
    ) -> Result<Vec<SpanRow>, StoreError>;

    /// Key events of one trace, sequence order
    async fn key_events(&self, trace_id: Uuid) -> Result<Vec<KeyEventRow>, StoreError>;

    /// Key events of one case across all traces, sequence order
    async fn key_events_for_case(&self, case_id: Uuid) -> Result<Vec<KeyEventRow>, StoreError>;
}
