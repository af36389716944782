//! Execution context: the per-transaction orchestrator
//!
//! One context lives for exactly one transactional mutation. It owns the
//! working copy of the case snapshot (an arena keyed by id — traversal
//! always goes through ids, never chained object pointers), the span tree
//! rooted at the API operation, the key-event buffer, and the FIFO queue
//! of post-commit effects.
//!
//! All mutation inside a context is synchronous — there are no suspension
//! points between loading the snapshot and handing the staged batch back
//! to the engine for commit. The context is the only mediator between the
//! element model and the store; no façade writes directly.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use caseflow_net::WorkflowDefinition;

use crate::audit::{ElementRef, KeyEventKind, KeyEventRow, SpanRow, TraceRow};
use crate::auth::ActorContext;
use crate::error::EngineError;
use crate::store::{
    CaseSnapshot, CommitBatch, ConditionRow, TaskRow, WorkItemRow, WorkflowRow,
};
use crate::version::WorkflowVersion;

/// External effect deferred until after a successful commit
pub type PostCommitEffect = Box<dyn FnOnce() + Send + 'static>;

/// Per-transaction execution context
pub struct ExecutionContext {
    version: Arc<WorkflowVersion>,
    actor: ActorContext,
    snapshot: CaseSnapshot,

    dirty_workflows: HashSet<Uuid>,
    dirty_conditions: HashSet<Uuid>,
    dirty_tasks: HashSet<Uuid>,
    dirty_work_items: HashSet<Uuid>,

    trace: TraceRow,
    spans: Vec<SpanRow>,
    span_stack: Vec<usize>,
    key_events: Vec<KeyEventRow>,
    post_commit: Vec<PostCommitEffect>,

    /// Guard against dummy-task routing cycles
    pub(crate) dummy_fires: u32,
}

impl ExecutionContext {
    /// Open a context for one API operation, rooting its trace and span
    pub fn new(
        version: Arc<WorkflowVersion>,
        actor: ActorContext,
        snapshot: CaseSnapshot,
        operation: &str,
    ) -> Self {
        let now = Utc::now();
        let trace = TraceRow {
            trace_id: Uuid::now_v7(),
            case_id: snapshot.case_id,
            operation: operation.to_string(),
            workflow_name: version.name().to_string(),
            workflow_version: version.version(),
            started_at: now,
        };
        let root_span = SpanRow {
            span_id: Uuid::now_v7(),
            trace_id: trace.trace_id,
            parent_span_id: None,
            name: operation.to_string(),
            started_at: now,
            ended_at: now,
            attributes: serde_json::Map::new(),
        };

        Self {
            version,
            actor,
            snapshot,
            dirty_workflows: HashSet::new(),
            dirty_conditions: HashSet::new(),
            dirty_tasks: HashSet::new(),
            dirty_work_items: HashSet::new(),
            trace,
            spans: vec![root_span],
            span_stack: vec![0],
            key_events: Vec::new(),
            post_commit: Vec::new(),
            dummy_fires: 0,
        }
    }

    pub fn case_id(&self) -> Uuid {
        self.snapshot.case_id
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace.trace_id
    }

    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    pub fn version(&self) -> &Arc<WorkflowVersion> {
        &self.version
    }

    /// Enforce that this mutation runs under the trusted system context
    pub fn require_internal(&self, operation: &str) -> Result<(), EngineError> {
        if self.actor.is_system() {
            Ok(())
        } else {
            Err(EngineError::NotInternalMutation {
                operation: operation.to_string(),
            })
        }
    }

    // =========================================================================
    // Row Access (arena by id)
    // =========================================================================

    pub fn workflow(&self, id: Uuid) -> Result<&WorkflowRow, EngineError> {
        self.snapshot
            .workflows
            .get(&id)
            .ok_or_else(|| EngineError::not_found("workflow", id))
    }

    pub fn workflow_mut(&mut self, id: Uuid) -> Result<&mut WorkflowRow, EngineError> {
        self.dirty_workflows.insert(id);
        self.snapshot
            .workflows
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("workflow", id))
    }

    pub fn condition(&self, id: Uuid) -> Result<&ConditionRow, EngineError> {
        self.snapshot
            .conditions
            .get(&id)
            .ok_or_else(|| EngineError::not_found("condition", id))
    }

    pub fn condition_mut(&mut self, id: Uuid) -> Result<&mut ConditionRow, EngineError> {
        self.dirty_conditions.insert(id);
        self.snapshot
            .conditions
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("condition", id))
    }

    pub fn task(&self, id: Uuid) -> Result<&TaskRow, EngineError> {
        self.snapshot
            .tasks
            .get(&id)
            .ok_or_else(|| EngineError::not_found("task", id))
    }

    pub fn task_mut(&mut self, id: Uuid) -> Result<&mut TaskRow, EngineError> {
        self.dirty_tasks.insert(id);
        self.snapshot
            .tasks
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("task", id))
    }

    pub fn work_item(&self, id: Uuid) -> Result<&WorkItemRow, EngineError> {
        self.snapshot
            .work_items
            .get(&id)
            .ok_or_else(|| EngineError::not_found("work item", id))
    }

    pub fn work_item_mut(&mut self, id: Uuid) -> Result<&mut WorkItemRow, EngineError> {
        self.dirty_work_items.insert(id);
        self.snapshot
            .work_items
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("work item", id))
    }

    pub fn insert_workflow(&mut self, row: WorkflowRow) {
        self.dirty_workflows.insert(row.id);
        self.snapshot.workflows.insert(row.id, row);
    }

    pub fn insert_condition(&mut self, row: ConditionRow) {
        self.dirty_conditions.insert(row.id);
        self.snapshot.conditions.insert(row.id, row);
    }

    pub fn insert_task(&mut self, row: TaskRow) {
        self.dirty_tasks.insert(row.id);
        self.snapshot.tasks.insert(row.id, row);
    }

    pub fn insert_work_item(&mut self, row: WorkItemRow) {
        self.dirty_work_items.insert(row.id);
        self.snapshot.work_items.insert(row.id, row);
    }

    // =========================================================================
    // Lookups (id order keeps sweeps deterministic)
    // =========================================================================

    /// Definition for a workflow row of this case
    pub fn definition_of(&self, workflow_id: Uuid) -> Result<Arc<WorkflowDefinition>, EngineError> {
        let row = self.workflow(workflow_id)?;
        self.version
            .definition_named(&row.name)
            .cloned()
            .ok_or_else(|| {
                EngineError::structural(format!(
                    "workflow '{}' has no definition in version {} of '{}'",
                    row.name,
                    self.version.version(),
                    self.version.name()
                ))
            })
    }

    /// Verify the row belongs to this API version (version isolation)
    pub fn check_instance(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        let row = self.workflow(workflow_id)?;
        let isolated = row.version == self.version.version()
            && self.version.definition_named(&row.name).is_some();
        if isolated {
            Ok(())
        } else {
            Err(EngineError::not_found("workflow", workflow_id))
        }
    }

    pub fn find_task(&self, workflow_id: Uuid, name: &str) -> Result<Uuid, EngineError> {
        self.snapshot
            .tasks
            .values()
            .find(|task| task.workflow_id == workflow_id && task.name == name)
            .map(|task| task.id)
            .ok_or_else(|| EngineError::not_found("task", name.to_string()))
    }

    pub fn find_condition(&self, workflow_id: Uuid, name: &str) -> Result<Uuid, EngineError> {
        self.snapshot
            .conditions
            .values()
            .find(|condition| condition.workflow_id == workflow_id && condition.name == name)
            .map(|condition| condition.id)
            .ok_or_else(|| EngineError::not_found("condition", name.to_string()))
    }

    /// Work items of a task, id order
    pub fn work_items_of_task(&self, task_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .snapshot
            .work_items
            .values()
            .filter(|item| item.task_id == task_id)
            .map(|item| item.id)
            .collect();
        ids.sort();
        ids
    }

    /// Tasks of a workflow, id order
    pub fn tasks_of(&self, workflow_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .snapshot
            .tasks
            .values()
            .filter(|task| task.workflow_id == workflow_id)
            .map(|task| task.id)
            .collect();
        ids.sort();
        ids
    }

    /// Conditions of a workflow, id order
    pub fn conditions_of(&self, workflow_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .snapshot
            .conditions
            .values()
            .filter(|condition| condition.workflow_id == workflow_id)
            .map(|condition| condition.id)
            .collect();
        ids.sort();
        ids
    }

    /// Work items of a workflow, id order
    pub fn work_items_of(&self, workflow_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .snapshot
            .work_items
            .values()
            .filter(|item| item.workflow_id == workflow_id)
            .map(|item| item.id)
            .collect();
        ids.sort();
        ids
    }

    /// Child workflows spawned by a composite task, id order
    pub fn children_of_task(&self, workflow_id: Uuid, task_name: &str) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .snapshot
            .workflows
            .values()
            .filter(|child| {
                child
                    .parent
                    .as_ref()
                    .is_some_and(|p| p.workflow_id == workflow_id && p.task_name == task_name)
            })
            .map(|child| child.id)
            .collect();
        ids.sort();
        ids
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Record a key event for an element transition
    pub fn emit(&mut self, workflow_id: Uuid, element: ElementRef, kind: KeyEventKind) {
        self.key_events.push(KeyEventRow {
            seq: 0, // assigned by the store at commit
            trace_id: self.trace.trace_id,
            case_id: self.snapshot.case_id,
            workflow_id,
            element,
            timestamp: Utc::now(),
            kind,
        });
    }

    /// Run a sub-operation under a nested span
    pub fn in_span<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let parent = self.span_stack.last().map(|&i| self.spans[i].span_id);
        let now = Utc::now();
        let index = self.spans.len();
        self.spans.push(SpanRow {
            span_id: Uuid::now_v7(),
            trace_id: self.trace.trace_id,
            parent_span_id: parent,
            name: name.to_string(),
            started_at: now,
            ended_at: now,
            attributes: serde_json::Map::new(),
        });
        self.span_stack.push(index);

        let result = f(self);

        self.span_stack.pop();
        self.spans[index].ended_at = Utc::now();
        result
    }

    /// Attach an attribute to the current span
    pub fn span_attr(&mut self, key: &str, value: impl Into<Value>) {
        if let Some(&index) = self.span_stack.last() {
            self.spans[index]
                .attributes
                .insert(key.to_string(), value.into());
        }
    }

    /// Queue an external effect to run after a successful commit (FIFO)
    pub fn defer(&mut self, effect: PostCommitEffect) {
        self.post_commit.push(effect);
    }

    /// Close the root span and produce the staged batch plus effects
    pub fn finish(mut self) -> (u64, CommitBatch, Vec<PostCommitEffect>) {
        self.spans[0].ended_at = Utc::now();

        let batch = CommitBatch {
            workflows: self
                .dirty_workflows
                .iter()
                .filter_map(|id| self.snapshot.workflows.get(id).cloned())
                .collect(),
            conditions: self
                .dirty_conditions
                .iter()
                .filter_map(|id| self.snapshot.conditions.get(id).cloned())
                .collect(),
            tasks: self
                .dirty_tasks
                .iter()
                .filter_map(|id| self.snapshot.tasks.get(id).cloned())
                .collect(),
            work_items: self
                .dirty_work_items
                .iter()
                .filter_map(|id| self.snapshot.work_items.get(id).cloned())
                .collect(),
            trace: Some(self.trace),
            spans: self.spans,
            key_events: self.key_events,
        };

        (self.snapshot.version, batch, self.post_commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_net::{TaskBuilder, WorkflowBuilder};

    fn version() -> Arc<WorkflowVersion> {
        let def = WorkflowBuilder::new("w")
            .start_condition("start")
            .end_condition("end")
            .task(TaskBuilder::regular("a"))
            .condition_to_task("start", "a")
            .task_to_condition("a", "end")
            .build()
            .unwrap();
        Arc::new(WorkflowVersion::new(1, def))
    }

    fn context() -> ExecutionContext {
        let case_id = Uuid::now_v7();
        ExecutionContext::new(
            version(),
            ActorContext::System,
            CaseSnapshot::empty(case_id),
            "initializeRootWorkflow",
        )
    }

    #[test]
    fn test_root_span_opened() {
        let ctx = context();
        let (_, batch, _) = ctx.finish();

        assert_eq!(batch.spans.len(), 1);
        assert!(batch.spans[0].parent_span_id.is_none());
        assert_eq!(batch.spans[0].name, "initializeRootWorkflow");
        assert!(batch.trace.is_some());
    }

    #[test]
    fn test_nested_spans_form_a_tree() {
        let mut ctx = context();

        ctx.in_span("fire", |ctx| {
            ctx.span_attr("taskName", "a");
            ctx.in_span("consume", |_| Ok(()))
        })
        .unwrap();

        let (_, batch, _) = ctx.finish();
        assert_eq!(batch.spans.len(), 3);

        let root = &batch.spans[0];
        let fire = &batch.spans[1];
        let consume = &batch.spans[2];

        assert_eq!(fire.parent_span_id, Some(root.span_id));
        assert_eq!(consume.parent_span_id, Some(fire.span_id));
        assert_eq!(fire.attributes["taskName"], "a");
    }

    #[test]
    fn test_dirty_tracking_only_commits_touched_rows() {
        let mut ctx = context();
        let workflow_id = ctx.case_id();

        ctx.insert_workflow(WorkflowRow {
            id: workflow_id,
            case_id: workflow_id,
            name: "w".into(),
            version: 1,
            parent: None,
            state: crate::store::WorkflowState::Initialized,
            created_at: Utc::now(),
            terminated_at: None,
        });

        let (version, batch, _) = ctx.finish();
        assert_eq!(version, 0);
        assert_eq!(batch.workflows.len(), 1);
        assert!(batch.conditions.is_empty());
    }

    #[test]
    fn test_require_internal() {
        let ctx = context();
        assert!(ctx.require_internal("internalCancelWorkflow").is_ok());

        let user_ctx = ExecutionContext::new(
            version(),
            ActorContext::User(crate::auth::Actor::new("u-1")),
            CaseSnapshot::empty(Uuid::now_v7()),
            "op",
        );
        let err = user_ctx
            .require_internal("internalCancelWorkflow")
            .unwrap_err();
        assert_eq!(err.code(), "NOT_INTERNAL_MUTATION");
    }

    #[test]
    fn test_post_commit_effects_fifo() {
        let mut ctx = context();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            ctx.defer(Box::new(move || order.lock().push(i)));
        }

        let (_, _, effects) = ctx.finish();
        for effect in effects {
            effect();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
