//! In-memory implementation of StateStore for testing and embedding
//!
//! Same semantics a durable backend must provide: versioned optimistic
//! commits, consistent case snapshots, and the audit log with store-assigned
//! sequence numbers.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use caseflow_net::OfferTemplate;

use super::{
    CaseSnapshot, CommitBatch, ConditionRow, StateStore, StoreError, TaskRow, WorkItemRow,
    WorkItemState, WorkflowRow,
};
use crate::audit::{KeyEventRow, SpanRow, TraceRow};

/// Internal per-case state
#[derive(Default)]
struct CaseState {
    version: u64,
    workflows: HashMap<Uuid, WorkflowRow>,
    conditions: HashMap<Uuid, ConditionRow>,
    tasks: HashMap<Uuid, TaskRow>,
    work_items: HashMap<Uuid, WorkItemRow>,
    key_events: Vec<KeyEventRow>,
    next_seq: u64,
}

/// In-memory implementation of [`StateStore`]
///
/// Primarily for tests and single-process embedding. All data lives in
/// memory behind `parking_lot` locks.
///
/// # Example
///
/// ```
/// use caseflow_engine::InMemoryStateStore;
///
/// let store = InMemoryStateStore::new();
/// assert_eq!(store.case_count(), 0);
/// ```
pub struct InMemoryStateStore {
    cases: RwLock<HashMap<Uuid, CaseState>>,
    traces: RwLock<HashMap<Uuid, TraceRow>>,
    spans: RwLock<HashMap<Uuid, Vec<SpanRow>>>,
    workflow_index: RwLock<HashMap<Uuid, Uuid>>,
    work_item_index: RwLock<HashMap<Uuid, Uuid>>,
}

impl InMemoryStateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            cases: RwLock::new(HashMap::new()),
            traces: RwLock::new(HashMap::new()),
            spans: RwLock::new(HashMap::new()),
            workflow_index: RwLock::new(HashMap::new()),
            work_item_index: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cases
    pub fn case_count(&self) -> usize {
        self.cases.read().len()
    }

    /// Number of traces across all cases
    pub fn trace_count(&self) -> usize {
        self.traces.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.cases.write().clear();
        self.traces.write().clear();
        self.spans.write().clear();
        self.workflow_index.write().clear();
        self.work_item_index.write().clear();
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_case(&self, case_id: Uuid) -> Result<(), StoreError> {
        let mut cases = self.cases.write();
        if cases.contains_key(&case_id) {
            return Err(StoreError::DuplicateCase(case_id));
        }
        cases.insert(case_id, CaseState::default());
        Ok(())
    }

    async fn load_case(&self, case_id: Uuid) -> Result<CaseSnapshot, StoreError> {
        let cases = self.cases.read();
        let case = cases
            .get(&case_id)
            .ok_or(StoreError::CaseNotFound(case_id))?;

        Ok(CaseSnapshot {
            case_id,
            version: case.version,
            workflows: case.workflows.clone(),
            conditions: case.conditions.clone(),
            tasks: case.tasks.clone(),
            work_items: case.work_items.clone(),
        })
    }

    async fn commit(
        &self,
        case_id: Uuid,
        expected_version: u64,
        batch: CommitBatch,
    ) -> Result<u64, StoreError> {
        let mut cases = self.cases.write();
        let case = cases
            .get_mut(&case_id)
            .ok_or(StoreError::CaseNotFound(case_id))?;

        if case.version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: case.version,
            });
        }

        for row in batch.workflows {
            self.workflow_index.write().insert(row.id, case_id);
            case.workflows.insert(row.id, row);
        }
        for row in batch.conditions {
            case.conditions.insert(row.id, row);
        }
        for row in batch.tasks {
            case.tasks.insert(row.id, row);
        }
        for row in batch.work_items {
            self.work_item_index.write().insert(row.id, case_id);
            case.work_items.insert(row.id, row);
        }

        for mut event in batch.key_events {
            event.seq = case.next_seq;
            case.next_seq += 1;
            case.key_events.push(event);
        }

        if let Some(trace) = batch.trace {
            self.traces.write().insert(trace.trace_id, trace);
        }
        for span in batch.spans {
            self.spans.write().entry(span.trace_id).or_default().push(span);
        }

        case.version += 1;
        Ok(case.version)
    }

    async fn case_of_workflow(&self, workflow_id: Uuid) -> Result<Uuid, StoreError> {
        self.workflow_index
            .read()
            .get(&workflow_id)
            .copied()
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn case_of_work_item(&self, work_item_id: Uuid) -> Result<Uuid, StoreError> {
        self.work_item_index
            .read()
            .get(&work_item_id)
            .copied()
            .ok_or(StoreError::WorkItemNotFound(work_item_id))
    }

    async fn workflow(&self, workflow_id: Uuid) -> Result<WorkflowRow, StoreError> {
        let case_id = self.case_of_workflow(workflow_id).await?;
        let cases = self.cases.read();
        cases
            .get(&case_id)
            .and_then(|c| c.workflows.get(&workflow_id))
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn work_item(&self, work_item_id: Uuid) -> Result<WorkItemRow, StoreError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        let cases = self.cases.read();
        cases
            .get(&case_id)
            .and_then(|c| c.work_items.get(&work_item_id))
            .cloned()
            .ok_or(StoreError::WorkItemNotFound(work_item_id))
    }

    async fn list_work_items(&self, workflow_id: Uuid) -> Result<Vec<WorkItemRow>, StoreError> {
        let case_id = self.case_of_workflow(workflow_id).await?;
        let cases = self.cases.read();
        let case = cases
            .get(&case_id)
            .ok_or(StoreError::CaseNotFound(case_id))?;

        let mut items: Vec<_> = case
            .work_items
            .values()
            .filter(|item| item.workflow_id == workflow_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    async fn list_offered_work_items(
        &self,
        required_scope: &str,
    ) -> Result<Vec<WorkItemRow>, StoreError> {
        let cases = self.cases.read();
        let mut items: Vec<_> = cases
            .values()
            .flat_map(|case| case.work_items.values())
            .filter(|item| {
                item.state == WorkItemState::Initialized
                    && item.claim.is_none()
                    && matches!(
                        &item.offer,
                        Some(OfferTemplate::Human { required_scope: scope, .. })
                            if scope == required_scope
                    )
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    async fn work_items_by_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<WorkItemRow>, StoreError> {
        let cases = self.cases.read();
        let mut items: Vec<_> = cases
            .values()
            .flat_map(|case| case.work_items.values())
            .filter(|item| item.aggregate_id.as_deref() == Some(aggregate_id))
            .cloned()
            .collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    async fn trace(&self, trace_id: Uuid) -> Result<TraceRow, StoreError> {
        self.traces
            .read()
            .get(&trace_id)
            .cloned()
            .ok_or(StoreError::TraceNotFound(trace_id))
    }

    async fn root_spans(&self, trace_id: Uuid) -> Result<Vec<SpanRow>, StoreError> {
        let spans = self.spans.read();
        Ok(spans
            .get(&trace_id)
            .map(|s| {
                s.iter()
                    .filter(|span| span.parent_span_id.is_none())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn child_spans(
        &self,
        trace_id: Uuid,
        parent_span_id: Uuid,
    ) -> Result<Vec<SpanRow>, StoreError> {
        let spans = self.spans.read();
        Ok(spans
            .get(&trace_id)
            .map(|s| {
                s.iter()
                    .filter(|span| span.parent_span_id == Some(parent_span_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn key_events(&self, trace_id: Uuid) -> Result<Vec<KeyEventRow>, StoreError> {
        let trace = self.trace(trace_id).await?;
        let cases = self.cases.read();
        let case = cases
            .get(&trace.case_id)
            .ok_or(StoreError::CaseNotFound(trace.case_id))?;

        Ok(case
            .key_events
            .iter()
            .filter(|event| event.trace_id == trace_id)
            .cloned()
            .collect())
    }

    async fn key_events_for_case(&self, case_id: Uuid) -> Result<Vec<KeyEventRow>, StoreError> {
        let cases = self.cases.read();
        let case = cases
            .get(&case_id)
            .ok_or(StoreError::CaseNotFound(case_id))?;

        Ok(case.key_events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{ElementRef, KeyEventKind};
    use crate::store::WorkflowState;
    use chrono::Utc;

    fn workflow_row(case_id: Uuid) -> WorkflowRow {
        WorkflowRow {
            id: case_id,
            case_id,
            name: "w".into(),
            version: 1,
            parent: None,
            state: WorkflowState::Initialized,
            created_at: Utc::now(),
            terminated_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_load_case() {
        let store = InMemoryStateStore::new();
        let case_id = Uuid::now_v7();

        store.create_case(case_id).await.unwrap();
        let snapshot = store.load_case(case_id).await.unwrap();

        assert_eq!(snapshot.version, 0);
        assert!(snapshot.workflows.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_case_rejected() {
        let store = InMemoryStateStore::new();
        let case_id = Uuid::now_v7();

        store.create_case(case_id).await.unwrap();
        let result = store.create_case(case_id).await;

        assert!(matches!(result, Err(StoreError::DuplicateCase(_))));
    }

    #[tokio::test]
    async fn test_commit_bumps_version() {
        let store = InMemoryStateStore::new();
        let case_id = Uuid::now_v7();
        store.create_case(case_id).await.unwrap();

        let batch = CommitBatch {
            workflows: vec![workflow_row(case_id)],
            ..CommitBatch::default()
        };

        let version = store.commit(case_id, 0, batch).await.unwrap();
        assert_eq!(version, 1);

        let snapshot = store.load_case(case_id).await.unwrap();
        assert_eq!(snapshot.workflows.len(), 1);
        assert_eq!(store.case_of_workflow(case_id).await.unwrap(), case_id);
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts() {
        let store = InMemoryStateStore::new();
        let case_id = Uuid::now_v7();
        store.create_case(case_id).await.unwrap();

        store
            .commit(case_id, 0, CommitBatch::default())
            .await
            .unwrap();

        let result = store.commit(case_id, 0, CommitBatch::default()).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_key_event_sequencing_across_commits() {
        let store = InMemoryStateStore::new();
        let case_id = Uuid::now_v7();
        let trace_id = Uuid::now_v7();
        store.create_case(case_id).await.unwrap();

        let event = |kind| KeyEventRow {
            seq: 0,
            trace_id,
            case_id,
            workflow_id: case_id,
            element: ElementRef::workflow(case_id, "w"),
            timestamp: Utc::now(),
            kind,
        };

        let batch = CommitBatch {
            trace: Some(TraceRow {
                trace_id,
                case_id,
                operation: "initializeRootWorkflow".into(),
                workflow_name: "w".into(),
                workflow_version: 1,
                started_at: Utc::now(),
            }),
            key_events: vec![
                event(KeyEventKind::WorkflowInitialized {
                    name: "w".into(),
                    version: 1,
                    parent: None,
                }),
                event(KeyEventKind::WorkflowStarted),
            ],
            ..CommitBatch::default()
        };
        store.commit(case_id, 0, batch).await.unwrap();

        let batch = CommitBatch {
            key_events: vec![event(KeyEventKind::WorkflowCompleted)],
            ..CommitBatch::default()
        };
        store.commit(case_id, 1, batch).await.unwrap();

        let events = store.key_events_for_case(case_id).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        let by_trace = store.key_events(trace_id).await.unwrap();
        assert_eq!(by_trace.len(), 3);
    }

    #[tokio::test]
    async fn test_offered_queue_view() {
        let store = InMemoryStateStore::new();
        let case_id = Uuid::now_v7();
        store.create_case(case_id).await.unwrap();

        let item = WorkItemRow {
            id: Uuid::now_v7(),
            case_id,
            workflow_id: case_id,
            task_id: Uuid::now_v7(),
            task_name: "triage".into(),
            state: WorkItemState::Initialized,
            offer: Some(OfferTemplate::Human {
                required_scope: "er.triage".into(),
                required_group_id: None,
            }),
            claim: None,
            payload: serde_json::Value::Null,
            auto_trigger: None,
            aggregate_id: Some("patient-7".into()),
            priority: Some(2),
            created_at: Utc::now(),
        };

        let batch = CommitBatch {
            work_items: vec![item.clone()],
            ..CommitBatch::default()
        };
        store.commit(case_id, 0, batch).await.unwrap();

        let offered = store.list_offered_work_items("er.triage").await.unwrap();
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].id, item.id);

        assert!(store
            .list_offered_work_items("other.scope")
            .await
            .unwrap()
            .is_empty());

        let by_aggregate = store.work_items_by_aggregate("patient-7").await.unwrap();
        assert_eq!(by_aggregate.len(), 1);
    }
}
