//! Engine and the per-version API surface
//!
//! The [`Engine`] owns the store, the frozen version registry, and the
//! frozen scope registry. [`Engine::version`] hands out a [`VersionApi`]
//! bound to one `(name, version)` pair; every operation on it runs as one
//! optimistic transaction — load a case snapshot, mutate synchronously,
//! commit the staged batch, and retry the whole mutation on conflict.
//! Post-commit effects (offer notifications) run in FIFO order only after
//! a successful commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use caseflow_net::{AutoTriggerKind, OfferTemplate, StructureGraph};

use crate::audit::{self, replay, CaseStateAt, ChildInstanceAt, ElementRef, KeyEventRow, SpanRow};
use crate::auth::{Actor, ActorContext, Policy, PolicyInput, PolicyRule, ScopeRegistry};
use crate::cancellation;
use crate::context::ExecutionContext;
use crate::error::{map_store, EngineError};
use crate::firing;
use crate::store::{Claim, StateStore, StoreError};
use crate::subflow;
use crate::version::{VersionManager, WorkflowVersion};
use crate::view::{self, WorkItemView, WorkflowView};

/// Listener invoked after commit for each newly offered human work item
pub type OfferListener = Arc<dyn Fn(WorkItemView) + Send + Sync + 'static>;

/// Configuration for the engine's transaction loop
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whole-mutation retries before surfacing a conflict
    pub max_commit_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 5,
        }
    }
}

/// The workflow-net runtime
///
/// # Example
///
/// ```ignore
/// let mut versions = VersionManager::new();
/// versions.register(WorkflowVersion::new(1, definition))?;
///
/// let engine = Engine::new(InMemoryStateStore::new(), versions, scopes);
/// let api = engine.version("triage", 1)?;
///
/// let workflow = api.initialize_root_workflow(ActorContext::System).await?;
/// ```
pub struct Engine<S: StateStore> {
    store: Arc<S>,
    versions: Arc<VersionManager>,
    scopes: Arc<ScopeRegistry>,
    offer_listener: Option<OfferListener>,
    config: EngineConfig,
}

impl<S: StateStore> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            versions: self.versions.clone(),
            scopes: self.scopes.clone(),
            offer_listener: self.offer_listener.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: StateStore> Engine<S> {
    /// Create an engine over a store with frozen registries
    pub fn new(store: S, versions: VersionManager, scopes: ScopeRegistry) -> Self {
        Self {
            store: Arc::new(store),
            versions: Arc::new(versions),
            scopes: Arc::new(scopes),
            offer_listener: None,
            config: EngineConfig::default(),
        }
    }

    /// Override the transaction-loop configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the post-commit offer listener
    pub fn on_offer(mut self, listener: OfferListener) -> Self {
        self.offer_listener = Some(listener);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// The API surface for one registered `(name, version)` pair
    pub fn version(&self, name: &str, version: u32) -> Result<VersionApi<S>, EngineError> {
        let version = self
            .versions
            .get(name, version)
            .cloned()
            .ok_or_else(|| {
                EngineError::not_found("workflow version", format!("{name} v{version}"))
            })?;
        Ok(VersionApi {
            engine: self.clone(),
            version,
        })
    }

    // =========================================================================
    // Read Models
    // =========================================================================

    /// External metadata of one work item
    pub async fn work_item(&self, work_item_id: Uuid) -> Result<WorkItemView, EngineError> {
        let row = self.store.work_item(work_item_id).await.map_err(map_store)?;
        Ok(view::work_item_view(&row))
    }

    /// External metadata of one workflow
    pub async fn workflow(&self, workflow_id: Uuid) -> Result<WorkflowView, EngineError> {
        let row = self.store.workflow(workflow_id).await.map_err(map_store)?;
        Ok(view::workflow_view(&row))
    }

    /// Offered items the actor may claim, highest priority first
    pub async fn worklist(&self, actor: &Actor) -> Result<Vec<WorkItemView>, EngineError> {
        let mut views = Vec::new();
        for scope in &actor.scopes {
            let rows = self
                .store
                .list_offered_work_items(scope)
                .await
                .map_err(map_store)?;
            for row in rows {
                let group_ok = match &row.offer {
                    Some(OfferTemplate::Human {
                        required_group_id: Some(group),
                        ..
                    }) => actor.in_group(group),
                    _ => true,
                };
                if group_ok {
                    views.push(view::work_item_view(&row));
                }
            }
        }
        views.sort_by(|a, b| {
            b.priority
                .unwrap_or(0)
                .cmp(&a.priority.unwrap_or(0))
                .then(a.id.cmp(&b.id))
        });
        Ok(views)
    }

    /// Items joined to a domain entity
    pub async fn work_items_for_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<WorkItemView>, EngineError> {
        let rows = self
            .store
            .work_items_by_aggregate(aggregate_id)
            .await
            .map_err(map_store)?;
        Ok(rows.iter().map(view::work_item_view).collect())
    }

    // =========================================================================
    // Audit Reads
    // =========================================================================

    /// Root spans of a trace (exactly one per well-formed trace)
    pub async fn get_root_spans(&self, trace_id: Uuid) -> Result<Vec<SpanRow>, EngineError> {
        self.store.root_spans(trace_id).await.map_err(map_store)
    }

    /// Direct children of a span
    pub async fn get_child_spans(
        &self,
        trace_id: Uuid,
        parent_span_id: Uuid,
    ) -> Result<Vec<SpanRow>, EngineError> {
        self.store
            .child_spans(trace_id, parent_span_id)
            .await
            .map_err(map_store)
    }

    /// Key events recorded under one trace
    pub async fn get_key_events(&self, trace_id: Uuid) -> Result<Vec<KeyEventRow>, EngineError> {
        self.store.key_events(trace_id).await.map_err(map_store)
    }

    /// Reconstruct case state at an instant by folding key events
    ///
    /// With `workflow_id` given, the result is narrowed to that workflow.
    pub async fn get_workflow_state_at_time(
        &self,
        trace_id: Uuid,
        workflow_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<CaseStateAt, EngineError> {
        let trace = self.store.trace(trace_id).await.map_err(map_store)?;
        let events = self
            .store
            .key_events_for_case(trace.case_id)
            .await
            .map_err(map_store)?;

        let mut state = replay::fold_case_state(&events, at);
        if let Some(workflow_id) = workflow_id {
            state.workflows.retain(|id, _| *id == workflow_id);
        }
        Ok(state)
    }

    /// Children of a composite task live at an instant
    pub async fn get_child_workflow_instances(
        &self,
        trace_id: Uuid,
        task_name: &str,
        workflow_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ChildInstanceAt>, EngineError> {
        let trace = self.store.trace(trace_id).await.map_err(map_store)?;
        let events = self
            .store
            .key_events_for_case(trace.case_id)
            .await
            .map_err(map_store)?;
        Ok(replay::child_instances_at(&events, task_name, workflow_name, at))
    }

    // =========================================================================
    // Transaction Loop
    // =========================================================================

    /// Run one mutation as an optimistic transaction with bounded retries
    async fn execute<R>(
        &self,
        version: Arc<WorkflowVersion>,
        operation: &'static str,
        case_id: Uuid,
        actor: ActorContext,
        f: impl Fn(&mut ExecutionContext) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let attempts = self.config.max_commit_attempts.max(1);

        for attempt in 1..=attempts {
            let snapshot = self.store.load_case(case_id).await.map_err(map_store)?;
            let mut ctx = ExecutionContext::new(version.clone(), actor.clone(), snapshot, operation);

            let result = f(&mut ctx)?;
            let (expected_version, batch, effects) = ctx.finish();

            match self.store.commit(case_id, expected_version, batch).await {
                Ok(_) => {
                    for effect in effects {
                        effect();
                    }
                    return Ok(result);
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(%case_id, operation, attempt, "commit conflict, retrying mutation");
                    // Let the winning writer's follow-up work proceed
                    // before reloading the snapshot.
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(err) => return Err(map_store(err)),
            }
        }

        warn!(%case_id, operation, attempts, "commit conflict persisted");
        Err(EngineError::Conflict { attempts })
    }
}

/// API surface of one registered workflow version
///
/// Calls against a version can only observe instances created by that
/// version; targeting any other instance reads as not-found.
pub struct VersionApi<S: StateStore> {
    engine: Engine<S>,
    version: Arc<WorkflowVersion>,
}

impl<S: StateStore> VersionApi<S> {
    pub fn name(&self) -> &str {
        self.version.name()
    }

    pub fn version_number(&self) -> u32 {
        self.version.version()
    }

    /// Static graph of this version's main workflow
    pub fn structure(&self) -> StructureGraph {
        StructureGraph::from_definition(self.version.definition())
    }

    // =========================================================================
    // Workflow Operations
    // =========================================================================

    /// Create and start a new root workflow (one case)
    #[instrument(skip(self, actor), fields(workflow = self.version.name()))]
    pub async fn initialize_root_workflow(
        &self,
        actor: ActorContext,
    ) -> Result<WorkflowView, EngineError> {
        if self.version.is_deprecated() {
            return Err(EngineError::WorkflowDeprecated {
                name: self.version.name().to_string(),
                version: self.version.version(),
            });
        }

        let case_id = Uuid::now_v7();
        self.engine
            .store
            .create_case(case_id)
            .await
            .map_err(map_store)?;
        info!(%case_id, "initializing root workflow");

        let definition = self.version.definition().clone();
        self.engine
            .execute(
                self.version.clone(),
                "initializeRootWorkflow",
                case_id,
                actor,
                move |ctx| {
                    firing::instantiate_workflow(ctx, &definition, case_id, None)?;
                    firing::start_workflow(ctx, case_id)?;
                    Ok(view::workflow_view(ctx.workflow(case_id)?))
                },
            )
            .await
    }

    /// Cancel a root workflow, cascading through its whole case
    #[instrument(skip(self, actor))]
    pub async fn cancel_root_workflow(
        &self,
        workflow_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkflowView, EngineError> {
        let case_id = self.case_of_workflow(workflow_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "cancelRootWorkflow",
                case_id,
                actor,
                move |ctx| self.cancel_workflow_core(ctx, workflow_id, true),
            )
            .await
    }

    /// Fire a composite (or dynamic-composite) task, spawning its child
    /// workflow
    #[instrument(skip(self, actor))]
    pub async fn initialize_workflow(
        &self,
        parent_workflow_id: Uuid,
        task_name: &str,
        selector: Option<&str>,
        actor: ActorContext,
    ) -> Result<WorkflowView, EngineError> {
        let case_id = self.case_of_workflow(parent_workflow_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "initializeWorkflow",
                case_id,
                actor,
                move |ctx| self.initialize_workflow_core(ctx, parent_workflow_id, task_name, selector),
            )
            .await
    }

    /// Cancel a sub-workflow; its parent composite task cancels with it
    #[instrument(skip(self, actor))]
    pub async fn cancel_workflow(
        &self,
        workflow_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkflowView, EngineError> {
        let case_id = self.case_of_workflow(workflow_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "cancelWorkflow",
                case_id,
                actor,
                move |ctx| self.cancel_workflow_core(ctx, workflow_id, false),
            )
            .await
    }

    // =========================================================================
    // Work-Item Operations
    // =========================================================================

    /// Fire an enabled regular task, creating its work item
    #[instrument(skip(self, payload, actor))]
    pub async fn initialize_work_item(
        &self,
        workflow_id: Uuid,
        task_name: &str,
        payload: Option<Value>,
        aggregate_id: Option<String>,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_workflow(workflow_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "initializeWorkItem",
                case_id,
                actor,
                move |ctx| {
                    self.initialize_work_item_core(
                        ctx,
                        workflow_id,
                        task_name,
                        payload.clone(),
                        aggregate_id.clone(),
                    )
                },
            )
            .await
    }

    /// Claim an offered item for the calling actor
    #[instrument(skip(self, actor))]
    pub async fn claim_work_item(
        &self,
        work_item_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "claimWorkItem",
                case_id,
                actor,
                move |ctx| self.claim_work_item_core(ctx, work_item_id),
            )
            .await
    }

    /// Return a claimed, unstarted item to the offered pool
    #[instrument(skip(self, actor))]
    pub async fn release_work_item(
        &self,
        work_item_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "releaseWorkItem",
                case_id,
                actor,
                move |ctx| {
                    self.guarded_item_op(ctx, work_item_id, "workItem.release", |ctx| {
                        ctx.in_span("release", |ctx| firing::release_item(ctx, work_item_id))
                    })
                },
            )
            .await
    }

    /// Start a claimed item
    #[instrument(skip(self, actor))]
    pub async fn start_work_item(
        &self,
        work_item_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "startWorkItem",
                case_id,
                actor,
                move |ctx| {
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        ctx.in_span("start", |ctx| firing::start_item(ctx, work_item_id))
                    })
                },
            )
            .await
    }

    /// Complete a started item, driving the task's split
    #[instrument(skip(self, payload, actor))]
    pub async fn complete_work_item(
        &self,
        work_item_id: Uuid,
        payload: Option<Value>,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "completeWorkItem",
                case_id,
                actor,
                move |ctx| {
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        if let Some(payload) = &payload {
                            ctx.span_attr("payloadHash", audit::payload_hash(payload));
                        }
                        ctx.in_span("complete", |ctx| {
                            firing::complete_item(ctx, work_item_id, payload.clone())
                        })
                    })
                },
            )
            .await
    }

    /// Fail a started item; its task fails and produces nothing
    #[instrument(skip(self, payload, actor))]
    pub async fn fail_work_item(
        &self,
        work_item_id: Uuid,
        payload: Option<Value>,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "failWorkItem",
                case_id,
                actor,
                move |ctx| {
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        ctx.in_span("fail", |ctx| {
                            firing::fail_item(ctx, work_item_id, payload.clone())
                        })
                    })
                },
            )
            .await
    }

    /// Cancel a live item; an active task cancels with it
    #[instrument(skip(self, actor))]
    pub async fn cancel_work_item(
        &self,
        work_item_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "cancelWorkItem",
                case_id,
                actor,
                move |ctx| {
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        ctx.in_span("cancel", |ctx| {
                            firing::cancel_item(ctx, work_item_id).map(|_| ())
                        })
                    })
                },
            )
            .await
    }

    /// Set an item's auto-trigger; allowed at most once
    #[instrument(skip(self, actor))]
    pub async fn set_work_item_auto_trigger(
        &self,
        work_item_id: Uuid,
        trigger: AutoTriggerKind,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "setWorkItemAutoTrigger",
                case_id,
                actor,
                move |ctx| {
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        ctx.work_item_mut(work_item_id)?.set_auto_trigger(trigger)
                    })
                },
            )
            .await
    }

    // =========================================================================
    // Internal Variants (engine recursion and trusted schedulers)
    // =========================================================================

    /// Internal variant of [`initialize_workflow`](Self::initialize_workflow)
    pub async fn internal_initialize_workflow(
        &self,
        parent_workflow_id: Uuid,
        task_name: &str,
        selector: Option<&str>,
        actor: ActorContext,
    ) -> Result<WorkflowView, EngineError> {
        let case_id = self.case_of_workflow(parent_workflow_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "internalInitializeWorkflow",
                case_id,
                actor,
                move |ctx| {
                    ctx.require_internal("internalInitializeWorkflow")?;
                    self.initialize_workflow_core(ctx, parent_workflow_id, task_name, selector)
                },
            )
            .await
    }

    /// Internal variant of [`cancel_workflow`](Self::cancel_workflow)
    pub async fn internal_cancel_workflow(
        &self,
        workflow_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkflowView, EngineError> {
        let case_id = self.case_of_workflow(workflow_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "internalCancelWorkflow",
                case_id,
                actor,
                move |ctx| {
                    ctx.require_internal("internalCancelWorkflow")?;
                    self.cancel_workflow_core(ctx, workflow_id, false)
                },
            )
            .await
    }

    /// Internal variant of [`initialize_work_item`](Self::initialize_work_item)
    pub async fn internal_initialize_work_item(
        &self,
        workflow_id: Uuid,
        task_name: &str,
        payload: Option<Value>,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_workflow(workflow_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "internalInitializeWorkItem",
                case_id,
                actor,
                move |ctx| {
                    ctx.require_internal("internalInitializeWorkItem")?;
                    self.initialize_work_item_core(ctx, workflow_id, task_name, payload.clone(), None)
                },
            )
            .await
    }

    /// Internal variant of [`start_work_item`](Self::start_work_item)
    pub async fn internal_start_work_item(
        &self,
        work_item_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "internalStartWorkItem",
                case_id,
                actor,
                move |ctx| {
                    ctx.require_internal("internalStartWorkItem")?;
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        firing::start_item(ctx, work_item_id)
                    })
                },
            )
            .await
    }

    /// Internal variant of [`complete_work_item`](Self::complete_work_item)
    pub async fn internal_complete_work_item(
        &self,
        work_item_id: Uuid,
        payload: Option<Value>,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "internalCompleteWorkItem",
                case_id,
                actor,
                move |ctx| {
                    ctx.require_internal("internalCompleteWorkItem")?;
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        firing::complete_item(ctx, work_item_id, payload.clone())
                    })
                },
            )
            .await
    }

    /// Internal variant of [`fail_work_item`](Self::fail_work_item)
    pub async fn internal_fail_work_item(
        &self,
        work_item_id: Uuid,
        payload: Option<Value>,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "internalFailWorkItem",
                case_id,
                actor,
                move |ctx| {
                    ctx.require_internal("internalFailWorkItem")?;
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        firing::fail_item(ctx, work_item_id, payload.clone())
                    })
                },
            )
            .await
    }

    /// Internal variant of [`cancel_work_item`](Self::cancel_work_item)
    pub async fn internal_cancel_work_item(
        &self,
        work_item_id: Uuid,
        actor: ActorContext,
    ) -> Result<WorkItemView, EngineError> {
        let case_id = self.case_of_work_item(work_item_id).await?;
        self.engine
            .execute(
                self.version.clone(),
                "internalCancelWorkItem",
                case_id,
                actor,
                move |ctx| {
                    ctx.require_internal("internalCancelWorkItem")?;
                    self.guarded_item_op(ctx, work_item_id, "workItem.claimant", |ctx| {
                        firing::cancel_item(ctx, work_item_id).map(|_| ())
                    })
                },
            )
            .await
    }

    // =========================================================================
    // Cores (shared between public and internal variants)
    // =========================================================================

    fn initialize_workflow_core(
        &self,
        ctx: &mut ExecutionContext,
        parent_workflow_id: Uuid,
        task_name: &str,
        selector: Option<&str>,
    ) -> Result<WorkflowView, EngineError> {
        ctx.check_instance(parent_workflow_id)?;
        let child_id = subflow::fire_composite_task(ctx, parent_workflow_id, task_name, selector)?;
        Ok(view::workflow_view(ctx.workflow(child_id)?))
    }

    fn cancel_workflow_core(
        &self,
        ctx: &mut ExecutionContext,
        workflow_id: Uuid,
        root: bool,
    ) -> Result<WorkflowView, EngineError> {
        ctx.check_instance(workflow_id)?;
        let (is_root, parent, name) = {
            let row = ctx.workflow(workflow_id)?;
            (row.is_root(), row.parent.clone(), row.name.clone())
        };
        if root && !is_root {
            return Err(EngineError::constraint(
                "workflow has a parent; use cancelWorkflow",
            ));
        }
        if !root && is_root {
            return Err(EngineError::constraint(
                "workflow is a root; use cancelRootWorkflow",
            ));
        }

        let changed = ctx.in_span("cancel", |ctx| {
            cancellation::cancel_workflow_cascade(ctx, workflow_id, None)
        })?;

        // A directly canceled child also cancels the composite task that
        // spawned it; its join tokens are gone, so no alternative exit
        // remains.
        if changed && !root {
            if let Some(parent) = parent {
                let parent_task_id = ctx.find_task(parent.workflow_id, &parent.task_name)?;
                if ctx.task(parent_task_id)?.state.is_active() {
                    cancellation::cancel_task(
                        ctx,
                        parent.workflow_id,
                        parent_task_id,
                        Some(ElementRef::workflow(workflow_id, name)),
                    )?;
                }
            }
        }

        Ok(view::workflow_view(ctx.workflow(workflow_id)?))
    }

    fn initialize_work_item_core(
        &self,
        ctx: &mut ExecutionContext,
        workflow_id: Uuid,
        task_name: &str,
        payload: Option<Value>,
        aggregate_id: Option<String>,
    ) -> Result<WorkItemView, EngineError> {
        ctx.check_instance(workflow_id)?;
        let item_id =
            firing::fire_regular_task(ctx, workflow_id, task_name, payload, aggregate_id)?;

        let view = view::work_item_view(ctx.work_item(item_id)?);

        // Human offers wait for a claimant; tell the worklist after commit.
        if view.required_scope.is_some() {
            if let Some(listener) = &self.engine.offer_listener {
                let listener = listener.clone();
                let offered = view.clone();
                ctx.defer(Box::new(move || listener(offered)));
            }
        }

        Ok(view)
    }

    fn claim_work_item_core(
        &self,
        ctx: &mut ExecutionContext,
        work_item_id: Uuid,
    ) -> Result<WorkItemView, EngineError> {
        let (workflow_id, offer, payload, task_name) = {
            let item = ctx.work_item(work_item_id)?;
            (
                item.workflow_id,
                item.offer.clone(),
                item.payload.clone(),
                item.task_name.clone(),
            )
        };
        ctx.check_instance(workflow_id)?;

        let claim = match (offer.as_ref(), ctx.actor().clone()) {
            (
                Some(OfferTemplate::Human {
                    required_scope,
                    required_group_id,
                }),
                ActorContext::User(actor),
            ) => {
                if !self.engine.scopes.contains(required_scope) {
                    return Err(EngineError::configuration(format!(
                        "scope '{required_scope}' is not registered"
                    )));
                }

                let mut rules = vec![PolicyRule::HasScope(required_scope.clone())];
                if let Some(group) = required_group_id {
                    rules.push(PolicyRule::InGroup(group.clone()));
                }
                let policy = Policy::new("workItem.claim", PolicyRule::All(rules));
                let element = ElementRef::work_item(work_item_id, task_name);
                policy.evaluate(&PolicyInput {
                    actor: &actor,
                    payload: Some(&payload),
                    element: Some(&element),
                })?;

                Claim::Human {
                    user_id: actor.id.clone(),
                }
            }
            (_, ActorContext::System) => Claim::Automated,
            (_, ActorContext::User(actor)) => Claim::Human {
                user_id: actor.id.clone(),
            },
        };

        ctx.in_span("claim", |ctx| firing::claim_item(ctx, work_item_id, claim))?;
        self.apply_auto_trigger(ctx, work_item_id)?;

        Ok(view::work_item_view(ctx.work_item(work_item_id)?))
    }

    /// Version-isolation plus claimant guard shared by the item operations
    fn guarded_item_op(
        &self,
        ctx: &mut ExecutionContext,
        work_item_id: Uuid,
        policy: &'static str,
        op: impl FnOnce(&mut ExecutionContext) -> Result<(), EngineError>,
    ) -> Result<WorkItemView, EngineError> {
        let (workflow_id, claim) = {
            let item = ctx.work_item(work_item_id)?;
            (item.workflow_id, item.claim.clone())
        };
        ctx.check_instance(workflow_id)?;
        claimant_guard(claim.as_ref(), ctx.actor(), policy)?;

        op(ctx)?;
        Ok(view::work_item_view(ctx.work_item(work_item_id)?))
    }

    /// Apply a pre-set auto-trigger right after a successful claim
    fn apply_auto_trigger(
        &self,
        ctx: &mut ExecutionContext,
        work_item_id: Uuid,
    ) -> Result<(), EngineError> {
        match ctx.work_item(work_item_id)?.auto_trigger {
            Some(AutoTriggerKind::Start) => {
                ctx.in_span("start", |ctx| firing::start_item(ctx, work_item_id))
            }
            Some(AutoTriggerKind::Complete) => ctx.in_span("complete", |ctx| {
                firing::start_item(ctx, work_item_id)?;
                firing::complete_item(ctx, work_item_id, None)
            }),
            None => Ok(()),
        }
    }

    async fn case_of_workflow(&self, workflow_id: Uuid) -> Result<Uuid, EngineError> {
        self.engine
            .store
            .case_of_workflow(workflow_id)
            .await
            .map_err(map_store)
    }

    async fn case_of_work_item(&self, work_item_id: Uuid) -> Result<Uuid, EngineError> {
        self.engine
            .store
            .case_of_work_item(work_item_id)
            .await
            .map_err(map_store)
    }
}

/// Only the claimant (or the system) may drive a claimed item
fn claimant_guard(
    claim: Option<&Claim>,
    actor: &ActorContext,
    policy: &'static str,
) -> Result<(), EngineError> {
    match (claim, actor) {
        (_, ActorContext::System) => Ok(()),
        (Some(Claim::Human { user_id }), ActorContext::User(actor)) if actor.id == *user_id => {
            Ok(())
        }
        (Some(_), ActorContext::User(actor)) => Err(EngineError::PolicyDeny {
            policy: policy.to_string(),
            actor: actor.id.clone(),
        }),
        (None, _) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claimant_guard() {
        let claim = Claim::Human {
            user_id: "owner".into(),
        };

        let owner = ActorContext::User(Actor::new("owner"));
        assert!(claimant_guard(Some(&claim), &owner, "workItem.claimant").is_ok());

        let other = ActorContext::User(Actor::new("other"));
        let err = claimant_guard(Some(&claim), &other, "workItem.claimant").unwrap_err();
        assert_eq!(err.code(), "POLICY_DENY");

        assert!(claimant_guard(Some(&claim), &ActorContext::System, "workItem.claimant").is_ok());
        assert!(claimant_guard(None, &other, "workItem.claimant").is_ok());
    }

    #[test]
    fn test_automated_claim_guarded_from_users() {
        let claim = Claim::Automated;
        let user = ActorContext::User(Actor::new("u-1"));

        let err = claimant_guard(Some(&claim), &user, "workItem.claimant").unwrap_err();
        assert_eq!(err.code(), "POLICY_DENY");
    }
}
