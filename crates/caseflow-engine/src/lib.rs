//! # Caseflow Engine
//!
//! A transactional workflow-net runtime in the YAWL / Petri-net family:
//! conditions hold token markings, tasks enable and fire under AND/XOR/OR
//! join and split rules, work items are offered to and claimed by
//! authorized actors, composite tasks recurse into sub-workflows, and
//! cancellation regions sweep bounded subgraphs atomically.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Engine / VersionApi                        │
//! │  (per-version operations, optimistic retry, post-commit)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ExecutionContext                          │
//! │  (case snapshot arena, span tree, key events, effects)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          firing / cancellation / subflow / element           │
//! │  (enablement, token flow, region sweeps, child workflows)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       StateStore                             │
//! │  (versioned case commits, queue views, audit log)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every API entry point runs as one optimistic transaction: load a
//! consistent case snapshot, mutate synchronously with no suspension
//! points, commit the staged batch in one call, and retry the whole
//! mutation when another writer won the version check. External effects
//! queue on the context and run FIFO after a successful commit.
//!
//! ## Example
//!
//! ```
//! use caseflow_engine::prelude::*;
//! use caseflow_net::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), EngineError> {
//! let definition = WorkflowBuilder::new("review")
//!     .start_condition("start")
//!     .end_condition("end")
//!     .task(TaskBuilder::regular("review").human_offer("review.staff", None))
//!     .condition_to_task("start", "review")
//!     .task_to_condition("review", "end")
//!     .build()
//!     .expect("valid definition");
//!
//! let mut versions = VersionManager::new();
//! versions.register(WorkflowVersion::new(1, definition))?;
//!
//! let scopes = ScopeRegistry::from_root(
//!     ScopeModule::new("review").scope("staff", "Review staff"),
//! );
//!
//! let engine = Engine::new(InMemoryStateStore::new(), versions, scopes);
//! let api = engine.version("review", 1)?;
//!
//! let workflow = api.initialize_root_workflow(ActorContext::System).await?;
//! let item = api
//!     .initialize_work_item(workflow.id, "review", None, None, ActorContext::System)
//!     .await?;
//!
//! let reviewer = Actor::new("alice").with_scope("review.staff");
//! api.claim_work_item(item.id, ActorContext::User(reviewer.clone())).await?;
//! api.start_work_item(item.id, ActorContext::User(reviewer.clone())).await?;
//! api.complete_work_item(item.id, None, ActorContext::User(reviewer)).await?;
//!
//! assert_eq!(engine.workflow(workflow.id).await?.state, WorkflowState::Completed);
//! # Ok(())
//! # }
//! ```

mod api;
pub mod audit;
pub mod auth;
mod cancellation;
mod context;
mod element;
pub mod error;
mod firing;
pub mod store;
mod subflow;
pub mod version;
pub mod view;

pub use api::{Engine, EngineConfig, OfferListener, VersionApi};
pub use audit::{
    payload_hash, CaseStateAt, ChildInstanceAt, ElementKind, ElementRef, KeyEventKind,
    KeyEventRow, SpanRow, TraceRow, WorkflowStateAt,
};
pub use auth::{Actor, ActorContext, Policy, PolicyInput, PolicyRule, ScopeModule, ScopeRegistry};
pub use context::{ExecutionContext, PostCommitEffect};
pub use error::{EngineError, ErrorContext};
pub use store::{
    CaseSnapshot, Claim, CommitBatch, ConditionRow, InMemoryStateStore, ParentRef, StateStore,
    StoreError, TaskRow, TaskState, WorkItemRow, WorkItemState, WorkflowRow, WorkflowState,
};
pub use version::{VersionManager, WorkflowVersion};
pub use view::{WorkItemStatus, WorkItemView, WorkflowView};

/// Prelude for common imports
pub mod prelude {
    pub use crate::api::{Engine, EngineConfig, VersionApi};
    pub use crate::audit::{CaseStateAt, ChildInstanceAt, ElementRef, KeyEventKind, KeyEventRow};
    pub use crate::auth::{Actor, ActorContext, Policy, PolicyRule, ScopeModule, ScopeRegistry};
    pub use crate::error::EngineError;
    pub use crate::store::{
        Claim, InMemoryStateStore, StateStore, TaskState, WorkItemState, WorkflowState,
    };
    pub use crate::version::{VersionManager, WorkflowVersion};
    pub use crate::view::{WorkItemStatus, WorkItemView, WorkflowView};
}
