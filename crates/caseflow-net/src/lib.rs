//! # Static Workflow-Net Model
//!
//! Definition types for workflow nets in the YAWL / Petri-net family:
//! conditions (places), tasks (transitions) with AND/XOR/OR join and split
//! behavior, typed flows, cancellation regions, and work-item templates.
//!
//! Definitions are immutable once built. They are produced either through
//! the declarative [`WorkflowBuilder`] or from a JSON
//! [`DefinitionDocument`](document::DefinitionDocument), and consumed by the
//! runtime engine, which instantiates them into live cases.
//!
//! ```
//! use caseflow_net::prelude::*;
//!
//! let definition = WorkflowBuilder::new("review")
//!     .start_condition("start")
//!     .end_condition("end")
//!     .task(TaskBuilder::regular("review").human_offer("review.staff", None))
//!     .condition_to_task("start", "review")
//!     .task_to_condition("review", "end")
//!     .build()
//!     .expect("valid definition");
//!
//! assert_eq!(definition.task_inputs("review").len(), 1);
//! ```

pub mod builder;
pub mod definition;
pub mod document;
pub mod error;
pub mod graph;

pub use builder::{TaskBuilder, WorkflowBuilder};
pub use definition::{
    AutoTriggerKind, ConditionDef, FlowDef, JoinKind, OfferTemplate, RegionDef, RegionOwner,
    RouterSpec, SplitKind, TaskDef, TaskKind, WorkItemTemplate, WorkflowDefinition,
};
pub use document::{DefinitionDocument, ScopeEntry, WorkflowDoc};
pub use error::DefinitionError;
pub use graph::{StructureEdge, StructureGraph, StructureNode, StructureRegion};

/// Prelude for common imports
pub mod prelude {
    pub use crate::builder::{TaskBuilder, WorkflowBuilder};
    pub use crate::definition::{
        AutoTriggerKind, ConditionDef, FlowDef, JoinKind, OfferTemplate, RegionDef, RegionOwner,
        RouterSpec, SplitKind, TaskDef, TaskKind, WorkItemTemplate, WorkflowDefinition,
    };
    pub use crate::document::DefinitionDocument;
    pub use crate::error::DefinitionError;
    pub use crate::graph::StructureGraph;
}
