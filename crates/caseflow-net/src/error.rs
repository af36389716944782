//! Definition-level errors
//!
//! Everything here is a static violation of a workflow definition — the
//! engine surfaces these under its `Configuration` error class.

/// Errors raised while building or validating a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// No start condition was declared
    #[error("workflow '{workflow}' has no start condition")]
    MissingStartCondition { workflow: String },

    /// No end condition was declared
    #[error("workflow '{workflow}' has no end condition")]
    MissingEndCondition { workflow: String },

    /// Two elements share a name
    #[error("duplicate element '{name}' in workflow '{workflow}'")]
    DuplicateElement { workflow: String, name: String },

    /// A flow or region references a name that does not exist
    #[error("unknown element '{name}' referenced in workflow '{workflow}'")]
    UnknownElement { workflow: String, name: String },

    /// XOR/OR split declared without a router
    #[error("task '{task}' in workflow '{workflow}' has an XOR/OR split but no router")]
    MissingRouter { workflow: String, task: String },

    /// A fixed router names a condition that is not an output of its task
    #[error(
        "router on task '{task}' in workflow '{workflow}' targets '{condition}', \
         which is not an output of that task"
    )]
    RouterTarget {
        workflow: String,
        task: String,
        condition: String,
    },

    /// XOR fixed routers must name exactly one output
    #[error("XOR router on task '{task}' in workflow '{workflow}' must select exactly one output")]
    XorRouterCardinality { workflow: String, task: String },

    /// Payload routers cannot apply to composite tasks (child workflows
    /// complete without a payload); use a fixed router
    #[error("composite task '{task}' in workflow '{workflow}' cannot use a payload router")]
    PayloadRouterOnComposite { workflow: String, task: String },

    /// An element has no connection into the rest of the net
    #[error("element '{element}' in workflow '{workflow}' is not connected")]
    Disconnected { workflow: String, element: String },

    /// A dynamic composite task declared no candidate workflows
    #[error("dynamic composite task '{task}' in workflow '{workflow}' has no candidates")]
    EmptyCandidates { workflow: String, task: String },
}
