//! Engine error taxonomy
//!
//! Every engine error carries a stable code, a human-readable message, and
//! a context map holding the relevant ids. All errors abort the current
//! transaction; the caller surface decides whether to retry, surface, or
//! escalate. No error is swallowed and none is used for control flow.

use serde_json::{Map, Value};

use crate::store::StoreError;

/// JSON context map attached to errors
pub type ErrorContext = Map<String, Value>;

/// Errors produced by the workflow-net runtime
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Workflow/task/condition/work-item missing for the given id
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: String },

    /// Operation forbidden by the element's current state
    #[error("cannot {operation} {entity} {id} in state '{state}'")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        operation: &'static str,
        state: String,
        context: ErrorContext,
    },

    /// Static violation of a workflow definition
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Invariant violation discovered at runtime
    #[error("structural integrity violation: {message}")]
    StructuralIntegrity {
        message: String,
        context: ErrorContext,
    },

    /// Uniqueness conflict
    #[error("data integrity violation: {message}")]
    DataIntegrity { message: String },

    /// Operation disallowed by an element invariant
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// An internal operation was invoked outside a trusted execution context
    #[error("operation '{operation}' is internal and requires a system context")]
    NotInternalMutation { operation: String },

    /// Authorization refused by a named policy
    #[error("actor '{actor}' denied by policy '{policy}'")]
    PolicyDeny { policy: String, actor: String },

    /// Root initialization attempted against a deprecated version
    #[error("workflow '{name}' version {version} is deprecated")]
    WorkflowDeprecated { name: String, version: u32 },

    /// Optimistic commit kept conflicting; the whole mutation was retried
    /// and gave up
    #[error("transaction conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// Store-layer failure
    #[error("store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Stable machine-readable code for this error class
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::Configuration { .. } => "CONFIGURATION",
            Self::StructuralIntegrity { .. } => "STRUCTURAL_INTEGRITY",
            Self::DataIntegrity { .. } => "DATA_INTEGRITY",
            Self::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            Self::NotInternalMutation { .. } => "NOT_INTERNAL_MUTATION",
            Self::PolicyDeny { .. } => "POLICY_DENY",
            Self::WorkflowDeprecated { .. } => "WORKFLOW_DEPRECATED",
            Self::Conflict { .. } => "CONFLICT",
            Self::Store(_) => "STORE",
        }
    }

    /// Context map with the ids relevant to this error
    pub fn context(&self) -> ErrorContext {
        let mut map = Map::new();
        match self {
            Self::EntityNotFound { entity, id } => {
                map.insert("entity".into(), Value::String((*entity).into()));
                map.insert("id".into(), Value::String(id.clone()));
            }
            Self::InvalidStateTransition {
                entity,
                id,
                operation,
                state,
                context,
            } => {
                map.insert("entity".into(), Value::String((*entity).into()));
                map.insert("id".into(), Value::String(id.clone()));
                map.insert("operation".into(), Value::String((*operation).into()));
                map.insert("state".into(), Value::String(state.clone()));
                map.extend(context.clone());
            }
            Self::StructuralIntegrity { context, .. } => {
                map.extend(context.clone());
            }
            Self::NotInternalMutation { operation } => {
                map.insert("operation".into(), Value::String(operation.clone()));
            }
            Self::PolicyDeny { policy, actor } => {
                map.insert("policy".into(), Value::String(policy.clone()));
                map.insert("actor".into(), Value::String(actor.clone()));
            }
            Self::WorkflowDeprecated { name, version } => {
                map.insert("name".into(), Value::String(name.clone()));
                map.insert("version".into(), Value::Number((*version).into()));
            }
            Self::Conflict { attempts } => {
                map.insert("attempts".into(), Value::Number((*attempts).into()));
            }
            _ => {}
        }
        map
    }

    /// Shorthand for [`EngineError::EntityNotFound`]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::EntityNotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`EngineError::InvalidStateTransition`]
    pub fn invalid_transition(
        entity: &'static str,
        id: impl ToString,
        operation: &'static str,
        state: impl ToString,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            id: id.to_string(),
            operation,
            state: state.to_string(),
            context: Map::new(),
        }
    }

    /// Shorthand for [`EngineError::Configuration`]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for [`EngineError::StructuralIntegrity`]
    pub fn structural(message: impl Into<String>) -> Self {
        Self::StructuralIntegrity {
            message: message.into(),
            context: Map::new(),
        }
    }

    /// Shorthand for [`EngineError::ConstraintViolation`]
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Attach a context entry (only meaningful on variants carrying a map)
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        match &mut self {
            Self::InvalidStateTransition { context, .. }
            | Self::StructuralIntegrity { context, .. } => {
                context.insert(key.to_string(), value.into());
            }
            _ => {}
        }
        self
    }
}

impl From<caseflow_net::DefinitionError> for EngineError {
    fn from(err: caseflow_net::DefinitionError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Map store failures onto the engine taxonomy
///
/// Conflicts are handled by the engine's retry loop before this runs; a
/// conflict reaching here means retries were exhausted by the caller.
pub(crate) fn map_store(err: StoreError) -> EngineError {
    match err {
        StoreError::CaseNotFound(id) => EngineError::not_found("case", id),
        StoreError::WorkflowNotFound(id) => EngineError::not_found("workflow", id),
        StoreError::WorkItemNotFound(id) => EngineError::not_found("work item", id),
        StoreError::TraceNotFound(id) => EngineError::not_found("trace", id),
        StoreError::DuplicateCase(id) => EngineError::DataIntegrity {
            message: format!("case {id} already exists"),
        },
        other => EngineError::Store(other),
    }
}
