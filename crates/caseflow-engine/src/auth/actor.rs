//! Resolved actors and call contexts

use std::collections::HashSet;

/// A resolved principal: identity plus granted scopes and groups
///
/// The engine never assumes an identity representation; the host adapts
/// its own user type through an [`IdentityAdapter`] and hands the engine
/// one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub scopes: HashSet<String>,
    pub groups: HashSet<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scopes: HashSet::new(),
            groups: HashSet::new(),
        }
    }

    /// Grant a scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    /// Add a group membership
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

/// Who is driving an API operation
///
/// `System` is the trusted context used by engine recursion and host
/// schedulers; internal operation variants demand it.
#[derive(Debug, Clone)]
pub enum ActorContext {
    User(Actor),
    System,
}

impl ActorContext {
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    pub fn actor(&self) -> Option<&Actor> {
        match self {
            Self::User(actor) => Some(actor),
            Self::System => None,
        }
    }

    /// Display identity for audit and error context
    pub fn display_id(&self) -> &str {
        match self {
            Self::User(actor) => &actor.id,
            Self::System => "system",
        }
    }
}

/// Adapter from the host's identity representation to a resolved [`Actor`]
///
/// ```
/// use caseflow_engine::auth::{Actor, IdentityAdapter};
///
/// struct SessionUser { email: String }
///
/// struct SessionAdapter;
///
/// impl IdentityAdapter for SessionAdapter {
///     type User = SessionUser;
///
///     fn resolve(&self, user: &SessionUser) -> Actor {
///         Actor::new(&user.email).with_scope("er.triage")
///     }
/// }
/// ```
pub trait IdentityAdapter: Send + Sync {
    type User;

    /// Resolve the host user into an actor with scopes and groups
    fn resolve(&self, user: &Self::User) -> Actor;
}
