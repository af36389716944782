//! Authorization core: scopes, policies, actors
//!
//! Scope modules form a tree of dotted identifiers frozen into a
//! [`ScopeRegistry`] at service construction. Policies are named predicates
//! over `(actor, payload, element)` composed with all/any/not; a denial
//! short-circuits with a typed error carrying the policy name. Actor
//! resolution is pluggable — the engine only ever sees a resolved
//! [`Actor`].

mod actor;
mod policy;
mod scope;

pub use actor::{Actor, ActorContext, IdentityAdapter};
pub use policy::{Policy, PolicyInput, PolicyRule};
pub use scope::{ScopeDef, ScopeModule, ScopeRegistry};
