//! Named authorization policies
//!
//! A policy is a named predicate over `(actor, payload, element)`. Rules
//! compose with all/any/not and short-circuit; a failed evaluation becomes
//! a `PolicyDeny` carrying the policy name, so callers always learn which
//! gate refused them.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::Actor;
use crate::audit::ElementRef;
use crate::error::EngineError;

/// Evaluation input for a policy rule
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub actor: &'a Actor,
    pub payload: Option<&'a Value>,
    pub element: Option<&'a ElementRef>,
}

/// A composable predicate
#[derive(Clone)]
pub enum PolicyRule {
    /// Actor holds the scope
    HasScope(String),

    /// Actor is a member of the group
    InGroup(String),

    /// Actor is exactly this user
    IsUser(String),

    /// Every rule passes
    All(Vec<PolicyRule>),

    /// At least one rule passes
    Any(Vec<PolicyRule>),

    /// The rule fails
    Not(Box<PolicyRule>),

    /// Host-supplied predicate
    Custom(Arc<dyn Fn(&PolicyInput<'_>) -> bool + Send + Sync>),
}

impl PolicyRule {
    pub fn evaluate(&self, input: &PolicyInput<'_>) -> bool {
        match self {
            Self::HasScope(scope) => input.actor.has_scope(scope),
            Self::InGroup(group) => input.actor.in_group(group),
            Self::IsUser(id) => input.actor.id == *id,
            Self::All(rules) => rules.iter().all(|rule| rule.evaluate(input)),
            Self::Any(rules) => rules.iter().any(|rule| rule.evaluate(input)),
            Self::Not(rule) => !rule.evaluate(input),
            Self::Custom(predicate) => predicate(input),
        }
    }
}

impl fmt::Debug for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HasScope(scope) => f.debug_tuple("HasScope").field(scope).finish(),
            Self::InGroup(group) => f.debug_tuple("InGroup").field(group).finish(),
            Self::IsUser(id) => f.debug_tuple("IsUser").field(id).finish(),
            Self::All(rules) => f.debug_tuple("All").field(rules).finish(),
            Self::Any(rules) => f.debug_tuple("Any").field(rules).finish(),
            Self::Not(rule) => f.debug_tuple("Not").field(rule).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A named rule whose denial is a typed error
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    rule: PolicyRule,
}

impl Policy {
    pub fn new(name: impl Into<String>, rule: PolicyRule) -> Self {
        Self {
            name: name.into(),
            rule,
        }
    }

    /// Policy requiring a single scope
    pub fn has_scope(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::new(name, PolicyRule::HasScope(scope.into()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate, short-circuiting into `PolicyDeny` on refusal
    pub fn evaluate(&self, input: &PolicyInput<'_>) -> Result<(), EngineError> {
        if self.rule.evaluate(input) {
            Ok(())
        } else {
            Err(EngineError::PolicyDeny {
                policy: self.name.clone(),
                actor: input.actor.id.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(actor: &Actor) -> PolicyInput<'_> {
        PolicyInput {
            actor,
            payload: None,
            element: None,
        }
    }

    #[test]
    fn test_scope_policy() {
        let actor = Actor::new("u-1").with_scope("er.triage");
        let policy = Policy::has_scope("workItem.claim", "er.triage");

        assert!(policy.evaluate(&input(&actor)).is_ok());
    }

    #[test]
    fn test_denial_carries_policy_name() {
        let actor = Actor::new("u-1");
        let policy = Policy::has_scope("workItem.claim", "er.triage");

        let err = policy.evaluate(&input(&actor)).unwrap_err();
        match err {
            EngineError::PolicyDeny { policy, actor } => {
                assert_eq!(policy, "workItem.claim");
                assert_eq!(actor, "u-1");
            }
            other => panic!("expected PolicyDeny, got {other:?}"),
        }
    }

    #[test]
    fn test_all_any_not_composition() {
        let actor = Actor::new("u-1").with_scope("a").with_group("g");

        let rule = PolicyRule::All(vec![
            PolicyRule::HasScope("a".into()),
            PolicyRule::Any(vec![
                PolicyRule::InGroup("g".into()),
                PolicyRule::InGroup("h".into()),
            ]),
            PolicyRule::Not(Box::new(PolicyRule::HasScope("b".into()))),
        ]);

        assert!(rule.evaluate(&input(&actor)));

        let with_b = Actor::new("u-1").with_scope("a").with_scope("b").with_group("g");
        assert!(!rule.evaluate(&input(&with_b)));
    }

    #[test]
    fn test_custom_rule_sees_payload() {
        let actor = Actor::new("u-1");
        let rule = PolicyRule::Custom(Arc::new(|input: &PolicyInput<'_>| {
            input
                .payload
                .and_then(|p| p.get("urgent"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        }));

        let payload = serde_json::json!({ "urgent": true });
        let ok = PolicyInput {
            actor: &actor,
            payload: Some(&payload),
            element: None,
        };
        assert!(rule.evaluate(&ok));
        assert!(!rule.evaluate(&input(&actor)));
    }
}
