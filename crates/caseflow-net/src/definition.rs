//! Workflow-net definition types
//!
//! A workflow net is a bipartite graph of conditions (places) and tasks
//! (transitions). Conditions hold token markings at run time; tasks consume
//! and produce tokens according to their join and split kinds. The types in
//! this module describe the static net; the engine owns all run-time state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Token-consumption behavior on a task's input conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Every input condition must be marked; one token is consumed from each
    And,

    /// Exactly one marked input is consumed
    Xor,

    /// The non-empty subset of currently marked inputs is the witness;
    /// one token is consumed from each member
    Or,
}

/// Token-production behavior on a task's output conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    /// Produce one token into every output condition
    And,

    /// Produce one token into exactly one output, selected by the router
    Xor,

    /// Produce one token into each output the router marks active
    Or,
}

/// Router expression for XOR/OR splits
///
/// Evaluated when the task completes, against the completion payload.
/// An XOR split must resolve to exactly one output condition; an OR split
/// to a non-empty subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RouterSpec {
    /// Always route to the listed output conditions
    Fixed { conditions: Vec<String> },

    /// Route to the condition(s) named by a payload field
    ///
    /// The field value may be a single string or an array of strings.
    PayloadKey { key: String },
}

impl RouterSpec {
    /// Route to a single fixed output
    pub fn fixed(condition: impl Into<String>) -> Self {
        Self::Fixed {
            conditions: vec![condition.into()],
        }
    }

    /// Route by a payload field
    pub fn payload_key(key: impl Into<String>) -> Self {
        Self::PayloadKey { key: key.into() }
    }

    /// Resolve the active output set against a completion payload
    ///
    /// Returns `None` when the router cannot be resolved (missing key,
    /// wrong value shape). Cardinality against the split kind is checked
    /// by the caller.
    pub fn select(&self, payload: Option<&serde_json::Value>) -> Option<Vec<String>> {
        match self {
            Self::Fixed { conditions } => Some(conditions.clone()),
            Self::PayloadKey { key } => {
                let value = payload?.get(key)?;
                match value {
                    serde_json::Value::String(s) => Some(vec![s.clone()]),
                    serde_json::Value::Array(items) => {
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            out.push(item.as_str()?.to_string());
                        }
                        Some(out)
                    }
                    _ => None,
                }
            }
        }
    }
}

/// Who may pick up a work item spawned from a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OfferTemplate {
    /// The engine claims and starts the item itself at fire time
    Automated,

    /// A human actor holding `required_scope` (and membership in
    /// `required_group_id`, when set) must claim the item
    #[serde(rename_all = "camelCase")]
    Human {
        required_scope: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        required_group_id: Option<String>,
    },
}

/// Transition applied automatically once a work item is claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoTriggerKind {
    /// Start the item as soon as it is claimed
    Start,

    /// Start and immediately complete the item with its own payload
    Complete,
}

/// Template stamped onto work items spawned by a regular task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemTemplate {
    /// Offer policy for spawned items
    pub offer: OfferTemplate,

    /// Worklist ordering hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Pre-set auto-trigger for spawned items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_trigger: Option<AutoTriggerKind>,
}

impl WorkItemTemplate {
    /// Template for system-executed items
    pub fn automated() -> Self {
        Self {
            offer: OfferTemplate::Automated,
            priority: None,
            auto_trigger: None,
        }
    }

    /// Template for human-claimed items gated by a scope
    pub fn human(required_scope: impl Into<String>) -> Self {
        Self {
            offer: OfferTemplate::Human {
                required_scope: required_scope.into(),
                required_group_id: None,
            },
            priority: None,
            auto_trigger: None,
        }
    }
}

/// What a task does when it fires
///
/// Exactly one kind applies per task. Regular tasks spawn a work item;
/// dummy tasks route tokens and complete immediately; composite kinds spawn
/// a child workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskKind {
    /// Spawns one work item per fire
    #[serde(rename = "task")]
    Regular { work_item: WorkItemTemplate },

    /// Pure routing element; fires and completes in one step
    DummyTask,

    /// Spawns one child workflow of a fixed definition
    CompositeTask { workflow: String },

    /// Spawns one child workflow of a type chosen at fire time from an
    /// ordered candidate list (the first is the default)
    DynamicCompositeTask { candidates: Vec<String> },
}

impl TaskKind {
    /// Stable tag used in documents and structure graphs
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Regular { .. } => "task",
            Self::DummyTask => "dummyTask",
            Self::CompositeTask { .. } => "compositeTask",
            Self::DynamicCompositeTask { .. } => "dynamicCompositeTask",
        }
    }

    /// Whether firing spawns a child workflow
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Self::CompositeTask { .. } | Self::DynamicCompositeTask { .. }
        )
    }

    /// The work-item template, for regular tasks
    pub fn work_item_template(&self) -> Option<&WorkItemTemplate> {
        match self {
            Self::Regular { work_item } => Some(work_item),
            _ => None,
        }
    }
}

/// A task (transition) in the net
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    pub kind: TaskKind,
    pub join: JoinKind,
    pub split: SplitKind,

    /// Required for XOR/OR splits, unused for AND
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterSpec>,
}

/// A condition (place) in the net
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDef {
    pub name: String,

    /// Receives the initial token when the workflow starts
    #[serde(default)]
    pub is_start: bool,

    /// A marked end condition (with a quiescent net) completes the workflow
    #[serde(default)]
    pub is_end: bool,

    /// Synthesized between two directly connected tasks
    #[serde(default)]
    pub is_implicit: bool,
}

impl ConditionDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_start: false,
            is_end: false,
            is_implicit: false,
        }
    }
}

/// A typed edge of the bipartite graph
///
/// `task → task` edges only exist during construction; the builder
/// materializes them as implicit conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlowDef {
    ConditionToTask { condition: String, task: String },
    TaskToCondition { task: String, condition: String },
}

/// Owner of a cancellation region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", content = "name")]
pub enum RegionOwner {
    Task(String),
    Condition(String),
}

impl RegionOwner {
    pub fn name(&self) -> &str {
        match self {
            Self::Task(name) | Self::Condition(name) => name,
        }
    }
}

/// An owner-scoped subgraph cancelled atomically on owner termination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDef {
    pub name: String,
    pub owner: RegionOwner,
    pub tasks: Vec<String>,
    pub conditions: Vec<String>,
}

/// Name synthesized for the implicit condition between two tasks
pub(crate) fn implicit_condition_name(from: &str, to: &str) -> String {
    format!("impl:{from}->{to}")
}

/// An immutable, validated workflow-net definition
///
/// Construct through [`WorkflowBuilder`](crate::builder::WorkflowBuilder)
/// or a [`DefinitionDocument`](crate::document::DefinitionDocument); both
/// run the completeness checks before handing one of these out.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    tasks: Vec<TaskDef>,
    conditions: Vec<ConditionDef>,
    flows: Vec<FlowDef>,
    regions: Vec<RegionDef>,
    start_condition: String,
    end_condition: String,

    task_index: HashMap<String, usize>,
    condition_index: HashMap<String, usize>,
}

impl WorkflowDefinition {
    /// Assemble a definition without validation
    ///
    /// Callers are the builder and the document converter, which validate
    /// before exposing the result.
    pub(crate) fn assemble(
        name: String,
        tasks: Vec<TaskDef>,
        conditions: Vec<ConditionDef>,
        flows: Vec<FlowDef>,
        regions: Vec<RegionDef>,
        start_condition: String,
        end_condition: String,
    ) -> Self {
        let task_index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        let condition_index = conditions
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        Self {
            name,
            tasks,
            conditions,
            flows,
            regions,
            start_condition,
            end_condition,
            task_index,
            condition_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[TaskDef] {
        &self.tasks
    }

    pub fn conditions(&self) -> &[ConditionDef] {
        &self.conditions
    }

    pub fn flows(&self) -> &[FlowDef] {
        &self.flows
    }

    pub fn regions(&self) -> &[RegionDef] {
        &self.regions
    }

    pub fn task(&self, name: &str) -> Option<&TaskDef> {
        self.task_index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn condition(&self, name: &str) -> Option<&ConditionDef> {
        self.condition_index.get(name).map(|&i| &self.conditions[i])
    }

    /// The condition receiving the initial token
    pub fn start_condition(&self) -> &ConditionDef {
        self.condition(&self.start_condition)
            .expect("validated definition has a start condition")
    }

    /// The condition whose marking (with a quiescent net) completes the case
    pub fn end_condition(&self) -> &ConditionDef {
        self.condition(&self.end_condition)
            .expect("validated definition has an end condition")
    }

    /// Input conditions of a task, in flow order
    pub fn task_inputs(&self, task: &str) -> Vec<&ConditionDef> {
        self.flows
            .iter()
            .filter_map(|f| match f {
                FlowDef::ConditionToTask { condition, task: t } if t == task => {
                    self.condition(condition)
                }
                _ => None,
            })
            .collect()
    }

    /// Output conditions of a task, in flow order
    pub fn task_outputs(&self, task: &str) -> Vec<&ConditionDef> {
        self.flows
            .iter()
            .filter_map(|f| match f {
                FlowDef::TaskToCondition { task: t, condition } if t == task => {
                    self.condition(condition)
                }
                _ => None,
            })
            .collect()
    }

    /// Tasks consuming from a condition, in flow order
    pub fn condition_outputs(&self, condition: &str) -> Vec<&TaskDef> {
        self.flows
            .iter()
            .filter_map(|f| match f {
                FlowDef::ConditionToTask { condition: c, task } if c == condition => {
                    self.task(task)
                }
                _ => None,
            })
            .collect()
    }

    /// Tasks producing into a condition, in flow order
    pub fn condition_inputs(&self, condition: &str) -> Vec<&TaskDef> {
        self.flows
            .iter()
            .filter_map(|f| match f {
                FlowDef::TaskToCondition { task, condition: c } if c == condition => {
                    self.task(task)
                }
                _ => None,
            })
            .collect()
    }

    /// The cancellation region owned by a task, if any
    pub fn region_owned_by_task(&self, task: &str) -> Option<&RegionDef> {
        self.regions
            .iter()
            .find(|r| matches!(&r.owner, RegionOwner::Task(name) if name == task))
    }

    /// The cancellation region owned by a condition, if any
    pub fn region_owned_by_condition(&self, condition: &str) -> Option<&RegionDef> {
        self.regions
            .iter()
            .find(|r| matches!(&r.owner, RegionOwner::Condition(name) if name == condition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_router_fixed_select() {
        let router = RouterSpec::fixed("approved");
        assert_eq!(router.select(None), Some(vec!["approved".to_string()]));
    }

    #[test]
    fn test_router_payload_key_string() {
        let router = RouterSpec::payload_key("outcome");
        let payload = json!({ "outcome": "rejected" });

        assert_eq!(
            router.select(Some(&payload)),
            Some(vec!["rejected".to_string()])
        );
    }

    #[test]
    fn test_router_payload_key_array() {
        let router = RouterSpec::payload_key("branches");
        let payload = json!({ "branches": ["b", "c"] });

        assert_eq!(
            router.select(Some(&payload)),
            Some(vec!["b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_router_payload_key_missing() {
        let router = RouterSpec::payload_key("outcome");

        assert_eq!(router.select(None), None);
        assert_eq!(router.select(Some(&json!({ "other": 1 }))), None);
        assert_eq!(router.select(Some(&json!({ "outcome": 42 }))), None);
    }

    #[test]
    fn test_task_kind_tags() {
        assert_eq!(
            TaskKind::Regular {
                work_item: WorkItemTemplate::automated()
            }
            .tag(),
            "task"
        );
        assert_eq!(TaskKind::DummyTask.tag(), "dummyTask");
        assert_eq!(
            TaskKind::CompositeTask {
                workflow: "sub".into()
            }
            .tag(),
            "compositeTask"
        );
        assert!(TaskKind::DynamicCompositeTask {
            candidates: vec!["a".into()]
        }
        .is_composite());
    }

    #[test]
    fn test_offer_template_serialization() {
        let offer = OfferTemplate::Human {
            required_scope: "er.triage".into(),
            required_group_id: Some("night-shift".into()),
        };

        let json = serde_json::to_string(&offer).unwrap();
        assert!(json.contains("\"type\":\"human\""));
        assert!(json.contains("\"requiredScope\":\"er.triage\""));

        let parsed: OfferTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(offer, parsed);
    }

    #[test]
    fn test_implicit_condition_name() {
        assert_eq!(implicit_condition_name("a", "b"), "impl:a->b");
    }
}
