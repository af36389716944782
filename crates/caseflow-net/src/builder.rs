//! Declarative workflow-net construction
//!
//! The builder assembles a net in reading order — start condition, tasks,
//! connections, end condition — and `build()` validates completeness before
//! releasing a [`WorkflowDefinition`]: start/end present, every element
//! connected, routers attached to XOR/OR splits, region members resolving.
//!
//! `task → task` connections are materialized as implicit conditions, so
//! the built net is always strictly bipartite.

use std::collections::HashSet;

use crate::definition::{
    implicit_condition_name, AutoTriggerKind, ConditionDef, FlowDef, JoinKind, OfferTemplate,
    RegionDef, RegionOwner, RouterSpec, SplitKind, TaskDef, TaskKind, WorkItemTemplate,
    WorkflowDefinition,
};
use crate::error::DefinitionError;

/// Fluent builder for a single task definition
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    name: String,
    kind: TaskKind,
    join: JoinKind,
    split: SplitKind,
    router: Option<RouterSpec>,
}

impl TaskBuilder {
    fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            join: JoinKind::And,
            split: SplitKind::And,
            router: None,
        }
    }

    /// A task spawning one automated work item per fire
    pub fn regular(name: impl Into<String>) -> Self {
        Self::new(
            name,
            TaskKind::Regular {
                work_item: WorkItemTemplate::automated(),
            },
        )
    }

    /// A routing-only task with no work item
    pub fn dummy(name: impl Into<String>) -> Self {
        Self::new(name, TaskKind::DummyTask)
    }

    /// A task spawning a child workflow of a fixed definition
    pub fn composite(name: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self::new(
            name,
            TaskKind::CompositeTask {
                workflow: workflow.into(),
            },
        )
    }

    /// A task spawning a child workflow chosen at fire time
    pub fn dynamic_composite<I, S>(name: impl Into<String>, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            TaskKind::DynamicCompositeTask {
                candidates: candidates.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Set the join kind (default AND)
    pub fn join(mut self, join: JoinKind) -> Self {
        self.join = join;
        self
    }

    /// Set the split kind (default AND)
    pub fn split(mut self, split: SplitKind) -> Self {
        self.split = split;
        self
    }

    /// Attach a router (required for XOR/OR splits)
    pub fn router(mut self, router: RouterSpec) -> Self {
        self.router = Some(router);
        self
    }

    /// Offer spawned items to humans holding a scope
    pub fn human_offer(
        mut self,
        required_scope: impl Into<String>,
        required_group_id: Option<String>,
    ) -> Self {
        if let TaskKind::Regular { work_item } = &mut self.kind {
            work_item.offer = OfferTemplate::Human {
                required_scope: required_scope.into(),
                required_group_id,
            };
        }
        self
    }

    /// Worklist ordering hint for spawned items
    pub fn priority(mut self, priority: i32) -> Self {
        if let TaskKind::Regular { work_item } = &mut self.kind {
            work_item.priority = Some(priority);
        }
        self
    }

    /// Pre-set an auto-trigger on spawned items
    pub fn auto_trigger(mut self, trigger: AutoTriggerKind) -> Self {
        if let TaskKind::Regular { work_item } = &mut self.kind {
            work_item.auto_trigger = Some(trigger);
        }
        self
    }

    fn finish(self) -> TaskDef {
        TaskDef {
            name: self.name,
            kind: self.kind,
            join: self.join,
            split: self.split,
            router: self.router,
        }
    }
}

/// Raw connection recorded before implicit conditions are materialized
#[derive(Debug, Clone)]
enum RawFlow {
    ConditionToTask { condition: String, task: String },
    TaskToCondition { task: String, condition: String },
    TaskToTask { from: String, to: String },
}

/// Declarative builder for a [`WorkflowDefinition`]
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    name: String,
    tasks: Vec<TaskDef>,
    conditions: Vec<ConditionDef>,
    flows: Vec<RawFlow>,
    regions: Vec<RegionDef>,
    start: Option<String>,
    end: Option<String>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            conditions: Vec::new(),
            flows: Vec::new(),
            regions: Vec::new(),
            start: None,
            end: None,
        }
    }

    /// Declare the start condition (created if not already declared)
    pub fn start_condition(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.start = Some(name.clone());
        self.conditions.push(ConditionDef {
            is_start: true,
            ..ConditionDef::new(name)
        });
        self
    }

    /// Declare the end condition (created if not already declared)
    pub fn end_condition(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.end = Some(name.clone());
        self.conditions.push(ConditionDef {
            is_end: true,
            ..ConditionDef::new(name)
        });
        self
    }

    /// Declare an intermediate condition
    pub fn condition(mut self, name: impl Into<String>) -> Self {
        self.conditions.push(ConditionDef::new(name));
        self
    }

    /// Declare a task
    pub fn task(mut self, task: TaskBuilder) -> Self {
        self.tasks.push(task.finish());
        self
    }

    /// Connect a condition to a task
    pub fn condition_to_task(mut self, condition: impl Into<String>, task: impl Into<String>) -> Self {
        self.flows.push(RawFlow::ConditionToTask {
            condition: condition.into(),
            task: task.into(),
        });
        self
    }

    /// Connect a task to a condition
    pub fn task_to_condition(mut self, task: impl Into<String>, condition: impl Into<String>) -> Self {
        self.flows.push(RawFlow::TaskToCondition {
            task: task.into(),
            condition: condition.into(),
        });
        self
    }

    /// Connect two tasks directly; an implicit condition is synthesized
    pub fn task_to_task(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.flows.push(RawFlow::TaskToTask {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Declare a cancellation region
    pub fn cancellation_region<T, C, TS, CS>(
        mut self,
        name: impl Into<String>,
        owner: RegionOwner,
        tasks: T,
        conditions: C,
    ) -> Self
    where
        T: IntoIterator<Item = TS>,
        TS: Into<String>,
        C: IntoIterator<Item = CS>,
        CS: Into<String>,
    {
        self.regions.push(RegionDef {
            name: name.into(),
            owner,
            tasks: tasks.into_iter().map(Into::into).collect(),
            conditions: conditions.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Validate and assemble the definition
    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        let workflow = self.name.clone();

        let start = self.start.clone().ok_or(DefinitionError::MissingStartCondition {
            workflow: workflow.clone(),
        })?;
        let end = self.end.clone().ok_or(DefinitionError::MissingEndCondition {
            workflow: workflow.clone(),
        })?;

        let mut conditions = self.conditions;
        let mut flows = Vec::with_capacity(self.flows.len());

        // Materialize task→task edges as implicit conditions.
        for raw in self.flows {
            match raw {
                RawFlow::ConditionToTask { condition, task } => {
                    flows.push(FlowDef::ConditionToTask { condition, task });
                }
                RawFlow::TaskToCondition { task, condition } => {
                    flows.push(FlowDef::TaskToCondition { task, condition });
                }
                RawFlow::TaskToTask { from, to } => {
                    let name = implicit_condition_name(&from, &to);
                    conditions.push(ConditionDef {
                        is_implicit: true,
                        ..ConditionDef::new(name.clone())
                    });
                    flows.push(FlowDef::TaskToCondition {
                        task: from,
                        condition: name.clone(),
                    });
                    flows.push(FlowDef::ConditionToTask {
                        condition: name,
                        task: to,
                    });
                }
            }
        }

        // Unique names across the whole net.
        let mut seen = HashSet::new();
        for name in self
            .tasks
            .iter()
            .map(|t| &t.name)
            .chain(conditions.iter().map(|c| &c.name))
        {
            if !seen.insert(name.clone()) {
                return Err(DefinitionError::DuplicateElement {
                    workflow,
                    name: name.clone(),
                });
            }
        }

        let definition = WorkflowDefinition::assemble(
            self.name,
            self.tasks,
            conditions,
            flows,
            self.regions,
            start,
            end,
        );
        validate(&definition)?;
        Ok(definition)
    }
}

/// Completeness checks over an assembled definition
fn validate(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    let workflow = def.name().to_string();

    // Flows reference existing elements.
    for flow in def.flows() {
        let (condition, task) = match flow {
            FlowDef::ConditionToTask { condition, task } => (condition, task),
            FlowDef::TaskToCondition { task, condition } => (condition, task),
        };
        if def.condition(condition).is_none() {
            return Err(DefinitionError::UnknownElement {
                workflow,
                name: condition.clone(),
            });
        }
        if def.task(task).is_none() {
            return Err(DefinitionError::UnknownElement {
                workflow,
                name: task.clone(),
            });
        }
    }

    // Every task has at least one input and one output.
    for task in def.tasks() {
        if def.task_inputs(&task.name).is_empty() || def.task_outputs(&task.name).is_empty() {
            return Err(DefinitionError::Disconnected {
                workflow,
                element: task.name.clone(),
            });
        }
    }

    // Conditions connect into the net: everything but the start has a
    // producer, everything but the end has a consumer.
    for condition in def.conditions() {
        let has_in = !def.condition_inputs(&condition.name).is_empty();
        let has_out = !def.condition_outputs(&condition.name).is_empty();
        if (!condition.is_start && !has_in) || (!condition.is_end && !has_out) {
            return Err(DefinitionError::Disconnected {
                workflow,
                element: condition.name.clone(),
            });
        }
    }

    // Router rules per split kind.
    for task in def.tasks() {
        match task.split {
            SplitKind::And => {}
            SplitKind::Xor | SplitKind::Or => {
                let router = task.router.as_ref().ok_or_else(|| {
                    DefinitionError::MissingRouter {
                        workflow: workflow.clone(),
                        task: task.name.clone(),
                    }
                })?;

                match router {
                    RouterSpec::Fixed { conditions } => {
                        let outputs: HashSet<&str> = def
                            .task_outputs(&task.name)
                            .iter()
                            .map(|c| c.name.as_str())
                            .collect();
                        for condition in conditions {
                            if !outputs.contains(condition.as_str()) {
                                return Err(DefinitionError::RouterTarget {
                                    workflow,
                                    task: task.name.clone(),
                                    condition: condition.clone(),
                                });
                            }
                        }
                        if task.split == SplitKind::Xor && conditions.len() != 1 {
                            return Err(DefinitionError::XorRouterCardinality {
                                workflow,
                                task: task.name.clone(),
                            });
                        }
                    }
                    RouterSpec::PayloadKey { .. } => {
                        if task.kind.is_composite() {
                            return Err(DefinitionError::PayloadRouterOnComposite {
                                workflow,
                                task: task.name.clone(),
                            });
                        }
                    }
                }
            }
        }
    }

    // Dynamic composites carry at least one candidate.
    for task in def.tasks() {
        if let TaskKind::DynamicCompositeTask { candidates } = &task.kind {
            if candidates.is_empty() {
                return Err(DefinitionError::EmptyCandidates {
                    workflow,
                    task: task.name.clone(),
                });
            }
        }
    }

    // Region owners and members resolve.
    for region in def.regions() {
        let owner_ok = match &region.owner {
            RegionOwner::Task(name) => def.task(name).is_some(),
            RegionOwner::Condition(name) => def.condition(name).is_some(),
        };
        if !owner_ok {
            return Err(DefinitionError::UnknownElement {
                workflow,
                name: region.owner.name().to_string(),
            });
        }
        for name in &region.tasks {
            if def.task(name).is_none() {
                return Err(DefinitionError::UnknownElement {
                    workflow,
                    name: name.clone(),
                });
            }
        }
        for name in &region.conditions {
            if def.condition(name).is_none() {
                return Err(DefinitionError::UnknownElement {
                    workflow,
                    name: name.clone(),
                });
            }
        }
    }

    Ok(())
}
