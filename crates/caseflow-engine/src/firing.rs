//! Firing engine: enablement, token consumption, split production
//!
//! Tasks never auto-fire; firing is caller-driven through the API. The
//! engine's job is everything around that: deciding which tasks are
//! enabled after a marking change, consuming tokens per the join rule,
//! producing tokens per the split rule, and completing the workflow once
//! the end condition is marked and the net is quiescent.
//!
//! The one exception is dummy tasks — pure routing elements with no work
//! item — which fire and complete in the same mutation that enabled them.
//! A bounded counter turns dummy routing cycles into structural errors.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use caseflow_net::{
    JoinKind, OfferTemplate, SplitKind, TaskKind, WorkflowDefinition,
};

use crate::audit::{ElementRef, KeyEventKind};
use crate::cancellation;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::store::{Claim, ConditionRow, ParentRef, TaskRow, TaskState, WorkItemRow, WorkflowRow, WorkflowState};
use crate::subflow;

/// Upper bound on dummy-task fires per mutation; beyond this the net is
/// cycling through routing elements without consuming external input
const MAX_DUMMY_FIRES: u32 = 256;

/// Create the rows of a new workflow instance in `initialized`
pub(crate) fn instantiate_workflow(
    ctx: &mut ExecutionContext,
    definition: &WorkflowDefinition,
    workflow_id: Uuid,
    parent: Option<ParentRef>,
) -> Result<(), EngineError> {
    let case_id = ctx.case_id();
    let version = ctx.version().version();
    let now = Utc::now();

    ctx.insert_workflow(WorkflowRow {
        id: workflow_id,
        case_id,
        name: definition.name().to_string(),
        version,
        parent: parent.clone(),
        state: WorkflowState::Initialized,
        created_at: now,
        terminated_at: None,
    });
    ctx.emit(
        workflow_id,
        ElementRef::workflow(workflow_id, definition.name()),
        KeyEventKind::WorkflowInitialized {
            name: definition.name().to_string(),
            version,
            parent,
        },
    );

    for condition in definition.conditions() {
        ctx.insert_condition(ConditionRow {
            id: Uuid::now_v7(),
            case_id,
            workflow_id,
            name: condition.name.clone(),
            marking: 0,
            is_start: condition.is_start,
            is_end: condition.is_end,
            is_implicit: condition.is_implicit,
        });
    }
    for task in definition.tasks() {
        ctx.insert_task(TaskRow {
            id: Uuid::now_v7(),
            case_id,
            workflow_id,
            name: task.name.clone(),
            state: TaskState::Disabled,
            generation: 0,
        });
    }

    Ok(())
}

/// `initialized → started`: seed the start condition and recompute
pub(crate) fn start_workflow(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
) -> Result<(), EngineError> {
    let name = {
        let workflow = ctx.workflow_mut(workflow_id)?;
        workflow.start()?;
        workflow.name.clone()
    };
    ctx.emit(
        workflow_id,
        ElementRef::workflow(workflow_id, name),
        KeyEventKind::WorkflowStarted,
    );

    let definition = ctx.definition_of(workflow_id)?;
    let start_name = definition.start_condition().name.clone();
    let condition_id = ctx.find_condition(workflow_id, &start_name)?;

    produce_one(ctx, workflow_id, condition_id)?;
    recompute_enablement(ctx, workflow_id, &[condition_id])
}

/// Fire a regular task: consume per join, spawn the work item, mediate
/// the offer. Returns the new work item's id.
pub(crate) fn fire_regular_task(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    task_name: &str,
    payload: Option<Value>,
    aggregate_id: Option<String>,
) -> Result<Uuid, EngineError> {
    ctx.in_span("fire", |ctx| {
        let definition = ctx.definition_of(workflow_id)?;
        let task_def = definition
            .task(task_name)
            .ok_or_else(|| EngineError::not_found("task", task_name.to_string()))?
            .clone();

        let template = match &task_def.kind {
            TaskKind::Regular { work_item } => work_item.clone(),
            TaskKind::DummyTask => {
                return Err(EngineError::constraint(format!(
                    "dummy task '{task_name}' has no work item"
                )))
            }
            TaskKind::CompositeTask { .. } | TaskKind::DynamicCompositeTask { .. } => {
                return Err(EngineError::constraint(format!(
                    "composite task '{task_name}' spawns a workflow; use initializeWorkflow"
                )))
            }
        };

        let task_id = ctx.find_task(workflow_id, task_name)?;
        ctx.span_attr("taskId", task_id.to_string());

        let state = ctx.task(task_id)?.state;
        if state != TaskState::Enabled {
            return Err(EngineError::invalid_transition(
                "task", task_id, "fire", state,
            ));
        }

        let touched = consume_inputs(ctx, workflow_id, &definition, &task_def)?;
        let generation = ctx.task_mut(task_id)?.fire()?;
        ctx.emit(
            workflow_id,
            ElementRef::task(task_id, task_name),
            KeyEventKind::TaskFired { generation },
        );

        let item_id = Uuid::now_v7();
        ctx.insert_work_item(WorkItemRow {
            id: item_id,
            case_id: ctx.case_id(),
            workflow_id,
            task_id,
            task_name: task_name.to_string(),
            state: crate::store::WorkItemState::Initialized,
            offer: Some(template.offer.clone()),
            claim: None,
            payload: payload.unwrap_or(Value::Null),
            auto_trigger: template.auto_trigger,
            aggregate_id,
            priority: template.priority,
            created_at: Utc::now(),
        });
        ctx.emit(
            workflow_id,
            ElementRef::work_item(item_id, task_name),
            KeyEventKind::WorkItemInitialized {
                offer: Some(template.offer.clone()),
            },
        );

        // Automated items skip offered/claimed: synthesize the claim and
        // start immediately.
        if matches!(template.offer, OfferTemplate::Automated) {
            claim_item(ctx, item_id, Claim::Automated)?;
            start_item(ctx, item_id)?;
            if template.auto_trigger == Some(caseflow_net::AutoTriggerKind::Complete) {
                complete_item(ctx, item_id, None)?;
            }
        }

        recompute_enablement(ctx, workflow_id, &touched)?;
        Ok(item_id)
    })
}

/// Bind a claim to an item and record it
pub(crate) fn claim_item(
    ctx: &mut ExecutionContext,
    item_id: Uuid,
    claim: Claim,
) -> Result<(), EngineError> {
    let (workflow_id, task_name) = {
        let item = ctx.work_item_mut(item_id)?;
        item.claim(claim.clone())?;
        (item.workflow_id, item.task_name.clone())
    };
    ctx.emit(
        workflow_id,
        ElementRef::work_item(item_id, task_name),
        KeyEventKind::WorkItemClaimed { claim },
    );
    Ok(())
}

/// Drop an unstarted claim
pub(crate) fn release_item(ctx: &mut ExecutionContext, item_id: Uuid) -> Result<(), EngineError> {
    let (workflow_id, task_name) = {
        let item = ctx.work_item_mut(item_id)?;
        item.release()?;
        (item.workflow_id, item.task_name.clone())
    };
    ctx.emit(
        workflow_id,
        ElementRef::work_item(item_id, task_name),
        KeyEventKind::WorkItemReleased,
    );
    Ok(())
}

/// `initialized → started` for an item holding a claim
pub(crate) fn start_item(ctx: &mut ExecutionContext, item_id: Uuid) -> Result<(), EngineError> {
    let (workflow_id, task_name) = {
        let item = ctx.work_item_mut(item_id)?;
        item.start()?;
        (item.workflow_id, item.task_name.clone())
    };
    ctx.emit(
        workflow_id,
        ElementRef::work_item(item_id, task_name),
        KeyEventKind::WorkItemStarted,
    );
    Ok(())
}

/// Complete an item and drive its task's split
pub(crate) fn complete_item(
    ctx: &mut ExecutionContext,
    item_id: Uuid,
    payload: Option<Value>,
) -> Result<(), EngineError> {
    let (workflow_id, task_id, task_name, final_payload) = {
        let item = ctx.work_item_mut(item_id)?;
        item.complete(payload)?;
        (
            item.workflow_id,
            item.task_id,
            item.task_name.clone(),
            item.payload.clone(),
        )
    };
    ctx.emit(
        workflow_id,
        ElementRef::work_item(item_id, task_name),
        KeyEventKind::WorkItemCompleted,
    );
    complete_task(ctx, workflow_id, task_id, Some(&final_payload))
}

/// Fail an item; the task fails with it and produces nothing
pub(crate) fn fail_item(
    ctx: &mut ExecutionContext,
    item_id: Uuid,
    payload: Option<Value>,
) -> Result<(), EngineError> {
    let (workflow_id, task_id, task_name) = {
        let item = ctx.work_item_mut(item_id)?;
        item.fail(payload)?;
        (item.workflow_id, item.task_id, item.task_name.clone())
    };
    ctx.emit(
        workflow_id,
        ElementRef::work_item(item_id, task_name.clone()),
        KeyEventKind::WorkItemFailed,
    );

    ctx.task_mut(task_id)?.fail()?;
    ctx.emit(
        workflow_id,
        ElementRef::task(task_id, task_name),
        KeyEventKind::TaskFailed,
    );
    Ok(())
}

/// Cancel an item; an active task cancels with it
pub(crate) fn cancel_item(ctx: &mut ExecutionContext, item_id: Uuid) -> Result<bool, EngineError> {
    let (workflow_id, task_id, task_name, changed) = {
        let item = ctx.work_item_mut(item_id)?;
        let changed = item.cancel()?;
        (
            item.workflow_id,
            item.task_id,
            item.task_name.clone(),
            changed,
        )
    };
    if !changed {
        return Ok(false);
    }
    ctx.emit(
        workflow_id,
        ElementRef::work_item(item_id, task_name),
        KeyEventKind::WorkItemCanceled { canceled_by: None },
    );

    if ctx.task(task_id)?.state.is_active() {
        cancellation::cancel_task(ctx, workflow_id, task_id, None)?;
    }
    Ok(true)
}

/// Complete a started task: evaluate the split, produce tokens, sweep the
/// owned cancellation region, recompute enablement, and settle the
/// workflow if the net went quiescent on the end condition.
pub(crate) fn complete_task(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    task_id: Uuid,
    payload: Option<&Value>,
) -> Result<(), EngineError> {
    ctx.in_span("completeTask", |ctx| {
        let task_name = {
            let task = ctx.task_mut(task_id)?;
            task.complete()?;
            task.name.clone()
        };
        ctx.span_attr("taskName", task_name.clone());
        ctx.emit(
            workflow_id,
            ElementRef::task(task_id, task_name.clone()),
            KeyEventKind::TaskCompleted,
        );

        let definition = ctx.definition_of(workflow_id)?;
        let task_def = definition
            .task(&task_name)
            .ok_or_else(|| {
                EngineError::structural(format!("task '{task_name}' missing from definition"))
            })?
            .clone();

        let selected = select_outputs(&definition, &task_def, payload)?;
        let mut touched = Vec::with_capacity(selected.len());
        for name in &selected {
            let condition_id = ctx.find_condition(workflow_id, name)?;
            produce_one(ctx, workflow_id, condition_id)?;
            touched.push(condition_id);
        }

        if let Some(region) = definition.region_owned_by_task(&task_name) {
            let region_name = region.name.clone();
            let owner = ElementRef::task(task_id, task_name);
            let swept = cancellation::cancel_region(ctx, workflow_id, &region_name, owner)?;
            touched.extend(swept);
        }

        recompute_enablement(ctx, workflow_id, &touched)?;

        if check_workflow_completion(ctx, workflow_id)? {
            subflow::propagate_completion(ctx, workflow_id)?;
        }
        Ok(())
    })
}

/// Resolve the output set of a completing task per its split kind
fn select_outputs(
    definition: &WorkflowDefinition,
    task_def: &caseflow_net::TaskDef,
    payload: Option<&Value>,
) -> Result<Vec<String>, EngineError> {
    let outputs: Vec<String> = definition
        .task_outputs(&task_def.name)
        .iter()
        .map(|condition| condition.name.clone())
        .collect();

    match task_def.split {
        SplitKind::And => Ok(outputs),
        SplitKind::Xor | SplitKind::Or => {
            let router = task_def.router.as_ref().ok_or_else(|| {
                EngineError::configuration(format!(
                    "task '{}' has an XOR/OR split but no router",
                    task_def.name
                ))
            })?;
            let selected = router.select(payload).ok_or_else(|| {
                EngineError::configuration(format!(
                    "router on task '{}' did not resolve against the payload",
                    task_def.name
                ))
            })?;

            if selected.is_empty() {
                return Err(EngineError::configuration(format!(
                    "router on task '{}' selected no outputs",
                    task_def.name
                )));
            }
            if task_def.split == SplitKind::Xor && selected.len() != 1 {
                return Err(EngineError::configuration(format!(
                    "XOR router on task '{}' must select exactly one output",
                    task_def.name
                )));
            }
            for name in &selected {
                if !outputs.contains(name) {
                    return Err(EngineError::configuration(format!(
                        "router on task '{}' selected '{name}', which is not an output",
                        task_def.name
                    )));
                }
            }
            Ok(selected)
        }
    }
}

/// Consume input tokens per the join rule, returning every condition the
/// consumption (and any triggered region sweep) touched
pub(crate) fn consume_inputs(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    definition: &WorkflowDefinition,
    task_def: &caseflow_net::TaskDef,
) -> Result<Vec<Uuid>, EngineError> {
    let input_names: Vec<String> = definition
        .task_inputs(&task_def.name)
        .iter()
        .map(|condition| condition.name.clone())
        .collect();

    let mut chosen = Vec::with_capacity(input_names.len());
    match task_def.join {
        JoinKind::And => {
            for name in &input_names {
                chosen.push(ctx.find_condition(workflow_id, name)?);
            }
        }
        // The choice must be unambiguous at fire time; with several marked
        // inputs, definition order decides, keeping audit output
        // reproducible.
        JoinKind::Xor => {
            let mut found = None;
            for name in &input_names {
                let id = ctx.find_condition(workflow_id, name)?;
                if ctx.condition(id)?.is_marked() {
                    found = Some(id);
                    break;
                }
            }
            chosen.push(found.ok_or_else(|| {
                EngineError::structural(format!(
                    "XOR-join task '{}' fired with no marked input",
                    task_def.name
                ))
            })?);
        }
        // The witness is the subset observed marked at fire time.
        JoinKind::Or => {
            for name in &input_names {
                let id = ctx.find_condition(workflow_id, name)?;
                if ctx.condition(id)?.is_marked() {
                    chosen.push(id);
                }
            }
            if chosen.is_empty() {
                return Err(EngineError::structural(format!(
                    "OR-join task '{}' fired with no marked input",
                    task_def.name
                )));
            }
        }
    }

    let mut touched = chosen.clone();
    for condition_id in chosen {
        consume_one(ctx, workflow_id, condition_id)?;

        // Removing the token from a region-owning condition terminates
        // that owner and sweeps its region.
        let (marking, name) = {
            let condition = ctx.condition(condition_id)?;
            (condition.marking, condition.name.clone())
        };
        if marking == 0 {
            if let Some(region) = definition.region_owned_by_condition(&name) {
                let region_name = region.name.clone();
                let owner = ElementRef::condition(condition_id, name);
                let swept =
                    cancellation::cancel_region(ctx, workflow_id, &region_name, owner)?;
                touched.extend(swept);
            }
        }
    }
    Ok(touched)
}

/// Produce one token and record the new marking
pub(crate) fn produce_one(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    condition_id: Uuid,
) -> Result<(), EngineError> {
    let (marking, name) = {
        let condition = ctx.condition_mut(condition_id)?;
        let marking = condition.produce(1)?;
        (marking, condition.name.clone())
    };
    ctx.emit(
        workflow_id,
        ElementRef::condition(condition_id, name),
        KeyEventKind::ConditionMarked { marking },
    );
    Ok(())
}

/// Consume one token and record the new marking
fn consume_one(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    condition_id: Uuid,
) -> Result<(), EngineError> {
    let (marking, name) = {
        let condition = ctx.condition_mut(condition_id)?;
        let marking = condition.consume(1)?;
        (marking, condition.name.clone())
    };
    ctx.emit(
        workflow_id,
        ElementRef::condition(condition_id, name),
        KeyEventKind::ConditionMarked { marking },
    );
    Ok(())
}

/// Is the task's join satisfied by the current markings?
fn join_satisfied(
    ctx: &ExecutionContext,
    workflow_id: Uuid,
    definition: &WorkflowDefinition,
    task_name: &str,
) -> Result<bool, EngineError> {
    let task_def = definition
        .task(task_name)
        .ok_or_else(|| EngineError::not_found("task", task_name.to_string()))?;

    let mut any = false;
    let mut all = true;
    for condition_def in definition.task_inputs(task_name) {
        let id = ctx.find_condition(workflow_id, &condition_def.name)?;
        if ctx.condition(id)?.is_marked() {
            any = true;
        } else {
            all = false;
        }
    }

    Ok(match task_def.join {
        JoinKind::And => all && any,
        JoinKind::Xor | JoinKind::Or => any,
    })
}

/// Recompute enablement for tasks downstream of the touched conditions
///
/// Only the neighborhood of a marking change is revisited, never the whole
/// net. Dummy tasks fire-and-complete as soon as they enable.
pub(crate) fn recompute_enablement(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    touched: &[Uuid],
) -> Result<(), EngineError> {
    if ctx.workflow(workflow_id)?.state != WorkflowState::Started {
        return Ok(());
    }
    let definition = ctx.definition_of(workflow_id)?;

    let mut candidates: Vec<String> = Vec::new();
    for &condition_id in touched {
        let name = ctx.condition(condition_id)?.name.clone();
        for task_def in definition.condition_outputs(&name) {
            if !candidates.contains(&task_def.name) {
                candidates.push(task_def.name.clone());
            }
        }
    }

    for task_name in candidates {
        let task_id = ctx.find_task(workflow_id, &task_name)?;
        let satisfied = join_satisfied(ctx, workflow_id, &definition, &task_name)?;
        let state = ctx.task(task_id)?.state;

        match (state, satisfied) {
            // A completed task re-arms when its join is satisfied again,
            // which is how loops re-fire it under a fresh generation.
            (TaskState::Disabled | TaskState::Completed, true) => {
                ctx.task_mut(task_id)?.enable()?;
                ctx.emit(
                    workflow_id,
                    ElementRef::task(task_id, task_name.clone()),
                    KeyEventKind::TaskEnabled,
                );

                let is_dummy = matches!(
                    definition.task(&task_name).map(|t| &t.kind),
                    Some(TaskKind::DummyTask)
                );
                if is_dummy {
                    fire_dummy_task(ctx, workflow_id, task_id, &task_name)?;
                }
            }
            (TaskState::Enabled, false) => {
                ctx.task_mut(task_id)?.disable()?;
                ctx.emit(
                    workflow_id,
                    ElementRef::task(task_id, task_name.clone()),
                    KeyEventKind::TaskDisabled,
                );
            }
            _ => {}
        }
    }
    Ok(())
}

/// Fire-and-complete a routing task in the enabling mutation
fn fire_dummy_task(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    task_id: Uuid,
    task_name: &str,
) -> Result<(), EngineError> {
    ctx.dummy_fires += 1;
    if ctx.dummy_fires > MAX_DUMMY_FIRES {
        return Err(EngineError::structural(format!(
            "dummy-task routing cycle detected at '{task_name}'"
        )));
    }

    let definition = ctx.definition_of(workflow_id)?;
    let task_def = definition
        .task(task_name)
        .ok_or_else(|| EngineError::not_found("task", task_name.to_string()))?
        .clone();

    let touched = consume_inputs(ctx, workflow_id, &definition, &task_def)?;
    let generation = ctx.task_mut(task_id)?.fire()?;
    ctx.emit(
        workflow_id,
        ElementRef::task(task_id, task_name),
        KeyEventKind::TaskFired { generation },
    );

    complete_task(ctx, workflow_id, task_id, None)?;
    recompute_enablement(ctx, workflow_id, &touched)
}

/// Complete the workflow when the end condition is marked, no task is
/// enabled or started, and every non-end marking is zero
pub(crate) fn check_workflow_completion(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
) -> Result<bool, EngineError> {
    if ctx.workflow(workflow_id)?.state != WorkflowState::Started {
        return Ok(false);
    }

    for task_id in ctx.tasks_of(workflow_id) {
        if ctx.task(task_id)?.state.is_active() {
            return Ok(false);
        }
    }

    let mut end_marked = false;
    for condition_id in ctx.conditions_of(workflow_id) {
        let condition = ctx.condition(condition_id)?;
        if condition.is_end {
            end_marked = condition.is_marked();
        } else if condition.is_marked() {
            return Ok(false);
        }
    }
    if !end_marked {
        return Ok(false);
    }

    let name = {
        let workflow = ctx.workflow_mut(workflow_id)?;
        workflow.complete(Utc::now())?;
        workflow.name.clone()
    };
    ctx.emit(
        workflow_id,
        ElementRef::workflow(workflow_id, name),
        KeyEventKind::WorkflowCompleted,
    );
    Ok(true)
}
