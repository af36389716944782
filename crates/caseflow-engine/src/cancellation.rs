//! Cancellation engine
//!
//! A cancellation region is a named subgraph owned by a task or condition.
//! When the owner terminates — the owning task completes, or the owning
//! condition's marking returns to zero — every in-region task in
//! {enabled, started} and work item in {initialized, started} transitions
//! to canceled in deterministic id order, and in-region markings reset to
//! zero. One key event per affected element carries the owner as
//! `canceled_by`. The sweep is idempotent: re-triggering finds nothing
//! left to cancel.

use chrono::Utc;
use uuid::Uuid;

use crate::audit::{ElementRef, KeyEventKind};
use crate::context::ExecutionContext;
use crate::error::EngineError;

/// Sweep one region on behalf of its terminated owner
///
/// Returns the ids of conditions whose markings were reset, so the caller
/// can recompute enablement around them.
pub(crate) fn cancel_region(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    region_name: &str,
    owner: ElementRef,
) -> Result<Vec<Uuid>, EngineError> {
    let definition = ctx.definition_of(workflow_id)?;
    let region = definition
        .regions()
        .iter()
        .find(|region| region.name == region_name)
        .ok_or_else(|| {
            EngineError::configuration(format!("unknown cancellation region '{region_name}'"))
        })?
        .clone();

    let mut task_ids = Vec::with_capacity(region.tasks.len());
    for name in &region.tasks {
        task_ids.push(ctx.find_task(workflow_id, name)?);
    }
    task_ids.sort();

    for task_id in task_ids {
        if ctx.task(task_id)?.state.is_active() {
            cancel_task(ctx, workflow_id, task_id, Some(owner.clone()))?;
        }
    }

    let mut condition_ids = Vec::with_capacity(region.conditions.len());
    for name in &region.conditions {
        condition_ids.push(ctx.find_condition(workflow_id, name)?);
    }
    condition_ids.sort();

    let mut touched = Vec::new();
    for condition_id in condition_ids {
        let (marked, name) = {
            let condition = ctx.condition(condition_id)?;
            (condition.is_marked(), condition.name.clone())
        };
        if marked {
            ctx.condition_mut(condition_id)?.reset();
            ctx.emit(
                workflow_id,
                ElementRef::condition(condition_id, name),
                KeyEventKind::ConditionReset {
                    canceled_by: owner.clone(),
                },
            );
            touched.push(condition_id);
        }
    }

    Ok(touched)
}

/// Cancel an active task, its live work items, and any live child
/// workflows it spawned
///
/// Returns `false` when the task was already canceled.
pub(crate) fn cancel_task(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    task_id: Uuid,
    canceled_by: Option<ElementRef>,
) -> Result<bool, EngineError> {
    let (changed, task_name) = {
        let task = ctx.task_mut(task_id)?;
        let changed = task.cancel()?;
        (changed, task.name.clone())
    };
    if !changed {
        return Ok(false);
    }
    ctx.emit(
        workflow_id,
        ElementRef::task(task_id, task_name.clone()),
        KeyEventKind::TaskCanceled {
            canceled_by: canceled_by.clone(),
        },
    );

    for item_id in ctx.work_items_of_task(task_id) {
        let (live, item_task_name) = {
            let item = ctx.work_item(item_id)?;
            (item.state.is_live(), item.task_name.clone())
        };
        if live {
            ctx.work_item_mut(item_id)?.cancel()?;
            ctx.emit(
                workflow_id,
                ElementRef::work_item(item_id, item_task_name),
                KeyEventKind::WorkItemCanceled {
                    canceled_by: canceled_by.clone(),
                },
            );
        }
    }

    for child_id in ctx.children_of_task(workflow_id, &task_name) {
        if !ctx.workflow(child_id)?.state.is_terminal() {
            cancel_workflow_cascade(ctx, child_id, canceled_by.clone())?;
        }
    }

    Ok(true)
}

/// Cancel a workflow and everything live inside it, recursively
///
/// Returns `false` when the workflow was already canceled.
pub(crate) fn cancel_workflow_cascade(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    canceled_by: Option<ElementRef>,
) -> Result<bool, EngineError> {
    let (changed, name) = {
        let workflow = ctx.workflow_mut(workflow_id)?;
        let changed = workflow.cancel(Utc::now())?;
        (changed, workflow.name.clone())
    };
    if !changed {
        return Ok(false);
    }
    ctx.emit(
        workflow_id,
        ElementRef::workflow(workflow_id, name.clone()),
        KeyEventKind::WorkflowCanceled {
            canceled_by: canceled_by.clone(),
        },
    );

    // Members attribute their cancellation to the triggering owner, or to
    // this workflow when the cancel was direct.
    let member_by = canceled_by.unwrap_or_else(|| ElementRef::workflow(workflow_id, name));

    for task_id in ctx.tasks_of(workflow_id) {
        if ctx.task(task_id)?.state.is_active() {
            cancel_task(ctx, workflow_id, task_id, Some(member_by.clone()))?;
        }
    }

    // Stray live items whose task already terminated.
    for item_id in ctx.work_items_of(workflow_id) {
        let (live, task_name) = {
            let item = ctx.work_item(item_id)?;
            (item.state.is_live(), item.task_name.clone())
        };
        if live {
            ctx.work_item_mut(item_id)?.cancel()?;
            ctx.emit(
                workflow_id,
                ElementRef::work_item(item_id, task_name),
                KeyEventKind::WorkItemCanceled {
                    canceled_by: Some(member_by.clone()),
                },
            );
        }
    }

    for condition_id in ctx.conditions_of(workflow_id) {
        let (marked, condition_name) = {
            let condition = ctx.condition(condition_id)?;
            (condition.is_marked(), condition.name.clone())
        };
        if marked {
            ctx.condition_mut(condition_id)?.reset();
            ctx.emit(
                workflow_id,
                ElementRef::condition(condition_id, condition_name),
                KeyEventKind::ConditionReset {
                    canceled_by: member_by.clone(),
                },
            );
        }
    }

    Ok(true)
}
