//! Sub-workflow manager: composite and dynamic-composite tasks
//!
//! Firing a composite task consumes its join like any other task, then
//! spawns one child workflow parented by `{workflow_id, task_name,
//! generation}` instead of a work item. The generation is the parent
//! task's fire counter, so looped composites stamp successive children
//! 1, 2, 3, … Child completion completes the parent task, which produces
//! tokens per its split; parent cancellation cascades into the child.

use uuid::Uuid;

use caseflow_net::TaskKind;

use crate::audit::{ElementRef, KeyEventKind};
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::firing;
use crate::store::{ParentRef, TaskState};

/// Fire a composite or dynamic-composite task, spawning its child
///
/// For dynamic composites the selector picks among the candidates; with
/// no selector the first registered candidate is used. Returns the child
/// workflow's id.
pub(crate) fn fire_composite_task(
    ctx: &mut ExecutionContext,
    workflow_id: Uuid,
    task_name: &str,
    selector: Option<&str>,
) -> Result<Uuid, EngineError> {
    ctx.in_span("fireCompositeTask", |ctx| {
        let definition = ctx.definition_of(workflow_id)?;
        let task_def = definition
            .task(task_name)
            .ok_or_else(|| EngineError::not_found("task", task_name.to_string()))?
            .clone();

        let child_name = match &task_def.kind {
            TaskKind::CompositeTask { workflow } => workflow.clone(),
            TaskKind::DynamicCompositeTask { candidates } => match selector {
                Some(selected) => {
                    if !candidates.iter().any(|candidate| candidate == selected) {
                        return Err(EngineError::configuration(format!(
                            "'{selected}' is not a candidate of dynamic composite task \
                             '{task_name}'"
                        )));
                    }
                    selected.to_string()
                }
                None => candidates[0].clone(),
            },
            _ => {
                return Err(EngineError::constraint(format!(
                    "task '{task_name}' is not composite; use initializeWorkItem"
                )))
            }
        };

        let child_def = ctx
            .version()
            .sub_definition(&child_name)
            .cloned()
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "sub-workflow '{child_name}' is not registered with this version"
                ))
            })?;

        let task_id = ctx.find_task(workflow_id, task_name)?;
        ctx.span_attr("taskId", task_id.to_string());
        ctx.span_attr("subWorkflow", child_name.clone());

        let state = ctx.task(task_id)?.state;
        if state != TaskState::Enabled {
            return Err(EngineError::invalid_transition(
                "task", task_id, "fire", state,
            ));
        }

        let touched = firing::consume_inputs(ctx, workflow_id, &definition, &task_def)?;
        let generation = ctx.task_mut(task_id)?.fire()?;
        ctx.emit(
            workflow_id,
            ElementRef::task(task_id, task_name),
            KeyEventKind::TaskFired { generation },
        );

        let child_id = Uuid::now_v7();
        firing::instantiate_workflow(
            ctx,
            &child_def,
            child_id,
            Some(ParentRef {
                workflow_id,
                task_name: task_name.to_string(),
                generation,
            }),
        )?;
        ctx.emit(
            workflow_id,
            ElementRef::task(task_id, task_name),
            KeyEventKind::ChildWorkflowSpawned {
                child_workflow_id: child_id,
                workflow_name: child_name,
                generation,
            },
        );

        firing::start_workflow(ctx, child_id)?;
        firing::recompute_enablement(ctx, workflow_id, &touched)?;
        Ok(child_id)
    })
}

/// Push a completed child's outcome into its parent task
///
/// The parent task completes and produces per its split. A canceled
/// parent task ignores the completion; anything else mid-state is an
/// integrity failure (the parent must have been started to spawn).
pub(crate) fn propagate_completion(
    ctx: &mut ExecutionContext,
    child_workflow_id: Uuid,
) -> Result<(), EngineError> {
    let Some(parent) = ctx.workflow(child_workflow_id)?.parent.clone() else {
        return Ok(());
    };

    let parent_task_id = ctx
        .find_task(parent.workflow_id, &parent.task_name)
        .map_err(|_| {
            EngineError::structural(format!(
                "child workflow {child_workflow_id} has no parent task '{}'",
                parent.task_name
            ))
            .with_context("childWorkflowId", child_workflow_id.to_string())
        })?;

    match ctx.task(parent_task_id)?.state {
        TaskState::Started => {
            firing::complete_task(ctx, parent.workflow_id, parent_task_id, None)
        }
        TaskState::Canceled => Ok(()),
        state => Err(EngineError::structural(format!(
            "child workflow completed but parent task '{}' is {state}",
            parent.task_name
        ))),
    }
}
