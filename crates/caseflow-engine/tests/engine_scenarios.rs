//! End-to-end scenarios over the in-memory store
//!
//! Each test drives the engine through its public API the way a host
//! backend would: register versions and scopes, open a case, fire tasks,
//! claim and complete work items, and read the audit trail back.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use caseflow_engine::prelude::*;
use caseflow_engine::{payload_hash, EngineError, ScopeModule, StateStore};
use caseflow_net::prelude::*;
use caseflow_net::{AutoTriggerKind, RegionOwner, RouterSpec, TaskBuilder, WorkflowBuilder};

fn scopes() -> ScopeRegistry {
    ScopeRegistry::from_root(
        ScopeModule::new("wf")
            .scope("staff", "General staff")
            .scope("admin", "Administrators"),
    )
}

fn engine_for(definitions: Vec<(u32, WorkflowDefinition, Vec<WorkflowDefinition>)>) -> Engine<InMemoryStateStore> {
    let mut versions = VersionManager::new();
    for (number, main, subs) in definitions {
        let mut version = WorkflowVersion::new(number, main);
        for sub in subs {
            version = version.with_sub_workflow(sub);
        }
        versions.register(version).expect("register version");
    }
    Engine::new(InMemoryStateStore::new(), versions, scopes())
}

async fn task_state(
    engine: &Engine<InMemoryStateStore>,
    case_id: Uuid,
    workflow_id: Uuid,
    name: &str,
) -> TaskState {
    let snapshot = engine.store().load_case(case_id).await.unwrap();
    snapshot
        .tasks
        .values()
        .find(|task| task.workflow_id == workflow_id && task.name == name)
        .unwrap_or_else(|| panic!("task '{name}' not found"))
        .state
}

async fn marking(
    engine: &Engine<InMemoryStateStore>,
    case_id: Uuid,
    workflow_id: Uuid,
    name: &str,
) -> u32 {
    let snapshot = engine.store().load_case(case_id).await.unwrap();
    snapshot
        .conditions
        .values()
        .find(|condition| condition.workflow_id == workflow_id && condition.name == name)
        .unwrap_or_else(|| panic!("condition '{name}' not found"))
        .marking
}

fn linear_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("linear")
        .start_condition("start")
        .end_condition("end")
        .task(TaskBuilder::regular("a").human_offer("wf.staff", None))
        .condition_to_task("start", "a")
        .task_to_condition("a", "end")
        .build()
        .unwrap()
}

// =============================================================================
// Scenario 1: linear flow with a human claim
// =============================================================================

#[test_log::test(tokio::test)]
async fn linear_flow_completes_workflow() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    assert_eq!(workflow.state, WorkflowState::Started);

    let item = api
        .initialize_work_item(
            workflow.id,
            "a",
            Some(json!({ "note": "hello" })),
            Some("order-9".into()),
            ActorContext::System,
        )
        .await
        .unwrap();
    assert_eq!(item.state, WorkItemState::Initialized);
    assert_eq!(item.status, WorkItemStatus::Pending);
    assert_eq!(item.required_scope.as_deref(), Some("wf.staff"));

    let staff = Actor::new("alice").with_scope("wf.staff");
    let claimed = api
        .claim_work_item(item.id, ActorContext::User(staff.clone()))
        .await
        .unwrap();
    assert_eq!(claimed.status, WorkItemStatus::Claimed);
    assert_eq!(claimed.claimed_by.as_deref(), Some("alice"));

    api.start_work_item(item.id, ActorContext::User(staff.clone()))
        .await
        .unwrap();
    let done = api
        .complete_work_item(item.id, Some(json!({ "ok": true })), ActorContext::User(staff))
        .await
        .unwrap();
    assert_eq!(done.status, WorkItemStatus::Completed);

    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "a").await,
        TaskState::Completed
    );
    assert_eq!(marking(&engine, workflow.id, workflow.id, "end").await, 1);
    assert_eq!(marking(&engine, workflow.id, workflow.id, "start").await, 0);
    assert_eq!(
        engine.workflow(workflow.id).await.unwrap().state,
        WorkflowState::Completed
    );
}

#[test_log::test(tokio::test)]
async fn claim_requires_scope() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let intruder = Actor::new("mallory").with_scope("wf.admin");
    let err = api
        .claim_work_item(item.id, ActorContext::User(intruder))
        .await
        .unwrap_err();

    match err {
        EngineError::PolicyDeny { policy, actor } => {
            assert_eq!(policy, "workItem.claim");
            assert_eq!(actor, "mallory");
        }
        other => panic!("expected PolicyDeny, got {other:?}"),
    }
}

// =============================================================================
// Scenario 2: XOR split with a payload router
// =============================================================================

fn xor_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("xor")
        .start_condition("start")
        .end_condition("end")
        .condition("b")
        .condition("c")
        .task(
            TaskBuilder::regular("a")
                .split(SplitKind::Xor)
                .router(RouterSpec::payload_key("route")),
        )
        .task(TaskBuilder::regular("tb"))
        .task(TaskBuilder::regular("tc"))
        .condition_to_task("start", "a")
        .task_to_condition("a", "b")
        .task_to_condition("a", "c")
        .condition_to_task("b", "tb")
        .condition_to_task("c", "tc")
        .task_to_condition("tb", "end")
        .task_to_condition("tc", "end")
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn xor_split_routes_one_token() {
    let engine = engine_for(vec![(1, xor_definition(), vec![])]);
    let api = engine.version("xor", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    // Automated offer: the engine claimed and started the item at fire time.
    assert_eq!(item.state, WorkItemState::Started);
    api.complete_work_item(item.id, Some(json!({ "route": "b" })), ActorContext::System)
        .await
        .unwrap();

    assert_eq!(marking(&engine, workflow.id, workflow.id, "b").await, 1);
    assert_eq!(marking(&engine, workflow.id, workflow.id, "c").await, 0);
    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "tb").await,
        TaskState::Enabled
    );
    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "tc").await,
        TaskState::Disabled
    );
}

#[test_log::test(tokio::test)]
async fn xor_router_must_resolve() {
    let engine = engine_for(vec![(1, xor_definition(), vec![])]);
    let api = engine.version("xor", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let err = api
        .complete_work_item(item.id, Some(json!({ "other": 1 })), ActorContext::System)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION");
}

// =============================================================================
// Scenario 3: AND join waits for all inputs
// =============================================================================

fn and_join_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("andjoin")
        .start_condition("start")
        .end_condition("end")
        .condition("ia")
        .condition("ib")
        .condition("oa")
        .condition("ob")
        .task(TaskBuilder::dummy("s"))
        .task(TaskBuilder::regular("a"))
        .task(TaskBuilder::regular("b"))
        .task(TaskBuilder::regular("c").join(JoinKind::And))
        .condition_to_task("start", "s")
        .task_to_condition("s", "ia")
        .task_to_condition("s", "ib")
        .condition_to_task("ia", "a")
        .condition_to_task("ib", "b")
        .task_to_condition("a", "oa")
        .task_to_condition("b", "ob")
        .condition_to_task("oa", "c")
        .condition_to_task("ob", "c")
        .task_to_condition("c", "end")
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn and_join_needs_every_input() {
    let engine = engine_for(vec![(1, and_join_definition(), vec![])]);
    let api = engine.version("andjoin", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();

    // The dummy splitter fired in the same mutation and enabled both arms.
    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "s").await,
        TaskState::Completed
    );

    let item_a = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();
    api.complete_work_item(item_a.id, None, ActorContext::System)
        .await
        .unwrap();

    // Only one input marked: C stays disabled.
    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "c").await,
        TaskState::Disabled
    );

    let item_b = api
        .initialize_work_item(workflow.id, "b", None, None, ActorContext::System)
        .await
        .unwrap();
    api.complete_work_item(item_b.id, None, ActorContext::System)
        .await
        .unwrap();

    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "c").await,
        TaskState::Enabled
    );
}

#[test_log::test(tokio::test)]
async fn and_split_conserves_tokens() {
    let engine = engine_for(vec![(1, and_join_definition(), vec![])]);
    let api = engine.version("andjoin", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();

    // The AND-split dummy consumed one token from `start` and produced
    // exactly one into each of its two outputs.
    assert_eq!(marking(&engine, workflow.id, workflow.id, "start").await, 0);
    assert_eq!(marking(&engine, workflow.id, workflow.id, "ia").await, 1);
    assert_eq!(marking(&engine, workflow.id, workflow.id, "ib").await, 1);
}

// =============================================================================
// Scenario 4: cancellation region
// =============================================================================

fn region_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("region")
        .start_condition("start")
        .end_condition("end")
        .condition("io")
        .condition("i1")
        .condition("i2")
        .condition("c1")
        .task(TaskBuilder::dummy("s"))
        .task(TaskBuilder::regular("o"))
        .task(TaskBuilder::regular("t1"))
        .task(TaskBuilder::regular("t2"))
        .task(TaskBuilder::regular("tc"))
        .condition_to_task("start", "s")
        .task_to_condition("s", "io")
        .task_to_condition("s", "i1")
        .task_to_condition("s", "i2")
        .task_to_condition("s", "c1")
        .condition_to_task("io", "o")
        .condition_to_task("i1", "t1")
        .condition_to_task("i2", "t2")
        .condition_to_task("c1", "tc")
        .task_to_condition("o", "end")
        .task_to_condition("t1", "end")
        .task_to_condition("t2", "end")
        .task_to_condition("tc", "end")
        .cancellation_region("sweep", RegionOwner::Task("o".into()), ["t1", "t2"], ["c1"])
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn owner_completion_sweeps_region() {
    let engine = engine_for(vec![(1, region_definition(), vec![])]);
    let api = engine.version("region", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();

    // T1 started (fired), T2 enabled, c1 marked.
    let item_t1 = api
        .initialize_work_item(workflow.id, "t1", None, None, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "t1").await,
        TaskState::Started
    );
    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "t2").await,
        TaskState::Enabled
    );
    assert_eq!(marking(&engine, workflow.id, workflow.id, "c1").await, 1);

    // Completing the owner cascades.
    let item_o = api
        .initialize_work_item(workflow.id, "o", None, None, ActorContext::System)
        .await
        .unwrap();
    api.complete_work_item(item_o.id, None, ActorContext::System)
        .await
        .unwrap();

    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "t1").await,
        TaskState::Canceled
    );
    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "t2").await,
        TaskState::Canceled
    );
    assert_eq!(marking(&engine, workflow.id, workflow.id, "c1").await, 0);

    // T1's in-flight item went with its task.
    assert_eq!(
        engine.work_item(item_t1.id).await.unwrap().state,
        WorkItemState::Canceled
    );

    // Every sweep event names the owner.
    let events = engine
        .store()
        .key_events_for_case(workflow.id)
        .await
        .unwrap();
    let cancels: Vec<_> = events
        .iter()
        .filter_map(|event| match &event.kind {
            KeyEventKind::TaskCanceled {
                canceled_by: Some(owner),
            } => Some(owner.name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(cancels, vec!["o".to_string(), "o".to_string()]);

    assert!(events.iter().any(|event| matches!(
        &event.kind,
        KeyEventKind::ConditionReset { canceled_by } if canceled_by.name == "o"
    )));
}

// =============================================================================
// Scenario 5: composite task spawns and completes a child workflow
// =============================================================================

fn sub_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("treatment")
        .start_condition("start")
        .end_condition("end")
        .task(TaskBuilder::regular("administer"))
        .condition_to_task("start", "administer")
        .task_to_condition("administer", "end")
        .build()
        .unwrap()
}

fn composite_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("parent")
        .start_condition("start")
        .end_condition("end")
        .task(TaskBuilder::composite("treat", "treatment"))
        .condition_to_task("start", "treat")
        .task_to_condition("treat", "end")
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn composite_task_spawns_child_and_propagates_completion() {
    let engine = engine_for(vec![(1, composite_definition(), vec![sub_definition()])]);
    let api = engine.version("parent", 1).unwrap();

    let parent = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();

    let child = api
        .initialize_workflow(parent.id, "treat", None, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(child.name, "treatment");
    assert_eq!(child.state, WorkflowState::Started);

    let parent_ref = child.parent.expect("child has a parent");
    assert_eq!(parent_ref.workflow_id, parent.id);
    assert_eq!(parent_ref.task_name, "treat");
    assert_eq!(parent_ref.generation, 1);

    // Drive the child to completion; the parent completes with it.
    let item = api
        .initialize_work_item(child.id, "administer", None, None, ActorContext::System)
        .await
        .unwrap();
    api.complete_work_item(item.id, None, ActorContext::System)
        .await
        .unwrap();

    assert_eq!(
        engine.workflow(child.id).await.unwrap().state,
        WorkflowState::Completed
    );
    assert_eq!(
        engine.workflow(parent.id).await.unwrap().state,
        WorkflowState::Completed
    );
    assert_eq!(
        task_state(&engine, parent.id, parent.id, "treat").await,
        TaskState::Completed
    );
}

fn dynamic_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("dispatch")
        .start_condition("start")
        .end_condition("end")
        .task(TaskBuilder::dynamic_composite("route", ["fast", "slow"]))
        .condition_to_task("start", "route")
        .task_to_condition("route", "end")
        .build()
        .unwrap()
}

fn trivial_sub(name: &str) -> WorkflowDefinition {
    WorkflowBuilder::new(name)
        .start_condition("start")
        .end_condition("end")
        .task(TaskBuilder::regular("work"))
        .condition_to_task("start", "work")
        .task_to_condition("work", "end")
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn dynamic_composite_selects_candidate() {
    let engine = engine_for(vec![(
        1,
        dynamic_definition(),
        vec![trivial_sub("fast"), trivial_sub("slow")],
    )]);
    let api = engine.version("dispatch", 1).unwrap();

    // Explicit selector picks among the candidates.
    let parent = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let child = api
        .initialize_workflow(parent.id, "route", Some("slow"), ActorContext::System)
        .await
        .unwrap();
    assert_eq!(child.name, "slow");

    // No selector defaults to the first registered candidate.
    let parent2 = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let child2 = api
        .initialize_workflow(parent2.id, "route", None, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(child2.name, "fast");

    // Unknown selectors are configuration errors.
    let parent3 = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let err = api
        .initialize_workflow(parent3.id, "route", Some("teleport"), ActorContext::System)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION");
}

#[test_log::test(tokio::test)]
async fn canceling_child_cancels_parent_task() {
    let engine = engine_for(vec![(1, composite_definition(), vec![sub_definition()])]);
    let api = engine.version("parent", 1).unwrap();

    let parent = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let child = api
        .initialize_workflow(parent.id, "treat", None, ActorContext::System)
        .await
        .unwrap();

    api.cancel_workflow(child.id, ActorContext::System)
        .await
        .unwrap();

    assert_eq!(
        engine.workflow(child.id).await.unwrap().state,
        WorkflowState::Canceled
    );
    assert_eq!(
        task_state(&engine, parent.id, parent.id, "treat").await,
        TaskState::Canceled
    );
}

// =============================================================================
// Scenario 6: human claim race
// =============================================================================

#[test_log::test(tokio::test)]
async fn claim_race_has_one_winner() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let alice = Actor::new("alice").with_scope("wf.staff");
    let bob = Actor::new("bob").with_scope("wf.staff");

    api.claim_work_item(item.id, ActorContext::User(alice))
        .await
        .unwrap();
    let err = api
        .claim_work_item(item.id, ActorContext::User(bob))
        .await
        .unwrap_err();

    match &err {
        EngineError::InvalidStateTransition { context, .. } => {
            assert_eq!(context["claimedBy"], "alice");
        }
        other => panic!("expected InvalidStateTransition, got {other:?}"),
    }

    // The audit trail records exactly one claim.
    let events = engine
        .store()
        .key_events_for_case(workflow.id)
        .await
        .unwrap();
    let claims = events
        .iter()
        .filter(|event| matches!(event.kind, KeyEventKind::WorkItemClaimed { .. }))
        .count();
    assert_eq!(claims, 1);
}

#[test_log::test(tokio::test)]
async fn released_item_can_be_reclaimed() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let alice = Actor::new("alice").with_scope("wf.staff");
    let bob = Actor::new("bob").with_scope("wf.staff");

    api.claim_work_item(item.id, ActorContext::User(alice.clone()))
        .await
        .unwrap();

    // Only the claimant may release.
    let err = api
        .release_work_item(item.id, ActorContext::User(bob.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "POLICY_DENY");

    api.release_work_item(item.id, ActorContext::User(alice))
        .await
        .unwrap();
    let reclaimed = api
        .claim_work_item(item.id, ActorContext::User(bob))
        .await
        .unwrap();
    assert_eq!(reclaimed.claimed_by.as_deref(), Some("bob"));
}

// =============================================================================
// Laws
// =============================================================================

#[test_log::test(tokio::test)]
async fn cancel_is_idempotent() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    api.initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let first = api
        .cancel_root_workflow(workflow.id, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(first.state, WorkflowState::Canceled);

    let snapshot_after_first = engine.store().load_case(workflow.id).await.unwrap();
    let second = api
        .cancel_root_workflow(workflow.id, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(second.state, WorkflowState::Canceled);

    let snapshot_after_second = engine.store().load_case(workflow.id).await.unwrap();
    assert_eq!(snapshot_after_first.workflows, snapshot_after_second.workflows);
    assert_eq!(snapshot_after_first.tasks, snapshot_after_second.tasks);
    assert_eq!(
        snapshot_after_first.conditions,
        snapshot_after_second.conditions
    );
    assert_eq!(
        snapshot_after_first.work_items,
        snapshot_after_second.work_items
    );
}

#[test_log::test(tokio::test)]
async fn replay_fold_matches_persisted_state() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let staff = Actor::new("alice").with_scope("wf.staff");
    api.claim_work_item(item.id, ActorContext::User(staff.clone()))
        .await
        .unwrap();
    api.start_work_item(item.id, ActorContext::User(staff.clone()))
        .await
        .unwrap();
    api.complete_work_item(item.id, None, ActorContext::User(staff))
        .await
        .unwrap();

    let events = engine
        .store()
        .key_events_for_case(workflow.id)
        .await
        .unwrap();
    let trace_id = events[0].trace_id;

    let state = engine
        .get_workflow_state_at_time(trace_id, Some(workflow.id), Utc::now())
        .await
        .unwrap();
    let folded = state.workflow(workflow.id).expect("workflow in fold");

    let snapshot = engine.store().load_case(workflow.id).await.unwrap();
    let row = &snapshot.workflows[&workflow.id];
    assert_eq!(folded.state, row.state);

    for task in snapshot.tasks.values() {
        assert_eq!(folded.tasks[&task.name], task.state, "task {}", task.name);
    }
    for condition in snapshot.conditions.values() {
        let folded_marking = folded.markings.get(&condition.name).copied().unwrap_or(0);
        assert_eq!(folded_marking, condition.marking, "condition {}", condition.name);
    }
    for item_row in snapshot.work_items.values() {
        assert_eq!(folded.work_items[&item_row.id], item_row.state);
    }
}

#[test_log::test(tokio::test)]
async fn time_travel_sees_intermediate_state() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let before_completion = Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let staff = Actor::new("alice").with_scope("wf.staff");
    api.claim_work_item(item.id, ActorContext::User(staff.clone()))
        .await
        .unwrap();
    api.start_work_item(item.id, ActorContext::User(staff.clone()))
        .await
        .unwrap();
    api.complete_work_item(item.id, None, ActorContext::User(staff))
        .await
        .unwrap();

    let events = engine
        .store()
        .key_events_for_case(workflow.id)
        .await
        .unwrap();
    let trace_id = events[0].trace_id;

    // At the cut point the task had fired but nothing was claimed yet.
    let state = engine
        .get_workflow_state_at_time(trace_id, Some(workflow.id), before_completion)
        .await
        .unwrap();
    let folded = state.workflow(workflow.id).unwrap();
    assert_eq!(folded.state, WorkflowState::Started);
    assert_eq!(folded.tasks["a"], TaskState::Started);
    assert_eq!(folded.work_items[&item.id], WorkItemState::Initialized);
}

#[test_log::test(tokio::test)]
async fn version_isolation() {
    let engine = engine_for(vec![
        (1, linear_definition(), vec![]),
        (2, linear_definition(), vec![]),
    ]);
    let v1 = engine.version("linear", 1).unwrap();
    let v2 = engine.version("linear", 2).unwrap();

    let workflow = v1
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();

    let err = v2
        .cancel_root_workflow(workflow.id, ActorContext::System)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ENTITY_NOT_FOUND");

    // The owning version still sees it.
    v1.cancel_root_workflow(workflow.id, ActorContext::System)
        .await
        .unwrap();
}

// =============================================================================
// Versioning, deprecation, internal variants
// =============================================================================

#[test_log::test(tokio::test)]
async fn deprecated_version_refuses_new_roots() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    engine.versions().deprecate("linear", 1).unwrap();

    let err = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WORKFLOW_DEPRECATED");

    // In-flight instances keep going.
    let staff = Actor::new("alice").with_scope("wf.staff");
    api.claim_work_item(item.id, ActorContext::User(staff.clone()))
        .await
        .unwrap();
    api.start_work_item(item.id, ActorContext::User(staff.clone()))
        .await
        .unwrap();
    api.complete_work_item(item.id, None, ActorContext::User(staff))
        .await
        .unwrap();
    assert_eq!(
        engine.workflow(workflow.id).await.unwrap().state,
        WorkflowState::Completed
    );
}

#[test_log::test(tokio::test)]
async fn internal_variants_require_system_context() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let staff = Actor::new("alice").with_scope("wf.staff");
    let err = api
        .internal_complete_work_item(item.id, None, ActorContext::User(staff))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_INTERNAL_MUTATION");
}

// =============================================================================
// Auto-triggers, worklists, offers
// =============================================================================

fn auto_complete_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("auto")
        .start_condition("start")
        .end_condition("end")
        .task(
            TaskBuilder::regular("a")
                .human_offer("wf.staff", None)
                .auto_trigger(AutoTriggerKind::Complete),
        )
        .condition_to_task("start", "a")
        .task_to_condition("a", "end")
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn auto_trigger_completes_on_claim() {
    let engine = engine_for(vec![(1, auto_complete_definition(), vec![])]);
    let api = engine.version("auto", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let staff = Actor::new("alice").with_scope("wf.staff");
    let view = api
        .claim_work_item(item.id, ActorContext::User(staff))
        .await
        .unwrap();

    assert_eq!(view.state, WorkItemState::Completed);
    assert_eq!(
        engine.workflow(workflow.id).await.unwrap().state,
        WorkflowState::Completed
    );
}

#[test_log::test(tokio::test)]
async fn worklist_filters_by_scope_and_group() {
    let definition = WorkflowBuilder::new("grouped")
        .start_condition("start")
        .end_condition("end")
        .task(TaskBuilder::regular("a").human_offer("wf.staff", Some("night-shift".into())))
        .condition_to_task("start", "a")
        .task_to_condition("a", "end")
        .build()
        .unwrap();

    let engine = engine_for(vec![(1, definition, vec![])]);
    let api = engine.version("grouped", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let in_group = Actor::new("alice")
        .with_scope("wf.staff")
        .with_group("night-shift");
    let out_of_group = Actor::new("bob").with_scope("wf.staff");
    let wrong_scope = Actor::new("carol").with_scope("wf.admin");

    let list = engine.worklist(&in_group).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, item.id);

    assert!(engine.worklist(&out_of_group).await.unwrap().is_empty());
    assert!(engine.worklist(&wrong_scope).await.unwrap().is_empty());

    // Group membership is also enforced at claim time.
    let err = api
        .claim_work_item(item.id, ActorContext::User(out_of_group))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "POLICY_DENY");
}

#[test_log::test(tokio::test)]
async fn offer_listener_fires_after_commit() {
    let offered: Arc<parking_lot::Mutex<Vec<Uuid>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = offered.clone();

    let mut versions = VersionManager::new();
    versions
        .register(WorkflowVersion::new(1, linear_definition()))
        .unwrap();
    let engine = Engine::new(InMemoryStateStore::new(), versions, scopes())
        .on_offer(Arc::new(move |view| sink.lock().push(view.id)));
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    assert_eq!(*offered.lock(), vec![item.id]);
}

// =============================================================================
// OR split and join
// =============================================================================

fn or_definition() -> WorkflowDefinition {
    WorkflowBuilder::new("orflow")
        .start_condition("start")
        .end_condition("end")
        .condition("b")
        .condition("c")
        .task(
            TaskBuilder::regular("a")
                .split(SplitKind::Or)
                .router(RouterSpec::payload_key("branches")),
        )
        .task(TaskBuilder::regular("j").join(JoinKind::Or))
        .condition_to_task("start", "a")
        .task_to_condition("a", "b")
        .task_to_condition("a", "c")
        .condition_to_task("b", "j")
        .condition_to_task("c", "j")
        .task_to_condition("j", "end")
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn or_join_consumes_the_observed_witness() {
    let engine = engine_for(vec![(1, or_definition(), vec![])]);
    let api = engine.version("orflow", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    // The OR split marks both branches.
    api.complete_work_item(
        item.id,
        Some(json!({ "branches": ["b", "c"] })),
        ActorContext::System,
    )
    .await
    .unwrap();
    assert_eq!(marking(&engine, workflow.id, workflow.id, "b").await, 1);
    assert_eq!(marking(&engine, workflow.id, workflow.id, "c").await, 1);

    // Firing the OR join consumes one token from each marked input.
    let join_item = api
        .initialize_work_item(workflow.id, "j", None, None, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(marking(&engine, workflow.id, workflow.id, "b").await, 0);
    assert_eq!(marking(&engine, workflow.id, workflow.id, "c").await, 0);

    api.complete_work_item(join_item.id, None, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(
        engine.workflow(workflow.id).await.unwrap().state,
        WorkflowState::Completed
    );
}

// =============================================================================
// Failure, direct cancellation, auto-trigger setter
// =============================================================================

#[test_log::test(tokio::test)]
async fn failed_item_fails_its_task_and_produces_nothing() {
    let engine = engine_for(vec![(1, xor_definition(), vec![])]);
    let api = engine.version("xor", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let failed = api
        .fail_work_item(
            item.id,
            Some(json!({ "error": "boom" })),
            ActorContext::System,
        )
        .await
        .unwrap();
    assert_eq!(failed.state, WorkItemState::Failed);

    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "a").await,
        TaskState::Failed
    );
    assert_eq!(marking(&engine, workflow.id, workflow.id, "b").await, 0);
    assert_eq!(marking(&engine, workflow.id, workflow.id, "c").await, 0);
    assert_eq!(
        engine.workflow(workflow.id).await.unwrap().state,
        WorkflowState::Started
    );
}

#[test_log::test(tokio::test)]
async fn canceled_item_cancels_its_task() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let canceled = api
        .cancel_work_item(item.id, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(canceled.state, WorkItemState::Canceled);
    assert_eq!(
        task_state(&engine, workflow.id, workflow.id, "a").await,
        TaskState::Canceled
    );

    // Cancel is idempotent on the item.
    let again = api
        .cancel_work_item(item.id, ActorContext::System)
        .await
        .unwrap();
    assert_eq!(again.state, WorkItemState::Canceled);
}

#[test_log::test(tokio::test)]
async fn auto_trigger_set_at_most_once() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    api.set_work_item_auto_trigger(item.id, AutoTriggerKind::Start, ActorContext::System)
        .await
        .unwrap();
    let err = api
        .set_work_item_auto_trigger(item.id, AutoTriggerKind::Complete, ActorContext::System)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");

    // The pre-set trigger starts the item as soon as it is claimed.
    let staff = Actor::new("alice").with_scope("wf.staff");
    let view = api
        .claim_work_item(item.id, ActorContext::User(staff))
        .await
        .unwrap();
    assert_eq!(view.state, WorkItemState::Started);
}

// =============================================================================
// Audit surface
// =============================================================================

#[test_log::test(tokio::test)]
async fn spans_form_a_tree_per_operation() {
    let engine = engine_for(vec![(1, linear_definition(), vec![])]);
    let api = engine.version("linear", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(
            workflow.id,
            "a",
            Some(json!({ "k": 1 })),
            None,
            ActorContext::System,
        )
        .await
        .unwrap();

    let events = engine
        .store()
        .key_events_for_case(workflow.id)
        .await
        .unwrap();

    // The second trace belongs to the work-item initialization.
    let fire_trace = events
        .iter()
        .find(|event| matches!(event.kind, KeyEventKind::TaskFired { .. }))
        .map(|event| event.trace_id)
        .unwrap();

    let roots = engine.get_root_spans(fire_trace).await.unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].name, "initializeWorkItem");

    let children = engine
        .get_child_spans(fire_trace, roots[0].span_id)
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "fire");

    let trace_events = engine.get_key_events(fire_trace).await.unwrap();
    assert!(trace_events
        .iter()
        .all(|event| event.trace_id == fire_trace));
    assert!(trace_events
        .iter()
        .any(|event| matches!(event.kind, KeyEventKind::WorkItemInitialized { .. })));

    let _ = item;
}

#[test_log::test(tokio::test)]
async fn child_instances_visible_through_time_travel() {
    let engine = engine_for(vec![(1, composite_definition(), vec![sub_definition()])]);
    let api = engine.version("parent", 1).unwrap();

    let parent = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let child = api
        .initialize_workflow(parent.id, "treat", None, ActorContext::System)
        .await
        .unwrap();

    let mid = Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let item = api
        .initialize_work_item(child.id, "administer", None, None, ActorContext::System)
        .await
        .unwrap();
    api.complete_work_item(item.id, None, ActorContext::System)
        .await
        .unwrap();

    let events = engine
        .store()
        .key_events_for_case(parent.id)
        .await
        .unwrap();
    let trace_id = events[0].trace_id;

    let live = engine
        .get_child_workflow_instances(trace_id, "treat", None, mid)
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].workflow_id, child.id);
    assert_eq!(live[0].generation, 1);

    // After completion the child no longer shows as live.
    let after = engine
        .get_child_workflow_instances(trace_id, "treat", None, Utc::now())
        .await
        .unwrap();
    assert!(after.is_empty());
}

#[test_log::test(tokio::test)]
async fn payload_hash_lands_in_span_attributes() {
    let engine = engine_for(vec![(1, xor_definition(), vec![])]);
    let api = engine.version("xor", 1).unwrap();

    let workflow = api
        .initialize_root_workflow(ActorContext::System)
        .await
        .unwrap();
    let item = api
        .initialize_work_item(workflow.id, "a", None, None, ActorContext::System)
        .await
        .unwrap();

    let payload = json!({ "route": "b" });
    api.complete_work_item(item.id, Some(payload.clone()), ActorContext::System)
        .await
        .unwrap();

    let events = engine
        .store()
        .key_events_for_case(workflow.id)
        .await
        .unwrap();
    let complete_trace = events
        .iter()
        .find(|event| matches!(event.kind, KeyEventKind::WorkItemCompleted))
        .map(|event| event.trace_id)
        .unwrap();

    let roots = engine.get_root_spans(complete_trace).await.unwrap();
    assert_eq!(roots[0].name, "completeWorkItem");
    assert_eq!(
        roots[0].attributes["payloadHash"],
        serde_json::Value::String(payload_hash(&payload))
    );
}

// =============================================================================
// Structure queries
// =============================================================================

#[test_log::test(tokio::test)]
async fn structure_query_exposes_static_graph() {
    let engine = engine_for(vec![(1, region_definition(), vec![])]);

    let graph = engine.versions().structure("region", 1).unwrap();
    assert_eq!(graph.workflow, "region");
    assert_eq!(graph.regions.len(), 1);
    assert_eq!(graph.regions[0].owner, "o");

    let api = engine.version("region", 1).unwrap();
    assert_eq!(api.structure().workflow, "region");
}
