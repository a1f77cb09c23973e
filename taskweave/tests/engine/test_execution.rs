//! Tests for approval-gated execution: wave barriers, recovery, and
//! cancellation

use super::common::*;
use taskweave::exec::lifecycle::SubTaskState;
use taskweave::exec::orchestrator::{PlanError, RunStatus};
use taskweave_sdk::{PlanEvent, RecoveryAction};

// ============================================================================
// Wave Barrier
// ============================================================================

#[tokio::test]
async fn test_full_run_respects_wave_order() {
    let approver = TestApprover::approve_all();
    let registry = backend_roster();
    let (mut orchestrator, [a, b, c, d]) = approved_diamond(&registry, &approver);
    let dispatch = TestDispatch::new(orchestrator.result_sender());

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);

    for id in [a, b, c, d] {
        assert_eq!(orchestrator.tracker().state(id), Some(SubTaskState::Completed));
    }

    // Wave N+1 never dispatches before wave N settles
    let pos = |id| dispatch.dispatch_position(id).unwrap();
    assert!(pos(a) < pos(b));
    assert!(pos(a) < pos(c));
    assert!(pos(b) < pos(d));
    assert!(pos(c) < pos(d));

    // D was unblocked exactly once, when both B and C completed
    let unblocked: Vec<u32> = orchestrator
        .event_log()
        .iter()
        .filter_map(|e| match e {
            PlanEvent::SubTaskUnblocked { sub_task_id } => Some(*sub_task_id),
            _ => None,
        })
        .collect();
    assert_eq!(unblocked.iter().filter(|&&id| id == d).count(), 1);

    let wave_completions = orchestrator
        .event_log()
        .iter()
        .filter(|e| matches!(e, PlanEvent::WaveCompleted { .. }))
        .count();
    assert_eq!(wave_completions, 3);
}

#[tokio::test]
async fn test_unapproved_plan_refuses_to_run() {
    let approver = TestApprover::deny_all();
    let registry = backend_roster();
    let mut orchestrator =
        taskweave::exec::orchestrator::GoalOrchestrator::new("denied", Default::default());
    let ids = orchestrator
        .add_subtasks(vec![proposal("only", "backend")])
        .unwrap();
    orchestrator.set_goal_root(ids[0]).unwrap();
    orchestrator.build_plan(&registry).unwrap();
    assert!(!orchestrator.present_for_approval(&approver).unwrap());

    let dispatch = TestDispatch::new(orchestrator.result_sender());
    let err = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::NotApproved));
    assert!(dispatch.dispatched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_per_wave_release_stops_then_resumes() {
    let mut approver = TestApprover::approve_all();
    approver.release_waves = Some(vec![0]);
    let registry = backend_roster();
    let (mut orchestrator, [a, b, _, _]) = approved_diamond(&registry, &approver);
    let dispatch = TestDispatch::new(orchestrator.result_sender());

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::AwaitingRelease { next_wave: 1 });
    assert_eq!(orchestrator.tracker().state(a), Some(SubTaskState::Completed));
    assert_eq!(orchestrator.tracker().state(b), Some(SubTaskState::Pending));

    // Approving the rest resumes from the unreleased wave
    let full = TestApprover::approve_all();
    assert!(orchestrator.present_for_approval(&full).unwrap());
    let status = orchestrator
        .run(&dispatch, &registry, &full)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);
    // Wave 0 was not re-dispatched on resume
    assert_eq!(dispatch.dispatch_count(a), 1);
}

// ============================================================================
// Failure and Recovery
// ============================================================================

#[tokio::test]
async fn test_retry_recovery_redispatches_same_worker() {
    let approver = TestApprover::with_recovery(RecoveryAction::Retry);
    let registry = backend_roster();
    let (mut orchestrator, [_, b, c, d]) = approved_diamond(&registry, &approver);
    let worker_before = orchestrator
        .plan()
        .unwrap()
        .assignments
        .assignment_for(d)
        .unwrap()
        .worker_id
        .clone();
    let dispatch = TestDispatch::failing_once(orchestrator.result_sender(), &[d]);

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);

    // Earlier waves were untouched by the recovery
    assert_eq!(dispatch.dispatch_count(b), 1);
    assert_eq!(dispatch.dispatch_count(c), 1);
    assert_eq!(dispatch.dispatch_count(d), 2);
    assert_eq!(
        orchestrator
            .plan()
            .unwrap()
            .assignments
            .assignment_for(d)
            .unwrap()
            .worker_id,
        worker_before
    );

    // The failure stays visible even after successful recovery
    let log = orchestrator.event_log();
    assert!(log
        .iter()
        .any(|e| matches!(e, PlanEvent::SubTaskFailed { sub_task_id, .. } if *sub_task_id == d)));
    assert!(log.iter().any(
        |e| matches!(e, PlanEvent::ReplanApplied { action, .. } if action == "retry")
    ));
}

#[tokio::test]
async fn test_reassign_recovery_moves_to_other_worker() {
    let approver = TestApprover::with_recovery(RecoveryAction::Reassign);
    let registry = backend_roster();
    let (mut orchestrator, [_, _, _, d]) = approved_diamond(&registry, &approver);
    let worker_before = orchestrator
        .plan()
        .unwrap()
        .assignments
        .assignment_for(d)
        .unwrap()
        .worker_id
        .clone();
    let dispatch = TestDispatch::failing_once(orchestrator.result_sender(), &[d]);

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);

    let worker_after = orchestrator
        .plan()
        .unwrap()
        .assignments
        .assignment_for(d)
        .unwrap()
        .worker_id
        .clone();
    assert_ne!(worker_after, worker_before);
    assert_eq!(orchestrator.tracker().state(d), Some(SubTaskState::Completed));
}

#[tokio::test]
async fn test_restructure_recovery_replans_blast_radius_only() {
    let approver = TestApprover::with_recovery(RecoveryAction::Restructure);
    let registry = backend_roster();
    let (mut orchestrator, [a, b, c, d]) = approved_diamond(&registry, &approver);
    let dispatch = TestDispatch::failing_once(orchestrator.result_sender(), &[d]);

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);

    // D has no successors, so the blast radius is {D} alone
    let log = orchestrator.event_log();
    assert!(log.iter().any(|e| matches!(
        e,
        PlanEvent::ReplanApplied { action, reworked }
            if action == "restructure" && *reworked == vec![d]
    )));
    // Waves 0-1 stayed terminal throughout
    assert_eq!(dispatch.dispatch_count(a), 1);
    assert_eq!(dispatch.dispatch_count(b), 1);
    assert_eq!(dispatch.dispatch_count(c), 1);
    assert_eq!(dispatch.dispatch_count(d), 2);
}

#[tokio::test]
async fn test_declined_recovery_pauses_run() {
    let approver = TestApprover::approve_all();
    let registry = backend_roster();
    let (mut orchestrator, [a, b, c, d]) = approved_diamond(&registry, &approver);
    let dispatch = TestDispatch::failing_once(orchestrator.result_sender(), &[d]);

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Paused { failed: vec![d] });

    // The settled subgraph keeps its state; only the failure is pending
    assert_eq!(orchestrator.tracker().state(a), Some(SubTaskState::Completed));
    assert_eq!(orchestrator.tracker().state(b), Some(SubTaskState::Completed));
    assert_eq!(orchestrator.tracker().state(c), Some(SubTaskState::Completed));
    assert_eq!(orchestrator.tracker().state(d), Some(SubTaskState::Failed));
}

#[tokio::test]
async fn test_failure_mid_graph_holds_back_successors() {
    let approver = TestApprover::approve_all();
    let registry = backend_roster();
    let (mut orchestrator, [a, b, c, d]) = approved_diamond(&registry, &approver);
    let dispatch = TestDispatch::failing_once(orchestrator.result_sender(), &[b]);

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Paused { failed: vec![b] });

    // The parallel sibling settled; D never dispatched and downstream is
    // not auto-failed either
    assert_eq!(orchestrator.tracker().state(a), Some(SubTaskState::Completed));
    assert_eq!(orchestrator.tracker().state(c), Some(SubTaskState::Completed));
    assert_eq!(dispatch.dispatch_count(d), 0);
    assert_eq!(orchestrator.tracker().state(d), Some(SubTaskState::Pending));
}

// ============================================================================
// Goal Change
// ============================================================================

#[tokio::test]
async fn test_goal_change_reworks_only_rescoped_subgraph() {
    let approver = TestApprover::with_recovery(RecoveryAction::Restructure);
    let registry = backend_roster();
    let (mut orchestrator, [a, b, c, d]) = approved_diamond(&registry, &approver);
    let dispatch = TestDispatch::new(orchestrator.result_sender());

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);

    // Re-scoping B puts {B, D} in the blast radius, but D's own criteria
    // are unchanged and it stays valid
    let applied = orchestrator
        .signal_goal_change(b, "endpoint returns the revised payload", &registry, &approver)
        .unwrap();
    assert!(applied);
    assert_eq!(orchestrator.tracker().state(b), Some(SubTaskState::Pending));
    assert_eq!(orchestrator.tracker().state(a), Some(SubTaskState::Completed));
    assert_eq!(orchestrator.tracker().state(d), Some(SubTaskState::Completed));
    assert!(orchestrator.event_log().iter().any(|e| matches!(
        e,
        PlanEvent::ReplanApplied { action, reworked }
            if action == "restructure" && *reworked == vec![b]
    )));

    // Resuming re-runs the rework set and nothing else
    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(dispatch.dispatch_count(a), 1);
    assert_eq!(dispatch.dispatch_count(b), 2);
    assert_eq!(dispatch.dispatch_count(c), 1);
    assert_eq!(dispatch.dispatch_count(d), 1);
}

#[tokio::test]
async fn test_declined_goal_change_keeps_plan_untouched() {
    let approver = TestApprover::approve_all();
    let registry = backend_roster();
    let (mut orchestrator, [_, b, _, d]) = approved_diamond(&registry, &approver);
    let dispatch = TestDispatch::new(orchestrator.result_sender());
    orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();

    let waves_before = orchestrator.plan().unwrap().waves.clone();
    // approve_all declines recovery proposals
    let applied = orchestrator
        .signal_goal_change(b, "revised", &registry, &approver)
        .unwrap();

    assert!(!applied);
    assert_eq!(orchestrator.plan().unwrap().waves, waves_before);
    assert_eq!(orchestrator.tracker().state(b), Some(SubTaskState::Completed));
    assert_eq!(orchestrator.tracker().state(d), Some(SubTaskState::Completed));
    // The re-scoped criteria themselves are recorded
    assert_eq!(
        orchestrator.graph().sub_task(b).unwrap().done_criteria,
        "revised"
    );
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_goal_dispatches_nothing_further() {
    let approver = TestApprover::approve_all();
    let registry = backend_roster();
    let (mut orchestrator, [a, b, c, d]) = approved_diamond(&registry, &approver);
    let dispatch = TestDispatch::new(orchestrator.result_sender());

    orchestrator.cancel(&dispatch).await;
    for id in [a, b, c, d] {
        assert_eq!(orchestrator.tracker().state(id), Some(SubTaskState::Cancelled));
    }
    assert!(orchestrator
        .event_log()
        .iter()
        .any(|e| matches!(e, PlanEvent::GoalCancelled { cancelled } if cancelled.len() == 4)));

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Cancelled);
    assert!(dispatch.dispatched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_token_stops_between_waves() {
    let approver = TestApprover::approve_all();
    let registry = backend_roster();
    let (mut orchestrator, [a, b, _, d]) = approved_diamond(&registry, &approver);

    // Cancel as soon as the second wave starts dispatching
    let dispatch = TestDispatch::cancelling_after(
        orchestrator.result_sender(),
        b,
        orchestrator.cancel_token(),
    );

    let status = orchestrator
        .run(&dispatch, &registry, &approver)
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(orchestrator.tracker().state(a), Some(SubTaskState::Completed));
    assert_eq!(orchestrator.tracker().state(d), Some(SubTaskState::Cancelled));
    assert_eq!(dispatch.dispatch_count(d), 0);
}
