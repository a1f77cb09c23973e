//! Tests for plan construction: graph commits, cycle handling, waves,
//! assignment gaps, and the approval gate

use super::common::*;
use taskweave::config::EffortWeights;
use taskweave::exec::orchestrator::{GoalOrchestrator, PlanError};
use taskweave::plan::types::Effort;
use taskweave_sdk::PlanEvent;

// ============================================================================
// Wave Partitioning
// ============================================================================

#[test]
fn test_diamond_plan_waves_and_critical_path() {
    let approver = TestApprover::approve_all();
    let (orchestrator, [a, b, c, d]) = approved_diamond(&backend_roster(), &approver);

    let plan = orchestrator.plan().unwrap();
    assert_eq!(plan.waves.len(), 3);
    assert_eq!(plan.waves[0].sub_tasks, vec![a]);
    assert_eq!(plan.waves[1].sub_tasks, vec![b, c]);
    assert_eq!(plan.waves[2].sub_tasks, vec![d]);

    // Both branches weigh 3+3+3; the tie resolves to the smaller id
    assert_eq!(plan.critical_path.sub_tasks, vec![a, b, d]);
    assert_eq!(plan.critical_path.weight, 9);
}

#[test]
fn test_rebuilding_the_plan_is_idempotent() {
    let approver = TestApprover::approve_all();
    let (mut orchestrator, _) = approved_diamond(&backend_roster(), &approver);

    let first = orchestrator.plan().unwrap().waves.clone();
    orchestrator.build_plan(&backend_roster()).unwrap();
    assert_eq!(orchestrator.plan().unwrap().waves, first);
}

// ============================================================================
// Cycle Handling
// ============================================================================

#[test]
fn test_cycle_rejected_with_reported_path() {
    let approver = TestApprover::deny_all();
    let mut orchestrator = GoalOrchestrator::new("cyclic goal", EffortWeights::default());
    let ids = orchestrator
        .add_subtasks(vec![proposal("A", "backend"), proposal("B", "frontend")])
        .unwrap();
    let (a, b) = (ids[0], ids[1]);
    orchestrator.commit_edges(vec![(a, b)], &approver).unwrap();

    let err = orchestrator
        .commit_edges(vec![(b, a)], &approver)
        .unwrap_err();
    match err {
        PlanError::UnresolvableCycle { path } => assert_eq!(path, vec![a, b, a]),
        other => panic!("expected unresolvable cycle, got {:?}", other),
    }

    // The cycle is reported even though nothing was repaired
    assert!(orchestrator.event_log().iter().any(|e| matches!(
        e,
        PlanEvent::CycleReported {
            repaired: false,
            ..
        }
    )));
    // The committed graph is untouched
    assert!(orchestrator.graph().has_edge(a, b));
    assert!(!orchestrator.graph().has_edge(b, a));
}

#[test]
fn test_cycle_repaired_by_confirmed_invert() {
    let approver = TestApprover {
        confirm_strategy: Some("invert"),
        ..TestApprover::approve_all()
    };
    let mut orchestrator = GoalOrchestrator::new("repairable goal", EffortWeights::default());
    let ids = orchestrator
        .add_subtasks(vec![proposal("A", "backend"), proposal("B", "frontend")])
        .unwrap();
    let (a, b) = (ids[0], ids[1]);
    orchestrator.commit_edges(vec![(a, b)], &approver).unwrap();

    // The offending edge is dropped by the inversion; A -> B stands
    orchestrator.commit_edges(vec![(b, a)], &approver).unwrap();
    assert!(orchestrator.graph().has_edge(a, b));
    assert!(!orchestrator.graph().has_edge(b, a));

    assert!(orchestrator.event_log().iter().any(|e| matches!(
        e,
        PlanEvent::CycleReported { repaired: true, .. }
    )));
}

#[test]
fn test_repair_pass_survives_fixes_on_merged_away_nodes() {
    let approver = TestApprover::approve_all();
    let mut orchestrator = GoalOrchestrator::new("two cycles", EffortWeights::default());
    let ids = orchestrator
        .add_subtasks(vec![
            proposal("A", "backend"),
            proposal("B", "backend"),
            proposal("C", "frontend"),
            proposal("D", "docs"),
        ])
        .unwrap();
    let (a, b, c, d) = (ids[0], ids[1], ids[2], ids[3]);
    orchestrator
        .commit_edges(vec![(a, b), (c, d)], &approver)
        .unwrap();

    // The confirmed merge collapses A and B, but the batch still holds the
    // unrelated C/D cycle. The remaining proposals name the removed nodes
    // and must be skipped, leaving a clean rejection of the whole batch.
    let err = orchestrator
        .commit_edges(vec![(b, a), (d, c)], &approver)
        .unwrap_err();
    assert!(matches!(err, PlanError::UnresolvableCycle { .. }));
    assert_eq!(orchestrator.graph().len(), 3);
    assert!(!orchestrator.graph().has_edge(d, c));
}

// ============================================================================
// Assignment Gaps
// ============================================================================

#[test]
fn test_unassignable_sub_task_presented_as_gap() {
    let approver = TestApprover::approve_all();
    let mut orchestrator = GoalOrchestrator::new("quantum goal", EffortWeights::default());
    let ids = orchestrator
        .add_subtasks(vec![
            proposal("prep", "backend"),
            proposal("calibrate", "quantum-hardware"),
        ])
        .unwrap();
    orchestrator
        .commit_edges(vec![(ids[0], ids[1])], &approver)
        .unwrap();

    orchestrator.build_plan(&backend_roster()).unwrap();
    let plan = orchestrator.plan().unwrap();

    // The gap is in the plan, not silently trimmed
    assert!(plan.assignments.is_unassignable(ids[1]));
    assert_eq!(
        plan.assignments.unassignable[0].missing_capability,
        "quantum-hardware"
    );
    let summary = plan.summary(orchestrator.graph());
    assert_eq!(summary.unassignable.len(), 1);
    assert_eq!(summary.unassignable[0].name, "calibrate");

    assert!(orchestrator.event_log().iter().any(|e| matches!(
        e,
        PlanEvent::UnassignableSubTask { .. }
    )));
}

// ============================================================================
// Validation and Approval Gate
// ============================================================================

#[test]
fn test_orphaned_sub_task_rejected_before_presentation() {
    let approver = TestApprover::approve_all();
    let mut orchestrator = GoalOrchestrator::new("gappy goal", EffortWeights::default());
    let ids = orchestrator
        .add_subtasks(vec![
            proposal("A", "backend"),
            proposal("B", "backend"),
            proposal("stray", "backend"),
        ])
        .unwrap();
    orchestrator
        .commit_edges(vec![(ids[0], ids[1])], &approver)
        .unwrap();

    let err = orchestrator.build_plan(&backend_roster()).unwrap_err();
    assert!(matches!(err, PlanError::Graph(_)));
    assert!(orchestrator.plan().is_none());
}

#[test]
fn test_goal_root_exempt_from_orphan_check() {
    let approver = TestApprover::approve_all();
    let mut orchestrator = GoalOrchestrator::new("single goal", EffortWeights::default());
    let ids = orchestrator
        .add_subtasks(vec![proposal("everything", "backend")])
        .unwrap();
    orchestrator.set_goal_root(ids[0]).unwrap();

    orchestrator.build_plan(&backend_roster()).unwrap();
    assert!(orchestrator.present_for_approval(&approver).unwrap());
}

#[test]
fn test_missing_done_criteria_rejects_whole_batch() {
    let mut orchestrator = GoalOrchestrator::new("invalid goal", EffortWeights::default());
    let mut bad = proposal("B", "backend");
    bad.done_criteria = String::new();

    let err = orchestrator
        .add_subtasks(vec![proposal("A", "backend"), bad])
        .unwrap_err();
    assert!(matches!(err, PlanError::Graph(_)));
    assert!(orchestrator.graph().is_empty());
}

#[test]
fn test_denied_plan_does_not_execute() {
    let approver = TestApprover::deny_all();
    let mut orchestrator = GoalOrchestrator::new("denied goal", EffortWeights::default());
    let ids = orchestrator
        .add_subtasks(vec![proposal("only", "backend")])
        .unwrap();
    orchestrator.set_goal_root(ids[0]).unwrap();
    orchestrator.build_plan(&backend_roster()).unwrap();

    assert!(!orchestrator.present_for_approval(&approver).unwrap());
}

#[test]
fn test_artifact_derived_edges_commit() {
    let approver = TestApprover::approve_all();
    let mut orchestrator = GoalOrchestrator::new("artifact goal", EffortWeights::default());
    let schema = taskweave::plan::types::ProposedSubTask::new(
        "design schema",
        "schema reviewed",
        Effort::Medium,
        "backend",
    )
    .with_artifacts(&[], &["schema.sql"]);
    let migrate = taskweave::plan::types::ProposedSubTask::new(
        "write migration",
        "migration applies",
        Effort::Small,
        "backend",
    )
    .with_artifacts(&["schema.sql"], &[]);
    let ids = orchestrator.add_subtasks(vec![schema, migrate]).unwrap();

    orchestrator.commit_derived_edges(&approver).unwrap();
    assert!(orchestrator.graph().has_edge(ids[0], ids[1]));
}
