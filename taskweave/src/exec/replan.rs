//! Blast-radius computation and recovery proposals.
//!
//! Triggered by a FAILED transition or an external goal change. The blast
//! radius is the trigger node plus everything transitively downstream of
//! it; waves outside the radius keep their recorded state untouched. All
//! three recovery actions are proposals only, applied by the orchestrator
//! after explicit approval.

use std::collections::{BTreeMap, BTreeSet};

use taskweave_sdk::{RecoveryAction, RecoveryProposal, WorkerRegistry};

use crate::plan::assign::rebind_sub_task;
use crate::plan::graph::{GraphError, TaskGraph};
use crate::plan::types::{AssignmentReport, SubTaskId, Wave};
use crate::plan::waves::plan_waves_for;

/// The trigger node plus all transitive successors
pub fn blast_radius(graph: &TaskGraph, trigger: SubTaskId) -> BTreeSet<SubTaskId> {
    graph.descendants(trigger)
}

/// Partition a blast radius into still-valid vs needs-rework
///
/// Validity test: the sub-task's done-criteria is unchanged against the
/// snapshot taken when the plan was approved. The trigger itself always
/// needs rework.
pub fn needs_rework(
    graph: &TaskGraph,
    radius: &BTreeSet<SubTaskId>,
    trigger: SubTaskId,
    approved_criteria: &BTreeMap<SubTaskId, String>,
) -> BTreeSet<SubTaskId> {
    radius
        .iter()
        .copied()
        .filter(|&id| {
            if id == trigger {
                return true;
            }
            match (graph.sub_task(id), approved_criteria.get(&id)) {
                (Some(st), Some(approved)) => st.done_criteria != *approved,
                _ => true,
            }
        })
        .collect()
}

/// Propose recovery actions for a failed sub-task, in fixed order
///
/// Retry is offered when the failed sub-task still has a binding, reassign
/// when a different capable worker exists, restructure always.
pub fn propose_recovery(
    graph: &TaskGraph,
    assignments: &AssignmentReport,
    registry: &dyn WorkerRegistry,
    failed: SubTaskId,
    reason: &str,
) -> Vec<RecoveryProposal> {
    let name = graph
        .sub_task(failed)
        .map(|st| st.name.clone())
        .unwrap_or_else(|| format!("#{}", failed));
    let radius = blast_radius(graph, failed);
    let mut proposals = Vec::new();

    if let Some(assignment) = assignments.assignment_for(failed) {
        proposals.push(RecoveryProposal {
            action: RecoveryAction::Retry,
            description: format!(
                "retry '{}' on worker '{}' (failed: {})",
                name, assignment.worker_id, reason
            ),
        });

        if let Some(sub_task) = graph.sub_task(failed) {
            if let Some(rebound) = rebind_sub_task(sub_task, registry, &assignment.worker_id) {
                proposals.push(RecoveryProposal {
                    action: RecoveryAction::Reassign,
                    description: format!(
                        "reassign '{}' from '{}' to '{}'",
                        name, assignment.worker_id, rebound.worker_id
                    ),
                });
            }
        }
    }

    proposals.push(RecoveryProposal {
        action: RecoveryAction::Restructure,
        description: format!(
            "re-plan the {} affected sub-task(s) downstream of '{}'",
            radius.len(),
            name
        ),
    });

    proposals
}

/// Re-derive waves for a blast radius and splice them into the schedule
///
/// Waves before `after` are untouched. Radius members are stripped from
/// the surviving later waves, the radius is re-partitioned using only its
/// internal edges, and the new waves are inserted directly after `after`.
/// Indices are rewritten to stay dense. A cycle reintroduced by the
/// restructuring surfaces as a [`GraphError::CycleDetected`] for the
/// caller to escalate to cycle repair.
pub fn splice_waves(
    graph: &TaskGraph,
    schedule: &[Wave],
    after: usize,
    radius: &BTreeSet<SubTaskId>,
) -> Result<Vec<Wave>, GraphError> {
    let radius_waves = plan_waves_for(graph, radius)?;

    let mut spliced: Vec<Wave> = Vec::new();
    for wave in schedule.iter().take(after + 1) {
        spliced.push(Wave {
            index: spliced.len(),
            sub_tasks: wave
                .sub_tasks
                .iter()
                .copied()
                .filter(|id| !radius.contains(id))
                .collect(),
        });
    }
    for wave in radius_waves {
        spliced.push(Wave {
            index: spliced.len(),
            sub_tasks: wave.sub_tasks,
        });
    }
    for wave in schedule.iter().skip(after + 1) {
        spliced.push(Wave {
            index: spliced.len(),
            sub_tasks: wave
                .sub_tasks
                .iter()
                .copied()
                .filter(|id| !radius.contains(id))
                .collect(),
        });
    }

    spliced.retain(|wave| !wave.sub_tasks.is_empty());
    for (index, wave) in spliced.iter_mut().enumerate() {
        wave.index = index;
    }
    Ok(spliced)
}
