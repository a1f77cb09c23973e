//! Worker matching against the external registry.
//!
//! Capability matching is data-driven: a worker is a record advertising a
//! capability set, and a sub-task binds to a worker whose set covers every
//! domain tag it names. No worker type hierarchy, just set intersection.

use std::collections::HashMap;

use taskweave_sdk::WorkerRegistry;

use super::graph::TaskGraph;
use super::types::{
    Assignment, AssignmentReport, Effort, GranularityFlag, SubTask, SubTaskId, Unassignable, Wave,
};

/// Bind every sub-task in the wave schedule to a capable worker
///
/// Sub-tasks are visited in topological order (wave by wave). Zero matches
/// marks the sub-task UNASSIGNABLE with the uncovered capability recorded;
/// a binding is never invented. Multiple matches bind to the lowest-loaded
/// worker, ties broken by worker id so repeated runs agree. Load counts
/// bindings made earlier in the same resolution pass on top of the
/// registry's own counter.
pub fn resolve_assignments(
    graph: &TaskGraph,
    waves: &[Wave],
    registry: &dyn WorkerRegistry,
) -> AssignmentReport {
    let mut report = AssignmentReport::default();
    let mut local_load: HashMap<String, u32> = HashMap::new();

    for wave in waves {
        for &id in &wave.sub_tasks {
            let Some(sub_task) = graph.sub_task(id) else {
                continue;
            };

            // Advisory granularity flags, surfaced before binding and
            // never auto-applied
            if is_merge_candidate(graph, sub_task, wave) {
                report.flags.push(GranularityFlag::MergeUpward {
                    sub_task_id: id,
                });
            }
            if sub_task.domain_tags.len() > 1 {
                report.flags.push(GranularityFlag::SplitDownward {
                    sub_task_id: id,
                    domain_tags: sub_task.domain_tags.clone(),
                });
            }

            match bind(sub_task, registry, &local_load) {
                Some(assignment) => {
                    *local_load.entry(assignment.worker_id.clone()).or_insert(0) += 1;
                    report.assignments.push(assignment);
                }
                None => report.unassignable.push(Unassignable {
                    sub_task_id: id,
                    missing_capability: missing_capability(sub_task, registry),
                }),
            }
        }
    }

    report
}

/// Re-bind a single sub-task, for the reassign recovery action
///
/// Excludes the previously bound worker so "reassign" means a genuinely
/// different binding; returns None when no other capable worker exists.
pub fn rebind_sub_task(
    sub_task: &SubTask,
    registry: &dyn WorkerRegistry,
    exclude_worker: &str,
) -> Option<Assignment> {
    let candidates: Vec<_> = registry
        .find_capable(&sub_task.domain_tags, sub_task.autonomy)
        .into_iter()
        .filter(|w| w.id != exclude_worker)
        .collect();
    pick_lowest_loaded(sub_task.id, candidates, &HashMap::new())
}

fn bind(
    sub_task: &SubTask,
    registry: &dyn WorkerRegistry,
    local_load: &HashMap<String, u32>,
) -> Option<Assignment> {
    let candidates = registry.find_capable(&sub_task.domain_tags, sub_task.autonomy);
    pick_lowest_loaded(sub_task.id, candidates, local_load)
}

fn pick_lowest_loaded(
    sub_task_id: SubTaskId,
    candidates: Vec<taskweave_sdk::WorkerDescriptor>,
    local_load: &HashMap<String, u32>,
) -> Option<Assignment> {
    candidates
        .into_iter()
        .min_by(|a, b| {
            let load = |w: &taskweave_sdk::WorkerDescriptor| {
                w.current_load + local_load.get(&w.id).copied().unwrap_or(0)
            };
            load(a).cmp(&load(b)).then_with(|| a.id.cmp(&b.id))
        })
        .map(|worker| Assignment {
            sub_task_id,
            worker_id: worker.id,
            autonomy_level: worker.autonomy_level,
        })
}

/// Small sub-task with no fan-out, alone in its wave
fn is_merge_candidate(graph: &TaskGraph, sub_task: &SubTask, wave: &Wave) -> bool {
    sub_task.effort == Effort::Small
        && graph.succ_count(sub_task.id) == 0
        && wave.sub_tasks.len() == 1
}

/// Name the capability no registered worker covers
///
/// Prefers the first individually uncovered tag; when every tag is covered
/// somewhere but no single worker covers the full set, the whole set is the
/// missing capability.
fn missing_capability(sub_task: &SubTask, registry: &dyn WorkerRegistry) -> String {
    for tag in &sub_task.domain_tags {
        let single = [tag.clone()];
        if registry.find_capable(&single, sub_task.autonomy).is_empty() {
            return tag.clone();
        }
    }
    sub_task.domain_tags.join("+")
}
