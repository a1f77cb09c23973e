//! Topological wave partitioning and critical-path computation.
//!
//! Waves are the concurrency schedule: every sub-task in wave N has all of
//! its predecessors in waves strictly before N, so a whole wave can be
//! dispatched at once. The critical path is the effort-weighted longest
//! root-to-leaf chain, surfaced in the plan summary as the lower bound on
//! sequential completion.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::EffortWeights;

use super::graph::{GraphError, TaskGraph};
use super::types::{CriticalPath, SubTaskId, Wave};

/// Partition the whole graph into dependency-respecting waves
///
/// Kahn's algorithm over in-degrees. Deterministic: members of each wave
/// are in ascending id order. A stall before all sub-tasks are placed means
/// the committed graph holds a cycle, which the edge-commit path should
/// have made impossible; it is reported as a hard error, never papered
/// over by lumping leftovers into a final wave.
pub fn plan_waves(graph: &TaskGraph) -> Result<Vec<Wave>, GraphError> {
    plan_waves_for(graph, &graph.ids().into_iter().collect::<BTreeSet<_>>())
}

/// Partition a subset of the graph into waves
///
/// Used when replanning a blast radius: only edges internal to `subset`
/// constrain the ordering, since everything outside it keeps its recorded
/// state. Wave indices start at 0; the caller splices them into the
/// surviving schedule.
pub fn plan_waves_for(
    graph: &TaskGraph,
    subset: &BTreeSet<SubTaskId>,
) -> Result<Vec<Wave>, GraphError> {
    let mut in_degree: BTreeMap<SubTaskId, usize> = BTreeMap::new();
    for &id in subset {
        let internal_preds = graph
            .predecessors_of(id)
            .into_iter()
            .filter(|p| subset.contains(p))
            .count();
        in_degree.insert(id, internal_preds);
    }

    let mut waves = Vec::new();
    let mut placed: BTreeSet<SubTaskId> = BTreeSet::new();

    while placed.len() < subset.len() {
        // BTreeMap iteration keeps each wave in ascending id order
        let ready: Vec<SubTaskId> = in_degree
            .iter()
            .filter(|(id, &deg)| deg == 0 && !placed.contains(id))
            .map(|(&id, _)| id)
            .collect();

        if ready.is_empty() {
            let remaining: Vec<SubTaskId> = subset
                .iter()
                .copied()
                .filter(|id| !placed.contains(id))
                .collect();
            let path = graph
                .find_any_cycle()
                .unwrap_or(remaining);
            return Err(GraphError::CycleDetected { path });
        }

        for &id in &ready {
            placed.insert(id);
            for succ in graph.successors_of(id) {
                if subset.contains(&succ) {
                    if let Some(deg) = in_degree.get_mut(&succ) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
        }

        waves.push(Wave {
            index: waves.len(),
            sub_tasks: ready,
        });
    }

    Ok(waves)
}

/// Effort-weighted longest root-to-leaf path
///
/// Dynamic programming in reverse topological order: the heaviest path
/// starting at a node is its own weight plus the max over its successors.
/// Ties break toward the smaller sub-task id so repeated runs over an
/// unchanged graph report the same path.
pub fn critical_path(graph: &TaskGraph, weights: &EffortWeights) -> CriticalPath {
    let waves = match plan_waves(graph) {
        Ok(waves) => waves,
        Err(_) => return CriticalPath::default(),
    };

    // best[id] = (path weight starting at id, next hop)
    let mut best: BTreeMap<SubTaskId, (u32, Option<SubTaskId>)> = BTreeMap::new();

    for wave in waves.iter().rev() {
        for &id in &wave.sub_tasks {
            let node_weight = graph
                .sub_task(id)
                .map(|st| weights.weight(st.effort))
                .unwrap_or(0);
            let mut choice: Option<(u32, SubTaskId)> = None;
            for succ in graph.successors_of(id) {
                if let Some(&(succ_weight, _)) = best.get(&succ) {
                    let better = match choice {
                        None => true,
                        Some((w, s)) => succ_weight > w || (succ_weight == w && succ < s),
                    };
                    if better {
                        choice = Some((succ_weight, succ));
                    }
                }
            }
            match choice {
                Some((w, next)) => best.insert(id, (node_weight + w, Some(next))),
                None => best.insert(id, (node_weight, None)),
            };
        }
    }

    // Best starting point among the roots (wave 0)
    let start = waves
        .first()
        .and_then(|wave| {
            wave.sub_tasks
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    let wa = best.get(&a).map(|&(w, _)| w).unwrap_or(0);
                    let wb = best.get(&b).map(|&(w, _)| w).unwrap_or(0);
                    // on equal weight prefer the smaller id
                    wa.cmp(&wb).then(b.cmp(&a))
                })
        });

    let Some(start) = start else {
        return CriticalPath::default();
    };

    let weight = best.get(&start).map(|&(w, _)| w).unwrap_or(0);
    let mut sub_tasks = Vec::new();
    let mut cursor = Some(start);
    while let Some(id) = cursor {
        sub_tasks.push(id);
        cursor = best.get(&id).and_then(|&(_, next)| next);
    }

    CriticalPath { sub_tasks, weight }
}
