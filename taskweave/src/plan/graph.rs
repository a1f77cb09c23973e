//! Per-goal graph store for sub-tasks and dependency edges.
//!
//! Edge batches commit transactionally: cycle detection runs on the
//! hypothetical post-add graph, and on a cycle the whole batch is rejected
//! with the offending path so the cycle resolver can propose repairs. No
//! partially-cyclic intermediate state is ever observable by the wave
//! planner.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::types::{ProposedSubTask, SubTask, SubTaskId};

/// Construction errors; all surface synchronously before a plan exists
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("sub-task '{name}' has no done-criteria; a sub-task with no verifiable completion condition is invalid")]
    MissingDoneCriteria { name: String },

    #[error("sub-task '{name}' has no domain tags")]
    MissingDomainTags { name: String },

    #[error("unknown sub-task id {id}")]
    UnknownSubTask { id: SubTaskId },

    #[error("sub-task {id} cannot depend on itself")]
    SelfDependency { id: SubTaskId },

    #[error("dependency cycle detected: {path:?}")]
    CycleDetected { path: Vec<SubTaskId> },

    #[error("orphaned sub-tasks detached from every root: {ids:?}")]
    Orphaned { ids: Vec<SubTaskId> },
}

/// The full sub-task graph for one goal
///
/// Owned exclusively by the orchestrator instance handling that goal;
/// never shared across goals.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    sub_tasks: BTreeMap<SubTaskId, SubTask>,
    successors: BTreeMap<SubTaskId, BTreeSet<SubTaskId>>,
    predecessors: BTreeMap<SubTaskId, BTreeSet<SubTaskId>>,
    /// Declared single goal root, exempt from orphan reporting
    goal_root: Option<SubTaskId>,
    next_id: SubTaskId,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // Node operations
    // ------------------------------------------------------------------

    /// Append validated sub-tasks, assigning sequential ids
    ///
    /// The batch is validated up front: any sub-task with an empty
    /// done-criteria (or no domain tags) rejects the whole batch, so an
    /// invalid decomposition is surfaced instead of silently trimmed.
    pub fn add_subtasks(
        &mut self,
        proposed: Vec<ProposedSubTask>,
    ) -> Result<Vec<SubTaskId>, GraphError> {
        for p in &proposed {
            Self::validate_proposed(p)?;
        }

        let mut accepted = Vec::with_capacity(proposed.len());
        for p in proposed {
            accepted.push(self.insert_validated(p));
        }
        Ok(accepted)
    }

    /// Insert a single sub-task (used by cycle repair to synthesize nodes)
    pub fn insert_sub_task(&mut self, proposed: ProposedSubTask) -> Result<SubTaskId, GraphError> {
        Self::validate_proposed(&proposed)?;
        Ok(self.insert_validated(proposed))
    }

    fn validate_proposed(p: &ProposedSubTask) -> Result<(), GraphError> {
        if p.done_criteria.trim().is_empty() {
            return Err(GraphError::MissingDoneCriteria {
                name: p.name.clone(),
            });
        }
        if p.domain_tags.is_empty() {
            return Err(GraphError::MissingDomainTags {
                name: p.name.clone(),
            });
        }
        Ok(())
    }

    fn insert_validated(&mut self, p: ProposedSubTask) -> SubTaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.sub_tasks.insert(
            id,
            SubTask {
                id,
                name: p.name,
                description: p.description,
                inputs: p.inputs,
                outputs: p.outputs,
                done_criteria: p.done_criteria,
                effort: p.effort,
                domain_tags: p.domain_tags,
                autonomy: p.autonomy,
            },
        );
        self.successors.insert(id, BTreeSet::new());
        self.predecessors.insert(id, BTreeSet::new());
        id
    }

    /// Remove a sub-task and detach all its edges (cycle repair only)
    pub fn remove_sub_task(&mut self, id: SubTaskId) -> Result<SubTask, GraphError> {
        let sub_task = self
            .sub_tasks
            .remove(&id)
            .ok_or(GraphError::UnknownSubTask { id })?;

        let succs = self.successors.remove(&id).unwrap_or_default();
        let preds = self.predecessors.remove(&id).unwrap_or_default();
        for s in succs {
            if let Some(set) = self.predecessors.get_mut(&s) {
                set.remove(&id);
            }
        }
        for p in preds {
            if let Some(set) = self.successors.get_mut(&p) {
                set.remove(&id);
            }
        }
        if self.goal_root == Some(id) {
            self.goal_root = None;
        }
        Ok(sub_task)
    }

    /// Re-scope a sub-task's done-criteria (replanning controller only)
    pub fn update_done_criteria(
        &mut self,
        id: SubTaskId,
        done_criteria: &str,
    ) -> Result<(), GraphError> {
        if done_criteria.trim().is_empty() {
            let name = self
                .sub_tasks
                .get(&id)
                .map(|st| st.name.clone())
                .unwrap_or_default();
            return Err(GraphError::MissingDoneCriteria { name });
        }
        let sub_task = self
            .sub_tasks
            .get_mut(&id)
            .ok_or(GraphError::UnknownSubTask { id })?;
        sub_task.done_criteria = done_criteria.to_string();
        Ok(())
    }

    /// Declare the single goal root, exempting it from orphan reporting
    pub fn set_goal_root(&mut self, id: SubTaskId) -> Result<(), GraphError> {
        if !self.sub_tasks.contains_key(&id) {
            return Err(GraphError::UnknownSubTask { id });
        }
        self.goal_root = Some(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edge operations
    // ------------------------------------------------------------------

    /// Add a batch of producer → consumer edges atomically
    ///
    /// Either the whole batch commits or none of it does. Cycle detection
    /// runs on the hypothetical post-add graph; on a cycle the error
    /// carries the cycle path (first node repeated at the end).
    pub fn add_edges(&mut self, edges: &[(SubTaskId, SubTaskId)]) -> Result<(), GraphError> {
        for &(producer, consumer) in edges {
            if producer == consumer {
                return Err(GraphError::SelfDependency { id: producer });
            }
            for id in [producer, consumer] {
                if !self.sub_tasks.contains_key(&id) {
                    return Err(GraphError::UnknownSubTask { id });
                }
            }
        }

        // Hypothetical post-add adjacency
        let mut candidate = self.successors.clone();
        for &(producer, consumer) in edges {
            candidate.entry(producer).or_default().insert(consumer);
        }

        let starts: Vec<SubTaskId> = edges.iter().map(|&(p, _)| p).collect();
        if let Some(path) = find_cycle(&candidate, &starts) {
            return Err(GraphError::CycleDetected { path });
        }

        // Commit
        for &(producer, consumer) in edges {
            self.successors.entry(producer).or_default().insert(consumer);
            self.predecessors.entry(consumer).or_default().insert(producer);
        }
        Ok(())
    }

    /// Remove one edge; returns whether it existed
    pub fn remove_edge(&mut self, producer: SubTaskId, consumer: SubTaskId) -> bool {
        let removed = self
            .successors
            .get_mut(&producer)
            .map(|s| s.remove(&consumer))
            .unwrap_or(false);
        if removed {
            if let Some(p) = self.predecessors.get_mut(&consumer) {
                p.remove(&producer);
            }
        }
        removed
    }

    pub fn has_edge(&self, producer: SubTaskId, consumer: SubTaskId) -> bool {
        self.successors
            .get(&producer)
            .map(|s| s.contains(&consumer))
            .unwrap_or(false)
    }

    /// Infer producer → consumer edges by joining declared artifacts:
    /// an edge exists wherever a consumer's input names a producer's output
    pub fn derive_edges(&self) -> Vec<(SubTaskId, SubTaskId)> {
        let mut edges = Vec::new();
        for producer in self.sub_tasks.values() {
            for consumer in self.sub_tasks.values() {
                if producer.id == consumer.id {
                    continue;
                }
                let produces_needed = producer
                    .outputs
                    .iter()
                    .any(|artifact| consumer.inputs.contains(artifact));
                if produces_needed && !self.has_edge(producer.id, consumer.id) {
                    edges.push((producer.id, consumer.id));
                }
            }
        }
        edges
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn sub_task(&self, id: SubTaskId) -> Option<&SubTask> {
        self.sub_tasks.get(&id)
    }

    pub fn sub_tasks(&self) -> impl Iterator<Item = &SubTask> {
        self.sub_tasks.values()
    }

    pub fn ids(&self) -> Vec<SubTaskId> {
        self.sub_tasks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sub_tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_tasks.is_empty()
    }

    pub fn predecessors_of(&self, id: SubTaskId) -> Vec<SubTaskId> {
        self.predecessors
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn successors_of(&self, id: SubTaskId) -> Vec<SubTaskId> {
        self.successors
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn pred_count(&self, id: SubTaskId) -> usize {
        self.predecessors.get(&id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn succ_count(&self, id: SubTaskId) -> usize {
        self.successors.get(&id).map(|s| s.len()).unwrap_or(0)
    }

    /// Root nodes: sub-tasks with no predecessors
    pub fn roots(&self) -> Vec<SubTaskId> {
        self.sub_tasks
            .keys()
            .copied()
            .filter(|id| self.pred_count(*id) == 0)
            .collect()
    }

    /// Sub-tasks with neither predecessors nor successors that are not the
    /// declared goal root; these usually indicate decomposition gaps
    pub fn orphans(&self) -> Vec<SubTaskId> {
        self.sub_tasks
            .keys()
            .copied()
            .filter(|&id| {
                self.pred_count(id) == 0
                    && self.succ_count(id) == 0
                    && self.goal_root != Some(id)
            })
            .collect()
    }

    /// The id plus all transitive successors
    pub fn descendants(&self, id: SubTaskId) -> BTreeSet<SubTaskId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                stack.extend(self.successors_of(current));
            }
        }
        seen
    }

    /// Verify every sub-task is reachable from at least one root
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut reached = BTreeSet::new();
        let mut stack = self.roots();
        while let Some(current) = stack.pop() {
            if reached.insert(current) {
                stack.extend(self.successors_of(current));
            }
        }
        let unreachable: Vec<SubTaskId> = self
            .sub_tasks
            .keys()
            .copied()
            .filter(|id| !reached.contains(id))
            .collect();
        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(GraphError::Orphaned { ids: unreachable })
        }
    }

    /// Full-graph cycle scan (committed state should never have one)
    pub fn find_any_cycle(&self) -> Option<Vec<SubTaskId>> {
        let starts: Vec<SubTaskId> = self.sub_tasks.keys().copied().collect();
        find_cycle(&self.successors, &starts)
    }
}

/// Depth-first cycle search over an adjacency map, starting from the given
/// nodes and maintaining a recursion stack; a back-edge to a node currently
/// on the stack identifies the cycle.
///
/// The returned path is rotated so the smallest id leads, with the entry
/// node repeated at the end (e.g. `[1, 2, 1]`).
fn find_cycle(
    adjacency: &BTreeMap<SubTaskId, BTreeSet<SubTaskId>>,
    starts: &[SubTaskId],
) -> Option<Vec<SubTaskId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        OnStack,
        Done,
    }

    fn visit(
        node: SubTaskId,
        adjacency: &BTreeMap<SubTaskId, BTreeSet<SubTaskId>>,
        marks: &mut BTreeMap<SubTaskId, Mark>,
        stack: &mut Vec<SubTaskId>,
    ) -> Option<Vec<SubTaskId>> {
        marks.insert(node, Mark::OnStack);
        stack.push(node);

        if let Some(next) = adjacency.get(&node) {
            for &succ in next {
                match marks.get(&succ) {
                    Some(Mark::OnStack) => {
                        // Back-edge: the cycle is the stack suffix from succ
                        let pos = stack.iter().position(|&n| n == succ).unwrap_or(0);
                        let mut path: Vec<SubTaskId> = stack[pos..].to_vec();
                        path.push(succ);
                        return Some(normalize_cycle(path));
                    }
                    Some(Mark::Done) => {}
                    None => {
                        if let Some(path) = visit(succ, adjacency, marks, stack) {
                            return Some(path);
                        }
                    }
                }
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    for &start in starts {
        if marks.contains_key(&start) {
            continue;
        }
        if let Some(path) = visit(start, adjacency, &mut marks, &mut stack) {
            return Some(path);
        }
    }
    None
}

/// Rotate a closed cycle path so the smallest id comes first
fn normalize_cycle(path: Vec<SubTaskId>) -> Vec<SubTaskId> {
    if path.len() < 2 {
        return path;
    }
    // Drop the duplicated closing node, rotate, then close again
    let open = &path[..path.len() - 1];
    let min_pos = open
        .iter()
        .enumerate()
        .min_by_key(|(_, &id)| id)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated: Vec<SubTaskId> = open[min_pos..]
        .iter()
        .chain(open[..min_pos].iter())
        .copied()
        .collect();
    rotated.push(rotated[0]);
    rotated
}
