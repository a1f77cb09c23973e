//! Repair proposals for detected dependency cycles.
//!
//! `resolve_cycle` is pure: it inspects the graph and the offending cycle
//! path and returns candidate fixes without mutating anything. The caller
//! applies a fix only after human confirmation, keeping every repair
//! auditable. Strategies are proposed in fixed policy order: merge, stage,
//! invert, split. If no confirmed strategy clears the cycle after one pass
//! over the proposals, the edge batch is rejected permanently.

use serde::{Deserialize, Serialize};
use taskweave_sdk::FixProposal;

use super::graph::{GraphError, TaskGraph};
use super::types::{Effort, ProposedSubTask, SubTaskId};

/// Candidate repair for one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ProposedFix {
    /// Collapse same-domain cyclic sub-tasks into one
    Merge { sub_tasks: Vec<SubTaskId> },

    /// Synthesize an intermediate sub-task producing a partial artifact,
    /// breaking a two-node mutual dependency
    Stage {
        producer: SubTaskId,
        consumer: SubTaskId,
        partial_artifact: String,
    },

    /// Flip one misjudged dependency edge
    Invert {
        producer: SubTaskId,
        consumer: SubTaskId,
    },

    /// Split a sub-task bundling independent concerns so only the relevant
    /// part keeps its dependency on `detach_from`
    Split {
        sub_task: SubTaskId,
        detach_from: SubTaskId,
    },
}

impl ProposedFix {
    pub fn strategy_name(&self) -> &'static str {
        match self {
            ProposedFix::Merge { .. } => "merge",
            ProposedFix::Stage { .. } => "stage",
            ProposedFix::Invert { .. } => "invert",
            ProposedFix::Split { .. } => "split",
        }
    }

    /// Whether every sub-task this fix names is still in the graph
    ///
    /// An earlier applied fix in the same repair pass may have merged or
    /// split nodes away; a fix naming a removed node can no longer apply.
    pub fn is_applicable(&self, graph: &TaskGraph) -> bool {
        let exists = |id: SubTaskId| graph.sub_task(id).is_some();
        match self {
            ProposedFix::Merge { sub_tasks } => sub_tasks.iter().copied().all(exists),
            ProposedFix::Stage {
                producer, consumer, ..
            }
            | ProposedFix::Invert { producer, consumer } => {
                exists(*producer) && exists(*consumer)
            }
            ProposedFix::Split {
                sub_task,
                detach_from,
            } => exists(*sub_task) && exists(*detach_from),
        }
    }

    /// Human-readable proposal for the approval interface
    pub fn proposal(&self, graph: &TaskGraph) -> FixProposal {
        let name = |id: SubTaskId| {
            graph
                .sub_task(id)
                .map(|st| st.name.clone())
                .unwrap_or_else(|| format!("#{}", id))
        };
        let description = match self {
            ProposedFix::Merge { sub_tasks } => format!(
                "merge same-domain sub-tasks [{}] into one",
                sub_tasks
                    .iter()
                    .map(|&id| name(id))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            ProposedFix::Stage {
                producer,
                consumer,
                partial_artifact,
            } => format!(
                "stage a partial artifact '{}' so '{}' no longer waits on the full output of '{}'",
                partial_artifact,
                name(*consumer),
                name(*producer)
            ),
            ProposedFix::Invert { producer, consumer } => format!(
                "invert the dependency '{}' -> '{}'",
                name(*producer),
                name(*consumer)
            ),
            ProposedFix::Split {
                sub_task,
                detach_from,
            } => format!(
                "split '{}' so only its dependent part waits on '{}'",
                name(*sub_task),
                name(*detach_from)
            ),
        };
        FixProposal {
            strategy: self.strategy_name().to_string(),
            description,
        }
    }
}

/// Propose candidate fixes for a cycle, in fixed policy order
///
/// `path` is the cycle as reported by the graph store: node sequence with
/// the entry node repeated at the end (e.g. `[1, 2, 1]`).
pub fn resolve_cycle(graph: &TaskGraph, path: &[SubTaskId]) -> Vec<ProposedFix> {
    if path.len() < 3 {
        return Vec::new();
    }
    let nodes = &path[..path.len() - 1];
    let mut fixes = Vec::new();

    // 1. Merge: every cyclic node shares the same domain tag set
    if same_domain(graph, nodes) {
        fixes.push(ProposedFix::Merge {
            sub_tasks: nodes.to_vec(),
        });
    }

    // 2. Stage: two nodes each needing an output the other produces
    if nodes.len() == 2 {
        let (producer, consumer) = (nodes[0], nodes[1]);
        fixes.push(ProposedFix::Stage {
            producer,
            consumer,
            partial_artifact: partial_artifact_name(graph, producer, consumer),
        });
    }

    // 3. Invert: flip the edge closing the loop
    fixes.push(ProposedFix::Invert {
        producer: nodes[nodes.len() - 1],
        consumer: nodes[0],
    });

    // 4. Split: the busiest node most likely bundles independent concerns
    if let Some((sub_task, detach_from)) = split_candidate(graph, nodes) {
        fixes.push(ProposedFix::Split {
            sub_task,
            detach_from,
        });
    }

    fixes
}

fn same_domain(graph: &TaskGraph, nodes: &[SubTaskId]) -> bool {
    let mut tag_sets = nodes.iter().map(|&id| {
        graph.sub_task(id).map(|st| {
            let mut tags = st.domain_tags.clone();
            tags.sort();
            tags
        })
    });
    match tag_sets.next() {
        Some(Some(first)) => tag_sets.all(|tags| tags.as_ref() == Some(&first)),
        _ => false,
    }
}

fn partial_artifact_name(graph: &TaskGraph, producer: SubTaskId, consumer: SubTaskId) -> String {
    let shared = graph.sub_task(producer).and_then(|p| {
        graph.sub_task(consumer).and_then(|c| {
            p.outputs
                .iter()
                .find(|artifact| c.inputs.contains(artifact))
                .cloned()
        })
    });
    match shared {
        Some(artifact) => format!("{}.partial", artifact),
        None => graph
            .sub_task(producer)
            .map(|p| format!("{}.partial", p.name))
            .unwrap_or_else(|| "partial".to_string()),
    }
}

/// Pick the cycle node with the highest combined degree and its cycle
/// predecessor
fn split_candidate(graph: &TaskGraph, nodes: &[SubTaskId]) -> Option<(SubTaskId, SubTaskId)> {
    let (pos, &sub_task) = nodes
        .iter()
        .enumerate()
        .max_by_key(|(_, &id)| graph.pred_count(id) + graph.succ_count(id))?;
    let detach_from = if pos == 0 {
        nodes[nodes.len() - 1]
    } else {
        nodes[pos - 1]
    };
    Some((sub_task, detach_from))
}

/// Apply a confirmed fix, adjusting both the committed graph and the
/// pending edge batch; the caller then retries committing the batch.
pub fn apply_fix(
    graph: &mut TaskGraph,
    batch: &mut Vec<(SubTaskId, SubTaskId)>,
    fix: &ProposedFix,
) -> Result<(), GraphError> {
    match fix {
        ProposedFix::Invert { producer, consumer } => {
            batch.retain(|&(p, c)| !(p == *producer && c == *consumer));
            graph.remove_edge(*producer, *consumer);
            if !graph.has_edge(*consumer, *producer)
                && !batch.contains(&(*consumer, *producer))
            {
                batch.push((*consumer, *producer));
            }
            Ok(())
        }

        ProposedFix::Stage {
            producer,
            consumer,
            partial_artifact,
        } => {
            let template = graph
                .sub_task(*producer)
                .ok_or(GraphError::UnknownSubTask { id: *producer })?
                .clone();
            batch.retain(|&(p, c)| !(p == *producer && c == *consumer));
            graph.remove_edge(*producer, *consumer);

            let stage_id = graph.insert_sub_task(ProposedSubTask {
                name: format!("{} (staged)", template.name),
                description: format!(
                    "Produce a partial '{}' usable before '{}' completes",
                    partial_artifact, template.name
                ),
                inputs: Vec::new(),
                outputs: vec![partial_artifact.clone()],
                done_criteria: format!("partial artifact '{}' is available", partial_artifact),
                effort: Effort::Small,
                domain_tags: template.domain_tags.clone(),
                autonomy: template.autonomy,
            })?;
            batch.push((stage_id, *consumer));
            Ok(())
        }

        ProposedFix::Merge { sub_tasks } => apply_merge(graph, batch, sub_tasks),

        ProposedFix::Split {
            sub_task,
            detach_from,
        } => apply_split(graph, batch, *sub_task, *detach_from),
    }
}

fn apply_merge(
    graph: &mut TaskGraph,
    batch: &mut Vec<(SubTaskId, SubTaskId)>,
    sub_tasks: &[SubTaskId],
) -> Result<(), GraphError> {
    // Collect the committed edges crossing the merge boundary
    let mut external_preds = Vec::new();
    let mut external_succs = Vec::new();
    for &id in sub_tasks {
        for p in graph.predecessors_of(id) {
            if !sub_tasks.contains(&p) {
                external_preds.push(p);
            }
        }
        for s in graph.successors_of(id) {
            if !sub_tasks.contains(&s) {
                external_succs.push(s);
            }
        }
    }

    let mut removed = Vec::with_capacity(sub_tasks.len());
    for &id in sub_tasks {
        removed.push(graph.remove_sub_task(id)?);
    }

    let internal_outputs: Vec<String> = removed
        .iter()
        .flat_map(|st| st.outputs.iter().cloned())
        .collect();
    let merged = ProposedSubTask {
        name: removed
            .iter()
            .map(|st| st.name.clone())
            .collect::<Vec<_>>()
            .join(" + "),
        description: removed
            .iter()
            .map(|st| st.description.clone())
            .filter(|d| !d.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        // Inputs produced inside the merged node are satisfied internally
        inputs: removed
            .iter()
            .flat_map(|st| st.inputs.iter().cloned())
            .filter(|artifact| !internal_outputs.contains(artifact))
            .collect(),
        outputs: internal_outputs,
        done_criteria: removed
            .iter()
            .map(|st| st.done_criteria.clone())
            .collect::<Vec<_>>()
            .join("; "),
        effort: removed
            .iter()
            .map(|st| st.effort)
            .fold(Effort::Small, max_effort),
        domain_tags: removed
            .first()
            .map(|st| st.domain_tags.clone())
            .unwrap_or_default(),
        autonomy: removed
            .first()
            .map(|st| st.autonomy)
            .unwrap_or_default(),
    };
    let merged_id = graph.insert_sub_task(merged)?;

    let mut edges: Vec<(SubTaskId, SubTaskId)> = Vec::new();
    for p in external_preds {
        if !edges.contains(&(p, merged_id)) {
            edges.push((p, merged_id));
        }
    }
    for s in external_succs {
        if !edges.contains(&(merged_id, s)) {
            edges.push((merged_id, s));
        }
    }
    graph.add_edges(&edges)?;

    // Remap the pending batch onto the merged node
    for edge in batch.iter_mut() {
        if sub_tasks.contains(&edge.0) {
            edge.0 = merged_id;
        }
        if sub_tasks.contains(&edge.1) {
            edge.1 = merged_id;
        }
    }
    batch.retain(|&(p, c)| p != c);
    batch.dedup();
    Ok(())
}

fn apply_split(
    graph: &mut TaskGraph,
    batch: &mut Vec<(SubTaskId, SubTaskId)>,
    sub_task: SubTaskId,
    detach_from: SubTaskId,
) -> Result<(), GraphError> {
    let preds = graph.predecessors_of(sub_task);
    let succs = graph.successors_of(sub_task);
    let original = graph.remove_sub_task(sub_task)?;

    let independent = graph.insert_sub_task(ProposedSubTask {
        name: format!("{} (independent)", original.name),
        description: original.description.clone(),
        inputs: original.inputs.clone(),
        outputs: original.outputs.clone(),
        done_criteria: original.done_criteria.clone(),
        effort: original.effort,
        domain_tags: original.domain_tags.clone(),
        autonomy: original.autonomy,
    })?;
    let dependent = graph.insert_sub_task(ProposedSubTask {
        name: format!("{} (dependent)", original.name),
        description: format!("Rework of '{}' that genuinely needs its inputs", original.name),
        inputs: original.inputs.clone(),
        outputs: Vec::new(),
        done_criteria: original.done_criteria.clone(),
        effort: original.effort,
        domain_tags: original.domain_tags,
        autonomy: original.autonomy,
    })?;

    let mut edges = vec![(independent, dependent)];
    for p in preds {
        if p == detach_from {
            edges.push((p, dependent));
        } else {
            edges.push((p, independent));
        }
    }
    for s in succs {
        edges.push((independent, s));
    }
    graph.add_edges(&edges)?;

    // Remap the pending batch
    for edge in batch.iter_mut() {
        if edge.0 == sub_task {
            edge.0 = independent;
        }
        if edge.1 == sub_task {
            edge.1 = if edge.0 == detach_from {
                dependent
            } else {
                independent
            };
        }
    }
    batch.retain(|&(p, c)| p != c);
    Ok(())
}

fn max_effort(a: Effort, b: Effort) -> Effort {
    let rank = |e: Effort| match e {
        Effort::Small => 0,
        Effort::Medium => 1,
        Effort::Large => 2,
    };
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}
