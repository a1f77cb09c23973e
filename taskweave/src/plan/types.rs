//! Data types for goal planning.
//!
//! This module defines the data structures flowing through plan construction:
//!
//! 1. **ProposedSubTask** - Raw decomposition output, pre-validation
//! 2. **SubTask** - Validated graph node with an assigned id
//! 3. **Wave / CriticalPath** - Topological partition results
//! 4. **Assignment / AssignmentReport** - Worker binding results
//! 5. **Plan** - The aggregate presented for approval

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskweave_sdk::{
    AutonomyLevel, AutonomyRequirement, DispatchPayload, PlanSummary, SubTaskRef,
    UnassignableReport, WaveSummary,
};

use super::graph::TaskGraph;

/// Type alias for sub-task IDs, assigned sequentially by the graph store
pub type SubTaskId = u32;

/// Estimated effort of a sub-task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Small,
    Medium,
    Large,
}

/// Proposed sub-task from the external decomposition strategy
///
/// Not yet part of any graph; validated and given an id by
/// [`TaskGraph::add_subtasks`](super::graph::TaskGraph::add_subtasks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedSubTask {
    /// Sub-task name
    pub name: String,

    /// What the work is
    #[serde(default)]
    pub description: String,

    /// Artifact names this sub-task consumes
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Artifact names this sub-task produces
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Verifiable completion condition; a sub-task without one is invalid
    pub done_criteria: String,

    /// Estimated effort
    pub effort: Effort,

    /// Domain capability tags a worker must cover to take this sub-task
    pub domain_tags: Vec<String>,

    /// Autonomy compatibility requirement
    #[serde(default)]
    pub autonomy: AutonomyRequirement,
}

impl ProposedSubTask {
    /// Minimal proposal with no declared artifacts
    pub fn new(name: &str, done_criteria: &str, effort: Effort, domain_tag: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            done_criteria: done_criteria.to_string(),
            effort,
            domain_tags: vec![domain_tag.to_string()],
            autonomy: AutonomyRequirement::Any,
        }
    }

    pub fn with_artifacts(mut self, inputs: &[&str], outputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Validated sub-task node owned by the graph store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    /// Unique id within the owning goal
    pub id: SubTaskId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub done_criteria: String,
    pub effort: Effort,
    pub domain_tags: Vec<String>,
    #[serde(default)]
    pub autonomy: AutonomyRequirement,
}

impl SubTask {
    /// Payload handed to a worker when this sub-task is dispatched
    pub fn dispatch_payload(&self) -> DispatchPayload {
        DispatchPayload {
            sub_task_name: self.name.clone(),
            description: self.description.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            done_criteria: self.done_criteria.clone(),
        }
    }
}

/// One wave: an ordered partition index and its member sub-tasks
///
/// All members of wave N have every predecessor in waves < N.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub index: usize,
    pub sub_tasks: Vec<SubTaskId>,
}

/// Effort-weighted longest root-to-leaf path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Ordered sub-task ids from root to leaf
    pub sub_tasks: Vec<SubTaskId>,
    /// Sum of node weights along the path
    pub weight: u32,
}

/// Binding of a sub-task to a capable worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub sub_task_id: SubTaskId,
    pub worker_id: String,
    /// The worker's declared autonomy level at binding time
    pub autonomy_level: AutonomyLevel,
}

/// Sub-task with no capable worker; no binding is ever fabricated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unassignable {
    pub sub_task_id: SubTaskId,
    /// The capability no registered worker covers
    pub missing_capability: String,
}

/// Advisory granularity flag surfaced to the approver, never auto-applied
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GranularityFlag {
    /// Small, isolated sub-task alone in its wave; candidate for merging
    /// into a neighbour
    MergeUpward { sub_task_id: SubTaskId },
    /// Sub-task spanning multiple domains; candidate for further
    /// decomposition
    SplitDownward {
        sub_task_id: SubTaskId,
        domain_tags: Vec<String>,
    },
}

impl GranularityFlag {
    pub fn describe(&self) -> String {
        match self {
            GranularityFlag::MergeUpward { sub_task_id } => format!(
                "sub-task {} is small and isolated; review for merge-upward",
                sub_task_id
            ),
            GranularityFlag::SplitDownward {
                sub_task_id,
                domain_tags,
            } => format!(
                "sub-task {} spans domains [{}]; review for split-downward",
                sub_task_id,
                domain_tags.join(", ")
            ),
        }
    }
}

/// Result of assignment resolution over a whole plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentReport {
    #[serde(default)]
    pub assignments: Vec<Assignment>,

    /// Sub-tasks flagged UNASSIGNABLE with the missing capability
    #[serde(default)]
    pub unassignable: Vec<Unassignable>,

    /// Advisory granularity review flags
    #[serde(default)]
    pub flags: Vec<GranularityFlag>,
}

impl AssignmentReport {
    pub fn assignment_for(&self, id: SubTaskId) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.sub_task_id == id)
    }

    pub fn is_unassignable(&self, id: SubTaskId) -> bool {
        self.unassignable.iter().any(|u| u.sub_task_id == id)
    }

    /// Replace or insert the binding for one sub-task
    pub fn rebind(&mut self, assignment: Assignment) {
        self.assignments
            .retain(|a| a.sub_task_id != assignment.sub_task_id);
        self.unassignable
            .retain(|u| u.sub_task_id != assignment.sub_task_id);
        self.assignments.push(assignment);
    }
}

/// Approval state of a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Not yet presented
    #[default]
    Pending,
    /// Released for execution; `waves` limits release to specific indices
    Approved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        waves: Option<Vec<usize>>,
        #[serde(default)]
        modifications: Vec<String>,
    },
    /// Denied or ambiguous response; execution must not proceed
    Denied,
}

impl ApprovalStatus {
    /// Check whether a given wave index has been released
    pub fn releases_wave(&self, wave: usize) -> bool {
        match self {
            ApprovalStatus::Approved { waves: None, .. } => true,
            ApprovalStatus::Approved {
                waves: Some(waves), ..
            } => waves.contains(&wave),
            _ => false,
        }
    }
}

/// Aggregate plan for one goal: waves + critical path + assignments +
/// approval status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub waves: Vec<Wave>,
    pub critical_path: CriticalPath,
    pub assignments: AssignmentReport,
    #[serde(default)]
    pub approval: ApprovalStatus,
    pub planned_at: DateTime<Utc>,
}

impl Plan {
    /// Build the summary presented to a human approver
    ///
    /// Assignment gaps and granularity flags are always included; a plan
    /// with unassignable sub-tasks is presented as having gaps, never
    /// silently trimmed.
    pub fn summary(&self, graph: &TaskGraph) -> PlanSummary {
        let waves = self
            .waves
            .iter()
            .map(|wave| WaveSummary {
                wave: wave.index,
                sub_tasks: wave
                    .sub_tasks
                    .iter()
                    .map(|&id| SubTaskRef {
                        id,
                        name: graph
                            .sub_task(id)
                            .map(|st| st.name.clone())
                            .unwrap_or_default(),
                        worker: self
                            .assignments
                            .assignment_for(id)
                            .map(|a| a.worker_id.clone()),
                    })
                    .collect(),
            })
            .collect();

        let unassignable = self
            .assignments
            .unassignable
            .iter()
            .map(|u| UnassignableReport {
                sub_task_id: u.sub_task_id,
                name: graph
                    .sub_task(u.sub_task_id)
                    .map(|st| st.name.clone())
                    .unwrap_or_default(),
                missing_capability: u.missing_capability.clone(),
            })
            .collect();

        PlanSummary {
            goal: self.goal.clone(),
            waves,
            critical_path: self.critical_path.sub_tasks.clone(),
            critical_path_weight: self.critical_path.weight,
            unassignable,
            review_flags: self
                .assignments
                .flags
                .iter()
                .map(|f| f.describe())
                .collect(),
        }
    }
}
