// Re-export async trait for convenience
pub use async_trait::async_trait;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result type for interface operations
pub type SdkResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

// ============================================================================
// Worker Registry Types
// ============================================================================

/// Autonomy level a worker advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// May act without per-step human approval
    Full,
    /// Requires approval gates between steps
    Gated,
}

/// Autonomy compatibility requirement carried by a sub-task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyRequirement {
    /// Any worker is acceptable
    #[default]
    Any,
    /// Only fully autonomous workers
    Full,
    /// Only gated workers
    Gated,
}

impl AutonomyRequirement {
    /// Check whether a worker's declared level satisfies this requirement
    pub fn accepts(&self, level: AutonomyLevel) -> bool {
        match self {
            AutonomyRequirement::Any => true,
            AutonomyRequirement::Full => level == AutonomyLevel::Full,
            AutonomyRequirement::Gated => level == AutonomyLevel::Gated,
        }
    }
}

/// Worker descriptor returned by registry queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Unique worker identifier
    pub id: String,
    /// Capability set: domain tags this worker can handle
    pub domain_tags: Vec<String>,
    /// Declared autonomy level
    pub autonomy_level: AutonomyLevel,
    /// Number of sub-tasks currently bound to this worker
    #[serde(default)]
    pub current_load: u32,
}

impl WorkerDescriptor {
    /// Check whether this worker's capability set covers all given tags
    pub fn covers(&self, domain_tags: &[String]) -> bool {
        domain_tags.iter().all(|t| self.domain_tags.contains(t))
    }
}

/// External worker catalog queried during assignment resolution
pub trait WorkerRegistry: Send + Sync {
    /// Find workers whose capability set covers the given domain tags and
    /// whose autonomy level satisfies the requirement
    fn find_capable(
        &self,
        domain_tags: &[String],
        autonomy: AutonomyRequirement,
    ) -> Vec<WorkerDescriptor>;
}

/// In-memory registry backed by a fixed worker roster
///
/// Used by the goal-planner CLI (roster loaded from YAML) and by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    workers: Vec<WorkerDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    workers: Vec<WorkerDescriptor>,
}

impl StaticRegistry {
    pub fn new(workers: Vec<WorkerDescriptor>) -> Self {
        Self { workers }
    }

    /// Load a roster from YAML (`workers:` list of descriptors)
    pub fn from_yaml(yaml: &str) -> SdkResult<Self> {
        let roster: RosterFile = serde_yaml::from_str(yaml)?;
        Ok(Self::new(roster.workers))
    }

    pub fn workers(&self) -> &[WorkerDescriptor] {
        &self.workers
    }
}

impl WorkerRegistry for StaticRegistry {
    fn find_capable(
        &self,
        domain_tags: &[String],
        autonomy: AutonomyRequirement,
    ) -> Vec<WorkerDescriptor> {
        self.workers
            .iter()
            .filter(|w| w.covers(domain_tags) && autonomy.accepts(w.autonomy_level))
            .cloned()
            .collect()
    }
}

// ============================================================================
// Worker Dispatch Types
// ============================================================================

/// Payload handed to an external worker on dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub sub_task_name: String,
    pub description: String,
    /// Artifact names this sub-task consumes
    pub inputs: Vec<String>,
    /// Artifact names this sub-task must produce
    pub outputs: Vec<String>,
    /// Verifiable completion condition
    pub done_criteria: String,
}

/// Outcome reported by an external worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkOutcome {
    Success,
    Failure {
        /// Reason for the failure
        reason: String,
    },
}

/// Inbound worker callback payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    pub sub_task_id: u32,
    pub outcome: WorkOutcome,
    /// Optional free-form details from the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl WorkResult {
    pub fn success(sub_task_id: u32) -> Self {
        Self {
            sub_task_id,
            outcome: WorkOutcome::Success,
            details: None,
        }
    }

    pub fn failure(sub_task_id: u32, reason: impl Into<String>) -> Self {
        Self {
            sub_task_id,
            outcome: WorkOutcome::Failure {
                reason: reason.into(),
            },
            details: None,
        }
    }
}

/// Fire-and-forget dispatch of sub-task work to external workers
///
/// Results come back asynchronously as [`WorkResult`] messages on the
/// orchestrator's per-goal result channel, never through this trait.
#[async_trait]
pub trait WorkerDispatch: Send + Sync {
    /// Hand a sub-task to a worker; returning Ok only means the hand-off
    /// succeeded, not that the work did
    async fn dispatch(
        &self,
        sub_task_id: u32,
        worker_id: &str,
        payload: DispatchPayload,
    ) -> SdkResult<()>;

    /// Best-effort cancellation signal; no guarantee of immediate stop
    async fn cancel(&self, sub_task_id: u32, worker_id: &str);
}

// ============================================================================
// Approval Interface
// ============================================================================

/// Which waves the approver released for execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ApprovalScope {
    /// Release every wave
    All,
    /// Release only the listed wave indices
    Waves { waves: Vec<usize> },
    /// No approval; execution must not proceed
    None,
}

/// Decision returned from presenting a plan to a human approver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub scope: ApprovalScope,
    /// Free-form modification notes attached to the plan record
    #[serde(default)]
    pub modifications: Vec<String>,
}

impl ApprovalDecision {
    pub fn approve_all() -> Self {
        Self {
            scope: ApprovalScope::All,
            modifications: Vec::new(),
        }
    }

    pub fn deny() -> Self {
        Self {
            scope: ApprovalScope::None,
            modifications: Vec::new(),
        }
    }

    /// An absent or ambiguous response is a denial
    pub fn is_denial(&self) -> bool {
        match &self.scope {
            ApprovalScope::None => true,
            ApprovalScope::Waves { waves } => waves.is_empty(),
            ApprovalScope::All => false,
        }
    }

    /// Check whether a specific wave index was released
    pub fn approves_wave(&self, wave: usize) -> bool {
        match &self.scope {
            ApprovalScope::All => true,
            ApprovalScope::Waves { waves } => waves.contains(&wave),
            ApprovalScope::None => false,
        }
    }
}

/// Sub-task reference inside a plan summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskRef {
    pub id: u32,
    pub name: String,
    /// Bound worker id, if assignment resolution succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

/// One wave of mutually independent sub-tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveSummary {
    pub wave: usize,
    pub sub_tasks: Vec<SubTaskRef>,
}

/// Sub-task with no capable worker, surfaced as a gap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnassignableReport {
    pub sub_task_id: u32,
    pub name: String,
    /// The domain capability no registered worker advertises
    pub missing_capability: String,
}

/// Plan summary presented to a human approver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub goal: String,
    pub waves: Vec<WaveSummary>,
    /// Sub-task id sequence forming the effort-weighted critical path
    pub critical_path: Vec<u32>,
    pub critical_path_weight: u32,
    /// Assignment gaps; never silently omitted
    #[serde(default)]
    pub unassignable: Vec<UnassignableReport>,
    /// Advisory granularity review notes (merge-upward / split-downward)
    #[serde(default)]
    pub review_flags: Vec<String>,
}

/// Candidate repair for a detected dependency cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixProposal {
    /// Strategy name: merge, stage, invert, or split
    pub strategy: String,
    pub description: String,
}

/// Recovery action proposed after a sub-task failure or goal change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Same assignment, same sub-task
    Retry,
    /// New assignment, same sub-task
    Reassign,
    /// Re-plan waves and assignments over the blast radius only
    Restructure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryProposal {
    pub action: RecoveryAction,
    pub description: String,
}

/// Synchronous human-in-the-loop approval interface
pub trait PlanApprover: Send + Sync {
    /// Present a plan; the decision gates wave release
    fn present_plan(&self, plan: &PlanSummary) -> ApprovalDecision;

    /// Confirm a single cycle-repair fix before it is applied
    fn confirm_fix(&self, fix: &FixProposal) -> bool;

    /// Choose one recovery proposal by index, or decline all
    fn choose_recovery(&self, proposals: &[RecoveryProposal]) -> Option<usize>;
}

// ============================================================================
// Goal Handle
// ============================================================================

/// Handle for tracking one goal's orchestration
#[derive(Debug, Clone)]
pub struct GoalHandle {
    pub id: Uuid,
    pub goal: String,
}

impl GoalHandle {
    pub fn new(id: Uuid, goal: String) -> Self {
        Self { id, goal }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }
}

// ============================================================================
// Event Stream
// ============================================================================

/// Structured events emitted by the orchestrator
///
/// Append-only progress stream consumed by logging/UI; the engine never
/// reads these back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    /// Plan constructed and presented for approval
    PlanPresented {
        goal: String,
        total_waves: usize,
        total_sub_tasks: usize,
    },
    /// Cycle detected during construction; always reported, even if repaired
    CycleReported {
        path: Vec<u32>,
        repaired: bool,
    },
    /// No capable worker for a sub-task
    UnassignableSubTask {
        sub_task_id: u32,
        name: String,
        missing_capability: String,
    },
    /// Wave released through the approval gate
    WaveReleased {
        wave: usize,
        sub_tasks: Vec<u32>,
    },
    /// Sub-task handed to a worker
    SubTaskDispatched {
        sub_task_id: u32,
        worker_id: String,
    },
    /// All predecessors completed; sub-task is now eligible
    SubTaskUnblocked {
        sub_task_id: u32,
    },
    /// Worker reported failure; visible even after successful recovery
    SubTaskFailed {
        sub_task_id: u32,
        reason: String,
    },
    /// Wave completion summary
    WaveCompleted {
        wave: usize,
        completed: usize,
        failed: usize,
    },
    /// Recovery proposals surfaced for approval
    ReplanProposed {
        sub_task_id: u32,
        actions: Vec<String>,
    },
    /// Approved recovery applied
    ReplanApplied {
        action: String,
        reworked: Vec<u32>,
    },
    /// Goal cancelled; listed sub-tasks transitioned to cancelled
    GoalCancelled {
        cancelled: Vec<u32>,
    },
}

impl PlanEvent {
    /// Emit this event to stderr for external stream consumers
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("__TW_EVENT__:{}", json);
            // Force flush stderr in async/concurrent contexts
            let _ = std::io::stderr().flush();
        }
    }
}

// ============================================================================
// Console Logging Macros
// ============================================================================
// Colored console output for human-readable logs, complementing the
// structured PlanEvent stream.
// ============================================================================

/// Logs an informational message.
///
/// # Example
/// ```
/// use taskweave_sdk::log_info;
/// log_info!("Loading decomposition file...");
/// ```
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
///
/// # Example
/// ```
/// use taskweave_sdk::log_warning;
/// log_warning!("2 sub-tasks have no capable worker");
/// ```
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs the number of items found.
///
/// # Example
/// ```
/// use taskweave_sdk::log_found;
/// log_found!(14, "sub-tasks in decomposition");
/// ```
#[macro_export]
macro_rules! log_found {
    ($count:expr, $item_type:expr) => {
        println!("\x1b[36mFound {} {}\x1b[0m", $count, $item_type);
    };
}

/// Logs the start of a wave's execution.
///
/// # Example
/// ```
/// use taskweave_sdk::log_wave_start;
/// log_wave_start!(2, 5, 3);
/// ```
///
/// Outputs:
/// ```text
/// → Executing Wave 2/5 (3 sub-tasks)
/// ```
#[macro_export]
macro_rules! log_wave_start {
    ($wave:expr, $total_waves:expr, $num_sub_tasks:expr) => {
        println!(
            "\x1b[36m→ Executing Wave {}/{} ({} sub-tasks)\x1b[0m",
            $wave, $total_waves, $num_sub_tasks
        );
    };
}

/// Logs the completion of a wave.
///
/// # Example
/// ```
/// use taskweave_sdk::log_wave_complete;
/// log_wave_complete!(2);
/// ```
#[macro_export]
macro_rules! log_wave_complete {
    ($wave:expr) => {
        println!("\x1b[32m✓ Wave {} complete\x1b[0m", $wave);
    };
}

/// Logs the start of parallel dispatch.
///
/// # Example
/// ```
/// use taskweave_sdk::log_parallel_start;
/// log_parallel_start!(3, "sub-tasks");
/// ```
#[macro_export]
macro_rules! log_parallel_start {
    ($num_items:expr, $item_type:expr) => {
        println!(
            "\x1b[36m→ Dispatching {} {} in parallel\x1b[0m",
            $num_items, $item_type
        );
    };
}

/// Logs that a file has been saved.
///
/// # Example
/// ```
/// use taskweave_sdk::log_file_saved;
/// log_file_saved!("./plan.yaml");
/// ```
#[macro_export]
macro_rules! log_file_saved {
    ($path:expr) => {
        println!("\x1b[32m✓ Saved: {}\x1b[0m", $path);
    };
}
