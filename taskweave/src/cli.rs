//! CLI argument definitions and workflow entry for the goal planner.
//!
//! The CLI drives one goal end to end: load a decomposition and worker
//! roster, build and present the plan, then either stop at the approved
//! plan or simulate execution with instantly succeeding workers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use clap::Parser;

use taskweave_sdk::{
    async_trait, log_found, log_info, log_parallel_start, log_warning, ApprovalDecision,
    ApprovalScope, DispatchPayload, FixProposal, PlanApprover, PlanSummary, RecoveryProposal,
    SdkResult, WorkResult, WorkerDispatch,
};

use crate::config::EffortWeights;
use crate::exec::orchestrator::{GoalOrchestrator, RunStatus};
use crate::io;

/// Goal decomposition planner
///
/// Builds a dependency-checked execution plan from a decomposition file:
/// validates the sub-task graph, partitions it into concurrent waves,
/// computes the critical path, and binds each sub-task to a capable worker
/// from the roster.
#[derive(Parser, Debug, Clone)]
#[command(name = "goal-planner")]
#[command(about = "Goal decomposition planner")]
#[command(version)]
pub struct Args {
    /// Path to the decomposition YAML (goal, sub_tasks, edges)
    #[arg(long, value_name = "PATH")]
    pub decomposition: String,

    /// Path to the worker roster YAML
    #[arg(long, value_name = "PATH")]
    pub roster: String,

    /// Path to an effort-weights YAML overriding the default 1/3/8 scale
    #[arg(long, value_name = "PATH")]
    pub weights: Option<String>,

    /// Write the resulting plan to this path as YAML
    #[arg(long, value_name = "PATH")]
    pub output: Option<String>,

    /// Approve the plan and any cycle repairs without prompting
    ///
    /// Without this flag the plan is built and printed but treated as
    /// denied, matching the rule that an absent response is a denial.
    #[arg(long)]
    pub yes: bool,

    /// Release only the listed wave indices instead of all waves
    #[arg(long, value_name = "WAVE", value_delimiter = ',')]
    pub release_waves: Option<Vec<usize>>,

    /// Simulate execution with instantly succeeding workers
    #[arg(long)]
    pub simulate: bool,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.simulate && !self.yes {
            anyhow::bail!("--simulate requires --yes: simulated runs cannot prompt for approval");
        }
        if let Some(waves) = &self.release_waves {
            if waves.is_empty() {
                anyhow::bail!("--release-waves requires at least one wave index");
            }
        }
        Ok(())
    }
}

/// Non-interactive approver driven by CLI flags
///
/// With `--yes` it approves the plan (optionally scoped to released
/// waves), confirms the first proposed cycle repair, and picks the first
/// recovery proposal. Without it, every decision is a denial.
pub struct FlagApprover {
    approve: bool,
    release_waves: Option<Vec<usize>>,
}

impl FlagApprover {
    pub fn new(approve: bool, release_waves: Option<Vec<usize>>) -> Self {
        Self {
            approve,
            release_waves,
        }
    }
}

impl PlanApprover for FlagApprover {
    fn present_plan(&self, plan: &PlanSummary) -> ApprovalDecision {
        print_plan(plan);
        if !self.approve {
            return ApprovalDecision::deny();
        }
        match &self.release_waves {
            Some(waves) => ApprovalDecision {
                scope: ApprovalScope::Waves {
                    waves: waves.clone(),
                },
                modifications: Vec::new(),
            },
            None => ApprovalDecision::approve_all(),
        }
    }

    fn confirm_fix(&self, fix: &FixProposal) -> bool {
        if self.approve {
            log_info!("Applying cycle repair [{}]: {}", fix.strategy, fix.description);
        } else {
            log_warning!("Declining cycle repair [{}]: {}", fix.strategy, fix.description);
        }
        self.approve
    }

    fn choose_recovery(&self, proposals: &[RecoveryProposal]) -> Option<usize> {
        if self.approve && !proposals.is_empty() {
            log_info!("Applying recovery: {}", proposals[0].description);
            Some(0)
        } else {
            None
        }
    }
}

/// Dispatch stub that reports instant success on the goal's result channel
pub struct SimulatedDispatch {
    results: tokio::sync::mpsc::Sender<WorkResult>,
    dispatched: AtomicUsize,
}

impl SimulatedDispatch {
    pub fn new(results: tokio::sync::mpsc::Sender<WorkResult>) -> Self {
        Self {
            results,
            dispatched: AtomicUsize::new(0),
        }
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerDispatch for SimulatedDispatch {
    async fn dispatch(
        &self,
        sub_task_id: u32,
        worker_id: &str,
        payload: DispatchPayload,
    ) -> SdkResult<()> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        log_info!(
            "[simulated] {} -> {} ({})",
            payload.sub_task_name,
            worker_id,
            sub_task_id
        );
        self.results.send(WorkResult::success(sub_task_id)).await?;
        Ok(())
    }

    async fn cancel(&self, _sub_task_id: u32, _worker_id: &str) {}
}

fn print_plan(plan: &PlanSummary) {
    log_info!("Goal: {}", plan.goal);
    log_found!(plan.waves.len(), "waves");
    for wave in &plan.waves {
        let members: Vec<String> = wave
            .sub_tasks
            .iter()
            .map(|st| match &st.worker {
                Some(worker) => format!("{} -> {}", st.name, worker),
                None => format!("{} [UNASSIGNABLE]", st.name),
            })
            .collect();
        println!("  Wave {}: {}", wave.wave, members.join(", "));
    }
    log_info!(
        "Critical path: {:?} (weight {})",
        plan.critical_path,
        plan.critical_path_weight
    );
    for gap in &plan.unassignable {
        log_warning!(
            "No capable worker for '{}': missing capability '{}'",
            gap.name,
            gap.missing_capability
        );
    }
    for flag in &plan.review_flags {
        log_warning!("{}", flag);
    }
}

/// Run the goal-planner workflow end to end
pub async fn run_workflow(args: Args) -> Result<()> {
    args.validate()?;

    let decomposition = io::load_decomposition(Path::new(&args.decomposition))?;
    let registry = io::load_roster(Path::new(&args.roster))?;
    let weights = match &args.weights {
        Some(path) => EffortWeights::load(Path::new(path))?,
        None => EffortWeights::default(),
    };
    log_found!(decomposition.sub_tasks.len(), "sub-tasks in decomposition");

    let approver = FlagApprover::new(args.yes, args.release_waves.clone());
    let mut orchestrator = GoalOrchestrator::new(decomposition.goal.clone(), weights);
    orchestrator.add_subtasks(decomposition.sub_tasks)?;
    let explicit = io::resolve_edges(orchestrator.graph(), &decomposition.edges)?;
    orchestrator.commit_edges(explicit, &approver)?;
    orchestrator.commit_derived_edges(&approver)?;

    orchestrator.build_plan(&registry)?;
    let approved = orchestrator.present_for_approval(&approver)?;

    if let Some(output) = &args.output {
        if let Some(plan) = orchestrator.plan() {
            io::save_plan(Path::new(output), plan)?;
            taskweave_sdk::log_file_saved!(PathBuf::from(output).display());
        }
    }

    if !approved {
        log_warning!("Plan not approved; stopping before execution");
        return Ok(());
    }

    if args.simulate {
        let dispatch = SimulatedDispatch::new(orchestrator.result_sender());
        log_parallel_start!(
            orchestrator
                .plan()
                .map(|p| p.waves.first().map(|w| w.sub_tasks.len()).unwrap_or(0))
                .unwrap_or(0),
            "sub-tasks in first wave"
        );
        match orchestrator.run(&dispatch, &registry, &approver).await? {
            RunStatus::Completed => log_info!("All released waves completed"),
            RunStatus::AwaitingRelease { next_wave } => {
                log_info!("Stopped before unreleased wave {}", next_wave)
            }
            RunStatus::Paused { failed } => {
                log_warning!("Execution paused; failed sub-tasks: {:?}", failed)
            }
            RunStatus::Cancelled => log_warning!("Goal cancelled"),
        }
    }

    Ok(())
}
