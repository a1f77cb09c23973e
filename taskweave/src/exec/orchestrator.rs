//! Per-goal orchestration driver.
//!
//! One orchestrator instance owns the graph, plan, and lifecycle state for
//! exactly one goal; nothing is shared across goals, so concurrent goals
//! need no cross-goal locking. Worker results arrive as messages on a
//! bounded per-goal channel and are applied one at a time, keeping state
//! transitions deterministic within the goal.
//!
//! Execution honors the wave barrier: wave N+1 dispatch never begins until
//! every member of wave N is terminal or has an approved recovery applied.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Notify};
use uuid::Uuid;

use taskweave_sdk::{
    ApprovalScope, GoalHandle, PlanApprover, PlanEvent, RecoveryAction, RecoveryProposal,
    WorkOutcome, WorkResult, WorkerDispatch, WorkerRegistry,
};

use crate::config::EffortWeights;
use crate::plan::assign::{rebind_sub_task, resolve_assignments};
use crate::plan::cycle::{apply_fix, resolve_cycle};
use crate::plan::graph::{GraphError, TaskGraph};
use crate::plan::types::{ApprovalStatus, Plan, ProposedSubTask, SubTaskId, Wave};
use crate::plan::waves::{critical_path, plan_waves};

use super::lifecycle::{ExecError, LifecycleTracker, SubTaskState};
use super::replan::{blast_radius, needs_rework, propose_recovery, splice_waves};

/// Buffered results per goal; dispatch fan-out is wave-sized, well below this
const RESULT_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    /// No confirmed repair strategy cleared the cycle; the edge batch is
    /// rejected permanently
    #[error("cycle {path:?} could not be repaired; edge batch rejected")]
    UnresolvableCycle { path: Vec<SubTaskId> },

    #[error("no plan has been built for this goal")]
    NoPlan,

    #[error("plan is not approved; execution cannot proceed")]
    NotApproved,

    #[error("result channel closed while sub-tasks were still in progress")]
    ResultChannelClosed,
}

/// Cancellation signal shared with callers outside the run loop
///
/// Setting it stops the goal at the next suspension point, including a
/// blocked wait on the result channel.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of one `run` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Every released wave ran to completion
    Completed,
    /// Stopped at a wave the approval scope has not released
    AwaitingRelease { next_wave: usize },
    /// A recovery decision was declined; the affected subgraph is paused
    Paused { failed: Vec<SubTaskId> },
    /// The goal was cancelled
    Cancelled,
}

/// Orchestrator for a single goal, exclusive owner of its plan state
pub struct GoalOrchestrator {
    handle: GoalHandle,
    graph: TaskGraph,
    weights: EffortWeights,
    tracker: LifecycleTracker,
    plan: Option<Plan>,
    /// Done-criteria snapshot taken at approval, the baseline for
    /// goal-change validity checks
    approved_criteria: BTreeMap<SubTaskId, String>,
    result_tx: mpsc::Sender<WorkResult>,
    result_rx: mpsc::Receiver<WorkResult>,
    event_tx: broadcast::Sender<PlanEvent>,
    event_log: Arc<Mutex<Vec<PlanEvent>>>,
    cancel_token: CancelToken,
}

impl GoalOrchestrator {
    pub fn new(goal: impl Into<String>, weights: EffortWeights) -> Self {
        let goal = goal.into();
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            handle: GoalHandle::new(Uuid::new_v4(), goal),
            graph: TaskGraph::new(),
            weights,
            tracker: LifecycleTracker::new(),
            plan: None,
            approved_criteria: BTreeMap::new(),
            result_tx,
            result_rx,
            event_tx,
            event_log: Arc::new(Mutex::new(Vec::new())),
            cancel_token: CancelToken::default(),
        }
    }

    pub fn handle(&self) -> &GoalHandle {
        &self.handle
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Sender side of the per-goal result channel, handed to worker glue
    pub fn result_sender(&self) -> mpsc::Sender<WorkResult> {
        self.result_tx.clone()
    }

    /// Subscribe to the live event stream
    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of every event published so far
    pub fn event_log(&self) -> Vec<PlanEvent> {
        self.event_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Token checked at every suspension point; cancelling it stops the
    /// goal without waiting for another worker result
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel_token.clone()
    }

    fn publish(&self, event: PlanEvent) {
        if let Ok(mut log) = self.event_log.lock() {
            log.push(event.clone());
        }
        let _ = self.event_tx.send(event.clone());
        event.emit();
    }

    // ========================================================================
    // Plan Construction
    // ========================================================================

    /// Validate and add a decomposition batch; all-or-nothing
    pub fn add_subtasks(
        &mut self,
        proposed: Vec<ProposedSubTask>,
    ) -> Result<Vec<SubTaskId>, PlanError> {
        Ok(self.graph.add_subtasks(proposed)?)
    }

    pub fn set_goal_root(&mut self, id: SubTaskId) -> Result<(), PlanError> {
        Ok(self.graph.set_goal_root(id)?)
    }

    /// Commit a dependency edge batch, repairing cycles under approval
    ///
    /// The batch is atomic: it either commits in full or is rejected. On a
    /// detected cycle the repair strategies are proposed in fixed order
    /// (merge, stage, invert, split) from the initial detection; each
    /// confirmed fix is applied and the batch retried. One pass only: if
    /// the proposals are exhausted the batch is rejected permanently.
    pub fn commit_edges(
        &mut self,
        edges: Vec<(SubTaskId, SubTaskId)>,
        approver: &dyn PlanApprover,
    ) -> Result<(), PlanError> {
        let mut batch = edges;
        let path = match self.graph.add_edges(&batch) {
            Ok(()) => return Ok(()),
            Err(GraphError::CycleDetected { path }) => path,
            Err(e) => return Err(e.into()),
        };

        let fixes = resolve_cycle(&self.graph, &path);
        for fix in fixes {
            // An earlier applied fix may have merged or split away nodes
            // this proposal names
            if !fix.is_applicable(&self.graph) {
                continue;
            }
            if !approver.confirm_fix(&fix.proposal(&self.graph)) {
                continue;
            }
            apply_fix(&mut self.graph, &mut batch, &fix)?;
            match self.graph.add_edges(&batch) {
                Ok(()) => {
                    self.publish(PlanEvent::CycleReported {
                        path: path.clone(),
                        repaired: true,
                    });
                    return Ok(());
                }
                Err(GraphError::CycleDetected { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.publish(PlanEvent::CycleReported {
            path: path.clone(),
            repaired: false,
        });
        Err(PlanError::UnresolvableCycle { path })
    }

    /// Commit the edges implied by artifact producer/consumer declarations
    pub fn commit_derived_edges(&mut self, approver: &dyn PlanApprover) -> Result<(), PlanError> {
        let derived = self.graph.derive_edges();
        if derived.is_empty() {
            return Ok(());
        }
        self.commit_edges(derived, approver)
    }

    /// Partition into waves, compute the critical path, and bind workers
    ///
    /// Construction errors (orphans, cycles) surface here synchronously,
    /// before any plan is presented. Assignment gaps are kept in the plan
    /// and reported, never trimmed.
    pub fn build_plan(&mut self, registry: &dyn WorkerRegistry) -> Result<(), PlanError> {
        self.graph.validate()?;
        let waves = plan_waves(&self.graph)?;
        let path = critical_path(&self.graph, &self.weights);
        let assignments = resolve_assignments(&self.graph, &waves, registry);

        for gap in &assignments.unassignable {
            self.publish(PlanEvent::UnassignableSubTask {
                sub_task_id: gap.sub_task_id,
                name: self
                    .graph
                    .sub_task(gap.sub_task_id)
                    .map(|st| st.name.clone())
                    .unwrap_or_default(),
                missing_capability: gap.missing_capability.clone(),
            });
        }

        self.tracker = LifecycleTracker::new();
        self.tracker.track_all(self.graph.ids());
        self.plan = Some(Plan {
            goal: self.handle.goal.clone(),
            waves,
            critical_path: path,
            assignments,
            approval: ApprovalStatus::Pending,
            planned_at: Utc::now(),
        });
        Ok(())
    }

    /// Present the plan for approval; an absent or ambiguous response is a
    /// denial and execution will not proceed
    pub fn present_for_approval(&mut self, approver: &dyn PlanApprover) -> Result<bool, PlanError> {
        let plan = self.plan.as_mut().ok_or(PlanError::NoPlan)?;
        let summary = plan.summary(&self.graph);
        let decision = approver.present_plan(&summary);

        let approved = if decision.is_denial() {
            plan.approval = ApprovalStatus::Denied;
            false
        } else {
            let waves = match decision.scope {
                ApprovalScope::All => None,
                ApprovalScope::Waves { waves } => Some(waves),
                ApprovalScope::None => None,
            };
            plan.approval = ApprovalStatus::Approved {
                waves,
                modifications: decision.modifications,
            };
            true
        };

        if approved {
            self.approved_criteria = self
                .graph
                .sub_tasks()
                .map(|st| (st.id, st.done_criteria.clone()))
                .collect();
        }

        self.publish(PlanEvent::PlanPresented {
            goal: self.handle.goal.clone(),
            total_waves: self.plan.as_ref().map(|p| p.waves.len()).unwrap_or(0),
            total_sub_tasks: self.graph.len(),
        });
        Ok(approved)
    }

    /// Baseline done-criteria captured at approval
    pub fn approved_criteria(&self) -> &BTreeMap<SubTaskId, String> {
        &self.approved_criteria
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute released waves in order, honoring the wave barrier
    ///
    /// Within a wave all dispatches go out concurrently. Results are
    /// applied one at a time off the goal's result channel. A failure
    /// routes through recovery proposals; a declined recovery pauses the
    /// run with everything outside the failed subgraph already settled.
    pub async fn run(
        &mut self,
        dispatch: &dyn WorkerDispatch,
        registry: &dyn WorkerRegistry,
        approver: &dyn PlanApprover,
    ) -> Result<RunStatus, PlanError> {
        let mut plan = self.plan.take().ok_or(PlanError::NoPlan)?;
        if !matches!(plan.approval, ApprovalStatus::Approved { .. }) {
            self.plan = Some(plan);
            return Err(PlanError::NotApproved);
        }

        let status = self.run_waves(&mut plan, dispatch, registry, approver).await;
        self.plan = Some(plan);
        status
    }

    async fn run_waves(
        &mut self,
        plan: &mut Plan,
        dispatch: &dyn WorkerDispatch,
        registry: &dyn WorkerRegistry,
        approver: &dyn PlanApprover,
    ) -> Result<RunStatus, PlanError> {
        let mut wave_idx = 0;
        while wave_idx < plan.waves.len() {
            if self.cancel_token.is_cancelled() {
                return Ok(self.finish_cancellation(plan, dispatch).await);
            }
            if !plan.approval.releases_wave(wave_idx) {
                return Ok(RunStatus::AwaitingRelease { next_wave: wave_idx });
            }

            let members = plan.waves[wave_idx].sub_tasks.clone();
            // Resuming a partially executed plan: skip settled waves
            if self.tracker.all_terminal(&members) {
                wave_idx += 1;
                continue;
            }

            self.publish(PlanEvent::WaveReleased {
                wave: wave_idx,
                sub_tasks: members.clone(),
            });
            self.dispatch_wave(plan, wave_idx, dispatch).await?;

            match self
                .await_wave(plan, wave_idx, dispatch, registry, approver)
                .await?
            {
                WaveOutcome::Settled => {}
                WaveOutcome::Paused { failed } => return Ok(RunStatus::Paused { failed }),
                WaveOutcome::Cancelled => {
                    return Ok(self.finish_cancellation(plan, dispatch).await)
                }
            }

            let members = &plan.waves[wave_idx].sub_tasks;
            let completed = members
                .iter()
                .filter(|&&id| self.tracker.state(id) == Some(SubTaskState::Completed))
                .count();
            self.publish(PlanEvent::WaveCompleted {
                wave: wave_idx,
                completed,
                failed: members.len() - completed,
            });
            wave_idx += 1;
        }
        Ok(RunStatus::Completed)
    }

    /// Start and dispatch every still-pending member of a wave concurrently
    async fn dispatch_wave(
        &mut self,
        plan: &Plan,
        wave_idx: usize,
        dispatch: &dyn WorkerDispatch,
    ) -> Result<(), PlanError> {
        let members = plan.waves[wave_idx].sub_tasks.clone();
        let mut outgoing = Vec::new();
        for &id in &members {
            if self.tracker.state(id) != Some(SubTaskState::Pending) {
                continue;
            }
            let Some(assignment) = plan.assignments.assignment_for(id) else {
                // Unassignable members hold the wave open; surfaced at plan
                // time, resolved only through replanning
                continue;
            };
            if !self.tracker.predecessors_complete(&self.graph, id) {
                continue;
            }
            let Some(sub_task) = self.graph.sub_task(id) else {
                continue;
            };
            let payload = sub_task.dispatch_payload();
            self.tracker.start(&self.graph, id)?;
            outgoing.push((id, assignment.worker_id.clone(), payload));
        }

        let handoffs = futures::future::join_all(outgoing.iter().map(|(id, worker, payload)| {
            let payload = payload.clone();
            async move { (*id, worker.clone(), dispatch.dispatch(*id, worker, payload).await) }
        }))
        .await;

        for (id, worker_id, handoff) in handoffs {
            match handoff {
                Ok(()) => self.publish(PlanEvent::SubTaskDispatched {
                    sub_task_id: id,
                    worker_id,
                }),
                Err(e) => {
                    // A failed hand-off is a failure result that never
                    // reached the channel
                    self.tracker.fail(id, e.to_string())?;
                    self.publish(PlanEvent::SubTaskFailed {
                        sub_task_id: id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Block on the result channel until the wave settles
    async fn await_wave(
        &mut self,
        plan: &mut Plan,
        wave_idx: usize,
        dispatch: &dyn WorkerDispatch,
        registry: &dyn WorkerRegistry,
        approver: &dyn PlanApprover,
    ) -> Result<WaveOutcome, PlanError> {
        loop {
            // Apply everything already queued so unaffected parallel
            // sub-tasks settle before any recovery decision is taken
            while let Ok(result) = self.result_rx.try_recv() {
                self.apply_result(result)?;
            }

            if let Some(failed) = self.first_failed(&plan.waves[wave_idx].sub_tasks) {
                match self
                    .recover(plan, wave_idx, failed, dispatch, registry, approver)
                    .await?
                {
                    RecoveryOutcome::Applied => {
                        // Restructuring may have moved reset sub-tasks into
                        // the current wave; pick them up before waiting
                        self.dispatch_wave(plan, wave_idx, dispatch).await?;
                        continue;
                    }
                    RecoveryOutcome::Declined => {
                        return Ok(WaveOutcome::Paused {
                            failed: self.tracker.ids_in_state(SubTaskState::Failed),
                        })
                    }
                }
            }

            let members = &plan.waves[wave_idx].sub_tasks;
            if self.wave_settled(members) {
                return Ok(WaveOutcome::Settled);
            }
            if self.cancel_token.is_cancelled() {
                return Ok(WaveOutcome::Cancelled);
            }
            // An unassignable member leaves nothing in flight and nothing
            // to recover; the wave cannot make progress without replanning
            let in_flight = members
                .iter()
                .any(|&id| self.tracker.state(id) == Some(SubTaskState::InProgress));
            if !in_flight {
                return Ok(WaveOutcome::Paused {
                    failed: Vec::new(),
                });
            }

            let notify = Arc::clone(&self.cancel_token.notify);
            tokio::select! {
                result = self.result_rx.recv() => {
                    let result = result.ok_or(PlanError::ResultChannelClosed)?;
                    self.apply_result(result)?;
                }
                _ = notify.notified() => {
                    return Ok(WaveOutcome::Cancelled);
                }
            }
        }
    }

    /// Apply one worker callback to the lifecycle state
    fn apply_result(&mut self, result: WorkResult) -> Result<(), PlanError> {
        match result.outcome {
            WorkOutcome::Success => {
                // Results for cancelled or replanned-away sub-tasks are
                // stale; drop them
                if self.tracker.state(result.sub_task_id) != Some(SubTaskState::InProgress) {
                    return Ok(());
                }
                let unblocked = self.tracker.complete(&self.graph, result.sub_task_id)?;
                for id in unblocked {
                    self.publish(PlanEvent::SubTaskUnblocked { sub_task_id: id });
                }
            }
            WorkOutcome::Failure { reason } => {
                if self.tracker.state(result.sub_task_id) != Some(SubTaskState::InProgress) {
                    return Ok(());
                }
                self.tracker.fail(result.sub_task_id, reason.clone())?;
                self.publish(PlanEvent::SubTaskFailed {
                    sub_task_id: result.sub_task_id,
                    reason,
                });
            }
        }
        Ok(())
    }

    fn first_failed(&self, members: &[SubTaskId]) -> Option<SubTaskId> {
        members
            .iter()
            .copied()
            .find(|&id| self.tracker.state(id) == Some(SubTaskState::Failed))
    }

    /// A wave is settled when every member is Completed or Cancelled;
    /// Failed members hold it open until a recovery decision lands
    fn wave_settled(&self, members: &[SubTaskId]) -> bool {
        members.iter().all(|&id| {
            matches!(
                self.tracker.state(id),
                Some(SubTaskState::Completed) | Some(SubTaskState::Cancelled)
            )
        })
    }

    /// Propose recovery for a failed sub-task and apply the approved action
    async fn recover(
        &mut self,
        plan: &mut Plan,
        wave_idx: usize,
        failed: SubTaskId,
        dispatch: &dyn WorkerDispatch,
        registry: &dyn WorkerRegistry,
        approver: &dyn PlanApprover,
    ) -> Result<RecoveryOutcome, PlanError> {
        let reason = self
            .tracker
            .record(failed)
            .and_then(|r| r.last_failure.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let proposals =
            propose_recovery(&self.graph, &plan.assignments, registry, failed, &reason);
        self.publish(PlanEvent::ReplanProposed {
            sub_task_id: failed,
            actions: proposals
                .iter()
                .map(|p| format!("{:?}", p.action).to_lowercase())
                .collect(),
        });

        let Some(choice) = approver.choose_recovery(&proposals) else {
            return Ok(RecoveryOutcome::Declined);
        };
        let Some(proposal) = proposals.get(choice) else {
            // Out-of-range choice is ambiguous, treated as a decline
            return Ok(RecoveryOutcome::Declined);
        };

        match proposal.action {
            RecoveryAction::Retry => {
                self.tracker.reset_for_replan(failed)?;
                self.redispatch(plan, failed, dispatch).await?;
                self.publish(PlanEvent::ReplanApplied {
                    action: "retry".to_string(),
                    reworked: vec![failed],
                });
            }
            RecoveryAction::Reassign => {
                let previous = plan
                    .assignments
                    .assignment_for(failed)
                    .map(|a| a.worker_id.clone())
                    .unwrap_or_default();
                let sub_task = self
                    .graph
                    .sub_task(failed)
                    .ok_or(GraphError::UnknownSubTask { id: failed })?;
                let Some(rebound) = rebind_sub_task(sub_task, registry, &previous) else {
                    return Ok(RecoveryOutcome::Declined);
                };
                plan.assignments.rebind(rebound);
                self.tracker.reset_for_replan(failed)?;
                self.redispatch(plan, failed, dispatch).await?;
                self.publish(PlanEvent::ReplanApplied {
                    action: "reassign".to_string(),
                    reworked: vec![failed],
                });
            }
            RecoveryAction::Restructure => {
                let radius = blast_radius(&self.graph, failed);
                // Only the blast radius is re-planned; everything outside
                // keeps its recorded state
                for &id in &radius {
                    if self.tracker.state(id) != Some(SubTaskState::Cancelled) {
                        self.tracker.reset_for_replan(id)?;
                    }
                }
                plan.waves = splice_waves(&self.graph, &plan.waves, wave_idx, &radius)?;
                self.rebind_radius(plan, &radius, registry);
                self.publish(PlanEvent::ReplanApplied {
                    action: "restructure".to_string(),
                    reworked: radius.iter().copied().collect(),
                });
            }
        }
        Ok(RecoveryOutcome::Applied)
    }

    /// Re-run assignment resolution over the radius members of a spliced
    /// schedule and fold the new bindings into the plan
    fn rebind_radius(
        &self,
        plan: &mut Plan,
        radius: &BTreeSet<SubTaskId>,
        registry: &dyn WorkerRegistry,
    ) {
        let radius_waves: Vec<Wave> = plan
            .waves
            .iter()
            .map(|w| Wave {
                index: w.index,
                sub_tasks: w
                    .sub_tasks
                    .iter()
                    .copied()
                    .filter(|id| radius.contains(id))
                    .collect(),
            })
            .filter(|w| !w.sub_tasks.is_empty())
            .collect();
        let rebound = resolve_assignments(&self.graph, &radius_waves, registry);
        for assignment in rebound.assignments {
            plan.assignments.rebind(assignment);
        }
    }

    /// Re-start and re-dispatch a single sub-task after a recovery reset
    async fn redispatch(
        &mut self,
        plan: &Plan,
        id: SubTaskId,
        dispatch: &dyn WorkerDispatch,
    ) -> Result<(), PlanError> {
        let Some(assignment) = plan.assignments.assignment_for(id) else {
            return Ok(());
        };
        let Some(sub_task) = self.graph.sub_task(id) else {
            return Ok(());
        };
        let payload = sub_task.dispatch_payload();
        let worker_id = assignment.worker_id.clone();
        self.tracker.start(&self.graph, id)?;
        match dispatch.dispatch(id, &worker_id, payload).await {
            Ok(()) => self.publish(PlanEvent::SubTaskDispatched {
                sub_task_id: id,
                worker_id,
            }),
            Err(e) => {
                self.tracker.fail(id, e.to_string())?;
                self.publish(PlanEvent::SubTaskFailed {
                    sub_task_id: id,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Goal Change
    // ========================================================================

    /// Apply an external goal change: re-scope one sub-task's done-criteria
    /// and route the affected subgraph through an approved restructure
    ///
    /// The blast radius is partitioned against the done-criteria snapshot
    /// taken at approval: members whose criteria are unchanged keep their
    /// recorded state, the rest re-enter Pending once the restructure is
    /// approved. Returns whether the restructure was applied; a declined
    /// proposal leaves the re-scoped criteria in place but touches neither
    /// the plan nor any lifecycle state.
    pub fn signal_goal_change(
        &mut self,
        id: SubTaskId,
        new_criteria: &str,
        registry: &dyn WorkerRegistry,
        approver: &dyn PlanApprover,
    ) -> Result<bool, PlanError> {
        let mut plan = self.plan.take().ok_or(PlanError::NoPlan)?;
        let outcome = self.apply_goal_change(&mut plan, id, new_criteria, registry, approver);
        self.plan = Some(plan);
        outcome
    }

    fn apply_goal_change(
        &mut self,
        plan: &mut Plan,
        id: SubTaskId,
        new_criteria: &str,
        registry: &dyn WorkerRegistry,
        approver: &dyn PlanApprover,
    ) -> Result<bool, PlanError> {
        self.graph.update_done_criteria(id, new_criteria)?;

        let radius = blast_radius(&self.graph, id);
        let rework = needs_rework(&self.graph, &radius, id, &self.approved_criteria);
        let name = self
            .graph
            .sub_task(id)
            .map(|st| st.name.clone())
            .unwrap_or_else(|| format!("#{}", id));

        let proposals = vec![RecoveryProposal {
            action: RecoveryAction::Restructure,
            description: format!(
                "re-scoping '{}' requires rework of {} of the {} affected sub-task(s)",
                name,
                rework.len(),
                radius.len()
            ),
        }];
        self.publish(PlanEvent::ReplanProposed {
            sub_task_id: id,
            actions: vec!["restructure".to_string()],
        });
        if approver.choose_recovery(&proposals) != Some(0) {
            return Ok(false);
        }

        // Still-valid radius members keep their recorded state; only the
        // rework set re-enters Pending
        for &member in &rework {
            if self.tracker.state(member) != Some(SubTaskState::Cancelled) {
                self.tracker.reset_for_replan(member)?;
            }
        }

        // Nothing outside the radius depends on it, so the re-partitioned
        // radius goes after every surviving wave; a later run resumes past
        // waves that are already settled
        let last = plan.waves.len().saturating_sub(1);
        plan.waves = splice_waves(&self.graph, &plan.waves, last, &radius)?;
        self.rebind_radius(plan, &radius, registry);

        self.publish(PlanEvent::ReplanApplied {
            action: "restructure".to_string(),
            reworked: rework.iter().copied().collect(),
        });
        Ok(true)
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel the goal: every non-terminal sub-task becomes Cancelled and
    /// in-progress workers receive a best-effort stop signal
    pub async fn cancel(&mut self, dispatch: &dyn WorkerDispatch) {
        self.cancel_token.cancel();
        let plan = self.plan.take();
        self.finalize_cancel(plan.as_ref(), dispatch).await;
        self.plan = plan;
    }

    async fn finish_cancellation(&mut self, plan: &Plan, dispatch: &dyn WorkerDispatch) -> RunStatus {
        self.finalize_cancel(Some(plan), dispatch).await;
        RunStatus::Cancelled
    }

    async fn finalize_cancel(&mut self, plan: Option<&Plan>, dispatch: &dyn WorkerDispatch) {
        let in_progress = self.tracker.cancel_all();
        for &id in &in_progress {
            if let Some(worker) = plan
                .and_then(|p| p.assignments.assignment_for(id))
                .map(|a| a.worker_id.clone())
            {
                dispatch.cancel(id, &worker).await;
            }
        }
        let cancelled = self.tracker.ids_in_state(SubTaskState::Cancelled);
        self.publish(PlanEvent::GoalCancelled { cancelled });
    }
}

enum WaveOutcome {
    Settled,
    Paused { failed: Vec<SubTaskId> },
    Cancelled,
}

enum RecoveryOutcome {
    Applied,
    Declined,
}
