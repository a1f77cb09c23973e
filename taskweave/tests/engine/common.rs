//! Common test fixtures for engine tests

use std::collections::HashSet;
use std::sync::Mutex;

use taskweave::config::EffortWeights;
use taskweave::exec::orchestrator::{CancelToken, GoalOrchestrator};
use taskweave::plan::types::{Effort, ProposedSubTask, SubTaskId};
use taskweave_sdk::{
    async_trait, ApprovalDecision, ApprovalScope, AutonomyLevel, DispatchPayload, FixProposal,
    PlanApprover, PlanSummary, RecoveryAction, RecoveryProposal, SdkResult, StaticRegistry,
    WorkResult, WorkerDescriptor, WorkerDispatch,
};
use tokio::sync::mpsc;

pub fn proposal(name: &str, tag: &str) -> ProposedSubTask {
    ProposedSubTask::new(name, &format!("{} verified", name), Effort::Medium, tag)
}

pub fn worker(id: &str, tags: &[&str], load: u32) -> WorkerDescriptor {
    WorkerDescriptor {
        id: id.to_string(),
        domain_tags: tags.iter().map(|s| s.to_string()).collect(),
        autonomy_level: AutonomyLevel::Full,
        current_load: load,
    }
}

pub fn backend_roster() -> StaticRegistry {
    StaticRegistry::new(vec![
        worker("alice", &["backend"], 0),
        worker("bob", &["backend"], 0),
    ])
}

/// Scriptable approver covering plan approval, fix confirmation, and
/// recovery choice
pub struct TestApprover {
    pub approve: bool,
    pub release_waves: Option<Vec<usize>>,
    /// Confirm only this repair strategy; None confirms any when approving
    pub confirm_strategy: Option<&'static str>,
    /// Recovery action to pick; None declines recovery
    pub recovery: Option<RecoveryAction>,
}

impl TestApprover {
    pub fn approve_all() -> Self {
        Self {
            approve: true,
            release_waves: None,
            confirm_strategy: None,
            recovery: None,
        }
    }

    pub fn deny_all() -> Self {
        Self {
            approve: false,
            release_waves: None,
            confirm_strategy: None,
            recovery: None,
        }
    }

    pub fn with_recovery(action: RecoveryAction) -> Self {
        Self {
            recovery: Some(action),
            ..Self::approve_all()
        }
    }
}

impl PlanApprover for TestApprover {
    fn present_plan(&self, _plan: &PlanSummary) -> ApprovalDecision {
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
        if !self.approve {
            return false;
        }
        match self.confirm_strategy {
            Some(strategy) => fix.strategy == strategy,
            None => true,
        }
    }

    fn choose_recovery(&self, proposals: &[RecoveryProposal]) -> Option<usize> {
        let wanted = self.recovery?;
        proposals.iter().position(|p| p.action == wanted)
    }
}

/// Dispatch double that reports results straight back on the goal's
/// result channel; ids in `fail_once` fail their first attempt only
pub struct TestDispatch {
    results: mpsc::Sender<WorkResult>,
    fail_once: Mutex<HashSet<SubTaskId>>,
    cancel_after: Mutex<Option<(SubTaskId, CancelToken)>>,
    pub dispatched: Mutex<Vec<(SubTaskId, String)>>,
    pub cancelled: Mutex<Vec<SubTaskId>>,
}

impl TestDispatch {
    pub fn new(results: mpsc::Sender<WorkResult>) -> Self {
        Self {
            results,
            fail_once: Mutex::new(HashSet::new()),
            cancel_after: Mutex::new(None),
            dispatched: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_once(results: mpsc::Sender<WorkResult>, ids: &[SubTaskId]) -> Self {
        let dispatch = Self::new(results);
        dispatch
            .fail_once
            .lock()
            .unwrap()
            .extend(ids.iter().copied());
        dispatch
    }

    /// Fire the goal's cancel token right after dispatching `id`
    pub fn cancelling_after(
        results: mpsc::Sender<WorkResult>,
        id: SubTaskId,
        token: CancelToken,
    ) -> Self {
        let dispatch = Self::new(results);
        *dispatch.cancel_after.lock().unwrap() = Some((id, token));
        dispatch
    }

    pub fn dispatch_count(&self, id: SubTaskId) -> usize {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| *d == id)
            .count()
    }

    pub fn dispatch_position(&self, id: SubTaskId) -> Option<usize> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .position(|(d, _)| *d == id)
    }
}

#[async_trait]
impl WorkerDispatch for TestDispatch {
    async fn dispatch(
        &self,
        sub_task_id: u32,
        worker_id: &str,
        _payload: DispatchPayload,
    ) -> SdkResult<()> {
        self.dispatched
            .lock()
            .unwrap()
            .push((sub_task_id, worker_id.to_string()));
        let fail = self.fail_once.lock().unwrap().remove(&sub_task_id);
        let result = if fail {
            WorkResult::failure(sub_task_id, "injected failure")
        } else {
            WorkResult::success(sub_task_id)
        };
        self.results.send(result).await?;
        let cancel = self.cancel_after.lock().unwrap();
        if let Some((trigger, token)) = cancel.as_ref() {
            if *trigger == sub_task_id {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn cancel(&self, sub_task_id: u32, _worker_id: &str) {
        self.cancelled.lock().unwrap().push(sub_task_id);
    }
}

/// Build an approved diamond plan: A -> {B, C} -> D, all medium effort
pub fn approved_diamond(
    registry: &StaticRegistry,
    approver: &TestApprover,
) -> (GoalOrchestrator, [SubTaskId; 4]) {
    let mut orchestrator = GoalOrchestrator::new("ship the feature", EffortWeights::default());
    let ids = orchestrator
        .add_subtasks(vec![
            proposal("A", "backend"),
            proposal("B", "backend"),
            proposal("C", "backend"),
            proposal("D", "backend"),
        ])
        .unwrap();
    let (a, b, c, d) = (ids[0], ids[1], ids[2], ids[3]);
    orchestrator
        .commit_edges(vec![(a, b), (a, c), (b, d), (c, d)], approver)
        .unwrap();
    orchestrator.build_plan(registry).unwrap();
    assert!(orchestrator.present_for_approval(approver).unwrap());
    (orchestrator, [a, b, c, d])
}
