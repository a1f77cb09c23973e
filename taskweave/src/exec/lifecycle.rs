//! Per-sub-task lifecycle state machine.
//!
//! Stored states are `Pending`, `InProgress`, `Completed`, `Failed`, and
//! `Cancelled`. `Blocked` is derived on read whenever a pending sub-task
//! still has incomplete predecessors; it is never written. `Failed` may
//! re-enter `Pending` only through replanning, never directly.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::graph::TaskGraph;
use crate::plan::types::SubTaskId;

/// Stored lifecycle state of one sub-task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl SubTaskState {
    /// Terminal states accept no further transitions except the
    /// replanner's Failed -> Pending reset
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubTaskState::Completed | SubTaskState::Failed | SubTaskState::Cancelled
        )
    }
}

impl fmt::Display for SubTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubTaskState::Pending => "PENDING",
            SubTaskState::InProgress => "IN_PROGRESS",
            SubTaskState::Completed => "COMPLETED",
            SubTaskState::Failed => "FAILED",
            SubTaskState::Cancelled => "CANCELLED",
        };
        write!(f, "{}", name)
    }
}

/// State as observed externally, with `Blocked` derived from predecessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveState {
    Pending,
    Blocked,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Stored state plus the timestamp of the last transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: SubTaskState,
    pub changed_at: DateTime<Utc>,
    /// Reason reported with the most recent failure, kept across a
    /// replanning reset so recovery stays visible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("sub-task {id} is not tracked by this goal")]
    Untracked { id: SubTaskId },

    #[error("sub-task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SubTaskId,
        from: SubTaskState,
        to: SubTaskState,
    },

    #[error("sub-task {id} cannot start while predecessor {blocking} is incomplete")]
    PredecessorIncomplete { id: SubTaskId, blocking: SubTaskId },
}

/// Exclusive owner of execution state for one goal's sub-tasks
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    records: BTreeMap<SubTaskId, StateRecord>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a sub-task at `Pending`; re-tracking an id resets it
    pub fn track(&mut self, id: SubTaskId) {
        self.records.insert(
            id,
            StateRecord {
                state: SubTaskState::Pending,
                changed_at: Utc::now(),
                last_failure: None,
            },
        );
    }

    pub fn track_all<I: IntoIterator<Item = SubTaskId>>(&mut self, ids: I) {
        for id in ids {
            self.track(id);
        }
    }

    pub fn state(&self, id: SubTaskId) -> Option<SubTaskState> {
        self.records.get(&id).map(|r| r.state)
    }

    pub fn record(&self, id: SubTaskId) -> Option<&StateRecord> {
        self.records.get(&id)
    }

    /// Derive the externally observable state: a pending sub-task with any
    /// incomplete predecessor reads as `Blocked`
    pub fn effective_state(&self, graph: &TaskGraph, id: SubTaskId) -> Option<EffectiveState> {
        let stored = self.state(id)?;
        Some(match stored {
            SubTaskState::Pending => {
                if self.predecessors_complete(graph, id) {
                    EffectiveState::Pending
                } else {
                    EffectiveState::Blocked
                }
            }
            SubTaskState::InProgress => EffectiveState::InProgress,
            SubTaskState::Completed => EffectiveState::Completed,
            SubTaskState::Failed => EffectiveState::Failed,
            SubTaskState::Cancelled => EffectiveState::Cancelled,
        })
    }

    pub fn predecessors_complete(&self, graph: &TaskGraph, id: SubTaskId) -> bool {
        graph
            .predecessors_of(id)
            .into_iter()
            .all(|p| self.state(p) == Some(SubTaskState::Completed))
    }

    /// Pending -> InProgress; the approval gate is the caller's
    /// responsibility, predecessor completion is enforced here
    pub fn start(&mut self, graph: &TaskGraph, id: SubTaskId) -> Result<(), ExecError> {
        self.expect_state(id, SubTaskState::Pending, SubTaskState::InProgress)?;
        if let Some(blocking) = graph
            .predecessors_of(id)
            .into_iter()
            .find(|&p| self.state(p) != Some(SubTaskState::Completed))
        {
            return Err(ExecError::PredecessorIncomplete { id, blocking });
        }
        self.transition(id, SubTaskState::InProgress);
        Ok(())
    }

    /// InProgress -> Completed; returns dependents that became ready,
    /// for `SubTaskUnblocked` reporting
    pub fn complete(
        &mut self,
        graph: &TaskGraph,
        id: SubTaskId,
    ) -> Result<Vec<SubTaskId>, ExecError> {
        self.expect_state(id, SubTaskState::InProgress, SubTaskState::Completed)?;
        self.transition(id, SubTaskState::Completed);

        let unblocked = graph
            .successors_of(id)
            .into_iter()
            .filter(|&s| {
                self.state(s) == Some(SubTaskState::Pending)
                    && self.predecessors_complete(graph, s)
            })
            .collect();
        Ok(unblocked)
    }

    /// InProgress -> Failed; downstream sub-tasks are NOT failed here,
    /// control passes to the replanning controller
    pub fn fail(&mut self, id: SubTaskId, reason: impl Into<String>) -> Result<(), ExecError> {
        self.expect_state(id, SubTaskState::InProgress, SubTaskState::Failed)?;
        self.transition(id, SubTaskState::Failed);
        if let Some(record) = self.records.get_mut(&id) {
            record.last_failure = Some(reason.into());
        }
        Ok(())
    }

    /// Replanning-only reset back to Pending
    ///
    /// Accepts Failed sub-tasks and any non-terminal state swept up in a
    /// restructured blast radius; Completed and Cancelled stay put unless
    /// the replanner explicitly marked them for rework.
    pub fn reset_for_replan(&mut self, id: SubTaskId) -> Result<(), ExecError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(ExecError::Untracked { id })?;
        if record.state == SubTaskState::Cancelled {
            return Err(ExecError::InvalidTransition {
                id,
                from: record.state,
                to: SubTaskState::Pending,
            });
        }
        record.state = SubTaskState::Pending;
        record.changed_at = Utc::now();
        Ok(())
    }

    /// Cancel every non-terminal sub-task; returns the ids that were
    /// InProgress so the caller can signal their workers
    pub fn cancel_all(&mut self) -> Vec<SubTaskId> {
        let now = Utc::now();
        let mut was_in_progress = Vec::new();
        for (&id, record) in self.records.iter_mut() {
            if record.state.is_terminal() {
                continue;
            }
            if record.state == SubTaskState::InProgress {
                was_in_progress.push(id);
            }
            record.state = SubTaskState::Cancelled;
            record.changed_at = now;
        }
        was_in_progress
    }

    /// True when every listed sub-task is in a terminal state
    pub fn all_terminal(&self, ids: &[SubTaskId]) -> bool {
        ids.iter()
            .all(|&id| self.state(id).map(|s| s.is_terminal()).unwrap_or(false))
    }

    pub fn ids_in_state(&self, state: SubTaskState) -> Vec<SubTaskId> {
        self.records
            .iter()
            .filter(|(_, r)| r.state == state)
            .map(|(&id, _)| id)
            .collect()
    }

    fn expect_state(
        &self,
        id: SubTaskId,
        expected: SubTaskState,
        to: SubTaskState,
    ) -> Result<(), ExecError> {
        let current = self.state(id).ok_or(ExecError::Untracked { id })?;
        if current != expected {
            return Err(ExecError::InvalidTransition {
                id,
                from: current,
                to,
            });
        }
        Ok(())
    }

    fn transition(&mut self, id: SubTaskId, state: SubTaskState) {
        if let Some(record) = self.records.get_mut(&id) {
            record.state = state;
            record.changed_at = Utc::now();
        }
    }
}
