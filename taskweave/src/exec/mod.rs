//! Plan execution for one goal.
//!
//! - `lifecycle` - Per-sub-task state machine and transition rules
//! - `replan` - Blast-radius computation and recovery proposals
//! - `orchestrator` - Per-goal driver: approval gate, wave dispatch,
//!   result ingestion, cancellation

pub mod lifecycle;
pub mod orchestrator;
pub mod replan;
