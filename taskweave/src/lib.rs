// Plan construction: graph store, cycle repair, wave planning, assignment
pub mod plan;

// Execution: lifecycle tracking, replanning, per-goal orchestration
pub mod exec;

// Effort-weight configuration
pub mod config;

// YAML load/save helpers for decomposition input and plan output
pub mod io;

// CLI argument definitions for the goal-planner binary
pub mod cli;
