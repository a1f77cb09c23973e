//! Plan construction for one goal.
//!
//! Turns a proposed sub-task list from an external decomposition strategy
//! into an approved, dependency-respecting execution plan:
//!
//! - `types` - Data structures for sub-tasks, waves, assignments, and plans
//! - `graph` - Graph store with transactional edge commits and cycle detection
//! - `cycle` - Repair proposals for detected dependency cycles
//! - `waves` - Topological partition into waves plus critical path
//! - `assign` - Worker matching against the external registry

pub mod assign;
pub mod cycle;
pub mod graph;
pub mod types;
pub mod waves;
