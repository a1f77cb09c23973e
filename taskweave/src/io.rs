//! File loading and saving for the goal-planner CLI.
//!
//! Decomposition and worker roster files are YAML; saved plans are YAML as
//! well so they diff cleanly in review.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use taskweave_sdk::StaticRegistry;

use crate::plan::graph::TaskGraph;
use crate::plan::types::{Plan, ProposedSubTask, SubTaskId};

/// Decomposition file: proposed sub-tasks plus explicit dependency edges
///
/// Edges reference sub-tasks by name since ids are assigned at graph
/// insertion. Artifact-derived edges are added on top of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionFile {
    pub goal: String,
    pub sub_tasks: Vec<ProposedSubTask>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// One explicit dependency: `from` must complete before `to` starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
}

/// Load a decomposition YAML file
pub fn load_decomposition(path: &Path) -> Result<DecompositionFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read decomposition file {}", path.display()))?;
    let file: DecompositionFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse decomposition file {}", path.display()))?;
    if file.sub_tasks.is_empty() {
        anyhow::bail!("Decomposition file {} contains no sub-tasks", path.display());
    }
    Ok(file)
}

/// Load a worker roster YAML file into a static registry
pub fn load_roster(path: &Path) -> Result<StaticRegistry> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read worker roster {}", path.display()))?;
    StaticRegistry::from_yaml(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse worker roster {}: {}", path.display(), e))
}

/// Resolve name-based edge definitions to graph ids
///
/// Names must be unique within the decomposition for edges to be
/// unambiguous; duplicates and unknown names are errors.
pub fn resolve_edges(graph: &TaskGraph, edges: &[EdgeDef]) -> Result<Vec<(SubTaskId, SubTaskId)>> {
    let lookup = |name: &str| -> Result<SubTaskId> {
        let mut matches = graph.sub_tasks().filter(|st| st.name == name);
        let found = matches
            .next()
            .with_context(|| format!("Edge references unknown sub-task '{}'", name))?;
        if matches.next().is_some() {
            anyhow::bail!("Edge reference '{}' is ambiguous: duplicate sub-task name", name);
        }
        Ok(found.id)
    };

    edges
        .iter()
        .map(|edge| Ok((lookup(&edge.from)?, lookup(&edge.to)?)))
        .collect()
}

/// Save an approved or presented plan as YAML
pub fn save_plan(path: &Path, plan: &Plan) -> Result<()> {
    let yaml = serde_yaml::to_string(plan).context("Failed to serialize plan")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write plan to {}", path.display()))?;
    Ok(())
}
