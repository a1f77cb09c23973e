//! Effort-weight configuration for critical-path computation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::plan::types::Effort;

/// Numeric scale mapping estimated effort to critical-path node weight
///
/// The defaults (small=1, medium=3, large=8) are a working convention, not
/// doctrine; load alternative scales from YAML with [`EffortWeights::load`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffortWeights {
    pub small: u32,
    pub medium: u32,
    pub large: u32,
}

impl Default for EffortWeights {
    fn default() -> Self {
        Self {
            small: 1,
            medium: 3,
            large: 8,
        }
    }
}

impl EffortWeights {
    /// Load weights from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read effort weights from {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse effort weights from {}", path.display()))
    }

    /// Node weight for a sub-task's estimated effort
    pub fn weight(&self, effort: Effort) -> u32 {
        match effort {
            Effort::Small => self.small,
            Effort::Medium => self.medium,
            Effort::Large => self.large,
        }
    }
}
