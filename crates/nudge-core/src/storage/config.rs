//! TOML-based engine configuration.
//!
//! Tunable parameters of the suggestion engine:
//! - the lead-time candidate set
//! - the suggestion score threshold
//! - the UCB exploration coefficient
//! - the A* search node budget
//!
//! Configuration is stored at `~/.nudge/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::error::CoreError;

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.nudge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Candidate notification lead times, in minutes before the moment.
    #[serde(default = "default_lead_times")]
    pub lead_times: Vec<u32>,
    /// Candidates below this suggestion score are dropped.
    #[serde(default = "default_suggestion_threshold")]
    pub suggestion_threshold: f64,
    /// Weight on the uncertainty term of the UCB score.
    #[serde(default = "default_exploration_coefficient")]
    pub exploration_coefficient: f64,
    /// Node budget for the A* schedule search.
    #[serde(default = "default_max_search_nodes")]
    pub max_search_nodes: u64,
}

fn default_lead_times() -> Vec<u32> {
    vec![10, 15, 30, 60]
}

fn default_suggestion_threshold() -> f64 {
    0.60
}

fn default_exploration_coefficient() -> f64 {
    0.5
}

fn default_max_search_nodes() -> u64 {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lead_times: default_lead_times(),
            suggestion_threshold: default_suggestion_threshold(),
            exploration_coefficient: default_exploration_coefficient(),
            max_search_nodes: default_max_search_nodes(),
        }
    }
}

impl EngineConfig {
    /// Path to the config file.
    pub fn path() -> PathBuf {
        data_dir().join("config.toml")
    }

    /// Load the config, falling back to defaults if the file doesn't exist.
    pub fn load() -> Result<Self, CoreError> {
        let path = Self::path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Save the config to disk.
    pub fn save(&self) -> Result<(), CoreError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(Self::path(), content)?;
        Ok(())
    }

    /// Lead times sorted ascending with duplicates removed.
    pub fn normalized_lead_times(&self) -> Vec<u32> {
        let mut times = self.lead_times.clone();
        times.sort_unstable();
        times.dedup();
        times
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.lead_times, vec![10, 15, 30, 60]);
        assert_eq!(config.suggestion_threshold, 0.60);
        assert_eq!(config.exploration_coefficient, 0.5);
        assert_eq!(config.max_search_nodes, 10_000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("suggestion_threshold = 0.7").unwrap();
        assert_eq!(config.suggestion_threshold, 0.7);
        assert_eq!(config.lead_times, vec![10, 15, 30, 60]);
    }

    #[test]
    fn test_normalized_lead_times() {
        let config = EngineConfig {
            lead_times: vec![60, 10, 30, 10, 15],
            ..Default::default()
        };
        assert_eq!(config.normalized_lead_times(), vec![10, 15, 30, 60]);
    }
}
