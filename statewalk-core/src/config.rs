use serde::{Deserialize, Serialize};

/// Thresholds for deciding when a subtree of the page classification
/// tree is collapsed into a single abstract page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub min_leaves: f64,
    pub key_len_factor: f64,
    pub max_subtree_depth: usize,
    pub min_level: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_leaves: 15.0,
            key_len_factor: 7.0,
            max_subtree_depth: 6,
            min_level: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cluster: ClusterConfig,
    /// Observations the page count may stay flat before random walks stop.
    pub patience: usize,
    pub max_observations: usize,
    pub max_restarts: usize,
    pub seed: u64,
    /// Bonus for POST requests when scoring state split candidates.
    pub post_weight: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            patience: 5,
            max_observations: 500,
            max_restarts: 3,
            seed: 1,
            post_weight: 0.5,
        }
    }
}

impl EngineConfig {
    pub fn with_max_observations(mut self, max: usize) -> Self {
        self.max_observations = max;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_max_restarts(mut self, restarts: usize) -> Self {
        self.max_restarts = restarts;
        self
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
