use serde::{Deserialize, Serialize};

use crate::config::HammerConfig;

/// Run progress at checkpoint time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    pub timesteps: usize,
    pub updates: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_episode_reward: Option<f32>,
}

/// Top-level checkpoint metadata written to metadata.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub episode: usize,
    pub timestamp: u64,
    pub experiment: String,
    pub algorithm: String,
    pub metrics: CheckpointMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<HammerConfig>,
}

/// Learner state written to training_state.json: the dimensions the model
/// was built with, checked again on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HammerTrainingState {
    pub n_agents: usize,
    pub obs_dim: usize,
    pub action_dim: usize,
    pub is_discrete: bool,
    pub meslen: usize,
    pub shared_params: bool,
    pub dru: bool,
    pub actor_layer: Vec<usize>,
    pub critic_layer: Vec<usize>,
    pub update_count: usize,
}

impl HammerTrainingState {
    /// Describe the first field that differs from `expected`, ignoring
    /// progress counters and the DRU toggle (it adds no parameters).
    pub fn mismatch(&self, expected: &HammerTrainingState) -> Option<String> {
        macro_rules! check {
            ($field:ident) => {
                if self.$field != expected.$field {
                    return Some(format!(
                        "{} is {:?} in the checkpoint but {:?} in this run",
                        stringify!($field),
                        self.$field,
                        expected.$field
                    ));
                }
            };
        }
        check!(n_agents);
        check!(obs_dim);
        check!(action_dim);
        check!(is_discrete);
        check!(meslen);
        check!(shared_params);
        check!(actor_layer);
        check!(critic_layer);
        None
    }
}
