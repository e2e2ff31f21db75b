//! Learners: the interface the driver trains and evaluates through, the
//! trajectory memories they own, and the HAMMER implementation (a central
//! messenger feeding messages to independent PPO actor-critics).

pub mod dru;
mod hammer;
mod memory;
mod networks;

use std::path::Path;

use crate::config::HammerConfig;
use crate::env::{Action, Observation};
use crate::error::LearnerError;

pub use hammer::{HammerLearner, HammerSpec};
pub use memory::{normalize, AgentMemory, GlobalMemory};
pub use networks::{HammerModel, ModelDims};

/// What one `act` call produced, one entry per agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ActOutput {
    pub actions: Vec<Action>,
    pub messages: Vec<Vec<f32>>,
}

/// Metrics returned from an optimization pass.
#[derive(Debug, Clone, Default)]
pub struct UpdateMetrics {
    /// Total loss of the last epoch, summed over agents.
    pub loss: f32,
    /// Mean policy entropy of the last epoch, averaged over agents.
    pub policy_entropy: f32,
    pub epochs: usize,
}

/// Identification written into checkpoint metadata.
#[derive(Debug, Clone)]
pub struct LearnerSummary {
    pub algorithm: String,
    pub update_count: usize,
    pub hyperparameters: Option<HammerConfig>,
}

/// Interface between the driver and a multi-agent learner.
pub trait Learner {
    /// Sample one action and one message per agent, appending the step to
    /// the owned memories.
    fn act(&mut self, observations: &[Observation]) -> Result<ActOutput, LearnerError>;

    /// Attach the outcome of the latest `act` to each agent's memory.
    fn record(&mut self, rewards: &[f32], terminals: &[bool]);

    /// One optimization pass over everything in memory. Does not clear it.
    fn update(&mut self) -> Result<UpdateMetrics, LearnerError>;

    fn memory(&self) -> &[AgentMemory];

    fn memory_mut(&mut self) -> &mut [AgentMemory];

    fn global_memory_mut(&mut self) -> &mut GlobalMemory;

    /// Training uses the noisy DRU; evaluation the hard threshold.
    fn set_training(&mut self, training: bool);

    /// Write the learnable state into `dir`.
    fn save(&self, dir: &Path) -> Result<(), LearnerError>;

    /// Restore state written by `save`, rejecting checkpoints built for
    /// different dimensions.
    fn load(&mut self, dir: &Path) -> Result<(), LearnerError>;

    fn checkpoint_summary(&self) -> LearnerSummary;
}
