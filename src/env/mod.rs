//! Multi-agent environments: the parallel reset/step interface consumed by the
//! driver, action spaces, and the two built-in tasks (cooperative navigation
//! and multi-walker locomotion).

mod navigation;
mod walker;

use std::fmt;
use std::str::FromStr;

use crate::error::EnvError;

pub use navigation::CooperativeNavigation;
pub use walker::MultiWalker;

/// One agent's observation vector.
pub type Observation = Vec<f32>;

/// An action for a single agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Discrete(usize),
    Continuous(Vec<f32>),
}

impl Action {
    /// Flatten into the row written to data dumps (a discrete action becomes a
    /// single column holding its index).
    pub fn to_row(&self) -> Vec<f32> {
        match self {
            Action::Discrete(a) => vec![*a as f32],
            Action::Continuous(v) => v.clone(),
        }
    }
}

/// Per-agent action specification.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpace {
    /// `n` categories.
    Discrete { n: usize },
    /// Box with per-dimension bounds.
    Continuous { low: Vec<f32>, high: Vec<f32> },
}

impl ActionSpace {
    /// Number of logits (discrete) or action dimensions (continuous).
    pub fn dim(&self) -> usize {
        match self {
            ActionSpace::Discrete { n } => *n,
            ActionSpace::Continuous { low, .. } => low.len(),
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, ActionSpace::Discrete { .. })
    }

    /// Project an action into the space. Discrete actions are returned as-is.
    pub fn clamp(&self, action: &Action) -> Action {
        match (self, action) {
            (ActionSpace::Continuous { low, high }, Action::Continuous(v)) => Action::Continuous(
                v.iter()
                    .zip(low.iter().zip(high))
                    .map(|(&x, (&lo, &hi))| x.clamp(lo, hi))
                    .collect(),
            ),
            _ => action.clone(),
        }
    }

    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (ActionSpace::Discrete { n }, Action::Discrete(a)) => a < n,
            (ActionSpace::Continuous { low, high }, Action::Continuous(v)) => {
                v.len() == low.len()
                    && v
                        .iter()
                        .zip(low.iter().zip(high))
                        .all(|(&x, (&lo, &hi))| x >= lo && x <= hi)
            }
            _ => false,
        }
    }
}

/// Extra per-step information. The driver ignores it.
#[derive(Debug, Clone, Default)]
pub struct StepInfo {
    pub cycle: usize,
    /// True when the episode ended because of the cycle cap.
    pub truncated: bool,
}

/// Result of stepping all agents at once.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub observations: Vec<Observation>,
    pub rewards: Vec<f32>,
    pub terminals: Vec<bool>,
    pub info: StepInfo,
}

impl StepResult {
    pub fn all_terminal(&self) -> bool {
        self.terminals.iter().all(|&t| t)
    }
}

/// Parallel multi-agent environment: every agent acts on every step.
pub trait MultiAgentEnv {
    /// Agent names in observation/action order.
    fn agents(&self) -> &[String];

    /// Length of each agent's observation vector.
    fn observation_dim(&self) -> usize;

    /// Action space shared by every agent.
    fn action_space(&self) -> &ActionSpace;

    /// Reseed the environment's random source.
    fn seed(&mut self, seed: u64);

    /// Start a new episode and return the first observations.
    fn reset(&mut self) -> Vec<Observation>;

    /// Apply one action per agent.
    fn step(&mut self, actions: &[Action]) -> Result<StepResult, EnvError>;

    fn num_agents(&self) -> usize {
        self.agents().len()
    }
}

/// Which built-in environment to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    /// Cooperative navigation (`cn`), discrete actions.
    CooperativeNavigation,
    /// Multi-walker locomotion (`mw`), bounded continuous actions.
    MultiWalker,
}

impl EnvKind {
    pub fn short_name(self) -> &'static str {
        match self {
            EnvKind::CooperativeNavigation => "cn",
            EnvKind::MultiWalker => "mw",
        }
    }

    /// Episode cap used when `--maxcycles` is not given.
    pub fn default_max_cycles(self) -> usize {
        match self {
            EnvKind::CooperativeNavigation => 25,
            EnvKind::MultiWalker => 500,
        }
    }

    /// Build the environment for `n_agents` with an episode cap of `max_cycles`.
    pub fn make(
        self,
        n_agents: usize,
        max_cycles: usize,
    ) -> Result<Box<dyn MultiAgentEnv>, EnvError> {
        Ok(match self {
            EnvKind::CooperativeNavigation => {
                Box::new(CooperativeNavigation::new(n_agents, max_cycles)?)
            }
            EnvKind::MultiWalker => Box::new(MultiWalker::new(n_agents, max_cycles)?),
        })
    }
}

impl FromStr for EnvKind {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cn" => Ok(EnvKind::CooperativeNavigation),
            "mw" => Ok(EnvKind::MultiWalker),
            other => Err(EnvError::UnknownEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

fn check_action_count(expected: usize, actions: &[Action]) -> Result<(), EnvError> {
    if actions.len() != expected {
        return Err(EnvError::ActionCount {
            expected,
            got: actions.len(),
        });
    }
    Ok(())
}
