use crate::env::{Action, Observation};

/// Trajectory buffers for one agent.
///
/// `states`, `actions`, `messages` and `logprobs` grow on every `act`;
/// `rewards` and `is_terminals` on every `record`. `message_log` holds the
/// messages received during the current episode and is only cleared by
/// [`AgentMemory::clear_messages`].
#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    pub states: Vec<Observation>,
    pub actions: Vec<Action>,
    pub messages: Vec<Vec<f32>>,
    pub logprobs: Vec<f32>,
    pub rewards: Vec<f32>,
    pub is_terminals: Vec<bool>,
    pub message_log: Vec<Vec<f32>>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded transitions.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop the trajectory. The message log survives.
    pub fn clear_memory(&mut self) {
        self.states.clear();
        self.actions.clear();
        self.messages.clear();
        self.logprobs.clear();
        self.rewards.clear();
        self.is_terminals.clear();
    }

    pub fn clear_messages(&mut self) {
        self.message_log.clear();
    }

    /// Mean of each message dimension over the message log. All zeros when
    /// the log is empty.
    pub fn message_feature_means(&self, meslen: usize) -> Vec<f32> {
        let mut means = vec![0.0f32; meslen];
        if self.message_log.is_empty() {
            return means;
        }
        for message in &self.message_log {
            for (sum, &m) in means.iter_mut().zip(message) {
                *sum += m;
            }
        }
        let count = self.message_log.len() as f32;
        for m in &mut means {
            *m /= count;
        }
        means
    }

    /// Discounted returns, restarting the sum at every terminal step.
    pub fn discounted_returns(&self, gamma: f32) -> Vec<f32> {
        let mut returns = vec![0.0f32; self.rewards.len()];
        let mut running = 0.0f32;
        for i in (0..self.rewards.len()).rev() {
            if self.is_terminals[i] {
                running = 0.0;
            }
            running = self.rewards[i] + gamma * running;
            returns[i] = running;
        }
        returns
    }
}

/// Buffers shared by all agents: the joint observation the messenger saw and
/// the DRU noise drawn for it.
#[derive(Debug, Clone, Default)]
pub struct GlobalMemory {
    pub states: Vec<Vec<f32>>,
    pub dru_noise: Vec<Vec<f32>>,
}

impl GlobalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear_memory(&mut self) {
        self.states.clear();
        self.dru_noise.clear();
    }
}

/// Shift to zero mean and unit variance. Slices shorter than two entries are
/// only centred.
pub fn normalize(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    let std = if values.len() > 1 { var.sqrt() + 1e-5 } else { 1.0 };
    for v in values.iter_mut() {
        *v = (*v - mean) / std;
    }
}
