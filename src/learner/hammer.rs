use std::fs;
use std::path::Path;

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::DefaultRecorder;
use burn::tensor::activation::{log_softmax, softmax};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::dru::Dru;
use super::memory::{normalize, AgentMemory, GlobalMemory};
use super::networks::{HammerModel, ModelDims};
use super::{ActOutput, Learner, LearnerSummary, UpdateMetrics};
use crate::checkpoint::HammerTrainingState;
use crate::config::HammerConfig;
use crate::env::{Action, ActionSpace, Observation};
use crate::error::{CheckpointError, LearnerError};

type InferBackend = NdArray<f32>;
type TrainBackend = Autodiff<InferBackend>;
type HammerOptimizer = OptimizerAdaptor<Adam, HammerModel<TrainBackend>, TrainBackend>;

const MODEL_FILE: &str = "hammer_model";
const TRAINING_STATE_FILE: &str = "training_state.json";
const LN_2PI: f32 = 1.837_877;

/// Environment-derived dimensions and run switches for a [`HammerLearner`].
#[derive(Debug, Clone)]
pub struct HammerSpec {
    pub n_agents: usize,
    pub obs_dim: usize,
    pub action_space: ActionSpace,
    pub meslen: usize,
    pub shared_params: bool,
    pub dru: bool,
    /// `None` draws from OS entropy.
    pub seed: Option<u64>,
}

/// Per-agent tensors for one optimization pass, fixed across epochs.
struct AgentBatch {
    states: Vec<f32>,
    /// One-hot rows (discrete) or the sampled actions (continuous).
    actions: Vec<f32>,
    logprobs: Vec<f32>,
    returns: Vec<f32>,
}

/// HAMMER: a central messenger reads the joint observation and sends each
/// agent a short message; every agent acts with a PPO actor-critic over its
/// own observation plus its message. The messenger is trained through the
/// agents' losses.
pub struct HammerLearner {
    model: HammerModel<TrainBackend>,
    optimizer: HammerOptimizer,
    config: HammerConfig,
    dims: ModelDims,
    action_space: ActionSpace,
    dru: Dru,
    training: bool,
    memories: Vec<AgentMemory>,
    global: GlobalMemory,
    device: <TrainBackend as Backend>::Device,
    update_count: usize,
    rng: StdRng,
}

impl HammerLearner {
    pub fn new(config: HammerConfig, spec: HammerSpec) -> Self {
        let device = Default::default();
        let mut rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let dims = ModelDims {
            n_agents: spec.n_agents,
            obs_dim: spec.obs_dim,
            action_dim: spec.action_space.dim(),
            meslen: spec.meslen,
            actor_layer: config.actor_layer.widths(),
            critic_layer: config.critic_layer.widths(),
            shared_params: spec.shared_params,
        };
        let model: HammerModel<TrainBackend> = HammerModel::new(&dims, &mut rng, &device);
        let optimizer = Self::build_optimizer(&config);

        HammerLearner {
            model,
            optimizer,
            dru: Dru::new(spec.dru, config.dru_sigma),
            config,
            dims,
            action_space: spec.action_space,
            training: true,
            memories: vec![AgentMemory::new(); spec.n_agents],
            global: GlobalMemory::new(),
            device,
            update_count: 0,
            rng,
        }
    }

    fn build_optimizer(config: &HammerConfig) -> HammerOptimizer {
        let (beta_1, beta_2) = config.betas;
        AdamConfig::new()
            .with_beta_1(beta_1)
            .with_beta_2(beta_2)
            .init()
    }

    /// Reseed action sampling and DRU noise.
    #[cfg(test)]
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Number of actor-critics actually built (1 when shared).
    pub fn num_policies(&self) -> usize {
        self.model.num_policies()
    }

    pub fn update_count(&self) -> usize {
        self.update_count
    }

    #[cfg(test)]
    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn training_state(&self) -> HammerTrainingState {
        HammerTrainingState {
            n_agents: self.dims.n_agents,
            obs_dim: self.dims.obs_dim,
            action_dim: self.dims.action_dim,
            is_discrete: self.action_space.is_discrete(),
            meslen: self.dims.meslen,
            shared_params: self.dims.shared_params,
            dru: self.dru.enabled,
            actor_layer: self.dims.actor_layer.clone(),
            critic_layer: self.dims.critic_layer.clone(),
            update_count: self.update_count,
        }
    }

    fn check_observations(&self, observations: &[Observation]) -> Result<(), LearnerError> {
        if observations.len() != self.dims.n_agents {
            return Err(LearnerError::ObservationCount {
                expected: self.dims.n_agents,
                got: observations.len(),
            });
        }
        for (agent, obs) in observations.iter().enumerate() {
            if obs.len() != self.dims.obs_dim {
                return Err(LearnerError::ObservationDim {
                    agent,
                    expected: self.dims.obs_dim,
                    got: obs.len(),
                });
            }
        }
        Ok(())
    }

    /// Sample from the policy head output. Returns the action and its
    /// log-probability.
    fn sample_action(&mut self, head: &[f32]) -> (Action, f32) {
        match &self.action_space {
            ActionSpace::Discrete { .. } => {
                let log_probs = log_softmax_vec(head);
                let probs: Vec<f32> = log_probs.iter().map(|lp| lp.exp()).collect();
                let action = sample_categorical(&probs, &mut self.rng);
                (Action::Discrete(action), log_probs[action])
            }
            ActionSpace::Continuous { .. } => {
                let std = self.config.action_std;
                let mut logprob = 0.0f32;
                let action = head
                    .iter()
                    .map(|&h| {
                        let mean = h.tanh();
                        let a = mean + std * self.rng.sample::<f32, _>(StandardNormal);
                        logprob += gaussian_log_prob(a, mean, std);
                        a
                    })
                    .collect();
                (Action::Continuous(action), logprob)
            }
        }
    }

    fn agent_batches(&self, steps: usize) -> Result<Vec<AgentBatch>, LearnerError> {
        let action_dim = self.dims.action_dim;
        let mut batches = Vec::with_capacity(self.memories.len());
        for (agent, memory) in self.memories.iter().enumerate() {
            if memory.len() != steps || memory.rewards.len() != steps {
                return Err(LearnerError::IncompleteTrajectory {
                    agent,
                    states: memory.len(),
                    rewards: memory.rewards.len(),
                });
            }
            let mut returns = memory.discounted_returns(self.config.gamma);
            normalize(&mut returns);

            let mut actions = vec![0.0f32; steps * action_dim];
            for (t, action) in memory.actions.iter().enumerate() {
                match action {
                    Action::Discrete(a) => actions[t * action_dim + a] = 1.0,
                    Action::Continuous(v) => {
                        actions[t * action_dim..(t + 1) * action_dim].copy_from_slice(v)
                    }
                }
            }

            batches.push(AgentBatch {
                states: memory.states.concat(),
                actions,
                logprobs: memory.logprobs.clone(),
                returns,
            });
        }
        Ok(batches)
    }

    /// Log-probabilities of the taken actions and per-step entropy.
    fn evaluate(
        &self,
        head: Tensor<TrainBackend, 2>,
        actions: &[f32],
        steps: usize,
    ) -> (Tensor<TrainBackend, 1>, Tensor<TrainBackend, 1>) {
        let action_dim = self.dims.action_dim;
        let actions = Tensor::<TrainBackend, 2>::from_data(
            TensorData::new(actions.to_vec(), [steps, action_dim]),
            &self.device,
        );
        if self.action_space.is_discrete() {
            let log_probs = log_softmax(head.clone(), 1);
            let selected = (log_probs.clone() * actions).sum_dim(1).reshape([steps]);
            let entropy = -(softmax(head, 1) * log_probs).sum_dim(1).reshape([steps]);
            (selected, entropy)
        } else {
            let std = self.config.action_std;
            let diff = actions - head.tanh();
            let log_probs = (diff.clone() * diff)
                .div_scalar(-2.0 * std * std)
                .sub_scalar(std.ln() + 0.5 * LN_2PI)
                .sum_dim(1)
                .reshape([steps]);
            let entropy = Tensor::<TrainBackend, 1>::full(
                [steps],
                action_dim as f32 * (0.5 + 0.5 * LN_2PI + std.ln()),
                &self.device,
            );
            (log_probs, entropy)
        }
    }
}

impl Learner for HammerLearner {
    fn act(&mut self, observations: &[Observation]) -> Result<ActOutput, LearnerError> {
        self.check_observations(observations)?;
        let (n, obs_dim, meslen) = (self.dims.n_agents, self.dims.obs_dim, self.dims.meslen);

        let model = self.model.valid();
        let joint = observations.concat();
        let joint_tensor = Tensor::<InferBackend, 2>::from_data(
            TensorData::new(joint.clone(), [1, n * obs_dim]),
            &self.device,
        );
        let raw = tensor_to_vec(model.messages(joint_tensor))?;
        let noise = self.dru.sample_noise(n * meslen, self.training, &mut self.rng);
        let channel = self.dru.apply(&raw, &noise, self.training);

        let mut actions = Vec::with_capacity(n);
        let mut messages = Vec::with_capacity(n);
        for (i, obs) in observations.iter().enumerate() {
            let message = channel[i * meslen..(i + 1) * meslen].to_vec();
            let mut input = obs.clone();
            input.extend_from_slice(&message);
            let input = Tensor::<InferBackend, 2>::from_data(
                TensorData::new(input, [1, obs_dim + meslen]),
                &self.device,
            );
            let (head, _value) = model.policy(self.dims.policy_index(i)).forward(input);
            let (action, logprob) = self.sample_action(&tensor_to_vec(head)?);

            let memory = &mut self.memories[i];
            memory.states.push(obs.clone());
            memory.actions.push(action.clone());
            memory.messages.push(message.clone());
            memory.logprobs.push(logprob);
            memory.message_log.push(message.clone());

            actions.push(action);
            messages.push(message);
        }

        self.global.states.push(joint);
        self.global.dru_noise.push(noise);

        Ok(ActOutput { actions, messages })
    }

    fn record(&mut self, rewards: &[f32], terminals: &[bool]) {
        for ((memory, &reward), &terminal) in self.memories.iter_mut().zip(rewards).zip(terminals)
        {
            memory.rewards.push(reward);
            memory.is_terminals.push(terminal);
        }
    }

    fn update(&mut self) -> Result<UpdateMetrics, LearnerError> {
        let steps = self.global.len();
        if steps == 0 {
            return Ok(UpdateMetrics::default());
        }
        let (n, obs_dim, meslen) = (self.dims.n_agents, self.dims.obs_dim, self.dims.meslen);
        let batches = self.agent_batches(steps)?;
        let joint_data = self.global.states.concat();
        let noise_data = self.global.dru_noise.concat();
        let eps = self.config.eps_clip;

        let mut metrics = UpdateMetrics::default();
        for _epoch in 0..self.config.k_epochs {
            let joint = Tensor::<TrainBackend, 2>::from_data(
                TensorData::new(joint_data.clone(), [steps, n * obs_dim]),
                &self.device,
            );
            let noise = Tensor::<TrainBackend, 2>::from_data(
                TensorData::new(noise_data.clone(), [steps, n * meslen]),
                &self.device,
            );
            // Replays the channel noise drawn at act time.
            let channel = self.dru.apply_tensor(self.model.messages(joint), noise);

            let mut total_loss: Option<Tensor<TrainBackend, 1>> = None;
            let mut entropy_sum = 0.0f32;
            for (i, batch) in batches.iter().enumerate() {
                let message = channel.clone().slice([0..steps, i * meslen..(i + 1) * meslen]);
                let states = Tensor::<TrainBackend, 2>::from_data(
                    TensorData::new(batch.states.clone(), [steps, obs_dim]),
                    &self.device,
                );
                let input = Tensor::cat(vec![states, message], 1);
                let (head, values) = self.model.policy(self.dims.policy_index(i)).forward(input);
                let values = values.reshape([steps]);
                let (logprobs, entropy) = self.evaluate(head, &batch.actions, steps);

                let old_logprobs = Tensor::<TrainBackend, 1>::from_data(
                    TensorData::new(batch.logprobs.clone(), [steps]),
                    &self.device,
                );
                let returns = Tensor::<TrainBackend, 1>::from_data(
                    TensorData::new(batch.returns.clone(), [steps]),
                    &self.device,
                );

                let ratios = (logprobs - old_logprobs).exp();
                let advantages = returns.clone() - values.clone().detach();
                let surr1 = ratios.clone() * advantages.clone();
                let surr2 = ratios.clamp(1.0 - eps, 1.0 + eps) * advantages;
                // min(a, b) = (a + b - |a - b|) / 2
                let gap = (surr1.clone() - surr2.clone()).abs();
                let clipped = (surr1 + surr2 - gap).div_scalar(2.0);

                let value_err = values - returns;
                let loss = -clipped + (value_err.clone() * value_err) * self.config.value_coeff
                    - entropy.clone() * self.config.entropy_coeff;

                entropy_sum += tensor_to_vec(entropy.mean().detach())?[0];
                let loss = loss.mean();
                total_loss = Some(match total_loss {
                    Some(total) => total + loss,
                    None => loss,
                });
            }

            let Some(total_loss) = total_loss else {
                break;
            };
            metrics.loss = tensor_to_vec(total_loss.clone().detach())?[0];
            metrics.policy_entropy = entropy_sum / n as f32;
            metrics.epochs += 1;

            let grads = total_loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self
                .optimizer
                .step(self.config.lr, self.model.clone(), grads);
        }

        self.update_count += 1;
        log::debug!(
            "update {}: loss {:.4}, entropy {:.4}",
            self.update_count,
            metrics.loss,
            metrics.policy_entropy
        );
        Ok(metrics)
    }

    fn memory(&self) -> &[AgentMemory] {
        &self.memories
    }

    fn memory_mut(&mut self) -> &mut [AgentMemory] {
        &mut self.memories
    }

    fn global_memory_mut(&mut self) -> &mut GlobalMemory {
        &mut self.global
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn save(&self, dir: &Path) -> Result<(), LearnerError> {
        fs::create_dir_all(dir).map_err(CheckpointError::from)?;
        let recorder = DefaultRecorder::default();
        self.model
            .clone()
            .valid()
            .save_file(dir.join(MODEL_FILE), &recorder)
            .map_err(|e| CheckpointError::ModelSave(e.to_string()))?;
        let json =
            serde_json::to_string_pretty(&self.training_state()).map_err(CheckpointError::from)?;
        fs::write(dir.join(TRAINING_STATE_FILE), json).map_err(CheckpointError::from)?;
        Ok(())
    }

    fn load(&mut self, dir: &Path) -> Result<(), LearnerError> {
        if !dir.is_dir() {
            return Err(CheckpointError::DirNotFound(dir.to_path_buf()).into());
        }
        let state_path = dir.join(TRAINING_STATE_FILE);
        let json = fs::read_to_string(&state_path).map_err(|e| CheckpointError::MetadataRead {
            path: state_path.clone(),
            source: e,
        })?;
        let stored: HammerTrainingState =
            serde_json::from_str(&json).map_err(|e| CheckpointError::MetadataParse {
                path: state_path,
                source: e,
            })?;
        if let Some(reason) = stored.mismatch(&self.training_state()) {
            return Err(CheckpointError::Incompatible(reason).into());
        }

        let recorder = DefaultRecorder::default();
        self.model = self
            .model
            .clone()
            .load_file(dir.join(MODEL_FILE), &recorder, &self.device)
            .map_err(|e| CheckpointError::ModelLoad(e.to_string()))?;
        self.optimizer = Self::build_optimizer(&self.config);
        self.update_count = stored.update_count;
        Ok(())
    }

    fn checkpoint_summary(&self) -> LearnerSummary {
        LearnerSummary {
            algorithm: "HAMMER".to_string(),
            update_count: self.update_count,
            hyperparameters: Some(self.config.clone()),
        }
    }
}

fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, LearnerError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| LearnerError::Tensor(format!("{e:?}")))
}

fn log_softmax_vec(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|&l| (l - max).exp()).sum::<f32>().ln() + max;
    logits.iter().map(|&l| l - log_sum).collect()
}

fn gaussian_log_prob(x: f32, mean: f32, std: f32) -> f32 {
    -(x - mean).powi(2) / (2.0 * std * std) - std.ln() - 0.5 * LN_2PI
}

/// Sample an index from a categorical distribution.
fn sample_categorical(probs: &[f32], rng: &mut StdRng) -> usize {
    let r: f32 = rng.random_range(0.0..1.0);
    let mut cumulative = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if r < cumulative {
            return i;
        }
    }
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}
