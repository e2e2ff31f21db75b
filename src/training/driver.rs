use std::path::PathBuf;

use crate::checkpoint::{CheckpointManager, CheckpointMetrics};
use crate::config::RunMode;
use crate::env::{Action, ActionSpace, MultiAgentEnv};
use crate::error::DriverError;
use crate::learner::Learner;
use crate::training::dump::dump_agent_memories;
use crate::training::metrics::{MetricsWriter, RewardHistory};

/// Series name of the per-episode team reward.
pub const EPISODIC_REWARD: &str = "Episodic Reward";

/// Control-loop parameters.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub mode: RunMode,
    /// Timesteps between learner updates.
    pub update_timestep: usize,
    /// Episodes between checkpoints.
    pub save_interval: usize,
    pub max_episodes: usize,
    pub meslen: usize,
    /// Where evaluation runs dump agent trajectories.
    pub data_dir: PathBuf,
    /// Episodes averaged in progress lines.
    pub log_window: usize,
}

/// Counters for the episode in progress.
#[derive(Debug, Clone, Default)]
pub struct EpisodeState {
    /// Completed episodes.
    pub episode: usize,
    /// Sum over timesteps of the mean reward across agents.
    pub reward: f32,
}

impl EpisodeState {
    fn finish(&mut self) -> f32 {
        self.episode += 1;
        std::mem::take(&mut self.reward)
    }
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub timesteps: usize,
    pub episodes: usize,
    pub updates: usize,
    pub episode_rewards: Vec<f32>,
    /// Episode indices a checkpoint was written for, in order.
    pub checkpoints: Vec<usize>,
    pub dump_dir: Option<PathBuf>,
}

/// Runs the act / step / record loop until the episode limit, updating the
/// learner, checkpointing and logging along the way.
pub struct Driver {
    config: DriverConfig,
    checkpoint_manager: Option<CheckpointManager>,
}

impl Driver {
    /// `checkpoint_manager` is ignored in evaluation mode.
    pub fn new(config: DriverConfig, checkpoint_manager: Option<CheckpointManager>) -> Self {
        Driver {
            config,
            checkpoint_manager,
        }
    }

    fn is_eval(&self) -> bool {
        self.config.mode == RunMode::Evaluate
    }

    pub fn run(
        &self,
        env: &mut dyn MultiAgentEnv,
        learner: &mut dyn Learner,
        metrics: &mut dyn MetricsWriter,
    ) -> Result<RunSummary, DriverError> {
        if self.config.update_timestep == 0 || self.config.save_interval == 0 {
            return Err(DriverError::InvalidRun(
                "update and save intervals must be >= 1".into(),
            ));
        }

        let agents = env.agents().to_vec();
        let continuous = matches!(env.action_space(), ActionSpace::Continuous { .. });
        let mut summary = RunSummary::default();
        let mut state = EpisodeState::default();
        let mut history = RewardHistory::with_capacity(self.config.log_window);
        let mut last_checkpoint: Option<usize> = None;
        let mut observations = env.reset();

        log::info!(
            "{} for {} episodes ({} agents)",
            if self.is_eval() { "Evaluating" } else { "Training" },
            self.config.max_episodes,
            agents.len()
        );

        let mut timestep = 0usize;
        loop {
            timestep += 1;

            let output = learner.act(&observations)?;
            let actions: Vec<Action> = if continuous {
                let space = env.action_space();
                output.actions.iter().map(|a| space.clamp(a)).collect()
            } else {
                output.actions
            };

            let result = env.step(&actions)?;
            learner.record(&result.rewards, &result.terminals);
            state.reward +=
                result.rewards.iter().sum::<f32>() / result.rewards.len().max(1) as f32;

            if !self.is_eval() && timestep % self.config.update_timestep == 0 {
                let update = learner.update()?;
                summary.updates += 1;
                for memory in learner.memory_mut() {
                    memory.clear_memory();
                }
                learner.global_memory_mut().clear_memory();
                log::debug!(
                    "timestep {timestep}: update loss {:.4}, entropy {:.4}",
                    update.loss,
                    update.policy_entropy
                );
            }

            let done = result.all_terminal();
            observations = result.observations;

            if done {
                let reward = state.finish();
                metrics.add_scalar(EPISODIC_REWARD, reward, state.episode)?;
                for (agent, memory) in agents.iter().zip(learner.memory()) {
                    for (j, mean) in memory
                        .message_feature_means(self.config.meslen)
                        .into_iter()
                        .enumerate()
                    {
                        metrics.add_scalar(
                            &format!("{agent}--message_feature_{j}"),
                            mean,
                            state.episode,
                        )?;
                    }
                }
                for memory in learner.memory_mut() {
                    memory.clear_messages();
                }
                observations = env.reset();

                summary.episode_rewards.push(reward);
                history.record_episode(reward);
                log::info!(
                    "Episode {}/{} | reward: {:.3} | avg({}): {:.3} | timestep: {}",
                    state.episode,
                    self.config.max_episodes,
                    reward,
                    self.config.log_window,
                    history.average_reward(self.config.log_window),
                    timestep
                );
            }

            if !self.is_eval()
                && state.episode % self.config.save_interval == 0
                && last_checkpoint != Some(state.episode)
            {
                if let Some(manager) = &self.checkpoint_manager {
                    let ckpt_metrics = CheckpointMetrics {
                        timesteps: timestep,
                        updates: summary.updates,
                        last_episode_reward: summary.episode_rewards.last().copied(),
                    };
                    let path = manager.save_checkpoint(&*learner, &ckpt_metrics, state.episode)?;
                    log::info!("Checkpoint saved: {}", path.display());
                    summary.checkpoints.push(state.episode);
                }
                last_checkpoint = Some(state.episode);
            }

            if state.episode == self.config.max_episodes {
                if self.is_eval() {
                    let written =
                        dump_agent_memories(&self.config.data_dir, &agents, learner.memory())?;
                    log::info!(
                        "Wrote {} data files to {}",
                        written.len(),
                        self.config.data_dir.display()
                    );
                    summary.dump_dir = Some(self.config.data_dir.clone());
                }
                break;
            }
        }

        metrics.flush()?;
        summary.timesteps = timestep;
        summary.episodes = state.episode;
        log::info!(
            "Run complete: {} episodes, {} timesteps, {} updates",
            history.total_episodes(),
            summary.timesteps,
            summary.updates
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::env::{EnvKind, Observation, StepResult};
    use crate::error::{EnvError, LearnerError};
    use crate::learner::{ActOutput, AgentMemory, GlobalMemory, LearnerSummary, UpdateMetrics};
    use crate::training::metrics::ScalarLog;

    /// Learner that acts without a model and records what the driver asks of it.
    struct MockLearner {
        memories: Vec<AgentMemory>,
        global: GlobalMemory,
        action_space: ActionSpace,
        meslen: usize,
        /// Memory length seen by each update call.
        update_lens: Vec<usize>,
        calls: usize,
    }

    impl MockLearner {
        fn new(n_agents: usize, action_space: ActionSpace, meslen: usize) -> Self {
            MockLearner {
                memories: vec![AgentMemory::new(); n_agents],
                global: GlobalMemory::new(),
                action_space,
                meslen,
                update_lens: Vec::new(),
                calls: 0,
            }
        }
    }

    impl Learner for MockLearner {
        fn act(&mut self, observations: &[Observation]) -> Result<ActOutput, LearnerError> {
            self.calls += 1;
            let mut actions = Vec::new();
            let mut messages = Vec::new();
            for (i, obs) in observations.iter().enumerate() {
                let action = match &self.action_space {
                    ActionSpace::Discrete { n } => Action::Discrete((self.calls + i) % n),
                    // deliberately out of bounds
                    ActionSpace::Continuous { low, .. } => Action::Continuous(
                        (0..low.len())
                            .map(|d| if (self.calls + d) % 2 == 0 { 3.0 } else { -3.0 })
                            .collect(),
                    ),
                };
                let message = vec![(i % 2) as f32; self.meslen];
                let memory = &mut self.memories[i];
                memory.states.push(obs.clone());
                memory.actions.push(action.clone());
                memory.messages.push(message.clone());
                memory.logprobs.push(0.0);
                memory.message_log.push(message.clone());
                actions.push(action);
                messages.push(message);
            }
            self.global.states.push(observations.concat());
            self.global.dru_noise.push(vec![0.0; self.meslen * observations.len()]);
            Ok(ActOutput { actions, messages })
        }

        fn record(&mut self, rewards: &[f32], terminals: &[bool]) {
            for ((memory, &r), &t) in self.memories.iter_mut().zip(rewards).zip(terminals) {
                memory.rewards.push(r);
                memory.is_terminals.push(t);
            }
        }

        fn update(&mut self) -> Result<UpdateMetrics, LearnerError> {
            self.update_lens.push(self.memories[0].len());
            Ok(UpdateMetrics::default())
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

        fn set_training(&mut self, _training: bool) {}

        fn save(&self, dir: &Path) -> Result<(), LearnerError> {
            fs::write(dir.join("mock.txt"), "mock").map_err(|e| {
                LearnerError::Checkpoint(crate::error::CheckpointError::Io(e))
            })
        }

        fn load(&mut self, _dir: &Path) -> Result<(), LearnerError> {
            Ok(())
        }

        fn checkpoint_summary(&self) -> LearnerSummary {
            LearnerSummary {
                algorithm: "MOCK".into(),
                update_count: self.update_lens.len(),
                hyperparameters: None,
            }
        }
    }

    /// Wraps an environment and checks every dispatched action against its space.
    struct BoundsCheckingEnv {
        inner: Box<dyn MultiAgentEnv>,
        steps: usize,
    }

    impl MultiAgentEnv for BoundsCheckingEnv {
        fn agents(&self) -> &[String] {
            self.inner.agents()
        }
        fn observation_dim(&self) -> usize {
            self.inner.observation_dim()
        }
        fn action_space(&self) -> &ActionSpace {
            self.inner.action_space()
        }
        fn seed(&mut self, seed: u64) {
            self.inner.seed(seed)
        }
        fn reset(&mut self) -> Vec<Observation> {
            self.inner.reset()
        }
        fn step(&mut self, actions: &[Action]) -> Result<StepResult, EnvError> {
            for action in actions {
                assert!(
                    self.inner.action_space().contains(action),
                    "out of bounds action dispatched: {action:?}"
                );
            }
            self.steps += 1;
            self.inner.step(actions)
        }
    }

    fn driver_config(dir: &Path, mode: RunMode) -> DriverConfig {
        DriverConfig {
            mode,
            update_timestep: 4,
            save_interval: 2,
            max_episodes: 5,
            meslen: 2,
            data_dir: dir.join("data"),
            log_window: 10,
        }
    }

    fn cn(n: usize, cycles: usize) -> Box<dyn MultiAgentEnv> {
        let mut env = EnvKind::CooperativeNavigation.make(n, cycles).unwrap();
        env.seed(1);
        env
    }

    #[test]
    fn test_training_loop_counts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("ckpt"), "test");
        let driver = Driver::new(driver_config(dir.path(), RunMode::Train), Some(manager));
        let mut env = cn(3, 3);
        let mut learner = MockLearner::new(3, ActionSpace::Discrete { n: 5 }, 2);
        let mut log = ScalarLog::new();

        let summary = driver.run(env.as_mut(), &mut learner, &mut log).unwrap();

        // 5 episodes of 3 cycles
        assert_eq!(summary.timesteps, 15);
        assert_eq!(summary.episodes, 5);
        assert_eq!(summary.updates, 15 / 4);
        assert_eq!(learner.update_lens, vec![4, 4, 4]);
        assert_eq!(learner.memories[0].len(), 15 % 4);
        assert_eq!(learner.global.len(), 15 % 4);
        assert_eq!(summary.dump_dir, None);
    }

    #[test]
    fn test_episode_rewards_and_message_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::new(driver_config(dir.path(), RunMode::Train), None);
        let mut env = cn(2, 3);
        let mut learner = MockLearner::new(2, ActionSpace::Discrete { n: 5 }, 2);
        let mut log = ScalarLog::new();

        let summary = driver.run(env.as_mut(), &mut learner, &mut log).unwrap();

        let rewards = log.series(EPISODIC_REWARD);
        assert_eq!(rewards.len(), 5);
        assert_eq!(
            rewards.iter().map(|&(step, _)| step).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(summary.episode_rewards.len(), 5);
        assert_eq!(
            log.series("agent_0--message_feature_1"),
            &[(1, 0.0), (2, 0.0), (3, 0.0), (4, 0.0), (5, 0.0)]
        );
        assert_eq!(log.series("agent_1--message_feature_0").len(), 5);
        assert!(log.series("agent_1--message_feature_0").iter().all(|&(_, v)| v == 1.0));
        assert!(learner.memories.iter().all(|m| m.message_log.is_empty()));
    }

    #[test]
    fn test_checkpoints_at_multiples_of_save_interval() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ckpt");
        let manager = CheckpointManager::new(root.clone(), "test");
        let driver = Driver::new(driver_config(dir.path(), RunMode::Train), Some(manager));
        let mut env = cn(2, 3);
        let mut learner = MockLearner::new(2, ActionSpace::Discrete { n: 5 }, 2);

        let summary = driver
            .run(env.as_mut(), &mut learner, &mut ScalarLog::new())
            .unwrap();

        assert_eq!(summary.checkpoints, vec![0, 2, 4]);
        let mut dirs: Vec<String> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        dirs.sort();
        assert_eq!(
            dirs,
            vec!["checkpoint_ep_0", "checkpoint_ep_2", "checkpoint_ep_4"]
        );
        assert!(root.join("checkpoint_ep_2/mock.txt").exists());
        assert!(root.join("checkpoint_ep_2/metadata.json").exists());
    }

    #[test]
    fn test_eval_mode_never_updates_or_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ckpt");
        let manager = CheckpointManager::new(root.clone(), "test");
        let driver = Driver::new(driver_config(dir.path(), RunMode::Evaluate), Some(manager));
        let mut env = cn(2, 3);
        let mut learner = MockLearner::new(2, ActionSpace::Discrete { n: 5 }, 2);

        let summary = driver
            .run(env.as_mut(), &mut learner, &mut ScalarLog::new())
            .unwrap();

        assert_eq!(summary.updates, 0);
        assert!(learner.update_lens.is_empty());
        assert!(summary.checkpoints.is_empty());
        assert!(!root.exists());

        let data = dir.path().join("data");
        assert_eq!(summary.dump_dir.as_deref(), Some(data.as_path()));
        for agent in ["agent_0", "agent_1"] {
            for kind in ["states", "actions", "messages"] {
                assert!(data.join(format!("{kind}_{agent}.npy")).exists());
            }
        }
        // nothing was cleared, so the dump covers every timestep
        assert_eq!(learner.memories[0].len(), 15);
    }

    #[test]
    fn test_continuous_actions_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = driver_config(dir.path(), RunMode::Train);
        config.max_episodes = 2;
        let driver = Driver::new(config, None);
        let mut inner = EnvKind::MultiWalker.make(2, 20).unwrap();
        inner.seed(3);
        let space = inner.action_space().clone();
        let mut env = BoundsCheckingEnv { inner, steps: 0 };
        let mut learner = MockLearner::new(2, space.clone(), 1);

        let summary = driver
            .run(&mut env, &mut learner, &mut ScalarLog::new())
            .unwrap();

        assert_eq!(summary.episodes, 2);
        assert_eq!(env.steps, summary.timesteps);
        // memory keeps the unclamped sample
        assert!(learner.memories[0].actions.iter().all(|a| !space.contains(a)));
    }

    #[test]
    fn test_scenario_two_episodes_of_five_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = driver_config(dir.path(), RunMode::Train);
        config.max_episodes = 2;
        config.update_timestep = 800;
        let driver = Driver::new(config, None);
        let mut env = cn(3, 5);
        let mut learner = MockLearner::new(3, ActionSpace::Discrete { n: 5 }, 1);
        let mut log = ScalarLog::new();

        let summary = driver.run(env.as_mut(), &mut learner, &mut log).unwrap();

        assert_eq!(summary.episodes, 2);
        assert_eq!(summary.timesteps, 10);
        assert_eq!(summary.updates, 0);
        assert_eq!(log.series(EPISODIC_REWARD).len(), 2);
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = driver_config(dir.path(), RunMode::Train);
        config.save_interval = 0;
        let driver = Driver::new(config, None);
        let mut env = cn(2, 3);
        let mut learner = MockLearner::new(2, ActionSpace::Discrete { n: 5 }, 1);
        assert!(matches!(
            driver.run(env.as_mut(), &mut learner, &mut ScalarLog::new()),
            Err(DriverError::InvalidRun(_))
        ));
    }
}
