use crate::checkpoint::CheckpointManager;
use crate::config::{HammerConfig, RunConfig};
use crate::env::MultiAgentEnv;
use crate::error::{ConfigError, DriverError};
use crate::learner::{HammerLearner, HammerSpec, Learner};
use crate::training::driver::{Driver, DriverConfig, RunSummary};
use crate::training::metrics::CsvScalarWriter;

const LOG_WINDOW: usize = 100;

/// Wire up and run one experiment.
///
/// Returns `Ok(None)` without running anything when the hyperparameter file
/// is missing, malformed, or disagrees with the environment's action type.
pub fn run_experiment(run: &RunConfig) -> Result<Option<RunSummary>, DriverError> {
    run.validate()
        .map_err(|e| DriverError::InvalidRun(e.to_string()))?;

    let mut env = run.env.make(run.n_agents, run.max_cycles)?;
    let config = match load_config(run, env.action_space().is_discrete()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("config required: {e}");
            return Ok(None);
        }
    };

    let seed = run.seed();
    if let Some(seed) = seed {
        env.seed(seed);
    }

    let mut learner = build_learner(run, env.as_ref(), config.clone(), seed);
    log::info!(
        "Built {} actor-critic(s) for {} agents",
        learner.num_policies(),
        env.num_agents()
    );

    let experiment = run.experiment_name();
    log::info!("Experiment: {experiment}");

    if let (true, Some(path)) = (run.is_eval(), &run.eval_path) {
        let data = CheckpointManager::restore(&mut learner, path)?;
        log::info!(
            "Loaded checkpoint from episode {} of {} ({} updates)",
            data.metadata.episode,
            data.metadata.experiment,
            learner.update_count()
        );
        learner.set_training(false);
    }

    if run.dru {
        log::info!("Using DRU (sigma {})", config.dru_sigma);
    } else {
        log::info!("Not using DRU");
    }

    let mut metrics = CsvScalarWriter::create(&run.log_dir())?;
    let checkpoint_manager =
        (!run.is_eval()).then(|| CheckpointManager::new(run.checkpoint_root(), experiment));

    let driver = Driver::new(
        DriverConfig {
            mode: run.mode,
            update_timestep: config.update_timestep,
            save_interval: run.save_interval,
            max_episodes: run.max_episodes,
            meslen: run.meslen,
            data_dir: run.data_dir(),
            log_window: LOG_WINDOW,
        },
        checkpoint_manager,
    );
    let summary = driver.run(env.as_mut(), &mut learner, &mut metrics)?;
    Ok(Some(summary))
}

fn build_learner(
    run: &RunConfig,
    env: &dyn MultiAgentEnv,
    config: HammerConfig,
    seed: Option<u64>,
) -> HammerLearner {
    HammerLearner::new(
        config,
        HammerSpec {
            n_agents: env.num_agents(),
            obs_dim: env.observation_dim(),
            action_space: env.action_space().clone(),
            meslen: run.meslen,
            shared_params: run.shared_params,
            dru: run.dru,
            seed,
        },
    )
}

fn load_config(run: &RunConfig, env_is_discrete: bool) -> Result<HammerConfig, ConfigError> {
    let config = HammerConfig::load(&run.config_path)?;
    config.check_environment(env_is_discrete)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::config::RunMode;
    use crate::env::EnvKind;

    fn write_config(dir: &Path, name: &str, is_discrete: bool) -> PathBuf {
        let path = dir.join(name);
        fs::write(
            &path,
            format!(
                "lr: 0.002\ngamma: 0.99\nK_epochs: 2\neps_clip: 0.2\nactor_layer: 16\n\
                 critic_layer: [16]\nis_discrete: {is_discrete}\nupdate_timestep: 8\n"
            ),
        )
        .unwrap();
        path
    }

    fn train_run(dir: &Path) -> RunConfig {
        RunConfig {
            config_path: write_config(dir, "cn.yaml", true),
            n_agents: 3,
            max_episodes: 2,
            max_cycles: 5,
            save_interval: 1,
            random_seed: 9,
            save_root: dir.join("save"),
            ..Default::default()
        }
    }

    #[test]
    fn test_scenario_cn_two_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let run = train_run(dir.path());
        let summary = run_experiment(&run).unwrap().expect("run should start");

        assert_eq!(summary.episodes, 2);
        assert_eq!(summary.timesteps, 10);
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.checkpoints, vec![0, 1, 2]);

        let csv = fs::read_to_string(run.log_dir().join("scalars.csv")).unwrap();
        let reward_rows = csv
            .lines()
            .filter(|l| l.starts_with("Episodic Reward,"))
            .count();
        assert_eq!(reward_rows, 2);
        assert!(csv.contains("agent_2--message_feature_0,2,"));
        assert!(run.checkpoint_root().join("checkpoint_ep_2/hammer_model.mpk").exists());
    }

    #[test]
    fn test_default_run_builds_one_policy_per_agent() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig::default();
        assert!(!run.shared_params);
        let env = run.env.make(run.n_agents, run.max_cycles).unwrap();
        let config = HammerConfig::load(&write_config(dir.path(), "cn.yaml", true)).unwrap();

        let learner = build_learner(&run, env.as_ref(), config.clone(), Some(1));
        assert_eq!(learner.num_policies(), run.n_agents);

        let shared = RunConfig {
            shared_params: true,
            ..RunConfig::default()
        };
        assert_eq!(build_learner(&shared, env.as_ref(), config, Some(1)).num_policies(), 1);
    }

    #[test]
    fn test_same_seed_same_rewards() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let first = run_experiment(&train_run(a.path())).unwrap().unwrap();
        let second = run_experiment(&train_run(b.path())).unwrap().unwrap();
        assert_eq!(first.episode_rewards, second.episode_rewards);
    }

    #[test]
    fn test_missing_config_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig {
            config_path: dir.path().join("absent.yaml"),
            save_root: dir.path().join("save"),
            ..Default::default()
        };
        assert!(run_experiment(&run).unwrap().is_none());
        assert!(!dir.path().join("save").exists());
    }

    #[test]
    fn test_action_type_mismatch_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig {
            env: EnvKind::MultiWalker,
            ..train_run(dir.path())
        };
        assert!(run_experiment(&run).unwrap().is_none());
    }

    #[test]
    fn test_invalid_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig {
            save_interval: 0,
            ..train_run(dir.path())
        };
        assert!(matches!(run_experiment(&run), Err(DriverError::InvalidRun(_))));
    }

    #[test]
    fn test_evaluate_trained_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let train = train_run(dir.path());
        run_experiment(&train).unwrap().unwrap();

        let eval = RunConfig {
            mode: RunMode::Evaluate,
            eval_path: Some(train.checkpoint_root().join("checkpoint_ep_2")),
            max_episodes: 3,
            ..train.clone()
        };
        assert_eq!(eval.experiment_name(), format!("eval--{}", train.experiment_name()));
        let summary = run_experiment(&eval).unwrap().unwrap();

        assert_eq!(summary.episodes, 3);
        assert_eq!(summary.updates, 0);
        assert!(summary.checkpoints.is_empty());
        assert!(!eval.checkpoint_root().exists());
        let data = eval.data_dir();
        assert_eq!(summary.dump_dir.as_deref(), Some(data.as_path()));
        assert!(data.join("states_agent_0.npy").exists());
        assert!(data.join("messages_agent_2.npy").exists());
    }

    #[test]
    fn test_evaluate_without_dru_after_training_with_it() {
        let dir = tempfile::tempdir().unwrap();
        let train = train_run(dir.path());
        assert!(train.dru);
        run_experiment(&train).unwrap().unwrap();

        let eval = RunConfig {
            mode: RunMode::Evaluate,
            eval_path: Some(train.checkpoint_root().join("checkpoint_ep_1")),
            dru: false,
            max_episodes: 1,
            ..train.clone()
        };
        let summary = run_experiment(&eval).unwrap();
        assert_eq!(summary.map(|s| s.episodes), Some(1));
    }

    #[test]
    fn test_continuous_environment_runs() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunConfig {
            config_path: write_config(dir.path(), "mw.yaml", false),
            env: EnvKind::MultiWalker,
            n_agents: 2,
            max_episodes: 1,
            max_cycles: 12,
            save_interval: 10,
            dru: false,
            shared_params: false,
            meslen: 2,
            save_root: dir.path().join("save"),
            ..Default::default()
        };
        let summary = run_experiment(&run).unwrap().unwrap();
        assert_eq!(summary.episodes, 1);
        assert!(summary.timesteps <= 12);
        assert_eq!(summary.checkpoints, vec![0]);
    }
}
