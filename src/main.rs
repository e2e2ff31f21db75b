#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use hammer::config::{RunConfig, RunMode};
use hammer::env::EnvKind;
use hammer::training::run_experiment;

/// Train or evaluate HAMMER agents on a multi-agent environment.
#[derive(Parser)]
#[command(name = "hammer-run", about = "Train or evaluate HAMMER agents")]
struct Cli {
    /// Path to the YAML or TOML hyperparameter file
    #[arg(long, default_value = "configs/cn.yaml")]
    config: PathBuf,

    /// Experiment name (derived from the flags when omitted)
    #[arg(long)]
    expname: Option<String>,

    /// Environment: cn (cooperative navigation) or mw (multi-walker)
    #[arg(long, default_value = "cn")]
    envname: EnvKind,

    #[arg(long, default_value_t = 3)]
    nagents: usize,

    /// 1 to evaluate a checkpoint instead of training
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    eval: u8,

    /// Checkpoint directory to evaluate
    #[arg(long = "eval_path", default_value = "")]
    eval_path: String,

    /// 1 to share one actor-critic between all agents
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    sharedparams: u8,

    #[arg(long, default_value_t = 100)]
    maxepisodes: usize,

    /// Environment steps per episode (25 for cn, 500 for mw when omitted)
    #[arg(long)]
    maxcycles: Option<usize>,

    /// 1 to pass messages through the DRU
    #[arg(long = "dru_toggle", default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    dru_toggle: u8,

    /// Message length per agent
    #[arg(long, default_value_t = 1)]
    meslen: usize,

    /// Seed for every random source; 0 leaves them unseeded
    #[arg(long, default_value_t = 9)]
    randomseed: u64,

    /// Episodes between checkpoints
    #[arg(long, default_value_t = 25_000)]
    saveinterval: usize,

    #[arg(long, default_value = "logs/")]
    logdir: PathBuf,

    #[arg(long, default_value = "model_checkpoints/")]
    savedir: PathBuf,

    /// Root directory all outputs are written under
    #[arg(long, default_value = "./save/")]
    saveroot: PathBuf,
}

impl Cli {
    fn into_run_config(self) -> RunConfig {
        RunConfig {
            config_path: self.config,
            expname: self.expname,
            env: self.envname,
            n_agents: self.nagents,
            mode: if self.eval == 1 {
                RunMode::Evaluate
            } else {
                RunMode::Train
            },
            eval_path: (!self.eval_path.is_empty()).then(|| PathBuf::from(self.eval_path)),
            shared_params: self.sharedparams == 1,
            max_episodes: self.maxepisodes,
            max_cycles: self
                .maxcycles
                .unwrap_or_else(|| self.envname.default_max_cycles()),
            dru: self.dru_toggle == 1,
            meslen: self.meslen,
            random_seed: self.randomseed,
            save_interval: self.saveinterval,
            logdir: self.logdir,
            savedir: self.savedir,
            save_root: self.saveroot,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let run = Cli::parse().into_run_config();
    let experiment = run.experiment_name();

    match run_experiment(&run).with_context(|| format!("running experiment {experiment}"))? {
        Some(summary) => log::info!(
            "Finished {experiment}: {} episodes, {} timesteps, {} updates, {} checkpoints",
            summary.episodes,
            summary.timesteps,
            summary.updates,
            summary.checkpoints.len()
        ),
        None => log::warn!("No run started for {experiment}"),
    }
    Ok(())
}
