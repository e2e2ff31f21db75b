use std::path::{Path, PathBuf};

use crate::env::EnvKind;
use crate::error::ConfigError;

/// Hidden layer widths: either a list, or a single width meaning two hidden
/// layers of that size.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum LayerSpec {
    Width(usize),
    Widths(Vec<usize>),
}

impl LayerSpec {
    pub fn widths(&self) -> Vec<usize> {
        match self {
            LayerSpec::Width(w) => vec![*w, *w],
            LayerSpec::Widths(ws) => ws.clone(),
        }
    }
}

/// Learner hyperparameters, loaded from YAML or TOML.
///
/// The first eight fields are required; a file missing any of them fails to
/// parse.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HammerConfig {
    pub lr: f64,
    pub gamma: f32,
    #[serde(rename = "K_epochs")]
    pub k_epochs: usize,
    pub eps_clip: f32,
    pub actor_layer: LayerSpec,
    pub critic_layer: LayerSpec,
    pub is_discrete: bool,
    pub update_timestep: usize,
    /// Standard deviation of the Gaussian policy for continuous actions.
    #[serde(default = "default_action_std")]
    pub action_std: f32,
    #[serde(default = "default_entropy_coeff")]
    pub entropy_coeff: f32,
    #[serde(default = "default_value_coeff")]
    pub value_coeff: f32,
    /// Noise scale of the DRU in training mode.
    #[serde(default = "default_dru_sigma")]
    pub dru_sigma: f32,
    /// Adam (beta1, beta2).
    #[serde(default = "default_betas")]
    pub betas: (f32, f32),
}

fn default_action_std() -> f32 {
    0.5
}

fn default_entropy_coeff() -> f32 {
    0.01
}

fn default_value_coeff() -> f32 {
    0.5
}

fn default_dru_sigma() -> f32 {
    2.0
}

fn default_betas() -> (f32, f32) {
    (0.9, 0.999)
}

impl HammerConfig {
    /// Load configuration from a YAML (`.yaml`/`.yml`) or TOML (`.toml`) file.
    /// Files with any other extension are read as YAML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: HammerConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lr <= 0.0 {
            return Err(ConfigError::Validation("lr must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(ConfigError::Validation("gamma must be in [0, 1]".into()));
        }
        if self.k_epochs == 0 {
            return Err(ConfigError::Validation("K_epochs must be >= 1".into()));
        }
        if self.eps_clip <= 0.0 {
            return Err(ConfigError::Validation("eps_clip must be > 0".into()));
        }
        if self.update_timestep == 0 {
            return Err(ConfigError::Validation(
                "update_timestep must be >= 1".into(),
            ));
        }
        for (name, spec) in [
            ("actor_layer", &self.actor_layer),
            ("critic_layer", &self.critic_layer),
        ] {
            let widths = spec.widths();
            if widths.is_empty() || widths.contains(&0) {
                return Err(ConfigError::Validation(format!(
                    "{name} needs at least one non-zero width"
                )));
            }
        }
        if self.action_std <= 0.0 {
            return Err(ConfigError::Validation("action_std must be > 0".into()));
        }
        if self.entropy_coeff < 0.0 {
            return Err(ConfigError::Validation("entropy_coeff must be >= 0".into()));
        }
        if self.value_coeff < 0.0 {
            return Err(ConfigError::Validation("value_coeff must be >= 0".into()));
        }
        if self.dru_sigma < 0.0 {
            return Err(ConfigError::Validation("dru_sigma must be >= 0".into()));
        }
        let (b1, b2) = self.betas;
        if !(0.0..1.0).contains(&b1) || !(0.0..1.0).contains(&b2) {
            return Err(ConfigError::Validation("betas must be in [0, 1)".into()));
        }
        Ok(())
    }

    /// Check that the configured action type agrees with the environment.
    pub fn check_environment(&self, env_is_discrete: bool) -> Result<(), ConfigError> {
        if self.is_discrete != env_is_discrete {
            return Err(ConfigError::Validation(format!(
                "is_discrete is {} but the environment has {} actions",
                self.is_discrete,
                if env_is_discrete { "discrete" } else { "continuous" }
            )));
        }
        Ok(())
    }
}

/// Train or evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Evaluate,
}

/// Immutable parameters of one run, resolved from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub config_path: PathBuf,
    pub expname: Option<String>,
    pub env: EnvKind,
    pub n_agents: usize,
    pub mode: RunMode,
    /// Checkpoint directory loaded in evaluation mode.
    pub eval_path: Option<PathBuf>,
    pub shared_params: bool,
    pub max_episodes: usize,
    pub max_cycles: usize,
    pub dru: bool,
    pub meslen: usize,
    /// 0 leaves every random source unseeded.
    pub random_seed: u64,
    pub save_interval: usize,
    pub logdir: PathBuf,
    pub savedir: PathBuf,
    /// Root directory every output is written under.
    pub save_root: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            config_path: PathBuf::from("configs/cn.yaml"),
            expname: None,
            env: EnvKind::CooperativeNavigation,
            n_agents: 3,
            mode: RunMode::Train,
            eval_path: None,
            shared_params: false,
            max_episodes: 100,
            max_cycles: 25,
            dru: true,
            meslen: 1,
            random_seed: 9,
            save_interval: 25_000,
            logdir: PathBuf::from("logs/"),
            savedir: PathBuf::from("model_checkpoints/"),
            save_root: PathBuf::from("./save/"),
        }
    }
}

impl RunConfig {
    pub fn is_eval(&self) -> bool {
        self.mode == RunMode::Evaluate
    }

    pub fn seed(&self) -> Option<u64> {
        (self.random_seed != 0).then_some(self.random_seed)
    }

    /// Validate values that would otherwise fail deep inside the run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_agents == 0 {
            return Err(ConfigError::Validation("nagents must be >= 1".into()));
        }
        if self.meslen == 0 {
            return Err(ConfigError::Validation("meslen must be >= 1".into()));
        }
        if self.max_episodes == 0 {
            return Err(ConfigError::Validation("maxepisodes must be >= 1".into()));
        }
        if self.max_cycles == 0 {
            return Err(ConfigError::Validation("maxcycles must be >= 1".into()));
        }
        if self.save_interval == 0 {
            return Err(ConfigError::Validation("saveinterval must be >= 1".into()));
        }
        if self.is_eval() && self.eval_path.is_none() {
            return Err(ConfigError::Validation(
                "eval_path is required in evaluation mode".into(),
            ));
        }
        Ok(())
    }

    /// Experiment name used for every output path.
    ///
    /// Training runs encode their settings; evaluation runs are named after
    /// the experiment that produced the checkpoint (the third-from-last
    /// component of `eval_path`). An explicit `expname` wins over both.
    pub fn experiment_name(&self) -> String {
        if let Some(name) = &self.expname {
            return name.clone();
        }
        if let (RunMode::Evaluate, Some(path)) = (self.mode, &self.eval_path) {
            let path = path.to_string_lossy();
            let parts: Vec<&str> = path.split('/').collect();
            let source = if parts.len() >= 3 {
                parts[parts.len() - 3]
            } else {
                path.as_ref()
            };
            return format!("eval--{source}");
        }
        [
            format!("env_{}", self.env),
            format!("n_{}", self.n_agents),
            format!("dru_{}", self.dru as u8),
            format!("meslen_{}", self.meslen),
            format!("sharedparams_{}", self.shared_params as u8),
            format!("randomseed_{}", self.random_seed),
        ]
        .join("--")
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.save_root.join(self.experiment_name())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.experiment_dir().join(&self.logdir)
    }

    pub fn checkpoint_root(&self) -> PathBuf {
        self.experiment_dir().join(&self.savedir)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.experiment_dir().join("data")
    }
}
