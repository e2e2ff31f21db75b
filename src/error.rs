use std::path::PathBuf;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("failed to read metadata from {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse metadata from {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to save model: {0}")]
    ModelSave(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("checkpoint does not match the learner: {0}")]
    Incompatible(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a multi-agent environment.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("unknown environment '{0}' (expected 'cn' or 'mw')")]
    UnknownEnvironment(String),

    #[error("environment needs at least {min} agents, got {got}")]
    TooFewAgents { min: usize, got: usize },

    #[error("expected {expected} actions, got {got}")]
    ActionCount { expected: usize, got: usize },

    #[error("invalid action for {agent}: {reason}")]
    InvalidAction { agent: String, reason: String },

    #[error("episode is over, reset the environment before stepping")]
    EpisodeOver,
}

/// Errors raised by the learner.
#[derive(Debug, thiserror::Error)]
pub enum LearnerError {
    #[error("expected {expected} observations, got {got}")]
    ObservationCount { expected: usize, got: usize },

    #[error("observation for agent {agent} has {got} values, expected {expected}")]
    ObservationDim {
        agent: usize,
        expected: usize,
        got: usize,
    },

    #[error("agent {agent} has {states} states but {rewards} rewards recorded")]
    IncompleteTrajectory {
        agent: usize,
        states: usize,
        rewards: usize,
    },

    #[error("tensor data error: {0}")]
    Tensor(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Errors that abort a training or evaluation run.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("learner error: {0}")]
    Learner(#[from] LearnerError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("invalid run configuration: {0}")]
    InvalidRun(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
