mod manager;
mod metadata;

pub use manager::{CheckpointData, CheckpointManager};
pub use metadata::{CheckpointMetadata, CheckpointMetrics, HammerTrainingState};
