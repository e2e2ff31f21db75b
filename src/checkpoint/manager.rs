use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::checkpoint::metadata::{CheckpointMetadata, CheckpointMetrics};
use crate::error::{CheckpointError, LearnerError};
use crate::learner::Learner;

const METADATA_FILE: &str = "metadata.json";

/// Metadata of a checkpoint on disk.
#[derive(Debug)]
pub struct CheckpointData {
    pub path: PathBuf,
    pub metadata: CheckpointMetadata,
}

/// Saves, loads and lists the checkpoints of one experiment, laid out as
/// `<root>/checkpoint_ep_<episode>/`.
pub struct CheckpointManager {
    root: PathBuf,
    experiment: String,
}

impl CheckpointManager {
    pub fn new(root: PathBuf, experiment: impl Into<String>) -> Self {
        CheckpointManager {
            root,
            experiment: experiment.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoint_dir(&self, episode: usize) -> PathBuf {
        self.root.join(format!("checkpoint_ep_{episode}"))
    }

    /// Write the learner's state and metadata for `episode`. The files go to
    /// a `.tmp` sibling first and are renamed into place.
    pub fn save_checkpoint(
        &self,
        learner: &dyn Learner,
        metrics: &CheckpointMetrics,
        episode: usize,
    ) -> Result<PathBuf, CheckpointError> {
        let final_dir = self.checkpoint_dir(episode);
        let tmp_dir = self.root.join(format!("checkpoint_ep_{episode}.tmp"));

        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        learner
            .save(&tmp_dir)
            .map_err(|e| into_checkpoint_error(e, CheckpointError::ModelSave))?;

        let summary = learner.checkpoint_summary();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let metadata = CheckpointMetadata {
            episode,
            timestamp,
            experiment: self.experiment.clone(),
            algorithm: summary.algorithm,
            metrics: CheckpointMetrics {
                updates: summary.update_count,
                ..metrics.clone()
            },
            hyperparameters: summary.hyperparameters,
        };
        fs::write(
            tmp_dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&tmp_dir, &final_dir)?;

        Ok(final_dir)
    }

    /// Read a checkpoint's metadata.
    pub fn load_checkpoint(dir: &Path) -> Result<CheckpointData, CheckpointError> {
        if !dir.is_dir() {
            return Err(CheckpointError::DirNotFound(dir.to_path_buf()));
        }
        let meta_path = dir.join(METADATA_FILE);
        let meta_json = fs::read_to_string(&meta_path).map_err(|e| CheckpointError::MetadataRead {
            path: meta_path.clone(),
            source: e,
        })?;
        let metadata: CheckpointMetadata =
            serde_json::from_str(&meta_json).map_err(|e| CheckpointError::MetadataParse {
                path: meta_path,
                source: e,
            })?;
        Ok(CheckpointData {
            path: dir.to_path_buf(),
            metadata,
        })
    }

    /// Read the metadata of `dir` and load the learner from it.
    pub fn restore(learner: &mut dyn Learner, dir: &Path) -> Result<CheckpointData, CheckpointError> {
        let data = Self::load_checkpoint(dir)?;
        learner
            .load(dir)
            .map_err(|e| into_checkpoint_error(e, CheckpointError::ModelLoad))?;
        Ok(data)
    }

    /// List all checkpoints sorted by episode (ascending).
    pub fn list_checkpoints(&self) -> Result<Vec<(PathBuf, CheckpointMetadata)>, CheckpointError> {
        let mut results = Vec::new();
        if !self.root.exists() {
            return Ok(results);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if !name_str.starts_with("checkpoint_ep_") || name_str.ends_with(".tmp") {
                continue;
            }
            if path.join(METADATA_FILE).exists() {
                let data = Self::load_checkpoint(&path)?;
                results.push((data.path, data.metadata));
            }
        }
        results.sort_by_key(|(_, m)| m.episode);
        Ok(results)
    }
}

fn into_checkpoint_error(err: LearnerError, wrap: fn(String) -> CheckpointError) -> CheckpointError {
    match err {
        LearnerError::Checkpoint(inner) => inner,
        other => wrap(other.to_string()),
    }
}
