use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sink for named scalar series.
pub trait MetricsWriter {
    /// Append `(step, value)` to the series `tag`.
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

/// Buffered CSV sink writing `tag,step,value` rows to `<logdir>/scalars.csv`.
pub struct CsvScalarWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl CsvScalarWriter {
    pub const FILE_NAME: &'static str = "scalars.csv";

    /// Create `logdir` if needed and start a fresh `scalars.csv` in it.
    pub fn create(logdir: &Path) -> io::Result<Self> {
        fs::create_dir_all(logdir)?;
        let path = logdir.join(Self::FILE_NAME);
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "tag,step,value")?;
        Ok(CsvScalarWriter { writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsWriter for CsvScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> io::Result<()> {
        if tag.contains([',', '"', '\n']) {
            writeln!(self.writer, "\"{}\",{},{}", tag.replace('"', "\"\""), step, value)
        } else {
            writeln!(self.writer, "{tag},{step},{value}")
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for CsvScalarWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// In-memory sink, queryable per series.
#[derive(Debug, Default)]
pub struct ScalarLog {
    series: BTreeMap<String, Vec<(usize, f32)>>,
}

impl ScalarLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(&self, tag: &str) -> &[(usize, f32)] {
        self.series.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    #[cfg(test)]
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

impl MetricsWriter for ScalarLog {
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> io::Result<()> {
        self.series
            .entry(tag.to_string())
            .or_default()
            .push((step, value));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Rolling window of episode rewards for progress lines.
pub struct RewardHistory {
    rewards: VecDeque<f32>,
    capacity: usize,
    total_episodes: usize,
}

impl RewardHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        RewardHistory {
            rewards: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            total_episodes: 0,
        }
    }

    pub fn record_episode(&mut self, reward: f32) {
        self.total_episodes += 1;
        self.rewards.push_back(reward);
        if self.rewards.len() > self.capacity {
            self.rewards.pop_front();
        }
    }

    /// Average reward over the last N episodes.
    pub fn average_reward(&self, last_n: usize) -> f32 {
        let n = self.rewards.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        self.rewards.iter().rev().take(n).sum::<f32>() / n as f32
    }

    pub fn total_episodes(&self) -> usize {
        self.total_episodes
    }
}

impl Default for RewardHistory {
    fn default() -> Self {
        Self::with_capacity(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_writer_rows() {
        let dir = tempfile::tempdir().unwrap();
        let logdir = dir.path().join("logs");
        let mut writer = CsvScalarWriter::create(&logdir).unwrap();
        writer.add_scalar("Episodic Reward", -12.5, 1).unwrap();
        writer
            .add_scalar("agent_0--message_feature_0", 0.25, 1)
            .unwrap();
        writer.flush().unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "tag,step,value",
                "Episodic Reward,1,-12.5",
                "agent_0--message_feature_0,1,0.25"
            ]
        );
    }

    #[test]
    fn test_csv_writer_quotes_commas() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CsvScalarWriter::create(dir.path()).unwrap();
        writer.add_scalar("a,b", 1.0, 0).unwrap();
        writer.flush().unwrap();
        let content = fs::read_to_string(writer.path()).unwrap();
        assert!(content.contains("\"a,b\",0,1"));
    }

    #[test]
    fn test_scalar_log_series() {
        let mut log = ScalarLog::new();
        log.add_scalar("Episodic Reward", 1.0, 1).unwrap();
        log.add_scalar("Episodic Reward", 2.0, 2).unwrap();
        log.add_scalar("other", 3.0, 1).unwrap();
        assert_eq!(log.series("Episodic Reward"), &[(1, 1.0), (2, 2.0)]);
        assert!(log.series("missing").is_empty());
        assert_eq!(log.tags().collect::<Vec<_>>(), vec!["Episodic Reward", "other"]);
    }

    #[test]
    fn test_reward_history_window() {
        let mut history = RewardHistory::with_capacity(3);
        assert_eq!(history.average_reward(10), 0.0);
        for r in [1.0, 2.0, 3.0, 4.0] {
            history.record_episode(r);
        }
        assert_eq!(history.total_episodes(), 4);
        assert!((history.average_reward(10) - 3.0).abs() < 1e-6);
        assert!((history.average_reward(1) - 4.0).abs() < 1e-6);
    }
}
