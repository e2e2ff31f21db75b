//! Experiment execution: the train/evaluate control loop, its wiring from a
//! `RunConfig`, scalar metrics sinks, and evaluation data dumps.

pub mod driver;
pub mod dump;
pub mod metrics;
pub mod session;

pub use driver::{Driver, DriverConfig, EpisodeState, RunSummary, EPISODIC_REWARD};
pub use session::run_experiment;
