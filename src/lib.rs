//! # HAMMER
//!
//! Multi-agent reinforcement learning with a learned central messenger:
//! a messenger network reads the joint observation and sends each agent a
//! short message, and independent PPO actor-critics act on their own
//! observation plus that message. Built on the Burn ML framework.
//!
//! ## Modules
//!
//! - [`env`] — Multi-agent environment trait, cooperative navigation, multi-walker
//! - [`learner`] — Learner trait, trajectory memory, DRU, HAMMER networks and PPO update
//! - [`training`] — Train/evaluate control loop, experiment wiring, metrics, data dumps
//! - [`checkpoint`] — Model persistence and metadata
//! - [`config`] — YAML/TOML hyperparameter loading and run configuration
//! - [`error`] — Structured error types

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod env;
pub mod error;
pub mod learner;
pub mod training;
