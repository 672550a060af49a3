//! Shared data model, configuration and Redis key scheme for the PyQuest
//! evaluator workspace.

pub mod config;
pub mod redis;
pub mod types;
