//! Configuration module for the geo indexer.
//!
//! Run parameters come from the environment, the ordered job list from a
//! JSON job file; [`Dependencies`] wires both into a ready orchestrator.

mod dependencies;
pub mod jobs;
pub mod settings;

pub use dependencies::Dependencies;
pub use jobs::{load_jobs, parse_jobs};
pub use settings::{ConnectionMode, RunSettings};
