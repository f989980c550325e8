//! Configuration loading and parsing.
//!
//! This module provides YAML-based loading of workflow files and of the
//! runner's global settings.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    CommandConfig, ResourcesConfig, RunnerConfig, TaskConfig, WorkflowDocument, WorkflowSection,
};
pub use yaml::YamlLoader;
