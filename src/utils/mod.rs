//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Atomic checkpoint save/load with retention

mod checkpoint;
mod config;

pub use checkpoint::{CheckpointManager, CheckpointMeta, LoadedCheckpoint, FORMAT_VERSION};
pub use config::{
    ensure_config_exists, Config, DataConfig, ModelConfig, OutputConfig, TrainingConfigFile,
};
