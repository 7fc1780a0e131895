//! Configuration management
//!
//! Provides unified configuration for the entire DCGAN pipeline.

use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::resolution_stages;
use crate::training::TrainingConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfigFile,
    /// Output configuration
    pub output: OutputConfig,
}

/// Data-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory of training images
    pub img_dir: String,
    /// Images are resized to `image_size x image_size`
    pub image_size: usize,
    /// 1 for grayscale, 3 for RGB
    pub channels: usize,
    /// Batch size
    pub batch_size: usize,
    /// Batches decoded ahead of the training loop
    pub num_data_threads: usize,
    /// Reshuffle every epoch
    pub shuffle: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            img_dir: "./data/celebA".to_string(),
            image_size: 64,
            channels: 3,
            batch_size: 128,
            num_data_threads: 2,
            shuffle: true,
        }
    }
}

/// Model-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Latent dimension size
    pub latent_dim: usize,
    /// Base filters for both networks
    pub base_filters: usize,
    /// Width multiplier applied to `base_filters`
    pub scale_model: usize,
    /// Safetensors file with extractor kernels; seeded weights when unset
    pub feature_extractor_weights: Option<String>,
    /// Seed of the frozen extractor when no weights file is given
    pub embedding_seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            latent_dim: 100,
            base_filters: 64,
            scale_model: 1,
            feature_extractor_weights: None,
            embedding_seed: 0,
        }
    }
}

impl ModelConfig {
    /// Effective filter width
    pub fn filters(&self) -> usize {
        self.base_filters * self.scale_model
    }
}

/// Training-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfigFile {
    /// Number of epochs
    pub epochs: usize,
    /// Generator learning rate
    pub gen_lr: f64,
    /// Discriminator learning rate
    pub disc_lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    /// Discriminator updates per batch
    pub disc_steps: usize,
    /// Generator updates per batch
    pub gen_steps: usize,
    /// Use label smoothing
    pub label_smoothing: bool,
    pub smooth_real: f64,
    pub smooth_fake: f64,
    /// Batch pairs scored per evaluation
    pub eval_batches: usize,
    /// Checkpoint save frequency in epochs
    pub checkpoint_every: usize,
    /// Mid-epoch checkpoint frequency in steps, 0 disables
    pub save_every_steps: usize,
    /// Step logging frequency
    pub log_every: usize,
    /// Checkpoint directory
    pub checkpoint_dir: String,
    /// Newest checkpoints kept on disk, 0 keeps all
    pub max_to_keep: usize,
    /// Extra attempts after a failed checkpoint write
    pub checkpoint_retries: usize,
    /// Device: "cpu" or "cuda"
    pub device: String,
    /// Seed for latent noise
    pub seed: Option<u64>,
}

impl Default for TrainingConfigFile {
    fn default() -> Self {
        Self {
            epochs: 10,
            gen_lr: 2e-4,
            disc_lr: 2e-4,
            beta1: 0.5,
            beta2: 0.999,
            disc_steps: 1,
            gen_steps: 1,
            label_smoothing: false,
            smooth_real: 0.9,
            smooth_fake: 0.1,
            eval_batches: 4,
            checkpoint_every: 1,
            save_every_steps: 0,
            log_every: 7,
            checkpoint_dir: "checkpoints".to_string(),
            max_to_keep: 3,
            checkpoint_retries: 2,
            device: "cpu".to_string(),
            seed: None,
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving generated samples
    pub out_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            out_dir: "./output".to_string(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration, picking the format from the file extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if is_toml(path) {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Save configuration, picking the format from the file extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if is_toml(path) {
            self.save_toml(path)
        } else {
            self.save_json(path)
        }
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get device from configuration
    pub fn get_device(&self) -> Result<Device> {
        match self.training.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                let device = Device::cuda_if_available(0)?;
                if device.is_cpu() {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                }
                Ok(device)
            }
            _ => Ok(Device::Cpu),
        }
    }

    /// Checkpoint root directory
    pub fn checkpoint_dir(&self) -> PathBuf {
        PathBuf::from(&self.training.checkpoint_dir)
    }

    /// Runtime view used by the training loop
    pub fn training_config(&self) -> TrainingConfig {
        let t = &self.training;
        TrainingConfig {
            batch_size: self.data.batch_size,
            image_size: self.data.image_size,
            channels: self.data.channels,
            gen_lr: t.gen_lr,
            disc_lr: t.disc_lr,
            beta1: t.beta1,
            beta2: t.beta2,
            disc_steps: t.disc_steps,
            gen_steps: t.gen_steps,
            label_smoothing: t.label_smoothing,
            smooth_real: t.smooth_real,
            smooth_fake: t.smooth_fake,
            eval_batches: t.eval_batches,
            checkpoint_every: t.checkpoint_every,
            save_every_steps: t.save_every_steps,
            log_every: t.log_every,
            seed: t.seed,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(msg));

        if self.data.batch_size == 0 {
            return fail("Batch size must be > 0".into());
        }
        if resolution_stages(self.data.image_size).is_none() {
            return fail(format!(
                "Image size must be 4 * 2^k with k >= 1, got {}",
                self.data.image_size
            ));
        }
        if !matches!(self.data.channels, 1 | 3) {
            return fail(format!("Channels must be 1 or 3, got {}", self.data.channels));
        }
        if self.model.latent_dim == 0 {
            return fail("Latent dimension must be > 0".into());
        }
        if self.model.filters() == 0 {
            return fail("Model width (base_filters * scale_model) must be > 0".into());
        }
        if self.training.epochs == 0 {
            return fail("Number of epochs must be > 0".into());
        }
        if self.training.eval_batches == 0 {
            return fail("eval_batches must be > 0".into());
        }
        if self.training.checkpoint_every == 0 {
            return fail("checkpoint_every must be > 0".into());
        }
        if self.training.disc_steps == 0 || self.training.gen_steps == 0 {
            return fail("disc_steps and gen_steps must be > 0".into());
        }
        for (name, lr) in [("gen_lr", self.training.gen_lr), ("disc_lr", self.training.disc_lr)] {
            if !(lr > 0.0 && lr.is_finite()) {
                return fail(format!("{name} must be a positive number, got {lr}"));
            }
        }
        for (name, beta) in [("beta1", self.training.beta1), ("beta2", self.training.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return fail(format!("{name} must be in [0, 1), got {beta}"));
            }
        }
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().map(|e| e == "toml").unwrap_or(false)
}

/// Create default configuration file if it doesn't exist
pub fn ensure_config_exists(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if path.exists() {
        Config::load(path)
    } else {
        let config = Config::default();
        config.save(path)?;
        tracing::info!(path = %path.display(), "Wrote default configuration");
        Ok(config)
    }
}
