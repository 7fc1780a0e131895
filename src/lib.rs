//! # DCGAN on CelebA-style image folders
//!
//! This crate provides a modular implementation of a Deep Convolutional
//! Generative Adversarial Network trained on a directory of face images,
//! scored every epoch with a Fréchet (FID-style) distance and checkpointed
//! atomically so a run can always resume from its last completed epoch.
//!
//! ## Modules
//!
//! - `data`: Dataset sources, image decoding and background prefetching
//! - `model`: DCGAN architecture (Generator, Discriminator) and the frozen feature extractor
//! - `training`: Training loop, losses, optimizer, distance metric and reporting
//! - `utils`: Configuration and checkpoint management
//! - `error`: Crate error type

pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{save_images, DataLoader, DatasetSource, ImageFolder, Prefetched};
pub use error::{Error, Result};
pub use model::{Dcgan, Discriminator, FeatureExtractor, FrozenConvExtractor, Generator};
pub use training::{
    DistanceScorer, EpochReporter, EpochSummary, FrechetDistance, Trainer, TrainingConfig,
    TrainingHistory, TrainingState,
};
pub use utils::{CheckpointManager, Config};
