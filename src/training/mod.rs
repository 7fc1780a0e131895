//! Training module for DCGAN
//!
//! This module provides:
//! - Training loop implementation with evaluation and checkpoint hand-off
//! - Loss functions (Binary Cross Entropy)
//! - Adam optimizer with checkpointable state
//! - Fréchet distance scoring and epoch reporting
//! - Training configuration and metrics

mod fid;
mod losses;
mod metrics;
mod optimizer;
mod reporter;
mod state;
mod trainer;

pub use fid::{DistanceScorer, FrechetDistance};
pub use losses::{bce_with_logits, discriminator_loss, discriminator_loss_smoothed, generator_loss};
pub use metrics::{
    EMATracker, EpochAccumulator, EpochSummary, HistoryRow, LossRecord, PairScore, TrainingHistory,
};
pub use optimizer::{Adam, AdamParams, OptimizerState};
pub use reporter::{EpochReporter, SAVE_NOTICE};
pub use state::{StateSnapshot, TrainingState};
pub use trainer::{discriminator_step, generator_step, LatentSampler, Trainer, TrainingConfig};
