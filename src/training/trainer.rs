//! Training loop implementation for DCGAN
//!
//! Provides the main training loop with alternating discriminator and
//! generator updates, epoch-end evaluation and checkpointing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use super::fid::{DistanceScorer, FrechetDistance};
use super::losses::{discriminator_loss, discriminator_loss_smoothed, generator_loss};
use super::metrics::{
    EMATracker, EpochAccumulator, EpochSummary, LossRecord, PairScore, TrainingHistory,
};
use super::optimizer::{Adam, AdamParams};
use super::reporter::{EpochReporter, SAVE_NOTICE};
use super::state::TrainingState;
use crate::data::{Batch, DatasetSource};
use crate::error::{Error, Result};
use crate::model::{Dcgan, FeatureExtractor};
use crate::utils::CheckpointManager;

/// Epochs averaged by the mode-collapse heuristic
const MODE_COLLAPSE_WINDOW: usize = 5;

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Samples per real batch
    pub batch_size: usize,
    /// Side length of the square images
    pub image_size: usize,
    /// Image channels
    pub channels: usize,
    /// Learning rate for generator
    pub gen_lr: f64,
    /// Learning rate for discriminator
    pub disc_lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    /// Discriminator updates per batch
    pub disc_steps: usize,
    /// Generator updates per batch
    pub gen_steps: usize,
    /// Whether to use label smoothing
    pub label_smoothing: bool,
    /// Smooth label for real samples (e.g., 0.9)
    pub smooth_real: f64,
    /// Smooth label for fake samples (e.g., 0.1)
    pub smooth_fake: f64,
    /// Real/generated batch pairs scored at the end of each epoch
    pub eval_batches: usize,
    /// Save checkpoint every N epochs (0 saves only the final or a stopped epoch)
    pub checkpoint_every: usize,
    /// Save a mid-epoch checkpoint every N steps (0 disables)
    pub save_every_steps: usize,
    /// Log losses every N steps (0 disables)
    pub log_every: usize,
    /// Seed for latent noise; entropy when unset
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            image_size: 64,
            channels: 3,
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
            seed: None,
        }
    }
}

impl TrainingConfig {
    /// Adam settings for the generator
    pub fn generator_adam(&self) -> AdamParams {
        AdamParams {
            lr: self.gen_lr,
            beta1: self.beta1,
            beta2: self.beta2,
            ..Default::default()
        }
    }

    /// Adam settings for the discriminator
    pub fn discriminator_adam(&self) -> AdamParams {
        AdamParams {
            lr: self.disc_lr,
            beta1: self.beta1,
            beta2: self.beta2,
            ..Default::default()
        }
    }

    fn smoothing(&self) -> Option<(f64, f64)> {
        self.label_smoothing
            .then_some((self.smooth_real, self.smooth_fake))
    }
}

/// Uniform latent noise in `[-1, 1]`
pub struct LatentSampler {
    rng: StdRng,
    latent_dim: usize,
    device: Device,
}

impl LatentSampler {
    pub fn new(latent_dim: usize, seed: Option<u64>, device: &Device) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            latent_dim,
            device: device.clone(),
        }
    }

    /// Noise of shape `(n, latent_dim)`
    pub fn sample(&mut self, n: usize) -> Result<Tensor> {
        let values: Vec<f32> = (0..n * self.latent_dim)
            .map(|_| self.rng.gen_range(-1.0..=1.0))
            .collect();
        Ok(Tensor::from_vec(values, (n, self.latent_dim), &self.device)?)
    }
}

/// One discriminator update on a real batch and a detached generated batch.
///
/// Only `disc_opt`'s variables change. Returns the loss.
pub fn discriminator_step(
    gan: &Dcgan,
    disc_opt: &mut Adam,
    real: &Tensor,
    noise: &Tensor,
    smoothing: Option<(f64, f64)>,
) -> Result<f64> {
    let fake = gan.generator.forward(noise)?.detach();
    let real_output = gan.discriminator.forward(real)?;
    let fake_output = gan.discriminator.forward(&fake)?;

    let loss = match smoothing {
        Some((smooth_real, smooth_fake)) => {
            discriminator_loss_smoothed(&real_output, &fake_output, smooth_real, smooth_fake)?
        }
        None => discriminator_loss(&real_output, &fake_output)?,
    };

    disc_opt.backward_step(&loss)?;
    Ok(loss.to_scalar::<f32>()? as f64)
}

/// One generator update against the current discriminator.
///
/// Gradients reach the discriminator too, but only `gen_opt`'s variables
/// are stepped. Returns the loss.
pub fn generator_step(gan: &Dcgan, gen_opt: &mut Adam, noise: &Tensor) -> Result<f64> {
    let fake = gan.generator.forward(noise)?;
    let fake_output = gan.discriminator.forward(&fake)?;
    let loss = generator_loss(&fake_output)?;

    gen_opt.backward_step(&loss)?;
    Ok(loss.to_scalar::<f32>()? as f64)
}

enum EpochOutcome {
    Completed(EpochAccumulator),
    Interrupted { steps: usize },
}

/// DCGAN Trainer
pub struct Trainer {
    config: TrainingConfig,
    extractor: Arc<dyn FeatureExtractor>,
    scorer: Box<dyn DistanceScorer>,
    checkpoints: CheckpointManager,
    history: TrainingHistory,
    summaries: Vec<EpochSummary>,
    stop: Arc<AtomicBool>,
}

impl Trainer {
    /// Create a new trainer scoring with the Fréchet distance
    pub fn new(
        config: TrainingConfig,
        extractor: Arc<dyn FeatureExtractor>,
        checkpoints: CheckpointManager,
    ) -> Self {
        Self {
            config,
            extractor,
            scorer: Box::new(FrechetDistance),
            checkpoints,
            history: TrainingHistory::new(),
            summaries: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the distance metric
    pub fn with_scorer(mut self, scorer: impl DistanceScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    /// Continue a history restored from a checkpoint
    pub fn with_history(mut self, history: TrainingHistory) -> Self {
        self.history = history;
        self
    }

    /// Share an externally owned stop flag
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Flag that, once set, ends the run after the in-flight step
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Summaries of the epochs completed by this trainer
    pub fn summaries(&self) -> &[EpochSummary] {
        &self.summaries
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Get configuration
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    fn on_checkpoint_cadence(&self, completed_epochs: usize) -> bool {
        let every = self.config.checkpoint_every;
        every > 0 && completed_epochs % every == 0
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Train for up to `epochs_remaining` epochs starting at `state.epoch`.
    ///
    /// Every completed epoch is evaluated, reported and (per
    /// `checkpoint_every`, and always for the final or a stopped epoch)
    /// checkpointed. A stop request ends the run after the in-flight step
    /// with a mid-epoch checkpoint.
    pub fn run<S: DatasetSource>(
        &mut self,
        mut state: TrainingState,
        data: &mut S,
        epochs_remaining: usize,
    ) -> Result<TrainingState> {
        let mut sampler = LatentSampler::new(state.gan.latent_dim(), self.config.seed, state.gan.device());

        info!(
            start_epoch = state.epoch,
            epochs = epochs_remaining,
            batches_per_epoch = ?data.num_batches(),
            "Starting training"
        );

        for run_index in 0..epochs_remaining {
            let epoch = state.epoch;

            let accumulator = match self.train_epoch(&mut state, data, &mut sampler, epoch)? {
                EpochOutcome::Completed(acc) => acc,
                EpochOutcome::Interrupted { steps } => {
                    warn!(epoch, steps, "Stop requested, saving mid-epoch checkpoint");
                    let snapshot = state.snapshot(steps)?;
                    self.checkpoints.save(&snapshot, None, &self.history)?;
                    return Ok(state);
                }
            };

            // evaluation failures degrade the summary but never abort the epoch
            let (scores, evaluation_error) =
                match self.evaluate(&state.gan, data, &mut sampler, &accumulator) {
                    Ok(scores) => (scores, None),
                    Err(e) => {
                        error!(epoch, error = %e, "Evaluation failed, skipping scores for this epoch");
                        (Vec::new(), Some(e.to_string()))
                    }
                };

            let summary = accumulator.finish(scores, evaluation_error);
            print!("{}", EpochReporter::render(&summary));

            self.history.record(&summary);
            if self.history.check_mode_collapse(MODE_COLLAPSE_WINDOW) {
                warn!("Possible mode collapse detected! Consider adjusting learning rates.");
            }

            state.epoch += 1;
            let stopping = self.stop_requested();
            let last = run_index + 1 == epochs_remaining;

            if self.on_checkpoint_cadence(state.epoch) || last || stopping {
                println!("{SAVE_NOTICE}");
                let snapshot = state.snapshot(0)?;
                self.checkpoints.save(&snapshot, Some(&summary), &self.history)?;
            }

            self.summaries.push(summary);

            if stopping {
                info!(completed_epochs = state.epoch, "Stop requested, ending run");
                break;
            }
        }

        Ok(state)
    }

    fn train_epoch<S: DatasetSource>(
        &mut self,
        state: &mut TrainingState,
        data: &mut S,
        sampler: &mut LatentSampler,
        epoch: usize,
    ) -> Result<EpochOutcome> {
        let mut accumulator = EpochAccumulator::new(epoch);
        let mut gen_ema = EMATracker::new(0.1);
        let mut disc_ema = EMATracker::new(0.1);

        let pb = progress_bar(data.num_batches());

        for (step, batch) in data.iterate_epoch().enumerate() {
            // the previous step is finished, so stopping here loses nothing
            if self.stop_requested() {
                pb.abandon();
                return Ok(EpochOutcome::Interrupted { steps: step });
            }

            let batch = batch.map_err(|e| Error::data(epoch, step, e.to_string()))?;
            self.validate_batch(&batch, epoch, step)?;

            let record = self
                .train_step(state, &batch, sampler)
                .map_err(|e| Error::data(epoch, step, e.to_string()))?;
            accumulator.push(record);

            gen_ema.update(record.generator_loss);
            disc_ema.update(record.discriminator_loss);
            pb.set_message(format!("G: {:.4}, D: {:.4}", gen_ema.value(), disc_ema.value()));
            pb.inc(1);

            if self.config.log_every > 0 && step % self.config.log_every == 0 {
                debug!(
                    epoch,
                    step,
                    discriminator_loss = record.discriminator_loss,
                    generator_loss = record.generator_loss,
                    "Training step"
                );
            }

            let completed = step + 1;
            if self.config.save_every_steps > 0 && completed % self.config.save_every_steps == 0 {
                let snapshot = state.snapshot(completed)?;
                self.checkpoints.save(&snapshot, None, &self.history)?;
            }
        }

        pb.finish_with_message("done");
        info!(
            epoch,
            steps = accumulator.len(),
            generator_loss = accumulator.mean().generator_loss,
            discriminator_loss = accumulator.mean().discriminator_loss,
            "Epoch finished"
        );

        Ok(EpochOutcome::Completed(accumulator))
    }

    fn validate_batch(&self, batch: &Batch, epoch: usize, step: usize) -> Result<()> {
        let expected = [
            self.config.batch_size,
            self.config.channels,
            self.config.image_size,
            self.config.image_size,
        ];
        if batch.dims() != expected.as_slice() {
            return Err(Error::data(
                epoch,
                step,
                format!("expected batch of shape {:?}, got {:?}", expected, batch.dims()),
            ));
        }
        Ok(())
    }

    fn train_step(
        &self,
        state: &mut TrainingState,
        real: &Tensor,
        sampler: &mut LatentSampler,
    ) -> Result<LossRecord> {
        let n = real.dim(0)?;
        let smoothing = self.config.smoothing();

        let mut record = LossRecord::default();
        for _ in 0..self.config.disc_steps {
            let noise = sampler.sample(n)?;
            record.discriminator_loss =
                discriminator_step(&state.gan, &mut state.disc_opt, real, &noise, smoothing)?;
        }
        for _ in 0..self.config.gen_steps {
            let noise = sampler.sample(n)?;
            record.generator_loss = generator_step(&state.gan, &mut state.gen_opt, &noise)?;
        }

        Ok(record)
    }

    /// Score `eval_batches` fresh real batches against generated ones.
    ///
    /// Runs strictly after the epoch's last update, so it sees the
    /// epoch-final weights.
    fn evaluate<S: DatasetSource>(
        &self,
        gan: &Dcgan,
        data: &mut S,
        sampler: &mut LatentSampler,
        accumulator: &EpochAccumulator,
    ) -> Result<Vec<PairScore>> {
        let pairs = self.config.eval_batches;
        let mut scores = Vec::with_capacity(pairs);
        let mut real_batches = data.iterate_epoch().take(pairs);

        for pair in 0..pairs {
            let Some(real) = real_batches.next() else {
                warn!(pair, requested = pairs, "Dataset ran out of batches during evaluation");
                break;
            };
            let real = real?;
            let fake = gan.generate(&sampler.sample(real.dim(0)?)?)?;

            let real_embeddings = self.extractor.embed(&real)?;
            let fake_embeddings = self.extractor.embed(&fake)?;

            match self.scorer.score(&real_embeddings, &fake_embeddings) {
                Ok(distance) => scores.push(PairScore {
                    pair,
                    distance,
                    losses: accumulator.representative(pair, pairs),
                }),
                Err(e) if e.is_recoverable() => {
                    warn!(pair, error = %e, "Skipping evaluation pair");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(scores)
    }
}

fn progress_bar(len: Option<usize>) -> ProgressBar {
    match len {
        Some(len) => {
            let pb = ProgressBar::new(len as u64);
            if let Ok(style) =
                ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("##-"));
            }
            pb
        }
        None => ProgressBar::new_spinner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_training_config_default() {
        let config = TrainingConfig::default();
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.eval_batches, 4);
        assert_eq!(config.checkpoint_every, 1);
        assert_eq!(config.disc_steps, 1);
        assert_eq!(config.generator_adam().beta1, 0.5);
        assert_eq!(config.smoothing(), None);
    }

    #[test]
    fn test_latent_sampler_range_and_seed() {
        let mut a = LatentSampler::new(5, Some(9), &Device::Cpu);
        let mut b = LatentSampler::new(5, Some(9), &Device::Cpu);

        let x = a.sample(4).unwrap();
        assert_eq!(x.dims(), &[4, 5]);
        assert_eq!(x.dtype(), DType::F32);

        let xs: Vec<f32> = x.flatten_all().unwrap().to_vec1().unwrap();
        let ys: Vec<f32> = b.sample(4).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
