//! Integration tests for the DCGAN training loop
//!
//! Tests the complete workflow: training, evaluation, reporting,
//! checkpointing and resuming. Models are tiny (8x8 images) so everything
//! runs on CPU.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use tempfile::TempDir;

use rust_dcgan_celeba::{
    data::{Batch, DataLoader, DatasetSource, ImageFolder, Prefetched},
    error::{Error, Result},
    model::{Dcgan, FeatureExtractor, FrozenConvExtractor},
    training::{
        discriminator_step, generator_step, DistanceScorer, EpochReporter, FrechetDistance,
        LatentSampler, Trainer, TrainingConfig, TrainingState,
    },
    utils::CheckpointManager,
};

const IMAGE_SIZE: usize = 8;
const CHANNELS: usize = 3;
const LATENT_DIM: usize = 8;

fn tiny_config(batch_size: usize) -> TrainingConfig {
    TrainingConfig {
        batch_size,
        image_size: IMAGE_SIZE,
        channels: CHANNELS,
        eval_batches: 2,
        checkpoint_every: 1,
        log_every: 0,
        seed: Some(7),
        ..Default::default()
    }
}

fn tiny_state() -> TrainingState {
    let gan = Dcgan::with_defaults(IMAGE_SIZE, CHANNELS, LATENT_DIM, 4, &Device::Cpu).unwrap();
    let config = tiny_config(4);
    TrainingState::new(gan, config.generator_adam(), config.discriminator_adam()).unwrap()
}

/// `num_batches` fixed batches of random images in [-1, 1]
fn toy_loader(num_batches: usize, batch_size: usize) -> DataLoader {
    let data = Tensor::rand(
        -1f32,
        1f32,
        (num_batches * batch_size, CHANNELS, IMAGE_SIZE, IMAGE_SIZE),
        &Device::Cpu,
    )
    .unwrap();
    DataLoader::new(data, batch_size, true, true)
        .unwrap()
        .with_seed(3)
}

fn extractor() -> Arc<dyn FeatureExtractor> {
    Arc::new(FrozenConvExtractor::seeded(CHANNELS, &[4, 8], 0, &Device::Cpu).unwrap())
}

fn manager(root: &Path) -> CheckpointManager {
    CheckpointManager::new(root, 0, &Device::Cpu)
}

fn trainer(config: TrainingConfig, root: &Path) -> Trainer {
    Trainer::new(config, extractor(), manager(root))
}

fn flat(map: &HashMap<String, Tensor>) -> Vec<(String, Vec<f32>)> {
    let mut out: Vec<_> = map
        .iter()
        .map(|(k, t)| (k.clone(), t.flatten_all().unwrap().to_vec1::<f32>().unwrap()))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn checkpoint_tags(root: &Path) -> Vec<(usize, usize)> {
    manager(root)
        .list()
        .unwrap()
        .into_iter()
        .map(|(epoch, step, _)| (epoch, step))
        .collect()
}

#[test]
fn test_end_to_end_single_epoch() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(8, 4);
    let mut trainer = trainer(tiny_config(4), dir.path());

    let state = trainer.run(tiny_state(), &mut data, 1).unwrap();

    assert_eq!(state.epoch, 1);
    assert_eq!(trainer.summaries().len(), 1);

    let summary = &trainer.summaries()[0];
    assert_eq!(summary.steps, 8);
    assert_eq!(summary.scores.len(), 2);
    assert!(summary.distance_scores().iter().all(|s| *s >= 0.0));
    assert!(summary.average_fid.is_some());

    assert_eq!(checkpoint_tags(dir.path()), vec![(1, 0)]);

    let report = EpochReporter::render(summary);
    assert!(report.contains("Average FID for Epoch:"));
    assert!(report.starts_with("========================== EPOCH 0  =========================="));
    assert_eq!(report.matches("INCEPTION DISTANCE").count(), 2);

    let loaded = manager(dir.path()).load_latest().unwrap().unwrap();
    let saved_summary = loaded.meta.summary.unwrap();
    assert_eq!(saved_summary.epoch, 0);
    assert_eq!(saved_summary.scores.len(), 2);
    assert_eq!(loaded.history.num_epochs(), 1);
}

#[test]
fn test_epoch_counter_increments_by_one() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(2, 4);
    let mut trainer = trainer(tiny_config(4), dir.path());

    let state = trainer.run(tiny_state(), &mut data, 3).unwrap();

    assert_eq!(state.epoch, 3);
    let epochs: Vec<usize> = trainer.summaries().iter().map(|s| s.epoch).collect();
    assert_eq!(epochs, vec![0, 1, 2]);
    assert_eq!(checkpoint_tags(dir.path()), vec![(3, 0), (2, 0), (1, 0)]);
}

#[test]
fn test_checkpoint_every_n_epochs_and_final() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(2, 4);
    let config = TrainingConfig {
        checkpoint_every: 2,
        ..tiny_config(4)
    };
    let mut trainer = trainer(config, dir.path());

    trainer.run(tiny_state(), &mut data, 3).unwrap();

    // epoch 2 by cadence, epoch 3 because the run ends there
    assert_eq!(checkpoint_tags(dir.path()), vec![(3, 0), (2, 0)]);
}

#[test]
fn test_zero_checkpoint_cadence_saves_final_epoch_only() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(2, 4);
    let config = TrainingConfig {
        checkpoint_every: 0,
        ..tiny_config(4)
    };
    let mut trainer = trainer(config, dir.path());

    let state = trainer.run(tiny_state(), &mut data, 2).unwrap();

    assert_eq!(state.epoch, 2);
    assert_eq!(checkpoint_tags(dir.path()), vec![(2, 0)]);
}

#[test]
fn test_fresh_run_checkpoint_survives_retention() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(2, 4);

    // an earlier run left epochs 1..=3 behind
    let mut earlier = trainer(tiny_config(4), dir.path());
    earlier.run(tiny_state(), &mut data, 3).unwrap();

    let retained = CheckpointManager::new(dir.path(), 2, &Device::Cpu);
    let mut fresh = Trainer::new(tiny_config(4), extractor(), retained);
    fresh.run(tiny_state(), &mut data, 1).unwrap();

    let tags = checkpoint_tags(dir.path());
    assert_eq!(tags, vec![(3, 0), (1, 0)]);
    assert!(manager(dir.path())
        .load(dir.path().join("checkpoint_epoch_0001"))
        .is_ok());
}

#[test]
fn test_resume_after_crash_continues_at_next_epoch() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(2, 4);

    let mut first = trainer(tiny_config(4), dir.path());
    first.run(tiny_state(), &mut data, 3).unwrap();
    // process dies here, before epoch 4 starts

    let loaded = manager(dir.path()).load_latest().unwrap().unwrap();
    assert_eq!(loaded.meta.epoch, 3);

    let mut state = tiny_state();
    state.restore(&loaded.snapshot).unwrap();
    assert_eq!(state.epoch, 3);

    let mut second = trainer(tiny_config(4), dir.path()).with_history(loaded.history);
    let state = second.run(state, &mut data, 1).unwrap();

    assert_eq!(state.epoch, 4);
    assert_eq!(second.summaries()[0].epoch, 3);
    assert_eq!(second.history().num_epochs(), 4);
    assert_eq!(checkpoint_tags(dir.path())[0], (4, 0));
}

#[test]
fn test_save_load_roundtrip_restores_state() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(3, 4);
    let mut trainer = trainer(tiny_config(4), dir.path());
    let state = trainer.run(tiny_state(), &mut data, 1).unwrap();

    let saved = state.snapshot(0).unwrap();
    let loaded = manager(dir.path()).load_latest().unwrap().unwrap();

    assert_eq!(flat(&loaded.snapshot.generator), flat(&saved.generator));
    assert_eq!(flat(&loaded.snapshot.discriminator), flat(&saved.discriminator));
    assert_eq!(
        flat(&loaded.snapshot.generator_optimizer.moments),
        flat(&saved.generator_optimizer.moments)
    );
    assert_eq!(loaded.snapshot.generator_optimizer.step, 3);
    assert_eq!(loaded.snapshot.discriminator_optimizer.step, 3);

    let mut restored = tiny_state();
    restored.restore(&loaded.snapshot).unwrap();
    assert_eq!(restored.epoch, state.epoch);
    assert_eq!(restored.gen_opt.step_count(), state.gen_opt.step_count());

    let noise = LatentSampler::new(LATENT_DIM, Some(1), &Device::Cpu).sample(2).unwrap();
    let a: Vec<f32> = state.gan.generate(&noise).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    let b: Vec<f32> = restored.gan.generate(&noise).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_corrupt_checkpoint_falls_back_to_older() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(2, 4);
    let mut trainer = trainer(tiny_config(4), dir.path());
    trainer.run(tiny_state(), &mut data, 2).unwrap();

    let newest = dir.path().join("checkpoint_epoch_0002");
    fs::write(newest.join("generator.safetensors"), b"truncated").unwrap();

    let loaded = manager(dir.path()).load_latest().unwrap().unwrap();
    assert_eq!(loaded.meta.epoch, 1);

    assert!(matches!(
        manager(dir.path()).load(&newest),
        Err(Error::CheckpointCorrupt { .. })
    ));
}

#[test]
fn test_no_valid_checkpoint_means_fresh_start() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(2, 4);
    let mut trainer = trainer(tiny_config(4), dir.path());
    trainer.run(tiny_state(), &mut data, 1).unwrap();

    fs::remove_file(dir.path().join("checkpoint_epoch_0001/meta.json")).unwrap();
    assert!(manager(dir.path()).load_latest().unwrap().is_none());
}

#[test]
fn test_gradient_isolation() {
    let mut state = tiny_state();
    let mut sampler = LatentSampler::new(LATENT_DIM, Some(5), &Device::Cpu);
    let real = Tensor::rand(-1f32, 1f32, (4, CHANNELS, IMAGE_SIZE, IMAGE_SIZE), &Device::Cpu).unwrap();

    // generator-only step leaves the discriminator untouched
    let before = state.snapshot(0).unwrap();
    let noise = sampler.sample(4).unwrap();
    generator_step(&state.gan, &mut state.gen_opt, &noise).unwrap();
    let after = state.snapshot(0).unwrap();
    assert_eq!(flat(&after.discriminator), flat(&before.discriminator));
    assert_ne!(flat(&after.generator), flat(&before.generator));
    assert_eq!(state.disc_opt.step_count(), 0);

    // discriminator-only step leaves the generator untouched
    let before = after;
    let noise = sampler.sample(4).unwrap();
    discriminator_step(&state.gan, &mut state.disc_opt, &real, &noise, None).unwrap();
    let after = state.snapshot(0).unwrap();
    assert_eq!(flat(&after.generator), flat(&before.generator));
    assert_ne!(flat(&after.discriminator), flat(&before.discriminator));
    assert_eq!(state.gen_opt.step_count(), 1);
}

#[test]
fn test_identical_embeddings_score_zero() {
    let batch = Tensor::rand(-1f32, 1f32, (6, CHANNELS, IMAGE_SIZE, IMAGE_SIZE), &Device::Cpu).unwrap();
    let extractor = extractor();
    let embeddings = extractor.embed(&batch).unwrap();
    assert_eq!(embeddings[0].len(), extractor.embedding_dim());

    let score = FrechetDistance.score(&embeddings, &embeddings).unwrap();
    assert!(score.abs() < 1e-4, "score = {score}");
}

#[test]
fn test_insufficient_samples_skips_pairs_only() {
    let dir = TempDir::new().unwrap();
    // batches of one sample cannot produce a covariance estimate
    let mut data = toy_loader(4, 1);
    let mut trainer = trainer(tiny_config(1), dir.path());

    let state = trainer.run(tiny_state(), &mut data, 1).unwrap();

    let summary = &trainer.summaries()[0];
    assert!(summary.scores.is_empty());
    assert_eq!(summary.average_fid, None);
    assert_eq!(summary.evaluation_error, None);
    assert_eq!(state.epoch, 1);
    assert_eq!(checkpoint_tags(dir.path()), vec![(1, 0)]);

    let one = vec![vec![0.0; 3]];
    assert!(matches!(
        FrechetDistance.score(&one, &one),
        Err(Error::InsufficientSamples { real: 1, fake: 1 })
    ));
}

/// Yields good batches, then a malformed one at `bad_at`
struct FlakySource {
    good: Tensor,
    bad_at: usize,
    len: usize,
}

impl DatasetSource for FlakySource {
    type Iter = std::vec::IntoIter<Result<Batch>>;

    fn iterate_epoch(&mut self) -> Self::Iter {
        (0..self.len)
            .map(|i| -> Result<Batch> {
                if i == self.bad_at {
                    Ok(self.good.narrow(0, 0, 3)?)
                } else {
                    Ok(self.good.clone())
                }
            })
            .collect::<Vec<_>>()
            .into_iter()
    }
}

#[test]
fn test_malformed_batch_aborts_run() {
    let dir = TempDir::new().unwrap();
    let good = Tensor::rand(-1f32, 1f32, (4, CHANNELS, IMAGE_SIZE, IMAGE_SIZE), &Device::Cpu).unwrap();
    let mut data = FlakySource {
        good,
        bad_at: 2,
        len: 5,
    };
    let mut trainer = trainer(tiny_config(4), dir.path());

    let err = trainer.run(tiny_state(), &mut data, 1).err().unwrap();
    assert!(matches!(err, Error::Data { epoch: 0, step: 2, .. }));
    assert!(err.is_fatal());
    assert!(checkpoint_tags(dir.path()).is_empty());
}

struct BrokenExtractor;

impl FeatureExtractor for BrokenExtractor {
    fn embed(&self, _batch: &Tensor) -> Result<Vec<Vec<f64>>> {
        Err(Error::Evaluation("extractor weights unavailable".to_string()))
    }

    fn embedding_dim(&self) -> usize {
        0
    }
}

#[test]
fn test_evaluation_failure_still_checkpoints() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(2, 4);
    let mut trainer = Trainer::new(tiny_config(4), Arc::new(BrokenExtractor), manager(dir.path()));

    let state = trainer.run(tiny_state(), &mut data, 1).unwrap();

    assert_eq!(state.epoch, 1);
    let summary = &trainer.summaries()[0];
    assert!(summary.scores.is_empty());
    assert!(summary
        .evaluation_error
        .as_deref()
        .unwrap()
        .contains("extractor weights unavailable"));
    assert_eq!(checkpoint_tags(dir.path()), vec![(1, 0)]);
    assert!(EpochReporter::render(summary).contains("Average FID for Epoch: unavailable"));
}

/// Scores every pair with a fixed distance
struct ConstantScorer(f64);

impl DistanceScorer for ConstantScorer {
    fn score(&self, _real: &[Vec<f64>], _fake: &[Vec<f64>]) -> Result<f64> {
        Ok(self.0)
    }
}

#[test]
fn test_custom_scorer_feeds_average() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(4, 4);
    let mut trainer = trainer(tiny_config(4), dir.path()).with_scorer(ConstantScorer(12.5));

    trainer.run(tiny_state(), &mut data, 1).unwrap();

    let summary = &trainer.summaries()[0];
    assert_eq!(summary.distance_scores(), vec![12.5, 12.5]);
    assert_eq!(summary.average_fid, Some(12.5));
    // pair i reports step i * steps / pairs
    assert_eq!(summary.scores[1].pair, 1);
}

/// Raises the stop flag when handing out batch `after`
struct StopAfter {
    inner: DataLoader,
    stop: Arc<AtomicBool>,
    after: usize,
}

struct StopAfterIter {
    inner: <DataLoader as DatasetSource>::Iter,
    stop: Arc<AtomicBool>,
    after: usize,
    position: usize,
}

impl Iterator for StopAfterIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position == self.after {
            self.stop.store(true, Ordering::SeqCst);
        }
        self.position += 1;
        self.inner.next()
    }
}

impl DatasetSource for StopAfter {
    type Iter = StopAfterIter;

    fn iterate_epoch(&mut self) -> StopAfterIter {
        StopAfterIter {
            inner: self.inner.iterate_epoch(),
            stop: Arc::clone(&self.stop),
            after: self.after,
            position: 0,
        }
    }

    fn num_batches(&self) -> Option<usize> {
        self.inner.num_batches()
    }
}

#[test]
fn test_stop_signal_checkpoints_in_flight_work() {
    let dir = TempDir::new().unwrap();
    let mut first = trainer(tiny_config(4), dir.path());
    let mut data = StopAfter {
        inner: toy_loader(6, 4),
        stop: first.stop_handle(),
        after: 3,
    };

    let state = first.run(tiny_state(), &mut data, 2).unwrap();

    // three steps finished, no epoch completed
    assert_eq!(state.epoch, 0);
    assert_eq!(state.gen_opt.step_count(), 3);
    assert!(first.summaries().is_empty());
    assert_eq!(checkpoint_tags(dir.path()), vec![(0, 3)]);

    let loaded = manager(dir.path()).load_latest().unwrap().unwrap();
    let mut resumed = tiny_state();
    resumed.restore(&loaded.snapshot).unwrap();
    assert_eq!(resumed.gen_opt.step_count(), 3);

    let mut second = trainer(tiny_config(4), dir.path());
    let mut data = toy_loader(6, 4);
    let resumed = second.run(resumed, &mut data, 1).unwrap();
    assert_eq!(resumed.epoch, 1);
    assert_eq!(checkpoint_tags(dir.path())[0], (1, 0));
}

#[test]
fn test_stop_between_epochs_keeps_completed_epoch() {
    let dir = TempDir::new().unwrap();
    let mut trainer = trainer(tiny_config(4), dir.path());
    let mut data = StopAfter {
        inner: toy_loader(2, 4),
        stop: trainer.stop_handle(),
        // the third next() call ends the first epoch
        after: 2,
    };

    let state = trainer.run(tiny_state(), &mut data, 5).unwrap();

    assert_eq!(state.epoch, 1);
    assert_eq!(trainer.summaries().len(), 1);
    assert_eq!(checkpoint_tags(dir.path()), vec![(1, 0)]);
}

#[test]
fn test_checkpoint_write_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    // a regular file where the checkpoint directory should be
    let blocked = dir.path().join("checkpoints");
    fs::write(&blocked, b"not a directory").unwrap();

    let mut data = toy_loader(2, 4);
    let checkpoints = CheckpointManager::new(&blocked, 3, &Device::Cpu).with_retries(2);
    let mut trainer = Trainer::new(tiny_config(4), extractor(), checkpoints);

    let err = trainer.run(tiny_state(), &mut data, 1).err().unwrap();
    assert!(matches!(err, Error::CheckpointWrite { epoch: 1, .. }));
}

#[test]
fn test_mid_epoch_saves() {
    let dir = TempDir::new().unwrap();
    let mut data = toy_loader(4, 4);
    let config = TrainingConfig {
        save_every_steps: 2,
        ..tiny_config(4)
    };
    let mut trainer = trainer(config, dir.path());

    trainer.run(tiny_state(), &mut data, 1).unwrap();

    assert_eq!(checkpoint_tags(dir.path()), vec![(1, 0), (0, 4), (0, 2)]);
}

#[test]
fn test_image_folder_with_prefetch() {
    let images = TempDir::new().unwrap();
    for i in 0..8u8 {
        let img = image::RgbImage::from_fn(16, 16, |x, y| {
            image::Rgb([i * 30, (x * 16) as u8, (y * 16) as u8])
        });
        img.save(images.path().join(format!("{i}.png"))).unwrap();
    }

    let folder = ImageFolder::open(images.path(), 4, IMAGE_SIZE, CHANNELS, Device::Cpu)
        .unwrap()
        .with_seed(1);
    let mut data = Prefetched::new(folder, 2);

    let dir = TempDir::new().unwrap();
    let mut trainer = trainer(tiny_config(4), dir.path());
    let state = trainer.run(tiny_state(), &mut data, 1).unwrap();

    assert_eq!(state.epoch, 1);
    assert_eq!(trainer.summaries()[0].steps, 2);
    assert_eq!(trainer.summaries()[0].scores.len(), 2);
}
