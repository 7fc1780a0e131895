//! DCGAN training on image folders
//!
//! Main entry point providing CLI interface for:
//! - Training the DCGAN with per-epoch FID scoring and checkpoints
//! - Generating sample images from the latest checkpoint
//! - Writing a default configuration file

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use candle_core::Device;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use rust_dcgan_celeba::{
    data::{save_images, ImageFolder, Prefetched},
    error::Error,
    model::{Dcgan, FeatureExtractor, FrozenConvExtractor},
    training::{LatentSampler, Trainer, TrainingHistory, TrainingState},
    utils::{CheckpointManager, Config},
};

/// DCGAN trained on a folder of images
#[derive(Parser)]
#[command(name = "rust_dcgan_celeba")]
#[command(version = "0.1.0")]
#[command(about = "Train a DCGAN on an image folder with FID scoring and atomic checkpoints")]
struct Cli {
    /// Path to configuration file (.json or .toml)
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the DCGAN model
    Train {
        /// Directory of training images
        #[arg(long)]
        img_dir: Option<String>,

        /// Total number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Resume from the latest valid checkpoint. Without it training starts
        /// at epoch 0, even when the checkpoint directory already holds checkpoints
        #[arg(long)]
        restore_checkpoint: bool,

        /// Batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Latent dimension
        #[arg(long)]
        latent_dim: Option<usize>,

        /// Learning rate for both networks
        #[arg(long)]
        learn_rate: Option<f64>,

        /// Batch pairs scored per evaluation
        #[arg(long)]
        eval_batches: Option<usize>,

        /// Checkpoint directory
        #[arg(long)]
        checkpoint_dir: Option<String>,

        /// Device: cpu or cuda
        #[arg(long)]
        device: Option<String>,
    },

    /// Generate sample images from the latest checkpoint
    Generate {
        /// Output directory
        #[arg(short, long)]
        out_dir: Option<String>,

        /// Number of images (defaults to the batch size)
        #[arg(short, long)]
        num_samples: Option<usize>,
    },

    /// Initialize default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.json")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Train {
            img_dir,
            epochs,
            restore_checkpoint,
            batch_size,
            latent_dim,
            learn_rate,
            eval_batches,
            checkpoint_dir,
            device,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(dir) = img_dir {
                config.data.img_dir = dir;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.data.batch_size = batch_size;
            }
            if let Some(latent_dim) = latent_dim {
                config.model.latent_dim = latent_dim;
            }
            if let Some(lr) = learn_rate {
                config.training.gen_lr = lr;
                config.training.disc_lr = lr;
            }
            if let Some(k) = eval_batches {
                config.training.eval_batches = k;
            }
            if let Some(dir) = checkpoint_dir {
                config.training.checkpoint_dir = dir;
            }
            if let Some(device) = device {
                config.training.device = device;
            }
            train_model(config, restore_checkpoint).await?;
        }
        Commands::Generate {
            out_dir,
            num_samples,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(dir) = out_dir {
                config.output.out_dir = dir;
            }
            let n = num_samples.unwrap_or(config.data.batch_size);
            generate_samples(&config, n)?;
        }
        Commands::Init { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Ok(Config::load(path)?)
    } else {
        info!("Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Fresh models and optimizers at epoch 0
fn build_state(config: &Config, device: &Device) -> Result<TrainingState> {
    let gan = Dcgan::with_defaults(
        config.data.image_size,
        config.data.channels,
        config.model.latent_dim,
        config.model.filters(),
        device,
    )?;
    let training = config.training_config();
    Ok(TrainingState::new(
        gan,
        training.generator_adam(),
        training.discriminator_adam(),
    )?)
}

fn build_extractor(config: &Config, device: &Device) -> Result<Arc<dyn FeatureExtractor>> {
    let extractor = match &config.model.feature_extractor_weights {
        Some(path) => FrozenConvExtractor::load(path, device)?,
        None => FrozenConvExtractor::seeded(
            config.data.channels,
            &FrozenConvExtractor::DEFAULT_WIDTHS,
            config.model.embedding_seed,
            device,
        )?,
    };

    if extractor.in_channels() != config.data.channels {
        anyhow::bail!(
            "feature extractor expects {} channels, images have {}",
            extractor.in_channels(),
            config.data.channels
        );
    }
    Ok(Arc::new(extractor))
}

fn checkpoint_manager(config: &Config, device: &Device) -> CheckpointManager {
    CheckpointManager::new(config.checkpoint_dir(), config.training.max_to_keep, device)
        .with_retries(config.training.checkpoint_retries)
}

/// Train the DCGAN model
async fn train_model(config: Config, restore: bool) -> Result<()> {
    config.validate()?;

    let device = config.get_device()?;
    info!("Using device: {:?}", device);

    let mut state = build_state(&config, &device)?;
    let checkpoints = checkpoint_manager(&config, &device);

    let mut history = TrainingHistory::new();
    if restore {
        match checkpoints.load_latest()? {
            Some(checkpoint) => {
                state.restore(&checkpoint.snapshot)?;
                history = checkpoint.history;
                info!(
                    path = %checkpoint.path.display(),
                    completed_epochs = state.epoch,
                    "Resumed from checkpoint"
                );
            }
            None => info!("No valid checkpoint found, starting from epoch 0"),
        }
    } else if let Some((epoch, step, path)) = checkpoints.list()?.into_iter().next() {
        warn!(
            path = %path.display(),
            epoch,
            step,
            "Checkpoint directory already holds checkpoints; starting a fresh run from epoch 0 \
             (pass --restore-checkpoint to resume, or pick another --checkpoint-dir)"
        );
    }

    let remaining = config.training.epochs.saturating_sub(state.epoch);
    if remaining == 0 {
        info!(epochs = config.training.epochs, "All epochs already completed");
        return Ok(());
    }

    let extractor = build_extractor(&config, &device)?;

    let mut folder = ImageFolder::open(
        &config.data.img_dir,
        config.data.batch_size,
        config.data.image_size,
        config.data.channels,
        device.clone(),
    )?;
    if !config.data.shuffle {
        folder = folder.without_shuffle();
    }
    if let Some(seed) = config.training.seed {
        folder = folder.with_seed(seed);
    }
    let mut data = Prefetched::new(folder, config.data.num_data_threads);

    let mut trainer =
        Trainer::new(config.training_config(), extractor, checkpoints).with_history(history);

    let stop = trainer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current step before saving");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let (state, trainer) = tokio::task::spawn_blocking(move || {
        let state = trainer.run(state, &mut data, remaining)?;
        Ok::<_, Error>((state, trainer))
    })
    .await??;

    match trainer.history().latest() {
        Some(row) => info!(
            completed_epochs = state.epoch,
            generator_loss = row.generator_loss,
            discriminator_loss = row.discriminator_loss,
            average_fid = ?row.average_fid,
            best_fid = ?trainer.history().best_fid(),
            "Training complete"
        ),
        None => info!(completed_epochs = state.epoch, "Training stopped"),
    }

    Ok(())
}

/// Generate sample images from the latest checkpoint
fn generate_samples(config: &Config, num_samples: usize) -> Result<()> {
    config.validate()?;
    let device = config.get_device()?;

    let mut state = build_state(config, &device)?;
    let checkpoints = checkpoint_manager(config, &device);
    let checkpoint = checkpoints
        .load_latest()?
        .ok_or_else(|| Error::CheckpointNotFound(config.checkpoint_dir()))?;
    state.restore(&checkpoint.snapshot)?;
    info!(path = %checkpoint.path.display(), "Loaded model");

    info!("Generating {} images", num_samples);
    let mut sampler = LatentSampler::new(state.gan.latent_dim(), config.training.seed, &device);
    let images = state.gan.generate(&sampler.sample(num_samples)?)?;
    save_images(&images, &config.output.out_dir)?;

    Ok(())
}

/// Initialize default configuration file
fn init_config(output: &str) -> Result<()> {
    let config = Config::default();
    config.save(output)?;
    info!("Created default configuration at {}", output);
    Ok(())
}
