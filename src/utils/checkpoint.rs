//! Checkpoint save/load utilities
//!
//! Each checkpoint is a directory `checkpoint_epoch_{epoch:04}` (or
//! `checkpoint_epoch_{epoch:04}_step_{step:06}` for a mid-epoch save) holding
//! the parameters and optimizer state of both networks, the training history
//! and a `meta.json` with SHA-256 checksums of every other file.
//!
//! Checkpoints are staged in a temporary directory next to the published
//! ones and become visible through a single `rename`, so readers never see a
//! partial checkpoint.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::training::{EpochSummary, OptimizerState, StateSnapshot, TrainingHistory};

/// Version written to `meta.json`; other versions are rejected on load
pub const FORMAT_VERSION: u32 = 1;

const PREFIX: &str = "checkpoint_epoch_";
const TMP_PREFIX: &str = ".tmp-";
const STALE_PREFIX: &str = ".stale-";

const META_FILE: &str = "meta.json";
const GENERATOR_FILE: &str = "generator.safetensors";
const DISCRIMINATOR_FILE: &str = "discriminator.safetensors";
const GENERATOR_OPT_FILE: &str = "generator_optimizer.safetensors";
const DISCRIMINATOR_OPT_FILE: &str = "discriminator_optimizer.safetensors";
const METRICS_FILE: &str = "metrics.csv";

const DATA_FILES: [&str; 5] = [
    GENERATOR_FILE,
    DISCRIMINATOR_FILE,
    GENERATOR_OPT_FILE,
    DISCRIMINATOR_OPT_FILE,
    METRICS_FILE,
];

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub format_version: u32,
    /// Completed epochs
    pub epoch: usize,
    /// Completed steps of the next epoch, 0 at an epoch boundary
    pub step: usize,
    pub generator_optimizer_step: usize,
    pub discriminator_optimizer_step: usize,
    /// Timestamp of checkpoint
    pub timestamp: String,
    pub summary: Option<EpochSummary>,
    /// SHA-256 of every data file, hex encoded
    pub checksums: BTreeMap<String, String>,
}

/// A checkpoint that passed its integrity check
#[derive(Debug, Clone)]
pub struct LoadedCheckpoint {
    pub path: PathBuf,
    pub meta: CheckpointMeta,
    pub snapshot: StateSnapshot,
    pub history: TrainingHistory,
}

/// Writes, lists, prunes and restores checkpoints under one root directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    root: PathBuf,
    max_to_keep: usize,
    retries: usize,
    device: Device,
}

impl CheckpointManager {
    /// `max_to_keep == 0` keeps every checkpoint
    pub fn new(root: impl Into<PathBuf>, max_to_keep: usize, device: &Device) -> Self {
        Self {
            root: root.into(),
            max_to_keep,
            retries: 0,
            device: device.clone(),
        }
    }

    /// Retry a failed write this many extra times before giving up
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name of the checkpoint tagged `(epoch, step)`
    pub fn checkpoint_name(epoch: usize, step: usize) -> String {
        if step == 0 {
            format!("{PREFIX}{epoch:04}")
        } else {
            format!("{PREFIX}{epoch:04}_step_{step:06}")
        }
    }

    /// Persist a snapshot, replacing any checkpoint with the same tag.
    ///
    /// Fails with `CheckpointWrite` once every attempt has failed.
    pub fn save(
        &self,
        snapshot: &StateSnapshot,
        summary: Option<&EpochSummary>,
        history: &TrainingHistory,
    ) -> Result<PathBuf> {
        let mut attempt = 0;
        loop {
            match self.write(snapshot, summary, history) {
                Ok(path) => {
                    info!(
                        path = %path.display(),
                        epoch = snapshot.epoch,
                        step = snapshot.step,
                        "Saved checkpoint"
                    );
                    self.prune(&path);
                    return Ok(path);
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Checkpoint write failed, retrying");
                }
                Err(e) => {
                    return Err(Error::CheckpointWrite {
                        epoch: snapshot.epoch,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    fn write(
        &self,
        snapshot: &StateSnapshot,
        summary: Option<&EpochSummary>,
        history: &TrainingHistory,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        // removed on drop, so every early return cleans up
        let staging = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempdir_in(&self.root)?;
        let dir = staging.path();

        candle_core::safetensors::save(&snapshot.generator, dir.join(GENERATOR_FILE))?;
        candle_core::safetensors::save(&snapshot.discriminator, dir.join(DISCRIMINATOR_FILE))?;
        snapshot
            .generator_optimizer
            .save(dir.join(GENERATOR_OPT_FILE))?;
        snapshot
            .discriminator_optimizer
            .save(dir.join(DISCRIMINATOR_OPT_FILE))?;
        history.save_csv(dir.join(METRICS_FILE))?;

        let mut checksums = BTreeMap::new();
        for name in DATA_FILES {
            let path = dir.join(name);
            File::open(&path)?.sync_all()?;
            checksums.insert(name.to_string(), sha256_file(&path)?);
        }

        let meta = CheckpointMeta {
            format_version: FORMAT_VERSION,
            epoch: snapshot.epoch,
            step: snapshot.step,
            generator_optimizer_step: snapshot.generator_optimizer.step,
            discriminator_optimizer_step: snapshot.discriminator_optimizer.step,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: summary.cloned(),
            checksums,
        };

        // meta.json is the completeness marker and goes last
        let mut meta_file = File::create(dir.join(META_FILE))?;
        meta_file.write_all(&serde_json::to_vec_pretty(&meta)?)?;
        meta_file.sync_all()?;

        let name = Self::checkpoint_name(snapshot.epoch, snapshot.step);
        let target = self.root.join(&name);
        self.publish(staging, &target, &name)?;
        Ok(target)
    }

    fn publish(&self, staging: tempfile::TempDir, target: &Path, name: &str) -> Result<()> {
        let displaced = if target.exists() {
            let stale = self.root.join(format!(
                "{STALE_PREFIX}{name}-{}",
                chrono::Utc::now().timestamp_micros()
            ));
            fs::rename(target, &stale)?;
            Some(stale)
        } else {
            None
        };

        let staged = staging.into_path();
        if let Err(e) = fs::rename(&staged, target) {
            let _ = fs::remove_dir_all(&staged);
            if let Some(stale) = &displaced {
                let _ = fs::rename(stale, target);
            }
            return Err(e.into());
        }

        if let Some(stale) = displaced {
            if let Err(e) = fs::remove_dir_all(&stale) {
                warn!(path = %stale.display(), error = %e, "Failed to remove replaced checkpoint");
            }
        }

        if let Ok(root) = File::open(&self.root) {
            let _ = root.sync_all();
        }
        Ok(())
    }

    /// Published checkpoints as `(epoch, step, path)`, newest first
    pub fn list(&self) -> Result<Vec<(usize, usize, PathBuf)>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<_> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| {
                let (epoch, step) = parse_name(e.file_name().to_str()?)?;
                Some((epoch, step, e.path()))
            })
            .collect();

        entries.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(entries)
    }

    /// Newest checkpoint that passes its integrity check.
    ///
    /// Corrupt checkpoints are logged and skipped; `None` means training
    /// starts fresh.
    pub fn load_latest(&self) -> Result<Option<LoadedCheckpoint>> {
        self.sweep_temporaries();

        for (epoch, step, path) in self.list()? {
            match self.load_tagged(&path, epoch, step) {
                Ok(checkpoint) => {
                    info!(path = %path.display(), epoch, step, "Loaded checkpoint");
                    return Ok(Some(checkpoint));
                }
                Err(e) => warn!(error = %e, "Skipping unreadable checkpoint"),
            }
        }

        Ok(None)
    }

    /// Load and verify one checkpoint directory
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadedCheckpoint> {
        let path = path.as_ref();
        let (epoch, step) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_name)
            .ok_or_else(|| Error::corrupt(path, "not a checkpoint directory name"))?;
        self.load_tagged(path, epoch, step)
    }

    fn load_tagged(&self, path: &Path, epoch: usize, step: usize) -> Result<LoadedCheckpoint> {
        self.read_checkpoint(path, epoch, step).map_err(|e| match e {
            Error::CheckpointCorrupt { .. } => e,
            other => Error::corrupt(path, other.to_string()),
        })
    }

    fn read_checkpoint(&self, path: &Path, epoch: usize, step: usize) -> Result<LoadedCheckpoint> {
        let meta: CheckpointMeta = serde_json::from_slice(&fs::read(path.join(META_FILE))?)?;

        if meta.format_version != FORMAT_VERSION {
            return Err(Error::corrupt(
                path,
                format!("unsupported format version {}", meta.format_version),
            ));
        }
        if (meta.epoch, meta.step) != (epoch, step) {
            return Err(Error::corrupt(
                path,
                format!(
                    "meta.json describes epoch {} step {}, directory says epoch {epoch} step {step}",
                    meta.epoch, meta.step
                ),
            ));
        }

        for name in DATA_FILES {
            let expected = meta
                .checksums
                .get(name)
                .ok_or_else(|| Error::corrupt(path, format!("no checksum for {name}")))?;
            if &sha256_file(&path.join(name))? != expected {
                return Err(Error::corrupt(path, format!("checksum mismatch for {name}")));
            }
        }

        let snapshot = StateSnapshot {
            epoch,
            step,
            generator: candle_core::safetensors::load(path.join(GENERATOR_FILE), &self.device)?,
            discriminator: candle_core::safetensors::load(
                path.join(DISCRIMINATOR_FILE),
                &self.device,
            )?,
            generator_optimizer: OptimizerState::load(
                path.join(GENERATOR_OPT_FILE),
                meta.generator_optimizer_step,
                &self.device,
            )?,
            discriminator_optimizer: OptimizerState::load(
                path.join(DISCRIMINATOR_OPT_FILE),
                meta.discriminator_optimizer_step,
                &self.device,
            )?,
        };
        let history = TrainingHistory::load_csv(path.join(METRICS_FILE))?;

        Ok(LoadedCheckpoint {
            path: path.to_path_buf(),
            meta,
            snapshot,
            history,
        })
    }

    /// Keep `just_written` plus the `max_to_keep - 1` highest-tagged others.
    ///
    /// A checkpoint that was just published is never pruned, even when older
    /// runs left higher tags in the same root.
    fn prune(&self, just_written: &Path) {
        if self.max_to_keep == 0 {
            return;
        }
        let entries = match self.list() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Could not list checkpoints for pruning");
                return;
            }
        };

        let others = entries.into_iter().filter(|(_, _, path)| path != just_written);
        for (_, _, path) in others.skip(self.max_to_keep - 1) {
            match fs::remove_dir_all(&path) {
                Ok(()) => info!(path = %path.display(), "Pruned old checkpoint"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to prune checkpoint"),
            }
        }
    }

    /// Remove staging directories left by an interrupted save.
    ///
    /// A displaced checkpoint whose replacement never got published is moved
    /// back instead.
    fn sweep_temporaries(&self) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if name.starts_with(TMP_PREFIX) {
                warn!(path = %path.display(), "Removing incomplete checkpoint");
                let _ = fs::remove_dir_all(&path);
            } else if let Some(rest) = name.strip_prefix(STALE_PREFIX) {
                let original = rest.rsplit_once('-').map(|(n, _)| n).unwrap_or(rest);
                let target = self.root.join(original);
                if parse_name(original).is_some() && !target.exists() {
                    warn!(path = %target.display(), "Restoring checkpoint displaced by an interrupted save");
                    let _ = fs::rename(&path, &target);
                } else {
                    let _ = fs::remove_dir_all(&path);
                }
            }
        }
    }
}

/// Parse `checkpoint_epoch_0003` or `checkpoint_epoch_0003_step_000120`
fn parse_name(name: &str) -> Option<(usize, usize)> {
    let rest = name.strip_prefix(PREFIX)?;
    match rest.split_once("_step_") {
        Some((epoch, step)) => Some((epoch.parse().ok()?, step.parse().ok()?)),
        None => Some((rest.parse().ok()?, 0)),
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    Ok(format!("{:x}", Sha256::digest(fs::read(path)?)))
}
