//! Image folder dataset
//!
//! Lazily decodes the images produced by the download/extraction tooling,
//! resizes them to the training resolution and scales pixels to `[-1, 1]`.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{Batch, DatasetSource};
use crate::error::{Error, Result};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Directory of images yielding fixed-size batches
pub struct ImageFolder {
    paths: Vec<PathBuf>,
    batch_size: usize,
    image_size: usize,
    channels: usize,
    shuffle: bool,
    device: Device,
    rng: StdRng,
}

impl ImageFolder {
    /// Scan `dir` for images.
    ///
    /// Only `channels` of 1 (grayscale) and 3 (RGB) are supported.
    pub fn open(
        dir: impl AsRef<Path>,
        batch_size: usize,
        image_size: usize,
        channels: usize,
        device: Device,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        if !matches!(channels, 1 | 3) {
            return Err(Error::Config(format!(
                "Unsupported channel count {channels}, expected 1 or 3"
            )));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        paths.sort();

        if paths.len() < batch_size {
            return Err(Error::Config(format!(
                "Found {} images in {}, fewer than one batch of {}",
                paths.len(),
                dir.display(),
                batch_size
            )));
        }

        tracing::info!(dir = %dir.display(), images = paths.len(), "Indexed image folder");

        Ok(Self {
            paths,
            batch_size,
            image_size,
            channels,
            shuffle: true,
            device,
            rng: StdRng::from_entropy(),
        })
    }

    /// Disable per-epoch shuffling
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Use a fixed seed for the per-epoch shuffle
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Number of images found
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl DatasetSource for ImageFolder {
    type Iter = ImageBatchIter;

    fn iterate_epoch(&mut self) -> ImageBatchIter {
        let mut paths = self.paths.clone();
        if self.shuffle {
            paths.shuffle(&mut self.rng);
        }

        ImageBatchIter {
            paths,
            position: 0,
            batch_size: self.batch_size,
            image_size: self.image_size,
            channels: self.channels,
            device: self.device.clone(),
        }
    }

    fn num_batches(&self) -> Option<usize> {
        Some(self.paths.len() / self.batch_size)
    }
}

/// One pass over an `ImageFolder`; the trailing short batch is dropped
pub struct ImageBatchIter {
    paths: Vec<PathBuf>,
    position: usize,
    batch_size: usize,
    image_size: usize,
    channels: usize,
    device: Device,
}

impl Iterator for ImageBatchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.position;
        let end = start + self.batch_size;
        if end > self.paths.len() {
            return None;
        }
        self.position = end;

        Some(load_batch(
            &self.paths[start..end],
            self.image_size,
            self.channels,
            &self.device,
        ))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode, resize and normalize a set of images into one `[B, C, H, W]` tensor
fn load_batch(paths: &[PathBuf], size: usize, channels: usize, device: &Device) -> Result<Batch> {
    let plane = size * size;
    let mut data = Vec::with_capacity(paths.len() * channels * plane);

    for path in paths {
        let img = image::open(path)?.resize_exact(size as u32, size as u32, FilterType::Triangle);

        let pixels = match channels {
            1 => img.to_luma8().into_raw(),
            _ => img.to_rgb8().into_raw(),
        };

        // HWC u8 -> CHW f32 in [-1, 1]
        for c in 0..channels {
            data.extend(
                pixels
                    .iter()
                    .skip(c)
                    .step_by(channels)
                    .map(|&p| p as f32 / 127.5 - 1.0),
            );
        }
    }

    Ok(Tensor::from_vec(data, (paths.len(), channels, size, size), device)?)
}

/// Write a `[B, C, H, W]` batch with values in `[-1, 1]` as `0.png` .. `{B-1}.png`
pub fn save_images(batch: &Tensor, out_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let out_dir = out_dir.as_ref();
    let (n, channels, height, width) = batch.dims4()?;
    std::fs::create_dir_all(out_dir)?;

    // [-1, 1] -> [0, 255], rounded, as HWC bytes
    let pixels = batch
        .to_dtype(DType::F32)?
        .affine(127.5, 128.0)?
        .clamp(0f32, 255f32)?
        .to_dtype(DType::U8)?
        .permute((0, 2, 3, 1))?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<u8>()?;

    let per_image = channels * height * width;
    let mut paths = Vec::with_capacity(n);
    for (i, raw) in pixels.chunks(per_image).enumerate() {
        let path = out_dir.join(format!("{i}.png"));
        let (w, h) = (width as u32, height as u32);
        match channels {
            1 => GrayImage::from_raw(w, h, raw.to_vec()).map(|img| img.save(&path)),
            3 => RgbImage::from_raw(w, h, raw.to_vec()).map(|img| img.save(&path)),
            _ => None,
        }
        .ok_or_else(|| Error::Config(format!("cannot write {channels}-channel images")))??;
        paths.push(path);
    }

    tracing::info!(dir = %out_dir.display(), images = paths.len(), "Saved generated images");
    Ok(paths)
}
