//! Frozen feature extractor
//!
//! Maps a batch of images to fixed-length embeddings for the distance metric.
//! The extractor holds plain tensors rather than `Var`s, so no optimizer and
//! no gradient ever reaches it.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};

/// Embeds image batches into feature vectors
pub trait FeatureExtractor: Send + Sync {
    /// One embedding per image in a `[B, C, H, W]` batch
    fn embed(&self, batch: &Tensor) -> Result<Vec<Vec<f64>>>;

    /// Length of each embedding
    fn embedding_dim(&self) -> usize;
}

/// Stack of fixed 3x3 stride-2 convolutions with ReLU.
///
/// The embedding concatenates the global average pool of every layer, so its
/// length is the sum of the layer widths.
#[derive(Debug, Clone)]
pub struct FrozenConvExtractor {
    kernels: Vec<Tensor>,
    in_channels: usize,
}

impl FrozenConvExtractor {
    /// Layer widths used when none are configured
    pub const DEFAULT_WIDTHS: [usize; 3] = [32, 64, 128];

    /// Build an extractor with He-normal weights drawn from `seed`
    pub fn seeded(in_channels: usize, widths: &[usize], seed: u64, device: &Device) -> Result<Self> {
        if widths.is_empty() || widths.contains(&0) {
            return Err(Error::Config("extractor widths must be non-empty and positive".into()));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut kernels = Vec::with_capacity(widths.len());
        let mut fan_in_channels = in_channels;

        for &width in widths {
            let fan_in = fan_in_channels * 9;
            let normal = Normal::new(0f32, (2.0 / fan_in as f32).sqrt())
                .map_err(|e| Error::Config(e.to_string()))?;
            let weights: Vec<f32> = (0..width * fan_in).map(|_| normal.sample(&mut rng)).collect();
            kernels.push(Tensor::from_vec(weights, (width, fan_in_channels, 3, 3), device)?);
            fan_in_channels = width;
        }

        Ok(Self {
            kernels,
            in_channels,
        })
    }

    /// Load kernels stored as `layer{i}.weight` in a safetensors file
    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let mut tensors = candle_core::safetensors::load(path, device)?;

        let mut kernels = Vec::new();
        while let Some(kernel) = tensors.remove(&format!("layer{}.weight", kernels.len())) {
            kernels.push(kernel.to_dtype(DType::F32)?);
        }

        let first = kernels.first().ok_or_else(|| {
            Error::Config(format!("no extractor layers found in {}", path.display()))
        })?;
        let in_channels = first.dims().get(1).copied().unwrap_or(0);

        let mut expected = in_channels;
        for (i, kernel) in kernels.iter().enumerate() {
            match kernel.dims() {
                &[_, c, 3, 3] if c == expected => expected = kernel.dim(0)?,
                dims => {
                    return Err(Error::Config(format!(
                        "extractor layer {i} has shape {dims:?}, expected [_, {expected}, 3, 3]"
                    )))
                }
            }
        }

        tracing::info!(path = %path.display(), layers = kernels.len(), "Loaded feature extractor");
        Ok(Self {
            kernels,
            in_channels,
        })
    }

    /// Write kernels in the layout `load` expects
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors: HashMap<String, Tensor> = self
            .kernels
            .iter()
            .enumerate()
            .map(|(i, k)| (format!("layer{i}.weight"), k.clone()))
            .collect();
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }

    /// Expected image channels
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }
}

impl FeatureExtractor for FrozenConvExtractor {
    fn embed(&self, batch: &Tensor) -> Result<Vec<Vec<f64>>> {
        match batch.dims() {
            &[_, c, _, _] if c == self.in_channels => {}
            dims => {
                return Err(Error::Evaluation(format!(
                    "cannot embed batch of shape {dims:?} with {} input channels",
                    self.in_channels
                )))
            }
        }

        let mut x = batch.detach().to_dtype(DType::F32)?;
        let mut pooled = Vec::with_capacity(self.kernels.len());
        for kernel in &self.kernels {
            x = x.conv2d(kernel, 1, 2, 1, 1)?.relu()?;
            pooled.push(x.mean((2, 3))?);
        }

        let features = Tensor::cat(&pooled, 1)?.to_dtype(DType::F64)?;
        Ok(features.to_vec2::<f64>()?)
    }

    fn embedding_dim(&self) -> usize {
        self.kernels.iter().map(|k| k.dims()[0]).sum()
    }
}
