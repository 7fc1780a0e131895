//! Generator network for DCGAN
//!
//! The Generator transforms random noise vectors into synthetic images.
//! Architecture uses transposed 2D convolutions to upsample from latent space.

use candle_core::{Module, Result, Tensor};
use candle_nn::{ConvTranspose2d, ConvTranspose2dConfig, Linear, VarBuilder};

use super::{resolution_stages, BASE_RESOLUTION};

/// Generator network configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Size of the latent noise vector
    pub latent_dim: usize,
    /// Side length of the square output image
    pub image_size: usize,
    /// Number of output channels (3 for RGB)
    pub channels: usize,
    /// Filters in the last hidden layer; earlier layers double it
    pub base_filters: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            latent_dim: 100,
            image_size: 64,
            channels: 3,
            base_filters: 64,
        }
    }
}

/// Generator network
///
/// Architecture:
/// 1. Dense projection from latent space to a 4x4 feature map
/// 2. Stride-2 ConvTranspose2d layers with ReLU, halving filters each time
/// 3. Final ConvTranspose2d to image channels with Tanh activation
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    initial_filters: usize,
    fc: Linear,
    upsample: Vec<ConvTranspose2d>,
}

impl Generator {
    /// Create a new Generator network
    pub fn new(vb: VarBuilder, config: GeneratorConfig) -> Result<Self> {
        let stages = resolution_stages(config.image_size).ok_or_else(|| {
            candle_core::Error::Msg(format!(
                "image size {} is not 4 * 2^k",
                config.image_size
            ))
        })?;

        let initial_filters = config.base_filters << (stages - 1);
        let fc = candle_nn::linear(
            config.latent_dim,
            initial_filters * BASE_RESOLUTION * BASE_RESOLUTION,
            vb.pp("fc"),
        )?;

        // kernel 4, stride 2, padding 1 doubles the spatial size
        let conv_config = ConvTranspose2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };

        let mut upsample = Vec::with_capacity(stages);
        let mut filters = initial_filters;
        for i in 0..stages {
            let out = if i + 1 == stages {
                config.channels
            } else {
                filters / 2
            };
            upsample.push(candle_nn::conv_transpose2d(
                filters,
                out,
                4,
                conv_config,
                vb.pp(format!("up{i}")),
            )?);
            filters = out;
        }

        Ok(Self {
            config,
            initial_filters,
            fc,
            upsample,
        })
    }

    /// Generate synthetic images from noise
    ///
    /// # Arguments
    ///
    /// * `noise` - Tensor of shape (batch_size, latent_dim)
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch_size, channels, image_size, image_size) in [-1, 1]
    pub fn forward(&self, noise: &Tensor) -> Result<Tensor> {
        let batch_size = noise.dim(0)?;

        let mut x = self.fc.forward(noise)?.relu()?.reshape((
            batch_size,
            self.initial_filters,
            BASE_RESOLUTION,
            BASE_RESOLUTION,
        ))?;

        let last = self.upsample.len() - 1;
        for (i, layer) in self.upsample.iter().enumerate() {
            x = layer.forward(&x)?;
            x = if i == last { x.tanh()? } else { x.relu()? };
        }

        Ok(x)
    }

    /// Get configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

impl Module for Generator {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Generator::forward(self, xs)
    }
}
