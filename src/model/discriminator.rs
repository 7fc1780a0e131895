//! Discriminator network for DCGAN
//!
//! The Discriminator classifies images as real or fake.
//! Architecture uses stride-2 convolutions to downsample and extract features.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder};

use super::{leaky_relu, resolution_stages, BASE_RESOLUTION};

/// Discriminator network configuration
#[derive(Debug, Clone)]
pub struct DiscriminatorConfig {
    /// Side length of the square input image
    pub image_size: usize,
    /// Number of input channels (3 for RGB)
    pub channels: usize,
    /// Filters in the first layer; later layers double it
    pub base_filters: usize,
    /// Slope of LeakyReLU for negative inputs
    pub negative_slope: f64,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            image_size: 64,
            channels: 3,
            base_filters: 64,
            negative_slope: 0.2,
        }
    }
}

/// Discriminator network
///
/// Architecture:
/// 1. Series of stride-2 Conv2d layers with LeakyReLU down to 4x4
/// 2. Flatten and Dense layer producing one logit per image
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    downsample: Vec<Conv2d>,
    fc: Linear,
}

impl Discriminator {
    /// Create a new Discriminator network
    pub fn new(vb: VarBuilder, config: DiscriminatorConfig) -> Result<Self> {
        let stages = resolution_stages(config.image_size).ok_or_else(|| {
            candle_core::Error::Msg(format!(
                "image size {} is not 4 * 2^k",
                config.image_size
            ))
        })?;

        // kernel 4, stride 2, padding 1 halves the spatial size
        let conv_config = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };

        let mut downsample = Vec::with_capacity(stages);
        let mut in_filters = config.channels;
        let mut out_filters = config.base_filters;
        for i in 0..stages {
            downsample.push(candle_nn::conv2d(
                in_filters,
                out_filters,
                4,
                conv_config,
                vb.pp(format!("down{i}")),
            )?);
            in_filters = out_filters;
            out_filters *= 2;
        }

        let fc = candle_nn::linear(
            in_filters * BASE_RESOLUTION * BASE_RESOLUTION,
            1,
            vb.pp("fc"),
        )?;

        Ok(Self {
            config,
            downsample,
            fc,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape (batch_size, channels, image_size, image_size)
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch_size, 1) with logits (not sigmoid)
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for layer in &self.downsample {
            x = leaky_relu(&layer.forward(&x)?, self.config.negative_slope)?;
        }

        self.fc.forward(&x.flatten_from(1)?)
    }

    /// Get configuration
    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }
}

impl Module for Discriminator {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Discriminator::forward(self, xs)
    }
}
