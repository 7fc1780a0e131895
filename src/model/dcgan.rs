//! DCGAN wrapper combining Generator and Discriminator
//!
//! Each network owns a separate `VarMap` so that an optimizer built over one
//! of them can never touch the parameters of the other.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use super::discriminator::{Discriminator, DiscriminatorConfig};
use super::generator::{Generator, GeneratorConfig};
use crate::error::Result;

/// Complete DCGAN model
pub struct Dcgan {
    /// Generator network
    pub generator: Generator,
    /// Discriminator network
    pub discriminator: Discriminator,
    gen_vars: VarMap,
    disc_vars: VarMap,
    device: Device,
}

impl Dcgan {
    /// Create a new DCGAN model
    ///
    /// # Arguments
    ///
    /// * `gen_config` - Generator configuration
    /// * `disc_config` - Discriminator configuration
    /// * `device` - Device to create model on
    pub fn new(
        gen_config: GeneratorConfig,
        disc_config: DiscriminatorConfig,
        device: &Device,
    ) -> Result<Self> {
        let gen_vars = VarMap::new();
        let disc_vars = VarMap::new();

        let generator = Generator::new(
            VarBuilder::from_varmap(&gen_vars, DType::F32, device),
            gen_config,
        )?;
        let discriminator = Discriminator::new(
            VarBuilder::from_varmap(&disc_vars, DType::F32, device),
            disc_config,
        )?;

        Ok(Self {
            generator,
            discriminator,
            gen_vars,
            disc_vars,
            device: device.clone(),
        })
    }

    /// Create a DCGAN whose networks share image geometry and width
    ///
    /// # Arguments
    ///
    /// * `image_size` - Side length of square images (4 * 2^k)
    /// * `channels` - Image channels
    /// * `latent_dim` - Size of latent noise vector
    /// * `base_filters` - Filter width of the outermost layers
    /// * `device` - Device to create model on
    pub fn with_defaults(
        image_size: usize,
        channels: usize,
        latent_dim: usize,
        base_filters: usize,
        device: &Device,
    ) -> Result<Self> {
        let gen_config = GeneratorConfig {
            latent_dim,
            image_size,
            channels,
            base_filters,
        };

        let disc_config = DiscriminatorConfig {
            image_size,
            channels,
            base_filters,
            ..Default::default()
        };

        Self::new(gen_config, disc_config, device)
    }

    /// Generate images from noise, detached from the autograd graph
    pub fn generate(&self, noise: &Tensor) -> Result<Tensor> {
        Ok(self.generator.forward(noise)?.detach())
    }

    /// Parameters of the generator
    pub fn generator_vars(&self) -> &VarMap {
        &self.gen_vars
    }

    /// Parameters of the discriminator
    pub fn discriminator_vars(&self) -> &VarMap {
        &self.disc_vars
    }

    /// Get latent dimension
    pub fn latent_dim(&self) -> usize {
        self.generator.config().latent_dim
    }

    /// Get image side length
    pub fn image_size(&self) -> usize {
        self.generator.config().image_size
    }

    /// Get number of image channels
    pub fn channels(&self) -> usize {
        self.generator.config().channels
    }

    /// Device holding the parameters
    pub fn device(&self) -> &Device {
        &self.device
    }
}
