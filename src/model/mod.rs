//! Model module containing GAN architecture components
//!
//! This module provides:
//! - Generator network for creating synthetic images from latent noise
//! - Discriminator network for distinguishing real from fake
//! - DCGAN wrapper owning both networks and their parameter stores
//! - The frozen feature extractor used by the distance metric

mod dcgan;
mod discriminator;
mod extractor;
mod generator;

pub use dcgan::Dcgan;
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use extractor::{FeatureExtractor, FrozenConvExtractor};
pub use generator::{Generator, GeneratorConfig};

use candle_core::Tensor;

/// Spatial size every network starts from (generator) or ends at (discriminator)
pub const BASE_RESOLUTION: usize = 4;

/// Number of stride-2 stages between `BASE_RESOLUTION` and `image_size`.
///
/// Returns `None` unless `image_size` is `4 * 2^k` with `k >= 1`.
pub fn resolution_stages(image_size: usize) -> Option<usize> {
    if image_size < 2 * BASE_RESOLUTION || image_size % BASE_RESOLUTION != 0 {
        return None;
    }
    let ratio = image_size / BASE_RESOLUTION;
    ratio
        .is_power_of_two()
        .then(|| ratio.trailing_zeros() as usize)
}

pub(crate) fn leaky_relu(xs: &Tensor, negative_slope: f64) -> candle_core::Result<Tensor> {
    xs.maximum(&xs.affine(negative_slope, 0.0)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_stages() {
        assert_eq!(resolution_stages(8), Some(1));
        assert_eq!(resolution_stages(64), Some(4));
        assert_eq!(resolution_stages(128), Some(5));
        assert_eq!(resolution_stages(4), None);
        assert_eq!(resolution_stages(48), None);
        assert_eq!(resolution_stages(0), None);
    }
}
