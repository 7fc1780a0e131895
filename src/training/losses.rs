//! Loss functions for GAN training
//!
//! Implements Binary Cross Entropy losses for generator and discriminator.

use candle_core::{Result, Tensor};

/// Mean binary cross entropy between logits and a constant target.
///
/// Uses `max(x, 0) - x * t + log(1 + exp(-|x|))`, which never exponentiates
/// a large positive number.
pub fn bce_with_logits(logits: &Tensor, target: f64) -> Result<Tensor> {
    let positive = logits.relu()?;
    let weighted = logits.affine(target, 0.0)?;
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    (positive - weighted)?.add(&softplus)?.mean_all()
}

/// Generator loss: -log(D(G(z)))
///
/// The generator wants the discriminator to output 1 (real) for fake samples.
///
/// # Arguments
///
/// * `fake_output` - Discriminator output on generated samples (logits)
///
/// # Returns
///
/// Scalar loss tensor
pub fn generator_loss(fake_output: &Tensor) -> Result<Tensor> {
    bce_with_logits(fake_output, 1.0)
}

/// Discriminator loss: -log(D(x)) - log(1-D(G(z)))
///
/// The discriminator wants to output 1 for real samples and 0 for fake samples.
///
/// # Arguments
///
/// * `real_output` - Discriminator output on real samples (logits)
/// * `fake_output` - Discriminator output on generated samples (logits)
///
/// # Returns
///
/// Scalar loss tensor
pub fn discriminator_loss(real_output: &Tensor, fake_output: &Tensor) -> Result<Tensor> {
    discriminator_loss_smoothed(real_output, fake_output, 1.0, 0.0)
}

/// Label smoothing for improved training stability
///
/// Instead of using hard 1s and 0s, use smoothed labels:
/// - Real: 0.9 instead of 1.0
/// - Fake: 0.1 instead of 0.0
///
/// # Arguments
///
/// * `real_output` - Discriminator output on real samples
/// * `fake_output` - Discriminator output on fake samples
/// * `smooth_real` - Smoothed label for real (e.g., 0.9)
/// * `smooth_fake` - Smoothed label for fake (e.g., 0.1)
pub fn discriminator_loss_smoothed(
    real_output: &Tensor,
    fake_output: &Tensor,
    smooth_real: f64,
    smooth_fake: f64,
) -> Result<Tensor> {
    let real_loss = bce_with_logits(real_output, smooth_real)?;
    let fake_loss = bce_with_logits(fake_output, smooth_fake)?;
    real_loss + fake_loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar(t: Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_bce_matches_reference() {
        // bce(0, 1) = ln 2
        let zero = Tensor::zeros((3, 1), candle_core::DType::F32, &Device::Cpu).unwrap();
        let loss = scalar(bce_with_logits(&zero, 1.0).unwrap());
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);

        // -ln(sigmoid(2))
        let two = Tensor::full(2f32, (2, 1), &Device::Cpu).unwrap();
        let loss = scalar(bce_with_logits(&two, 1.0).unwrap());
        let expected = (1.0 + (-2.0f32).exp()).ln();
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn test_bce_is_stable_for_large_logits() {
        let big = Tensor::new(&[[1000f32], [-1000f32]], &Device::Cpu).unwrap();
        let loss = scalar(bce_with_logits(&big, 0.0).unwrap());
        assert!(loss.is_finite());
        assert!((loss - 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_generator_loss() {
        let fake_output = Tensor::randn(0f32, 1.0, (4, 1), &Device::Cpu).unwrap();
        let loss = generator_loss(&fake_output).unwrap();

        assert_eq!(loss.dims(), &[] as &[usize]);
        assert!(scalar(loss) > 0.0);
    }

    #[test]
    fn test_perfect_discriminator() {
        // Perfect discriminator: high confidence on real, low on fake
        let real_output = Tensor::full(10f32, (4, 1), &Device::Cpu).unwrap();
        let fake_output = Tensor::full(-10f32, (4, 1), &Device::Cpu).unwrap();
        let loss = discriminator_loss(&real_output, &fake_output).unwrap();

        // Loss should be very small for perfect discriminator
        assert!(scalar(loss) < 0.1);
    }

    #[test]
    fn test_smoothing_raises_floor() {
        let real_output = Tensor::full(10f32, (4, 1), &Device::Cpu).unwrap();
        let fake_output = Tensor::full(-10f32, (4, 1), &Device::Cpu).unwrap();
        let hard = scalar(discriminator_loss(&real_output, &fake_output).unwrap());
        let smooth =
            scalar(discriminator_loss_smoothed(&real_output, &fake_output, 0.9, 0.1).unwrap());
        assert!(smooth > hard);
    }
}
