//! Fréchet distance between embedding distributions
//!
//! Each embedding set is summarised by its mean and its unbiased covariance,
//! and the two Gaussians are compared with
//! `||mu_r - mu_f||^2 + tr(S_r) + tr(S_f) - 2 tr((S_r^1/2 S_f S_r^1/2)^1/2)`.
//! The trace term equals `tr((S_r S_f)^1/2)`, so the distance is symmetric in
//! its arguments up to rounding.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::error::{Error, Result};

/// Distance between a set of real and a set of generated embeddings
pub trait DistanceScorer: Send + Sync {
    /// Non-negative score; lower means the distributions are closer
    fn score(&self, real: &[Vec<f64>], fake: &[Vec<f64>]) -> Result<f64>;
}

/// Fréchet (FID-style) distance
#[derive(Debug, Clone, Copy, Default)]
pub struct FrechetDistance;

impl DistanceScorer for FrechetDistance {
    fn score(&self, real: &[Vec<f64>], fake: &[Vec<f64>]) -> Result<f64> {
        if real.len() < 2 || fake.len() < 2 {
            return Err(Error::InsufficientSamples {
                real: real.len(),
                fake: fake.len(),
            });
        }

        let dim = real[0].len();
        if dim == 0 || real.iter().chain(fake).any(|e| e.len() != dim) {
            return Err(Error::Evaluation(
                "embeddings must be non-empty and share one length".to_string(),
            ));
        }

        let (mu_real, cov_real) = moments(real, dim);
        let (mu_fake, cov_fake) = moments(fake, dim);

        let root_real = psd_sqrt(cov_real.clone());
        let product = &root_real * &cov_fake * &root_real;
        let product = (&product + product.transpose()) * 0.5;
        let trace_covmean: f64 = SymmetricEigen::new(product)
            .eigenvalues
            .iter()
            .map(|&l| l.max(0.0).sqrt())
            .sum();

        let mean_term = (&mu_real - &mu_fake).norm_squared();
        let distance = mean_term + cov_real.trace() + cov_fake.trace() - 2.0 * trace_covmean;

        if !distance.is_finite() {
            return Err(Error::Evaluation(format!(
                "distance is not finite ({distance})"
            )));
        }

        Ok(distance.max(0.0))
    }
}

/// Mean vector and unbiased (n - 1) covariance of row samples
fn moments(samples: &[Vec<f64>], dim: usize) -> (DVector<f64>, DMatrix<f64>) {
    let n = samples.len();
    let data = DMatrix::from_fn(n, dim, |i, j| samples[i][j]);

    let mean = DVector::from_fn(dim, |j, _| data.column(j).sum() / n as f64);
    let centered = DMatrix::from_fn(n, dim, |i, j| data[(i, j)] - mean[j]);
    let cov = (centered.transpose() * &centered) / (n as f64 - 1.0);

    (mean, cov)
}

/// Square root of a symmetric positive semi-definite matrix.
///
/// Negative eigenvalues from rounding are clamped to zero.
fn psd_sqrt(matrix: DMatrix<f64>) -> DMatrix<f64> {
    let eigen = SymmetricEigen::new(matrix);
    let roots = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
    &eigen.eigenvectors * DMatrix::from_diagonal(&roots) * eigen.eigenvectors.transpose()
}
