//! Data module providing batches of real images for training
//!
//! This module provides:
//! - The `DatasetSource` contract the training loop pulls epochs from
//! - An in-memory `DataLoader` for tensors already resident on the device
//! - An `ImageFolder` source decoding images lazily from disk
//! - A `Prefetched` adapter that decodes ahead on a worker thread

mod images;
mod loader;
mod prefetch;

pub use images::{save_images, ImageFolder};
pub use loader::{DataLoader, EpochIter};
pub use prefetch::{PrefetchIter, Prefetched};

use candle_core::Tensor;

use crate::error::Result;

/// A batch of samples, shaped `[batch, channels, height, width]`, values in `[-1, 1]`.
pub type Batch = Tensor;

/// Source of real samples, iterated once per epoch.
///
/// Each call to `iterate_epoch` starts a fresh, finite pass over the data
/// (possibly reshuffled). The returned iterator owns everything it needs so
/// it can be moved to a prefetch thread.
pub trait DatasetSource {
    /// Lazy sequence of batches for one pass.
    type Iter: Iterator<Item = Result<Batch>>;

    /// Start a new pass over the dataset.
    fn iterate_epoch(&mut self) -> Self::Iter;

    /// Number of batches per pass, when known up front.
    fn num_batches(&self) -> Option<usize> {
        None
    }
}
