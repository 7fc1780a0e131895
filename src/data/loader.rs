//! DataLoader for batching and iterating over in-memory image tensors
//!
//! Provides batching for GAN training with support for:
//! - Random shuffling (reshuffled every epoch)
//! - Drop last incomplete batch
//! - Owned epoch iterators that can cross thread boundaries

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{Batch, DatasetSource};
use crate::error::{Error, Result};

/// DataLoader for iterating over batched samples held in a single tensor
pub struct DataLoader {
    /// Full dataset of shape (num_samples, channels, height, width)
    data: Tensor,
    /// Batch size
    batch_size: usize,
    /// Whether to shuffle data each epoch
    shuffle: bool,
    /// Whether to drop the last incomplete batch
    drop_last: bool,
    rng: StdRng,
}

impl DataLoader {
    /// Create a new DataLoader
    ///
    /// # Arguments
    ///
    /// * `data` - 4D tensor of shape (num_samples, channels, height, width)
    /// * `batch_size` - Number of samples per batch
    /// * `shuffle` - Whether to shuffle data each epoch
    /// * `drop_last` - Whether to drop incomplete final batch
    pub fn new(data: Tensor, batch_size: usize, shuffle: bool, drop_last: bool) -> Result<Self> {
        if data.rank() != 4 {
            return Err(Error::Config(format!(
                "DataLoader expects a rank-4 tensor, got shape {:?}",
                data.dims()
            )));
        }
        if batch_size == 0 {
            return Err(Error::Config("Batch size must be > 0".to_string()));
        }

        Ok(Self {
            data,
            batch_size,
            shuffle,
            drop_last,
            rng: StdRng::from_entropy(),
        })
    }

    /// Use a fixed seed for the per-epoch shuffle
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Get total number of samples
    pub fn num_samples(&self) -> usize {
        self.data.dims()[0]
    }

    /// Get the device the samples live on
    pub fn device(&self) -> &Device {
        self.data.device()
    }

    /// Get the number of batches per epoch
    pub fn batches_per_epoch(&self) -> usize {
        let num_samples = self.num_samples();
        if self.drop_last {
            num_samples / self.batch_size
        } else {
            num_samples.div_ceil(self.batch_size)
        }
    }
}

impl DatasetSource for DataLoader {
    type Iter = EpochIter;

    fn iterate_epoch(&mut self) -> EpochIter {
        let mut indices: Vec<u32> = (0..self.num_samples() as u32).collect();
        if self.shuffle {
            indices.shuffle(&mut self.rng);
        }

        EpochIter {
            data: self.data.clone(),
            indices,
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            position: 0,
        }
    }

    fn num_batches(&self) -> Option<usize> {
        Some(self.batches_per_epoch())
    }
}

/// One pass over a `DataLoader`
pub struct EpochIter {
    data: Tensor,
    indices: Vec<u32>,
    batch_size: usize,
    drop_last: bool,
    position: usize,
}

impl EpochIter {
    fn gather(&self, start: usize, end: usize) -> Result<Batch> {
        let ids = &self.indices[start..end];
        let ids = Tensor::from_slice(ids, ids.len(), self.data.device())?;
        Ok(self.data.index_select(&ids, 0)?)
    }
}

impl Iterator for EpochIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.position;
        if start >= self.indices.len() {
            return None;
        }

        let end = (start + self.batch_size).min(self.indices.len());
        if self.drop_last && end - start < self.batch_size {
            self.position = self.indices.len();
            return None;
        }

        self.position = end;
        Some(self.gather(start, end))
    }
}
