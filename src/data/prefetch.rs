//! Background prefetching of batches
//!
//! The inner epoch iterator runs on a worker thread and feeds a bounded
//! channel. A single producer and a FIFO channel keep batch N bound to step N.

use std::sync::mpsc::{self, Receiver};
use std::thread;

use super::{Batch, DatasetSource};
use crate::error::Result;

/// Wraps a dataset so each epoch is produced ahead of consumption
pub struct Prefetched<S> {
    inner: S,
    depth: usize,
}

impl<S> Prefetched<S> {
    /// Keep up to `depth` decoded batches waiting (at least one)
    pub fn new(inner: S, depth: usize) -> Self {
        Self {
            inner,
            depth: depth.max(1),
        }
    }
}

impl<S> DatasetSource for Prefetched<S>
where
    S: DatasetSource,
    S::Iter: Send + 'static,
{
    type Iter = PrefetchIter;

    fn iterate_epoch(&mut self) -> PrefetchIter {
        let source = self.inner.iterate_epoch();
        let (tx, rx) = mpsc::sync_channel(self.depth);

        // Exits when the pass is exhausted or the consumer hangs up.
        thread::spawn(move || {
            for item in source {
                if tx.send(item).is_err() {
                    break;
                }
            }
        });

        PrefetchIter { rx }
    }

    fn num_batches(&self) -> Option<usize> {
        self.inner.num_batches()
    }
}

/// Receiving end of a prefetched epoch
pub struct PrefetchIter {
    rx: Receiver<Result<Batch>>,
}

impl Iterator for PrefetchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
