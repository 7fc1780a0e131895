//! Training metrics for monitoring GAN progress
//!
//! Provides structures for tracking and logging training progress.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Losses of one training step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub discriminator_loss: f64,
    pub generator_loss: f64,
}

/// One scored evaluation pair with the losses of its representative step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    pub pair: usize,
    pub distance: f64,
    pub losses: LossRecord,
}

/// Finalized metrics of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// Zero-based index of the epoch
    pub epoch: usize,
    pub scores: Vec<PairScore>,
    pub steps: usize,
    pub mean_losses: LossRecord,
    /// `None` when no pair could be scored
    pub average_fid: Option<f64>,
    /// Set when evaluation was skipped for this epoch
    pub evaluation_error: Option<String>,
}

impl EpochSummary {
    /// The distance of every scored pair, in pair order
    pub fn distance_scores(&self) -> Vec<f64> {
        self.scores.iter().map(|s| s.distance).collect()
    }
}

/// Running aggregation of an epoch in progress
#[derive(Debug, Clone)]
pub struct EpochAccumulator {
    epoch: usize,
    records: Vec<LossRecord>,
}

impl EpochAccumulator {
    pub fn new(epoch: usize) -> Self {
        Self {
            epoch,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: LossRecord) {
        self.records.push(record);
    }

    /// Steps recorded so far
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Losses of the step standing in for evaluation pair `pair` of `pairs`.
    ///
    /// Pairs are spread evenly over the epoch: pair `i` maps to step
    /// `i * steps / pairs`.
    pub fn representative(&self, pair: usize, pairs: usize) -> LossRecord {
        if pairs == 0 {
            return LossRecord::default();
        }
        self.records
            .get(pair * self.records.len() / pairs)
            .copied()
            .unwrap_or_default()
    }

    /// Mean of every recorded step
    pub fn mean(&self) -> LossRecord {
        if self.records.is_empty() {
            return LossRecord::default();
        }
        let n = self.records.len() as f64;
        LossRecord {
            discriminator_loss: self.records.iter().map(|r| r.discriminator_loss).sum::<f64>() / n,
            generator_loss: self.records.iter().map(|r| r.generator_loss).sum::<f64>() / n,
        }
    }

    /// Close the epoch with the evaluation outcome
    pub fn finish(self, scores: Vec<PairScore>, evaluation_error: Option<String>) -> EpochSummary {
        let average_fid = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().map(|s| s.distance).sum::<f64>() / scores.len() as f64)
        };

        EpochSummary {
            epoch: self.epoch,
            steps: self.records.len(),
            mean_losses: self.mean(),
            scores,
            average_fid,
            evaluation_error,
        }
    }
}

/// One row of `metrics.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub epoch: usize,
    pub discriminator_loss: f64,
    pub generator_loss: f64,
    pub average_fid: Option<f64>,
}

/// Per-epoch history carried across checkpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    rows: Vec<HistoryRow>,
}

impl TrainingHistory {
    /// Create new empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record epoch metrics
    pub fn record(&mut self, summary: &EpochSummary) {
        self.rows.push(HistoryRow {
            epoch: summary.epoch,
            discriminator_loss: summary.mean_losses.discriminator_loss,
            generator_loss: summary.mean_losses.generator_loss,
            average_fid: summary.average_fid,
        });
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    /// Get number of recorded epochs
    pub fn num_epochs(&self) -> usize {
        self.rows.len()
    }

    pub fn latest(&self) -> Option<&HistoryRow> {
        self.rows.last()
    }

    /// Best (lowest) average FID recorded so far
    pub fn best_fid(&self) -> Option<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.average_fid)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Check if training appears to have collapsed
    ///
    /// Mode collapse indicators:
    /// - Discriminator loss very low (can easily distinguish)
    /// - Generator loss very high (can't fool discriminator)
    pub fn check_mode_collapse(&self, window: usize) -> bool {
        if window == 0 || self.rows.len() < window {
            return false;
        }

        let recent = &self.rows[self.rows.len() - window..];
        let disc_ma = recent.iter().map(|r| r.discriminator_loss).sum::<f64>() / window as f64;
        let gen_ma = recent.iter().map(|r| r.generator_loss).sum::<f64>() / window as f64;

        // Heuristic thresholds for mode collapse detection
        disc_ma < 0.1 && gen_ma > 5.0
    }

    /// Save history to CSV file
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load history from CSV file
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<HistoryRow>, _>>()?;
        Ok(Self { rows })
    }
}

/// Exponential moving average tracker
#[derive(Debug)]
pub struct EMATracker {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl EMATracker {
    /// Create new EMA tracker
    ///
    /// # Arguments
    ///
    /// * `alpha` - Smoothing factor (0 < alpha <= 1). Higher = more weight on recent
    pub fn new(alpha: f64) -> Self {
        Self {
            value: 0.0,
            alpha: alpha.clamp(0.001, 1.0),
            initialized: false,
        }
    }

    /// Update with new value
    pub fn update(&mut self, new_value: f64) {
        if !self.initialized {
            self.value = new_value;
            self.initialized = true;
        } else {
            self.value = self.alpha * new_value + (1.0 - self.alpha) * self.value;
        }
    }

    /// Get current EMA value
    pub fn value(&self) -> f64 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(d: f64, g: f64) -> LossRecord {
        LossRecord {
            discriminator_loss: d,
            generator_loss: g,
        }
    }

    fn pair(pair: usize, distance: f64) -> PairScore {
        PairScore {
            pair,
            distance,
            losses: LossRecord::default(),
        }
    }

    #[test]
    fn test_accumulator_summary() {
        let mut acc = EpochAccumulator::new(2);
        for i in 0..8 {
            acc.push(record(i as f64, 10.0 + i as f64));
        }

        assert_eq!(acc.representative(0, 2), record(0.0, 10.0));
        assert_eq!(acc.representative(1, 2), record(4.0, 14.0));

        let summary = acc.finish(vec![pair(0, 3.0), pair(1, 5.0)], None);
        assert_eq!(summary.epoch, 2);
        assert_eq!(summary.steps, 8);
        assert_eq!(summary.mean_losses, record(3.5, 13.5));
        assert_eq!(summary.average_fid, Some(4.0));
        assert_eq!(summary.distance_scores(), vec![3.0, 5.0]);
    }

    #[test]
    fn test_no_scores_means_no_average() {
        let summary = EpochAccumulator::new(0).finish(Vec::new(), Some("boom".into()));
        assert_eq!(summary.average_fid, None);
        assert_eq!(summary.steps, 0);
        assert_eq!(summary.mean_losses, LossRecord::default());
    }

    #[test]
    fn test_history_csv_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.csv");

        let mut history = TrainingHistory::new();
        let mut acc = EpochAccumulator::new(0);
        acc.push(record(0.7, 1.2));
        history.record(&acc.finish(vec![pair(0, 42.5)], None));
        history.record(&EpochAccumulator::new(1).finish(Vec::new(), None));

        history.save_csv(&path).unwrap();
        let loaded = TrainingHistory::load_csv(&path).unwrap();

        assert_eq!(loaded, history);
        assert_eq!(loaded.rows()[1].average_fid, None);
        assert_eq!(loaded.best_fid(), Some(42.5));
    }

    #[test]
    fn test_mode_collapse_detection() {
        let mut history = TrainingHistory::new();
        for epoch in 0..3 {
            let mut acc = EpochAccumulator::new(epoch);
            acc.push(record(0.01, 8.0));
            history.record(&acc.finish(Vec::new(), None));
        }
        assert!(history.check_mode_collapse(3));
        assert!(!history.check_mode_collapse(4));
    }

    #[test]
    fn test_ema_tracker() {
        let mut ema = EMATracker::new(0.5);

        ema.update(10.0);
        assert_eq!(ema.value(), 10.0);

        ema.update(20.0);
        assert_eq!(ema.value(), 15.0); // 0.5 * 20 + 0.5 * 10
    }
}
