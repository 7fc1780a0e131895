//! Human-readable epoch report
//!
//! The layout is consumed by existing log scrapers and must stay stable.

use std::fmt::Write;

use super::metrics::EpochSummary;

/// Printed right before an epoch-end checkpoint is written
pub const SAVE_NOTICE: &str = "**** SAVING CHECKPOINT AT END OF EPOCH ****";

/// Formats epoch summaries
pub struct EpochReporter;

impl EpochReporter {
    /// Render the banner, one block per scored pair and the trailing average.
    ///
    /// Only these lines are emitted, whatever the summary holds.
    pub fn render(summary: &EpochSummary) -> String {
        let mut out = String::new();

        // writing into a String cannot fail
        let _ = writeln!(
            out,
            "========================== EPOCH {}  ==========================",
            summary.epoch
        );

        for score in &summary.scores {
            let _ = writeln!(out, "**** INCEPTION DISTANCE: {} ****", score.distance);
            let _ = writeln!(out, "Discriminator loss: {}", score.losses.discriminator_loss);
            let _ = writeln!(out, "Generator loss: {}", score.losses.generator_loss);
        }

        // evaluation errors go to the log, never into this text
        match summary.average_fid {
            Some(avg) => {
                let _ = writeln!(out, "Average FID for Epoch: {avg}");
            }
            None => {
                let _ = writeln!(out, "Average FID for Epoch: unavailable");
            }
        }

        out
    }
}
