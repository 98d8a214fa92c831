//! Running every chip that overlaps a set of HEALPix pixels.

use tracing::{info, warn};

use celestial_xmatch::HealpixRegion;

use crate::catalog::ChipRef;
use crate::cone::{ConeQuery, ConeSearch};
use crate::error::StationaryResult;
use crate::orchestrator::{MatchOrchestrator, RunOptions, TaskOutcome};
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    /// Failed chips with the recorded message, in processing order.
    pub failed: Vec<(ChipRef, String)>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Process exit code: 1 if any task failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Chips whose footprints touch any of `pixels`, with no time constraint.
pub fn tasks_for_pixels<S, C>(
    orchestrator: &MatchOrchestrator<'_, S, C>,
    pixels: &[u64],
) -> StationaryResult<Vec<ChipRef>>
where
    S: ObjectStore,
    C: ConeSearch + ?Sized,
{
    let config = orchestrator.config();
    let region = HealpixRegion::new(config.healpix_order, pixels.iter().copied())?;
    let query = ConeQuery {
        footprint: region.into(),
        window: None,
        run_ids: config.run_ids.clone(),
    };
    orchestrator.cone().search(&query)
}

/// Run each task in turn. A failing task is logged and counted; it never
/// stops the rest of the batch.
pub fn run_tasks<S, C>(
    orchestrator: &MatchOrchestrator<'_, S, C>,
    chips: &[ChipRef],
    options: RunOptions,
) -> BatchSummary
where
    S: ObjectStore,
    C: ConeSearch + ?Sized,
{
    let mut summary = BatchSummary::default();
    for &chip in chips {
        match orchestrator.run(chip, options) {
            Ok(TaskOutcome::Completed(_)) => summary.completed += 1,
            Ok(TaskOutcome::Skipped) => summary.skipped += 1,
            Err(err) => {
                warn!(chip = %chip, error = %err, "task failed, continuing");
                summary.failed.push((chip, err.to_string()));
            }
        }
    }
    info!(
        completed = summary.completed,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "batch finished"
    );
    summary
}

/// Find and run every task overlapping `pixels`.
///
/// # Errors
/// Only for an invalid pixel list or a failing cone search; per-task
/// failures are reported in the summary.
pub fn run_batch<S, C>(
    orchestrator: &MatchOrchestrator<'_, S, C>,
    pixels: &[u64],
    options: RunOptions,
) -> StationaryResult<BatchSummary>
where
    S: ObjectStore,
    C: ConeSearch + ?Sized,
{
    let chips = tasks_for_pixels(orchestrator, pixels)?;
    info!(pixels = pixels.len(), tasks = chips.len(), "starting batch");
    Ok(run_tasks(orchestrator, &chips, options))
}
