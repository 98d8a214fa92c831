//! One (exposure, chip) task from status check to recorded outcome.
//!
//! ```text
//! not started ──► running ──► success
//!      │             └──────► failure(message)
//!      └── dependency not met ──► failure(message)
//! ```
//!
//! A task already at `success` is skipped unless forced. Dry runs do the
//! full computation but leave catalogs and shards untouched; their status is
//! still recorded.

use tracing::{debug, error, info, info_span, warn};

use celestial_xmatch::SpatialMatcher;

use crate::catalog::{ChipRef, DatasetId, ExposureCatalog};
use crate::cone::{ConeQuery, ConeSearch, TimeWindow};
use crate::config::StationaryConfig;
use crate::error::{StationaryError, StationaryResult};
use crate::exposures::CatalogStore;
use crate::overlap::{OverlapAccumulator, OverlapSummary};
use crate::shard::ShardStore;
use crate::status::{StatusStore, TaskKey, TaskStatus};
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Compute everything but write no catalogs or shards.
    ///
    /// The task status is still recorded, so a successful dry run leaves the
    /// task at `success` and a later unforced run skips it without ever
    /// persisting results. Follow a dry run with a forced run.
    pub dry_run: bool,
    pub force: bool,
}

impl RunOptions {
    /// Dry runs always recompute.
    pub fn forced(&self) -> bool {
        self.force || self.dry_run
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub dataset: DatasetId,
    /// The catalog with pixels, HPXIDs and counts filled in.
    pub catalog: ExposureCatalog,
    pub pixels: Vec<u64>,
    pub new_identifiers: usize,
    pub overlap: OverlapSummary,
    /// False for dry runs.
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Skipped,
    Completed(TaskReport),
}

pub struct MatchOrchestrator<'a, S, C: ?Sized> {
    config: &'a StationaryConfig,
    store: &'a S,
    cone: &'a C,
    matcher: SpatialMatcher,
}

impl<'a, S: ObjectStore, C: ConeSearch + ?Sized> MatchOrchestrator<'a, S, C> {
    pub fn new(config: &'a StationaryConfig, store: &'a S, cone: &'a C) -> StationaryResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            cone,
            matcher: config.matcher()?,
        })
    }

    pub fn config(&self) -> &StationaryConfig {
        self.config
    }

    pub fn cone(&self) -> &C {
        self.cone
    }

    pub fn task_key(&self, chip: ChipRef) -> TaskKey {
        TaskKey::new(&self.config.task, &self.config.prefix, chip, &self.config.version)
    }

    /// Run the task for `chip`.
    ///
    /// Every failure after the skip check is recorded as the task's status
    /// before it is returned. Writes made before a failure are not undone.
    pub fn run(&self, chip: ChipRef, options: RunOptions) -> StationaryResult<TaskOutcome> {
        let key = self.task_key(chip);
        let span = info_span!(
            "task",
            task = %self.config.task,
            dataset = %key.dataset_name(),
            dry_run = options.dry_run
        );
        let _guard = span.enter();

        let statuses = StatusStore::new(self.store);
        if !options.forced() && statuses.get(&key)?.is_success() {
            info!("already succeeded, skipping");
            return Ok(TaskOutcome::Skipped);
        }

        if let Some(dependency) = &self.config.dependency {
            if !statuses.get(&key.for_task(dependency))?.is_success() {
                let err = StationaryError::dependency_not_met(dependency, key.dataset_name());
                self.record_failure(&statuses, &key, &err);
                return Err(err);
            }
        }

        statuses.set(&key, &TaskStatus::Running)?;
        if options.dry_run {
            warn!("dry run: results will not be written but the task will be marked done");
        }
        info!("started");

        match self.execute(chip, options) {
            Ok(report) => {
                statuses.set(&key, &TaskStatus::Success)?;
                info!(
                    rows = report.catalog.rows.len(),
                    pixels = report.pixels.len(),
                    new_identifiers = report.new_identifiers,
                    candidates = report.overlap.used,
                    "finished"
                );
                Ok(TaskOutcome::Completed(report))
            }
            Err(err) => {
                self.record_failure(&statuses, &key, &err);
                Err(err)
            }
        }
    }

    fn record_failure<T: ObjectStore>(
        &self,
        statuses: &StatusStore<T>,
        key: &TaskKey,
        err: &StationaryError,
    ) {
        error!(error = %err, "task failed");
        if let Err(status_err) = statuses.set(key, &TaskStatus::failure(err.to_string())) {
            error!(error = %status_err, "could not record failure status");
        }
    }

    fn execute(&self, chip: ChipRef, options: RunOptions) -> StationaryResult<TaskReport> {
        let config = self.config;
        let catalogs = CatalogStore::new(self.store, config.prefix.as_str(), config.version.as_str());
        let shards = ShardStore::new(self.store, config.healpix_order, self.matcher);

        let mut catalog = catalogs.get(chip)?;
        catalog.prepare(config.healpix_order);
        let dataset = catalog.dataset_id();
        let pixels: Vec<u64> = catalog.pixels().into_iter().collect();

        let mut loaded = Vec::with_capacity(pixels.len());
        let mut new_identifiers = 0;
        for &pixel in &pixels {
            let mut shard = shards.get_or_empty(pixel)?;
            let fresh = shards.assign_identifiers(&mut shard, &mut catalog.rows);
            debug!(pixel, existing = shard.len(), fresh, "assigned identifiers");
            new_identifiers += fresh;
            loaded.push(shard);
        }

        let query = ConeQuery {
            footprint: catalog.footprint.clone(),
            window: Some(TimeWindow::around(
                catalog.mid_mjd(),
                config.min_separation_days,
                config.max_separation_days,
            )),
            run_ids: config.run_ids.clone(),
        };
        let candidates = self.cone.search(&query)?;
        let overlap = OverlapAccumulator::new(self.matcher).accumulate(&mut catalog, &candidates, &catalogs)?;

        for shard in loaded {
            let rows: Vec<_> = catalog
                .rows
                .iter()
                .filter(|row| row.healpix == shard.pixel)
                .cloned()
                .collect();
            let mut merged = shards.merge(shard, &dataset, rows);
            if !options.dry_run {
                shards.put(&mut merged)?;
            }
        }

        if !options.dry_run {
            catalogs.put(&catalog)?;
        }

        Ok(TaskReport {
            dataset,
            catalog,
            pixels,
            new_identifiers,
            overlap,
            persisted: !options.dry_run,
        })
    }
}
