//! Candidate discovery: which exposure chips overlap a region in sky and time.
//!
//! [`ConeSearch`] is the collaborator interface. [`ExposureIndex`] is the
//! implementation used here: a JSON list of chip footprints and epochs kept
//! in the object store next to the catalogs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use celestial_xmatch::Footprint;

use crate::catalog::{ChipRef, ExposureCatalog};
use crate::error::{StationaryError, StationaryResult, StorageError};
use crate::paths::EXPOSURE_INDEX_KEY;
use crate::storage::{ObjectStore, WritePrecondition};

/// Admits epochs whose separation from `mid_mjd` lies within the bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub mid_mjd: f64,
    pub min_separation_days: f64,
    pub max_separation_days: Option<f64>,
}

impl TimeWindow {
    pub fn around(mid_mjd: f64, min_separation_days: f64, max_separation_days: Option<f64>) -> Self {
        Self {
            mid_mjd,
            min_separation_days,
            max_separation_days,
        }
    }

    pub fn admits(&self, mjd: f64) -> bool {
        let separation = (mjd - self.mid_mjd).abs();
        separation >= self.min_separation_days
            && self.max_separation_days.map_or(true, |max| separation <= max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConeQuery {
    pub footprint: Footprint,
    pub window: Option<TimeWindow>,
    /// Allowed run identifiers; empty admits every run.
    pub run_ids: Vec<String>,
}

impl ConeQuery {
    fn admits_run(&self, run_id: &str) -> bool {
        self.run_ids.is_empty() || self.run_ids.iter().any(|r| r == run_id)
    }
}

pub trait ConeSearch {
    /// Chips matching the query, in a stable order.
    fn search(&self, query: &ConeQuery) -> StationaryResult<Vec<ChipRef>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub exposure: u64,
    pub chip: u32,
    pub run_id: String,
    pub mid_mjd: f64,
    pub footprint: Footprint,
}

impl ExposureRecord {
    pub fn from_catalog(catalog: &ExposureCatalog, run_id: impl Into<String>) -> Self {
        Self {
            exposure: catalog.chip.exposure,
            chip: catalog.chip.chip,
            run_id: run_id.into(),
            mid_mjd: catalog.mid_mjd(),
            footprint: catalog.footprint.clone(),
        }
    }

    pub fn chip_ref(&self) -> ChipRef {
        ChipRef::new(self.exposure, self.chip)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureIndex {
    records: Vec<ExposureRecord>,
}

impl ExposureIndex {
    pub fn new(records: Vec<ExposureRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ExposureRecord] {
        &self.records
    }

    pub fn load<S: ObjectStore>(store: &S) -> StationaryResult<Self> {
        let object = store
            .get(EXPOSURE_INDEX_KEY)
            .map_err(|e| StationaryError::from_catalog_read(EXPOSURE_INDEX_KEY, e))?;
        let index: Self = serde_json::from_slice(&object.data)
            .map_err(|e| StorageError::corrupt(EXPOSURE_INDEX_KEY, e.to_string()))?;
        debug!(records = index.records.len(), "loaded exposure index");
        Ok(index)
    }

    pub fn save<S: ObjectStore>(&self, store: &S) -> StationaryResult<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| StorageError::corrupt(EXPOSURE_INDEX_KEY, e.to_string()))?;
        store.put(EXPOSURE_INDEX_KEY, &bytes, WritePrecondition::None)?;
        Ok(())
    }

    /// Add a record, replacing any earlier record for the same chip.
    pub fn upsert(&mut self, record: ExposureRecord) {
        let chip = record.chip_ref();
        match self.records.iter_mut().find(|r| r.chip_ref() == chip) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }
}

impl ConeSearch for ExposureIndex {
    fn search(&self, query: &ConeQuery) -> StationaryResult<Vec<ChipRef>> {
        let found: Vec<ChipRef> = self
            .records
            .iter()
            .filter(|r| query.admits_run(&r.run_id))
            .filter(|r| query.window.map_or(true, |w| w.admits(r.mid_mjd)))
            .filter(|r| r.footprint.intersects(&query.footprint))
            .map(ExposureRecord::chip_ref)
            .collect();
        debug!(found = found.len(), "cone search");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use celestial_xmatch::{HealpixRegion, SphericalPolygon};

    fn record(exposure: u64, run_id: &str, mid_mjd: f64, ra: f64) -> ExposureRecord {
        ExposureRecord {
            exposure,
            chip: 1,
            run_id: run_id.to_string(),
            mid_mjd,
            footprint: SphericalPolygon::from_bounds(ra, ra + 0.2, 5.0, 5.2)
                .unwrap()
                .into(),
        }
    }

    fn query(window: Option<TimeWindow>, run_ids: &[&str]) -> ConeQuery {
        ConeQuery {
            footprint: SphericalPolygon::from_bounds(10.0, 10.2, 5.0, 5.2)
                .unwrap()
                .into(),
            window,
            run_ids: run_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_time_window_bounds() {
        let window = TimeWindow::around(100.0, 2.0 / 24.0, Some(30.0));
        assert!(!window.admits(100.0));
        assert!(!window.admits(100.05));
        assert!(window.admits(100.1));
        assert!(window.admits(70.0));
        assert!(!window.admits(130.5));
        assert!(TimeWindow::around(100.0, 0.0, None).admits(1.0e6));
    }

    #[test]
    fn test_search_filters_sky_time_and_run() {
        let index = ExposureIndex::new(vec![
            record(1, "A", 50.0, 10.05),
            record(2, "A", 50.0, 30.0),
            record(3, "B", 51.0, 10.1),
            record(4, "A", 100.01, 10.0),
        ]);

        let window = TimeWindow::around(100.0, 2.0 / 24.0, None);
        let found = index.search(&query(Some(window), &[])).unwrap();
        assert_eq!(found, vec![ChipRef::new(1, 1), ChipRef::new(3, 1)]);

        let found = index.search(&query(Some(window), &["B"])).unwrap();
        assert_eq!(found, vec![ChipRef::new(3, 1)]);

        let found = index.search(&query(None, &[])).unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_search_by_healpix_region() {
        let index = ExposureIndex::new(vec![record(1, "A", 50.0, 10.05), record(2, "A", 50.0, 30.0)]);
        let pixel = celestial_xmatch::healpix::ang2pix_nest(7, 10.1, 5.1);
        let region = ConeQuery {
            footprint: HealpixRegion::new(7, [pixel]).unwrap().into(),
            window: None,
            run_ids: Vec::new(),
        };
        assert_eq!(index.search(&region).unwrap(), vec![ChipRef::new(1, 1)]);
    }

    #[test]
    fn test_upsert_and_persist() {
        let store = MemoryStore::new();
        assert!(ExposureIndex::load(&store).unwrap_err().is_catalog_not_found());

        let mut index = ExposureIndex::default();
        index.upsert(record(1, "A", 50.0, 10.0));
        index.upsert(record(2, "A", 60.0, 10.0));
        index.upsert(record(1, "A", 55.0, 10.0));
        assert_eq!(index.records().len(), 2);
        assert_eq!(index.records()[0].mid_mjd, 55.0);

        index.save(&store).unwrap();
        assert_eq!(ExposureIndex::load(&store).unwrap(), index);
    }
}
