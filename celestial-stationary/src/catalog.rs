//! In-memory catalogs: source rows, per-chip exposure catalogs and the
//! per-pixel shard catalogs they accumulate into.

use std::collections::BTreeSet;
use std::fmt;

use celestial_xmatch::{healpix::ang2pix_nest, Footprint, SkyPoint};
use serde::{Deserialize, Serialize};

/// HPXID of a row that has not been assigned an identifier yet.
pub const UNASSIGNED_HPXID: i64 = -1;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One chip of one exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChipRef {
    pub exposure: u64,
    pub chip: u32,
}

impl ChipRef {
    pub fn new(exposure: u64, chip: u32) -> Self {
        Self { exposure, chip }
    }
}

impl fmt::Display for ChipRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ccd{:02}", self.exposure, self.chip)
    }
}

/// Owning dataset of a row: exposure, processing version and chip,
/// e.g. `1616681p22`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(chip: ChipRef, version: &str) -> Self {
        Self(format!("{}{}{:02}", chip.exposure, version, chip.chip))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DatasetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A detected source (`X_WORLD`, `Y_WORLD`, `HEALPIX`, `HPXID`, `MATCHES`,
/// `OVERLAPS`, dataset, mid-epoch).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub ra: f64,
    pub dec: f64,
    pub healpix: u64,
    pub hpxid: i64,
    pub matches: u32,
    pub overlaps: u32,
    pub dataset: DatasetId,
    pub mid_mjd: f64,
}

impl SourceRow {
    /// A freshly detected source with no bookkeeping yet.
    pub fn detected(ra: f64, dec: f64) -> Self {
        Self {
            ra,
            dec,
            healpix: 0,
            hpxid: UNASSIGNED_HPXID,
            matches: 0,
            overlaps: 0,
            dataset: DatasetId::default(),
            mid_mjd: 0.0,
        }
    }

    pub fn position(&self) -> SkyPoint {
        SkyPoint::new(self.ra, self.dec)
    }

    pub fn has_hpxid(&self) -> bool {
        self.hpxid != UNASSIGNED_HPXID
    }
}

/// The sources of one exposure chip, with its footprint and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureCatalog {
    pub chip: ChipRef,
    pub version: String,
    pub mjd_start: f64,
    pub exptime_s: f64,
    pub footprint: Footprint,
    pub rows: Vec<SourceRow>,
}

impl ExposureCatalog {
    pub fn dataset_id(&self) -> DatasetId {
        DatasetId::new(self.chip, &self.version)
    }

    /// Epoch at the middle of the exposure, MJD.
    pub fn mid_mjd(&self) -> f64 {
        self.mjd_start + self.exptime_s / 2.0 / SECONDS_PER_DAY
    }

    pub fn positions(&self) -> Vec<SkyPoint> {
        self.rows.iter().map(SourceRow::position).collect()
    }

    /// Stamp every row with this catalog's dataset and epoch, place it in its
    /// pixel at `order`, and clear identifiers and counts from earlier runs.
    pub fn prepare(&mut self, order: u32) {
        let dataset = self.dataset_id();
        let mid_mjd = self.mid_mjd();
        for row in &mut self.rows {
            row.healpix = ang2pix_nest(order, row.ra, row.dec);
            row.hpxid = UNASSIGNED_HPXID;
            row.matches = 0;
            row.overlaps = 0;
            row.dataset = dataset.clone();
            row.mid_mjd = mid_mjd;
        }
    }

    /// Distinct pixels of the rows, ascending.
    pub fn pixels(&self) -> BTreeSet<u64> {
        self.rows.iter().map(|row| row.healpix).collect()
    }
}

/// The accumulated rows of one HEALPix pixel.
///
/// `generation` is the storage generation the shard was read at, or `None`
/// for a shard that has never been written.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardCatalog {
    pub pixel: u64,
    pub order: u32,
    pub next_hpxid: i64,
    pub rows: Vec<SourceRow>,
    pub generation: Option<u64>,
}

impl ShardCatalog {
    pub fn empty(order: u32, pixel: u64) -> Self {
        Self {
            pixel,
            order,
            next_hpxid: 0,
            rows: Vec::new(),
            generation: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positions(&self) -> Vec<SkyPoint> {
        self.rows.iter().map(SourceRow::position).collect()
    }

    pub fn rows_for<'a>(&'a self, dataset: &'a DatasetId) -> impl Iterator<Item = &'a SourceRow> {
        self.rows.iter().filter(move |row| &row.dataset == dataset)
    }
}
