//! Stationary-source bookkeeping for a wide-field survey.
//!
//! Each exposure chip's source catalog is cross-matched against earlier and
//! later epochs that cover the same sky, and its sources are folded into
//! per-HEALPix-pixel shard catalogs that hand out persistent per-pixel
//! identifiers (HPXIDs). A source that keeps being detected wherever it
//! could have been seen (high MATCHES relative to OVERLAPS) is a fixed
//! object; the cut itself is left to downstream consumers.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`catalog`] | [`SourceRow`], [`ExposureCatalog`], [`ShardCatalog`] and identifiers |
//! | [`codec`] | Binary encoding of exposure and shard catalogs |
//! | [`storage`] | [`ObjectStore`] with conditional writes; [`MemoryStore`], [`FileStore`] |
//! | [`paths`] | Object key layout |
//! | [`exposures`] | [`CatalogStore`]: per-chip catalogs, candidate lookup |
//! | [`shard`] | [`ShardStore`]: HPXID assignment, merge, conditional write-back |
//! | [`status`] | [`StatusStore`] and [`TaskStatus`] records |
//! | [`cone`] | [`ConeSearch`] and the stored [`ExposureIndex`] |
//! | [`overlap`] | [`OverlapAccumulator`]: MATCHES and OVERLAPS counting |
//! | [`orchestrator`] | [`MatchOrchestrator`]: the per-chip task |
//! | [`batch`] | [`run_batch`] over a list of pixels |
//! | [`config`] | [`StationaryConfig`], layered with figment |
//!
//! # Example
//!
//! ```
//! use celestial_stationary::{
//!     CatalogStore, ChipRef, ExposureCatalog, ExposureIndex, MatchOrchestrator, MemoryStore,
//!     RunOptions, SourceRow, StationaryConfig, TaskOutcome,
//! };
//! use celestial_xmatch::SphericalPolygon;
//!
//! let store = MemoryStore::new();
//! let config = StationaryConfig::default();
//! let chip = ChipRef::new(1616681, 22);
//! let catalog = ExposureCatalog {
//!     chip,
//!     version: "p".to_string(),
//!     mjd_start: 57_000.0,
//!     exptime_s: 300.0,
//!     footprint: SphericalPolygon::from_bounds(10.0, 10.2, 5.0, 5.2).unwrap().into(),
//!     rows: vec![SourceRow::detected(10.1, 5.1)],
//! };
//! CatalogStore::new(&store, "", "p").put(&catalog).unwrap();
//!
//! let index = ExposureIndex::default();
//! let orchestrator = MatchOrchestrator::new(&config, &store, &index).unwrap();
//! let outcome = orchestrator.run(chip, RunOptions::default()).unwrap();
//! assert!(matches!(outcome, TaskOutcome::Completed(_)));
//! ```

pub mod batch;
pub mod catalog;
pub mod codec;
pub mod cone;
pub mod config;
mod error;
pub mod exposures;
pub mod orchestrator;
pub mod overlap;
pub mod paths;
pub mod shard;
pub mod status;
pub mod storage;

pub use batch::{run_batch, run_tasks, tasks_for_pixels, BatchSummary};
pub use catalog::{ChipRef, DatasetId, ExposureCatalog, ShardCatalog, SourceRow, UNASSIGNED_HPXID};
pub use cone::{ConeQuery, ConeSearch, ExposureIndex, ExposureRecord, TimeWindow};
pub use config::{ConfigError, StationaryConfig};
pub use error::{StationaryError, StationaryResult, StorageError, StorageResult};
pub use exposures::{CandidateSource, CatalogStore};
pub use orchestrator::{MatchOrchestrator, RunOptions, TaskOutcome, TaskReport};
pub use overlap::{OverlapAccumulator, OverlapSummary};
pub use shard::ShardStore;
pub use status::{StatusStore, TaskKey, TaskStatus};
pub use storage::{FileStore, MemoryStore, ObjectStore, StoredObject, WritePrecondition, WriteResult};
