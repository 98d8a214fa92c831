//! Per-chip exposure catalogs in the object store.

use tracing::debug;

use crate::catalog::{ChipRef, ExposureCatalog};
use crate::codec::{decode_exposure, encode_exposure};
use crate::error::{StationaryError, StationaryResult};
use crate::paths::exposure_catalog_key;
use crate::storage::{ObjectStore, WritePrecondition};

/// Where candidate epoch catalogs come from during overlap counting.
pub trait CandidateSource {
    /// `Ok(None)` when no catalog has been written for `chip` yet.
    fn candidate(&self, chip: ChipRef) -> StationaryResult<Option<ExposureCatalog>>;
}

pub struct CatalogStore<S> {
    store: S,
    prefix: String,
    version: String,
}

impl<S: ObjectStore> CatalogStore<S> {
    pub fn new(store: S, prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn key(&self, chip: ChipRef) -> String {
        exposure_catalog_key(&self.prefix, chip, &self.version)
    }

    /// Load a chip's catalog; a missing catalog is
    /// [`StationaryError::CatalogNotFound`].
    pub fn get(&self, chip: ChipRef) -> StationaryResult<ExposureCatalog> {
        let key = self.key(chip);
        let object = self
            .store
            .get(&key)
            .map_err(|e| StationaryError::from_catalog_read(&key, e))?;
        decode_exposure(&object.data).map_err(|e| StationaryError::codec(&key, e))
    }

    /// Replace the stored catalog for `catalog.chip`.
    pub fn put(&self, catalog: &ExposureCatalog) -> StationaryResult<()> {
        let key = self.key(catalog.chip);
        let bytes = encode_exposure(catalog).map_err(|e| StationaryError::codec(&key, e))?;
        self.store.put(&key, &bytes, WritePrecondition::None)?;
        debug!(key = %key, rows = catalog.rows.len(), "wrote exposure catalog");
        Ok(())
    }
}

impl<S: ObjectStore> CandidateSource for CatalogStore<S> {
    fn candidate(&self, chip: ChipRef) -> StationaryResult<Option<ExposureCatalog>> {
        match self.get(chip) {
            Ok(catalog) => Ok(Some(catalog)),
            Err(e) if e.is_catalog_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
