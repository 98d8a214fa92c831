//! Per-pixel shard catalogs: load, identifier assignment, merge and
//! conditional write-back.
//!
//! A shard is always read, changed in memory and rewritten whole. The write
//! is conditional on the generation that was read, so two tasks that touch
//! the same pixel at once cannot silently overwrite each other: the second
//! writer gets [`StationaryError::ShardConflict`].

use tracing::debug;

use celestial_xmatch::SpatialMatcher;

use crate::catalog::{DatasetId, ShardCatalog, SourceRow};
use crate::codec::{decode_shard, encode_shard};
use crate::error::{StationaryError, StationaryResult, StorageError};
use crate::paths::shard_key;
use crate::storage::{ObjectStore, WritePrecondition, WriteResult};

pub struct ShardStore<S> {
    store: S,
    order: u32,
    matcher: SpatialMatcher,
}

impl<S: ObjectStore> ShardStore<S> {
    pub fn new(store: S, order: u32, matcher: SpatialMatcher) -> Self {
        Self {
            store,
            order,
            matcher,
        }
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    /// Load the shard for `pixel`; `None` if it has never been written.
    pub fn get(&self, pixel: u64) -> StationaryResult<Option<ShardCatalog>> {
        let key = shard_key(self.order, pixel);
        let object = match self.store.get(&key) {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut shard = decode_shard(&object.data).map_err(|e| StationaryError::codec(&key, e))?;
        if shard.pixel != pixel || shard.order != self.order {
            return Err(StorageError::corrupt(
                &key,
                format!("holds pixel {} at order {}", shard.pixel, shard.order),
            )
            .into());
        }
        shard.generation = Some(object.generation);
        Ok(Some(shard))
    }

    pub fn get_or_empty(&self, pixel: u64) -> StationaryResult<ShardCatalog> {
        Ok(self
            .get(pixel)?
            .unwrap_or_else(|| ShardCatalog::empty(self.order, pixel)))
    }

    /// Give every row of `rows` that falls in the shard's pixel an HPXID.
    ///
    /// A row within tolerance of a shard row inherits that row's HPXID.
    /// Other rows get fresh identifiers counting up from
    /// `max(next_hpxid, shard row count)`. Rows of other pixels are left
    /// alone. Returns the number of fresh identifiers handed out.
    pub fn assign_identifiers(&self, shard: &mut ShardCatalog, rows: &mut [SourceRow]) -> usize {
        let indices: Vec<usize> = (0..rows.len())
            .filter(|&i| rows[i].healpix == shard.pixel)
            .collect();
        if indices.is_empty() {
            return 0;
        }

        let targets = shard.positions();
        let queries: Vec<_> = indices.iter().map(|&i| rows[i].position()).collect();
        let outcomes = self.matcher.match_lists(&queries, &targets);

        let mut next = shard.next_hpxid.max(shard.rows.len() as i64);
        let mut fresh = 0;
        for (&i, outcome) in indices.iter().zip(&outcomes) {
            let inherited = outcome
                .index()
                .map(|j| shard.rows[j].hpxid)
                .filter(|&id| id >= 0);
            rows[i].hpxid = match inherited {
                Some(id) => id,
                None => {
                    let id = next;
                    next += 1;
                    fresh += 1;
                    id
                }
            };
        }
        shard.next_hpxid = next;
        fresh
    }

    /// Drop the rows previously contributed by `dataset`, then append `rows`.
    pub fn merge(
        &self,
        mut shard: ShardCatalog,
        dataset: &DatasetId,
        rows: impl IntoIterator<Item = SourceRow>,
    ) -> ShardCatalog {
        let before = shard.rows.len();
        shard.rows.retain(|row| &row.dataset != dataset);
        let removed = before - shard.rows.len();
        shard.rows.extend(rows);
        debug!(
            pixel = shard.pixel,
            dataset = %dataset,
            removed,
            total = shard.rows.len(),
            "merged shard"
        );
        shard
    }

    /// Write the whole shard, provided nobody else wrote it since it was read.
    ///
    /// On success the shard's generation is advanced to the stored one.
    pub fn put(&self, shard: &mut ShardCatalog) -> StationaryResult<u64> {
        let key = shard_key(self.order, shard.pixel);
        let bytes = encode_shard(shard).map_err(|e| StationaryError::codec(&key, e))?;
        let precondition = match shard.generation {
            Some(generation) => WritePrecondition::MatchesGeneration(generation),
            None => WritePrecondition::DoesNotExist,
        };

        match self.store.put(&key, &bytes, precondition)? {
            WriteResult::Success { generation } => {
                shard.generation = Some(generation);
                debug!(key = %key, generation, rows = shard.rows.len(), "wrote shard");
                Ok(generation)
            }
            WriteResult::PreconditionFailed { .. } => {
                Err(StationaryError::ShardConflict { pixel: shard.pixel })
            }
        }
    }
}
