//! Error types for the stationary-source pipeline.
//!
//! Storage collaborators report [`StorageError`], which keeps "the object is
//! not there" apart from every other failure. Pipeline code works in
//! [`StationaryError`]:
//!
//! | Variant | Raised when | Effect on the task |
//! |---------|-------------|--------------------|
//! | [`DependencyNotMet`](StationaryError::DependencyNotMet) | upstream task has not succeeded | fails, no catalog or shard writes |
//! | [`CatalogNotFound`](StationaryError::CatalogNotFound) | primary exposure catalog missing | fails (candidate catalogs are skipped instead) |
//! | [`Storage`](StationaryError::Storage) | any other read/write failure | fails |
//! | [`Match`](StationaryError::Match) | invalid geometry or tolerance | fails |
//! | [`Codec`](StationaryError::Codec) | stored bytes cannot be decoded | fails |
//! | [`ShardConflict`](StationaryError::ShardConflict) | a shard changed after it was read | fails, shard untouched |

use celestial_xmatch::XmatchError;
use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;

pub type StorageResult<T> = Result<T, StorageError>;

pub type StationaryResult<T> = Result<T, StationaryError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object {key} is corrupt: {message}")]
    Corrupt { key: String, message: String },

    #[error("Object {key} is locked by another writer")]
    Locked { key: String },
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }

    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn locked(key: impl Into<String>) -> Self {
        Self::Locked { key: key.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum StationaryError {
    #[error("{dependency} not yet run for {dataset}")]
    DependencyNotMet { dependency: String, dataset: String },

    #[error("Catalog not found: {key}")]
    CatalogNotFound { key: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Match computation failed: {0}")]
    Match(#[from] XmatchError),

    #[error("Cannot decode {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("Shard {pixel} was modified by another writer since it was read")]
    ShardConflict { pixel: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StationaryError {
    pub fn dependency_not_met(dependency: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self::DependencyNotMet {
            dependency: dependency.into(),
            dataset: dataset.into(),
        }
    }

    pub fn codec(key: impl Into<String>, source: CodecError) -> Self {
        Self::Codec {
            key: key.into(),
            source,
        }
    }

    /// Turn a storage miss on `key` into [`StationaryError::CatalogNotFound`].
    pub fn from_catalog_read(key: &str, err: StorageError) -> Self {
        if err.is_not_found() {
            Self::CatalogNotFound {
                key: key.to_string(),
            }
        } else {
            Self::Storage(err)
        }
    }

    pub fn is_catalog_not_found(&self) -> bool {
        matches!(self, Self::CatalogNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguished() {
        assert!(StorageError::not_found("hpx/7/1.hpx").is_not_found());
        let io = StorageError::io("hpx/7/1.hpx", std::io::Error::other("disk full"));
        assert!(!io.is_not_found());
        assert!(io.to_string().contains("disk full"));
    }

    #[test]
    fn test_catalog_read_mapping() {
        let missing = StationaryError::from_catalog_read("a.cat", StorageError::not_found("a.cat"));
        assert!(missing.is_catalog_not_found());
        let locked = StationaryError::from_catalog_read("a.cat", StorageError::locked("a.cat"));
        assert!(matches!(locked, StationaryError::Storage(StorageError::Locked { .. })));
    }

    #[test]
    fn test_dependency_message() {
        let err = StationaryError::dependency_not_met("mkpsf", "1616681p22");
        assert_eq!(err.to_string(), "mkpsf not yet run for 1616681p22");
    }
}
