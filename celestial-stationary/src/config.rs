//! Layered pipeline configuration.
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. A TOML file (`stationary.toml` in the working directory unless a path is given)
//! 3. Environment variables prefixed `STATIONARY_` (`STATIONARY_HEALPIX_ORDER=8`)
//! 4. Explicit overrides from the command line
//!
//! The loaded value is handed to every component; nothing reads ambient state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use celestial_xmatch::{healpix::MAX_ORDER, SpatialMatcher, XmatchResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "stationary.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StationaryConfig {
    /// Root directory of the file-backed stores.
    pub storage_root: PathBuf,
    /// Nested HEALPix order of the shard pixels.
    pub healpix_order: u32,
    /// Tolerance for both HPXID assignment and MATCHES counting.
    pub match_tolerance_arcsec: f64,
    /// Allowed run identifiers for candidate exposures; empty admits all.
    pub run_ids: Vec<String>,
    pub min_separation_days: f64,
    pub max_separation_days: Option<f64>,
    /// Task name under which status records are kept.
    pub task: String,
    /// Upstream task that must have succeeded first.
    pub dependency: Option<String>,
    pub prefix: String,
    pub version: String,
    /// Seconds to wait for a locked object in the file store.
    pub lock_wait_secs: u64,
    /// Seconds after which a file-store lock counts as abandoned.
    pub stale_lock_secs: u64,
}

impl Default for StationaryConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("dbimages"),
            healpix_order: 7,
            match_tolerance_arcsec: 0.5,
            run_ids: Vec::new(),
            min_separation_days: 2.0 / 24.0,
            max_separation_days: None,
            task: "stationary".to_string(),
            dependency: None,
            prefix: String::new(),
            version: "p".to_string(),
            lock_wait_secs: 30,
            stale_lock_secs: 600,
        }
    }
}

impl StationaryConfig {
    /// Provider chain without command-line overrides.
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match config_file {
            Some(path) => figment = figment.merge(Toml::file_exact(path)),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    figment = figment.merge(Toml::file(local));
                }
            }
        }

        figment.merge(Env::prefixed("STATIONARY_"))
    }

    /// Load, apply an optional storage root override, and validate.
    pub fn load(config_file: Option<&Path>, storage_root: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Self::figment(config_file);
        if let Some(root) = storage_root {
            figment = figment.merge(Serialized::default("storage_root", root));
        }
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.healpix_order > MAX_ORDER {
            return Err(ConfigError::invalid(
                "healpix_order",
                format!("{} exceeds the maximum order {MAX_ORDER}", self.healpix_order),
            ));
        }
        if !self.match_tolerance_arcsec.is_finite() || self.match_tolerance_arcsec < 0.0 {
            return Err(ConfigError::invalid(
                "match_tolerance_arcsec",
                "must be finite and non-negative",
            ));
        }
        if !self.min_separation_days.is_finite() || self.min_separation_days < 0.0 {
            return Err(ConfigError::invalid(
                "min_separation_days",
                "must be finite and non-negative",
            ));
        }
        if let Some(max) = self.max_separation_days {
            if max.is_nan() || max < self.min_separation_days {
                return Err(ConfigError::invalid(
                    "max_separation_days",
                    format!("{max} is below min_separation_days"),
                ));
            }
        }
        if self.task.is_empty() {
            return Err(ConfigError::invalid("task", "must not be empty"));
        }
        if self.version.is_empty() {
            return Err(ConfigError::invalid("version", "must not be empty"));
        }
        if self.stale_lock_secs == 0 {
            return Err(ConfigError::invalid("stale_lock_secs", "must be positive"));
        }
        Ok(())
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    pub fn matcher(&self) -> XmatchResult<SpatialMatcher> {
        SpatialMatcher::from_arcsec(self.match_tolerance_arcsec)
    }
}
