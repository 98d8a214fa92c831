//! Object keys for everything the pipeline stores.

use crate::catalog::ChipRef;

pub const EXPOSURE_INDEX_KEY: &str = "index/exposures.json";

/// Base name shared by a chip's catalog and its status records,
/// e.g. `fk1616681p22`.
pub fn dataset_name(prefix: &str, chip: ChipRef, version: &str) -> String {
    format!("{prefix}{}{version}{:02}", chip.exposure, chip.chip)
}

pub fn exposure_catalog_key(prefix: &str, chip: ChipRef, version: &str) -> String {
    format!(
        "catalogs/{}/ccd{:02}/{}.cat",
        chip.exposure,
        chip.chip,
        dataset_name(prefix, chip, version)
    )
}

pub fn shard_key(order: u32, pixel: u64) -> String {
    format!("hpx/{order}/{pixel}.hpx")
}

pub fn status_key(task: &str, prefix: &str, chip: ChipRef, version: &str) -> String {
    format!("status/{task}/{}.json", dataset_name(prefix, chip, version))
}
