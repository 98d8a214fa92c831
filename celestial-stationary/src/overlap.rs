//! MATCHES and OVERLAPS counting against candidate epoch catalogs.
//!
//! For every candidate chip whose catalog exists, each source of the
//! exposure being processed gains one OVERLAPS if the candidate could have
//! seen it and one MATCHES if the candidate actually detected something
//! within tolerance. Deciding what ratio makes a source stationary is left
//! to the consumer of the counts.

use std::collections::BTreeSet;

use tracing::debug;

use celestial_xmatch::SpatialMatcher;

use crate::catalog::{ChipRef, ExposureCatalog};
use crate::error::StationaryResult;
use crate::exposures::CandidateSource;

/// What happened to the candidate list of one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlapSummary {
    /// Candidates returned by the cone search.
    pub searched: usize,
    /// Candidates whose catalogs were read and counted.
    pub used: usize,
    /// Candidates with no catalog yet.
    pub missing: usize,
    /// Repeated candidates and the chip being processed itself.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct OverlapAccumulator {
    matcher: SpatialMatcher,
}

impl OverlapAccumulator {
    pub fn new(matcher: SpatialMatcher) -> Self {
        Self { matcher }
    }

    /// Add the contributions of `candidates` to the rows of `catalog`.
    ///
    /// A candidate listed twice counts once, and `catalog`'s own chip never
    /// counts, so a source cannot match itself. A positional match implies
    /// coverage, keeping `matches <= overlaps` at footprint edges.
    ///
    /// # Errors
    /// Any read failure other than a missing candidate catalog.
    pub fn accumulate<C: CandidateSource + ?Sized>(
        &self,
        catalog: &mut ExposureCatalog,
        candidates: &[ChipRef],
        source: &C,
    ) -> StationaryResult<OverlapSummary> {
        let mut summary = OverlapSummary {
            searched: candidates.len(),
            ..OverlapSummary::default()
        };

        let positions = catalog.positions();
        let mut seen = BTreeSet::new();
        for &chip in candidates {
            if chip == catalog.chip || !seen.insert(chip) {
                summary.skipped += 1;
                continue;
            }

            let Some(candidate) = source.candidate(chip)? else {
                debug!(candidate = %chip, "no catalog for candidate, skipping");
                summary.missing += 1;
                continue;
            };

            let outcomes = self.matcher.match_lists(&positions, &candidate.positions());
            let mut matched = 0usize;
            for ((row, position), outcome) in catalog.rows.iter_mut().zip(&positions).zip(&outcomes) {
                let is_match = outcome.is_matched();
                if is_match {
                    row.matches += 1;
                    matched += 1;
                }
                if is_match || candidate.footprint.contains(position) {
                    row.overlaps += 1;
                }
            }
            debug!(candidate = %chip, matched, "counted candidate");
            summary.used += 1;
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::catalog::SourceRow;
    use crate::error::{StationaryError, StorageError};
    use celestial_xmatch::{SphericalPolygon, ARCSEC};

    struct Candidates(BTreeMap<ChipRef, ExposureCatalog>);

    impl CandidateSource for Candidates {
        fn candidate(&self, chip: ChipRef) -> StationaryResult<Option<ExposureCatalog>> {
            if chip.exposure == 999 {
                return Err(StorageError::locked("catalogs/999").into());
            }
            Ok(self.0.get(&chip).cloned())
        }
    }

    fn catalog(exposure: u64, ra_min: f64, sources: &[(f64, f64)]) -> ExposureCatalog {
        ExposureCatalog {
            chip: ChipRef::new(exposure, 1),
            version: "p".to_string(),
            mjd_start: exposure as f64,
            exptime_s: 60.0,
            footprint: SphericalPolygon::from_bounds(ra_min, ra_min + 0.2, 5.0, 5.2)
                .unwrap()
                .into(),
            rows: sources
                .iter()
                .map(|&(ra, dec)| SourceRow::detected(ra, dec))
                .collect(),
        }
    }

    fn accumulator() -> OverlapAccumulator {
        OverlapAccumulator::new(SpatialMatcher::from_arcsec(0.5).unwrap())
    }

    #[test]
    fn test_two_matches_three_overlaps() {
        let mut primary = catalog(1, 10.0, &[(10.1, 5.1)]);
        let near = 10.1 + 0.2 * ARCSEC;
        let source = Candidates(BTreeMap::from([
            (ChipRef::new(2, 1), catalog(2, 10.0, &[(near, 5.1)])),
            (ChipRef::new(3, 1), catalog(3, 10.0, &[(10.1, 5.1 - 0.3 * ARCSEC)])),
            (ChipRef::new(4, 1), catalog(4, 10.0, &[(10.15, 5.15)])),
        ]));
        let chips = [ChipRef::new(2, 1), ChipRef::new(3, 1), ChipRef::new(4, 1)];

        let summary = accumulator().accumulate(&mut primary, &chips, &source).unwrap();
        assert_eq!(primary.rows[0].matches, 2);
        assert_eq!(primary.rows[0].overlaps, 3);
        assert_eq!(summary.used, 3);
    }

    #[test]
    fn test_uncovered_source_gets_nothing() {
        let mut primary = catalog(1, 10.0, &[(10.1, 5.1)]);
        let source = Candidates(BTreeMap::from([(
            ChipRef::new(2, 1),
            catalog(2, 11.0, &[(11.1, 5.1)]),
        )]));
        accumulator()
            .accumulate(&mut primary, &[ChipRef::new(2, 1)], &source)
            .unwrap();
        assert_eq!((primary.rows[0].matches, primary.rows[0].overlaps), (0, 0));
    }

    #[test]
    fn test_match_outside_footprint_still_overlaps() {
        // Source just beyond the candidate's edge, detected anyway.
        let mut primary = catalog(1, 10.0, &[(10.2 + 0.1 * ARCSEC, 5.1)]);
        let source = Candidates(BTreeMap::from([(
            ChipRef::new(2, 1),
            catalog(2, 10.0, &[(10.2 - 0.1 * ARCSEC, 5.1)]),
        )]));
        accumulator()
            .accumulate(&mut primary, &[ChipRef::new(2, 1)], &source)
            .unwrap();
        assert_eq!(primary.rows[0].matches, 1);
        assert_eq!(primary.rows[0].overlaps, 1);
    }

    #[test]
    fn test_missing_candidates_are_skipped() {
        let mut primary = catalog(1, 10.0, &[(10.1, 5.1)]);
        let source = Candidates(BTreeMap::from([(
            ChipRef::new(2, 1),
            catalog(2, 10.0, &[(10.1, 5.1)]),
        )]));
        let summary = accumulator()
            .accumulate(&mut primary, &[ChipRef::new(5, 1), ChipRef::new(2, 1)], &source)
            .unwrap();
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.used, 1);
        assert_eq!(primary.rows[0].matches, 1);
    }

    #[test]
    fn test_other_read_failures_abort() {
        let mut primary = catalog(1, 10.0, &[(10.1, 5.1)]);
        let source = Candidates(BTreeMap::new());
        let err = accumulator()
            .accumulate(&mut primary, &[ChipRef::new(999, 1)], &source)
            .unwrap_err();
        assert!(matches!(err, StationaryError::Storage(StorageError::Locked { .. })));
    }

    #[test]
    fn test_self_and_duplicate_candidates_ignored() {
        let mut primary = catalog(1, 10.0, &[(10.1, 5.1)]);
        let source = Candidates(BTreeMap::from([
            (ChipRef::new(1, 1), primary.clone()),
            (ChipRef::new(2, 1), catalog(2, 10.0, &[(10.1, 5.1)])),
        ]));
        let chips = [ChipRef::new(1, 1), ChipRef::new(2, 1), ChipRef::new(2, 1)];

        let summary = accumulator().accumulate(&mut primary, &chips, &source).unwrap();
        assert_eq!(primary.rows[0].matches, 1);
        assert_eq!(primary.rows[0].overlaps, 1);
        assert_eq!(
            summary,
            OverlapSummary {
                searched: 3,
                used: 1,
                missing: 0,
                skipped: 2,
            }
        );
    }
}
