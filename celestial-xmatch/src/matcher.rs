//! Nearest-neighbour matching of two position lists under a tolerance.
//!
//! Distances are planar in (RA, Dec) degrees with no `cos(dec)` factor.
//! That is the behaviour downstream HPXID and MATCHES bookkeeping was built
//! around; it is only meaningful for arcsecond-scale tolerances away from
//! the poles and the RA wrap at 0/360 degrees.
//!
//! For every point of list A the closest point of list B is found; the pair
//! is reported as [`MatchOutcome::Matched`] when the distance is within the
//! tolerance. Ties go to the lowest B index, so results depend only on the
//! order of the inputs.

use crate::error::{XmatchError, XmatchResult};

/// One arcsecond in degrees.
pub const ARCSEC: f64 = 1.0 / 3600.0;

/// A sky position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkyPoint {
    pub ra: f64,
    pub dec: f64,
}

impl SkyPoint {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    pub fn is_finite(&self) -> bool {
        self.ra.is_finite() && self.dec.is_finite()
    }

    /// Planar distance in degrees.
    pub fn planar_distance(&self, other: &SkyPoint) -> f64 {
        libm::hypot(self.ra - other.ra, self.dec - other.dec)
    }
}

/// Per-element result of [`SpatialMatcher::match_lists`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// Nearest B point, with its planar distance in degrees.
    Matched { index: usize, distance: f64 },
    Unmatched,
}

impl MatchOutcome {
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Matched { index, .. } => Some(*index),
            Self::Unmatched => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialMatcher {
    tolerance_deg: f64,
}

impl SpatialMatcher {
    /// # Errors
    /// Returns an error unless the tolerance is finite and non-negative.
    pub fn new(tolerance_deg: f64) -> XmatchResult<Self> {
        if !tolerance_deg.is_finite() || tolerance_deg < 0.0 {
            return Err(XmatchError::invalid_tolerance(format!(
                "tolerance must be finite and >= 0, got {tolerance_deg}"
            )));
        }
        Ok(Self { tolerance_deg })
    }

    pub fn from_arcsec(arcsec: f64) -> XmatchResult<Self> {
        Self::new(arcsec * ARCSEC)
    }

    pub fn tolerance_deg(&self) -> f64 {
        self.tolerance_deg
    }

    /// Match every point of `a` against its nearest neighbour in `b`.
    ///
    /// The output has one entry per element of `a`, in the same order.
    /// Non-finite points never match and are never matched against.
    pub fn match_lists(&self, a: &[SkyPoint], b: &[SkyPoint]) -> Vec<MatchOutcome> {
        let index = DecIndex::new(b);
        a.iter().map(|p| self.nearest(&index, b, p)).collect()
    }

    fn nearest(&self, index: &DecIndex, b: &[SkyPoint], p: &SkyPoint) -> MatchOutcome {
        if !p.is_finite() {
            return MatchOutcome::Unmatched;
        }

        let mut best: Option<(f64, usize)> = None;
        for &j in index.window(p.dec - self.tolerance_deg, p.dec + self.tolerance_deg) {
            let d = p.planar_distance(&b[j]);
            if d > self.tolerance_deg {
                continue;
            }
            let closer = match best {
                None => true,
                Some((best_d, best_j)) => d < best_d || (d == best_d && j < best_j),
            };
            if closer {
                best = Some((d, j));
            }
        }

        match best {
            Some((distance, index)) => MatchOutcome::Matched { index, distance },
            None => MatchOutcome::Unmatched,
        }
    }
}

/// B indices sorted by declination so each query scans only a band.
struct DecIndex {
    order: Vec<usize>,
    decs: Vec<f64>,
}

impl DecIndex {
    fn new(points: &[SkyPoint]) -> Self {
        let mut order: Vec<usize> = (0..points.len())
            .filter(|&i| points[i].is_finite())
            .collect();
        order.sort_by(|&i, &j| points[i].dec.total_cmp(&points[j].dec).then(i.cmp(&j)));
        let decs = order.iter().map(|&i| points[i].dec).collect();
        Self { order, decs }
    }

    fn window(&self, lo: f64, hi: f64) -> &[usize] {
        let start = self.decs.partition_point(|&d| d < lo);
        let end = self.decs.partition_point(|&d| d <= hi);
        &self.order[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> SpatialMatcher {
        SpatialMatcher::from_arcsec(0.5).unwrap()
    }

    #[test]
    fn test_match_within_half_arcsecond() {
        let a = [SkyPoint::new(10.0, 5.0)];
        let b = [SkyPoint::new(10.00013, 5.0)];
        let out = matcher().match_lists(&a, &b);
        match out[0] {
            MatchOutcome::Matched { index, distance } => {
                assert_eq!(index, 0);
                assert!((distance - 0.00013).abs() < 1e-12);
            }
            MatchOutcome::Unmatched => panic!("expected a match"),
        }
    }

    #[test]
    fn test_one_arcsecond_is_unmatched() {
        let a = [SkyPoint::new(10.0, 5.0)];
        let b = [SkyPoint::new(10.0 + ARCSEC, 5.0)];
        assert_eq!(matcher().match_lists(&a, &b), vec![MatchOutcome::Unmatched]);
    }

    #[test]
    fn test_nearest_wins() {
        let a = [SkyPoint::new(20.0, -10.0)];
        let b = [
            SkyPoint::new(20.0 + 0.4 * ARCSEC, -10.0),
            SkyPoint::new(20.0, -10.0 + 0.1 * ARCSEC),
            SkyPoint::new(20.0 - 0.3 * ARCSEC, -10.0),
        ];
        assert_eq!(matcher().match_lists(&a, &b)[0].index(), Some(1));
    }

    #[test]
    fn test_ties_go_to_first_index() {
        let a = [SkyPoint::new(10.0, 0.0)];
        let north = SkyPoint::new(10.0, 0.2 * ARCSEC);
        let south = SkyPoint::new(10.0, -0.2 * ARCSEC);
        assert_eq!(matcher().match_lists(&a, &[north, south])[0].index(), Some(0));
        assert_eq!(matcher().match_lists(&a, &[south, north])[0].index(), Some(0));
    }

    #[test]
    fn test_duplicate_targets_pick_lowest_index() {
        let a = [SkyPoint::new(150.0, 2.0)];
        let b = [
            SkyPoint::new(151.0, 2.0),
            SkyPoint::new(150.0, 2.0),
            SkyPoint::new(150.0, 2.0),
        ];
        assert_eq!(matcher().match_lists(&a, &b)[0].index(), Some(1));
    }

    #[test]
    fn test_output_is_aligned_with_first_list() {
        let a = [
            SkyPoint::new(1.0, 1.0),
            SkyPoint::new(2.0, 2.0),
            SkyPoint::new(3.0, 3.0),
        ];
        let b = [SkyPoint::new(3.0, 3.0), SkyPoint::new(1.0, 1.0)];
        let out = matcher().match_lists(&a, &b);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].index(), Some(1));
        assert!(!out[1].is_matched());
        assert_eq!(out[2].index(), Some(0));
    }

    #[test]
    fn test_several_a_points_may_share_one_b_point() {
        let a = [
            SkyPoint::new(45.0, 45.0),
            SkyPoint::new(45.0, 45.0 + 0.1 * ARCSEC),
        ];
        let b = [SkyPoint::new(45.0, 45.0)];
        let out = matcher().match_lists(&a, &b);
        assert_eq!(out[0].index(), Some(0));
        assert_eq!(out[1].index(), Some(0));
    }

    #[test]
    fn test_planar_metric_ignores_cos_dec() {
        // 0.6" of RA at dec 80 is about 0.1" on the sky but is measured as 0.6".
        let a = [SkyPoint::new(10.0, 80.0)];
        let b = [SkyPoint::new(10.0 + 0.6 * ARCSEC, 80.0)];
        assert!(!matcher().match_lists(&a, &b)[0].is_matched());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(matcher().match_lists(&[], &[SkyPoint::new(0.0, 0.0)]).is_empty());
        let out = matcher().match_lists(&[SkyPoint::new(0.0, 0.0)], &[]);
        assert_eq!(out, vec![MatchOutcome::Unmatched]);
    }

    #[test]
    fn test_non_finite_points_never_match() {
        let a = [SkyPoint::new(f64::NAN, 0.0), SkyPoint::new(0.0, 0.0)];
        let b = [SkyPoint::new(0.0, f64::NAN), SkyPoint::new(0.0, 0.0)];
        let out = matcher().match_lists(&a, &b);
        assert!(!out[0].is_matched());
        assert_eq!(out[1].index(), Some(1));
    }

    #[test]
    fn test_zero_tolerance_requires_exact_position() {
        let m = SpatialMatcher::new(0.0).unwrap();
        let a = [SkyPoint::new(5.0, 5.0), SkyPoint::new(5.0, 5.000001)];
        let b = [SkyPoint::new(5.0, 5.0)];
        let out = m.match_lists(&a, &b);
        assert!(out[0].is_matched());
        assert!(!out[1].is_matched());
    }

    #[test]
    fn test_rejects_bad_tolerance() {
        assert!(SpatialMatcher::new(-1.0).is_err());
        assert!(SpatialMatcher::new(f64::NAN).is_err());
        assert!(SpatialMatcher::new(f64::INFINITY).is_err());
    }
}
