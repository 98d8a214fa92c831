//! Sky footprints and point containment.
//!
//! An exposure chip covers either a spherical polygon (its WCS corners) or
//! a set of HEALPix pixels. Both answer the same question: would a fixed
//! source at this position have been observable in that exposure?
//!
//! Polygon tests run in the gnomonic (TAN) plane about the vertex centroid,
//! where great-circle edges become straight lines, so a polygon must fit
//! inside one hemisphere.

use std::collections::BTreeSet;

use crate::error::{XmatchError, XmatchResult};
use crate::healpix::{ang2pix_nest, check_order, check_pixel, pixel_boundary};
use crate::matcher::SkyPoint;

type Vec3 = [f64; 3];

const PIXEL_EDGE_STEPS: usize = 4;

fn unit_vector(p: &SkyPoint) -> Vec3 {
    let (sin_ra, cos_ra) = libm::sincos(p.ra.to_radians());
    let (sin_dec, cos_dec) = libm::sincos(p.dec.to_radians());
    [cos_dec * cos_ra, cos_dec * sin_ra, sin_dec]
}

fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Tangent-plane frame centred on a unit vector.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TangentPlane {
    centre: Vec3,
    east: Vec3,
    north: Vec3,
}

impl TangentPlane {
    fn new(centre: Vec3) -> Self {
        let ra0 = libm::atan2(centre[1], centre[0]);
        let dec0 = libm::asin(centre[2].clamp(-1.0, 1.0));
        let (sin_ra, cos_ra) = libm::sincos(ra0);
        let (sin_dec, cos_dec) = libm::sincos(dec0);
        Self {
            centre,
            east: [-sin_ra, cos_ra, 0.0],
            north: [-sin_dec * cos_ra, -sin_dec * sin_ra, cos_dec],
        }
    }

    /// Project onto the plane; `None` on or behind the limb.
    fn project(&self, p: &SkyPoint) -> Option<(f64, f64)> {
        let v = unit_vector(p);
        let cos_c = dot(&v, &self.centre);
        if cos_c <= 1e-12 {
            return None;
        }
        Some((dot(&v, &self.east) / cos_c, dot(&v, &self.north) / cos_c))
    }
}

/// A simple polygon on the sphere with great-circle edges.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "Vec<SkyPoint>", into = "Vec<SkyPoint>")
)]
pub struct SphericalPolygon {
    vertices: Vec<SkyPoint>,
    plane: TangentPlane,
    projected: Vec<(f64, f64)>,
}

impl SphericalPolygon {
    /// # Errors
    /// Fails for fewer than three vertices, non-finite or out-of-range
    /// coordinates, and vertex sets that do not fit in one hemisphere.
    pub fn new(vertices: Vec<SkyPoint>) -> XmatchResult<Self> {
        if vertices.len() < 3 {
            return Err(XmatchError::invalid_polygon(format!(
                "need at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        for v in &vertices {
            if !v.is_finite() {
                return Err(XmatchError::non_finite(v.ra, v.dec));
            }
            if v.dec.abs() > 90.0 {
                return Err(XmatchError::invalid_polygon(format!(
                    "declination {} outside [-90, 90]",
                    v.dec
                )));
            }
        }

        let mut sum = [0.0; 3];
        for v in &vertices {
            let u = unit_vector(v);
            sum = [sum[0] + u[0], sum[1] + u[1], sum[2] + u[2]];
        }
        let norm = libm::sqrt(dot(&sum, &sum));
        if norm < 1e-9 {
            return Err(XmatchError::invalid_polygon("vertices have no well-defined centre"));
        }
        let plane = TangentPlane::new([sum[0] / norm, sum[1] / norm, sum[2] / norm]);

        let projected = vertices
            .iter()
            .map(|v| plane.project(v))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| XmatchError::invalid_polygon("polygon does not fit in one hemisphere"))?;

        Ok(Self {
            vertices,
            plane,
            projected,
        })
    }

    /// Axis-aligned box in (RA, Dec); corners in the order lower-left,
    /// lower-right, upper-right, upper-left.
    pub fn from_bounds(ra_min: f64, ra_max: f64, dec_min: f64, dec_max: f64) -> XmatchResult<Self> {
        Self::new(vec![
            SkyPoint::new(ra_min, dec_min),
            SkyPoint::new(ra_max, dec_min),
            SkyPoint::new(ra_max, dec_max),
            SkyPoint::new(ra_min, dec_max),
        ])
    }

    pub fn vertices(&self) -> &[SkyPoint] {
        &self.vertices
    }

    /// Unit-vector centroid of the vertices, as (RA, Dec) degrees.
    pub fn centre(&self) -> SkyPoint {
        let c = self.plane.centre;
        SkyPoint::new(
            libm::atan2(c[1], c[0]).to_degrees().rem_euclid(360.0),
            libm::asin(c[2].clamp(-1.0, 1.0)).to_degrees(),
        )
    }

    /// Even-odd containment. Points exactly on an edge may fall either way.
    pub fn contains(&self, p: &SkyPoint) -> bool {
        if !p.is_finite() {
            return false;
        }
        match self.plane.project(p) {
            Some(xy) => point_in_ring(xy, &self.projected),
            None => false,
        }
    }

    /// True if the two polygons share any area.
    pub fn intersects(&self, other: &SphericalPolygon) -> bool {
        if other.vertices.iter().any(|v| self.contains(v))
            || self.vertices.iter().any(|v| other.contains(v))
        {
            return true;
        }
        let Some(theirs) = other
            .vertices
            .iter()
            .map(|v| self.plane.project(v))
            .collect::<Option<Vec<_>>>()
        else {
            return false;
        };
        edges(&self.projected).any(|(a, b)| edges(&theirs).any(|(c, d)| segments_cross(a, b, c, d)))
    }
}

impl TryFrom<Vec<SkyPoint>> for SphericalPolygon {
    type Error = XmatchError;

    fn try_from(vertices: Vec<SkyPoint>) -> XmatchResult<Self> {
        Self::new(vertices)
    }
}

impl From<SphericalPolygon> for Vec<SkyPoint> {
    fn from(polygon: SphericalPolygon) -> Self {
        polygon.vertices
    }
}

fn edges(ring: &[(f64, f64)]) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
    ring.iter()
        .enumerate()
        .map(move |(i, &a)| (a, ring[(i + 1) % ring.len()]))
}

fn point_in_ring((x, y): (f64, f64), ring: &[(f64, f64)]) -> bool {
    let mut inside = false;
    for ((xi, yi), (xj, yj)) in edges(ring) {
        if (yi > y) != (yj > y) {
            let x_cross = xi + (y - yi) * (xj - xi) / (yj - yi);
            if x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

fn orientation(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn segments_cross(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

/// A set of nested HEALPix pixels at one order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawRegion")
)]
pub struct HealpixRegion {
    order: u32,
    pixels: BTreeSet<u64>,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawRegion {
    order: u32,
    pixels: Vec<u64>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawRegion> for HealpixRegion {
    type Error = XmatchError;

    fn try_from(raw: RawRegion) -> XmatchResult<Self> {
        Self::new(raw.order, raw.pixels)
    }
}

impl HealpixRegion {
    /// # Errors
    /// Fails for an unsupported order or a pixel outside the sphere.
    pub fn new(order: u32, pixels: impl IntoIterator<Item = u64>) -> XmatchResult<Self> {
        check_order(order)?;
        let pixels: BTreeSet<u64> = pixels.into_iter().collect();
        for &pixel in &pixels {
            check_pixel(order, pixel)?;
        }
        Ok(Self { order, pixels })
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn pixels(&self) -> &BTreeSet<u64> {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn contains(&self, p: &SkyPoint) -> bool {
        p.is_finite() && self.pixels.contains(&ang2pix_nest(self.order, p.ra, p.dec))
    }

    /// Exact for two regions: the finer one is coarsened to the other's order.
    pub fn intersects(&self, other: &HealpixRegion) -> bool {
        let (coarse, fine) = if self.order <= other.order {
            (self, other)
        } else {
            (other, self)
        };
        let shift = 2 * (fine.order - coarse.order);
        fine.pixels
            .iter()
            .any(|&pixel| coarse.pixels.contains(&(pixel >> shift)))
    }

    /// Boundary of one of the region's pixels as a polygon, following the
    /// curved pixel edges with a few points per side.
    pub fn pixel_polygon(&self, pixel: u64) -> XmatchResult<SphericalPolygon> {
        check_pixel(self.order, pixel)?;
        let vertices = pixel_boundary(self.order, pixel, PIXEL_EDGE_STEPS)
            .into_iter()
            .map(|(ra, dec)| SkyPoint::new(ra, dec))
            .collect();
        SphericalPolygon::new(vertices)
    }

    /// True if the polygon shares area with any pixel, tested against each
    /// pixel's boundary.
    pub fn intersects_polygon(&self, polygon: &SphericalPolygon) -> bool {
        if polygon.vertices().iter().any(|v| self.contains(v)) {
            return true;
        }
        self.pixels.iter().any(|&pixel| {
            self.pixel_polygon(pixel)
                .is_ok_and(|boundary| boundary.intersects(polygon))
        })
    }
}

/// The sky coverage of one exposure chip.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Footprint {
    Polygon(SphericalPolygon),
    Healpix(HealpixRegion),
}

impl Footprint {
    pub fn contains(&self, p: &SkyPoint) -> bool {
        match self {
            Self::Polygon(polygon) => polygon.contains(p),
            Self::Healpix(region) => region.contains(p),
        }
    }

    pub fn contains_radec(&self, ra: f64, dec: f64) -> bool {
        self.contains(&SkyPoint::new(ra, dec))
    }

    pub fn intersects(&self, other: &Footprint) -> bool {
        match (self, other) {
            (Self::Polygon(a), Self::Polygon(b)) => a.intersects(b),
            (Self::Healpix(a), Self::Healpix(b)) => a.intersects(b),
            (Self::Healpix(region), Self::Polygon(polygon))
            | (Self::Polygon(polygon), Self::Healpix(region)) => region.intersects_polygon(polygon),
        }
    }
}

impl From<SphericalPolygon> for Footprint {
    fn from(polygon: SphericalPolygon) -> Self {
        Self::Polygon(polygon)
    }
}

impl From<HealpixRegion> for Footprint {
    fn from(region: HealpixRegion) -> Self {
        Self::Healpix(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip() -> SphericalPolygon {
        SphericalPolygon::from_bounds(10.0, 10.2, 5.0, 5.2).unwrap()
    }

    #[test]
    fn test_polygon_contains_interior_point() {
        assert!(chip().contains(&SkyPoint::new(10.1, 5.1)));
    }

    #[test]
    fn test_polygon_excludes_exterior_points() {
        let polygon = chip();
        assert!(!polygon.contains(&SkyPoint::new(10.3, 5.1)));
        assert!(!polygon.contains(&SkyPoint::new(10.1, 4.9)));
        assert!(!polygon.contains(&SkyPoint::new(190.1, -5.1)));
    }

    #[test]
    fn test_polygon_across_ra_wrap() {
        let polygon = SphericalPolygon::from_bounds(359.9, 0.1, -0.1, 0.1).unwrap();
        assert!(polygon.contains(&SkyPoint::new(0.0, 0.0)));
        assert!(polygon.contains(&SkyPoint::new(359.95, 0.05)));
        assert!(!polygon.contains(&SkyPoint::new(180.0, 0.0)));
    }

    #[test]
    fn test_polygon_around_pole() {
        let polygon = SphericalPolygon::new(vec![
            SkyPoint::new(0.0, 89.0),
            SkyPoint::new(90.0, 89.0),
            SkyPoint::new(180.0, 89.0),
            SkyPoint::new(270.0, 89.0),
        ])
        .unwrap();
        assert!(polygon.contains(&SkyPoint::new(123.0, 89.9)));
        assert!(!polygon.contains(&SkyPoint::new(123.0, 88.0)));
    }

    #[test]
    fn test_non_convex_polygon() {
        // An L shape: the notch at the upper right is outside.
        let polygon = SphericalPolygon::new(vec![
            SkyPoint::new(0.0, 0.0),
            SkyPoint::new(2.0, 0.0),
            SkyPoint::new(2.0, 1.0),
            SkyPoint::new(1.0, 1.0),
            SkyPoint::new(1.0, 2.0),
            SkyPoint::new(0.0, 2.0),
        ])
        .unwrap();
        assert!(polygon.contains(&SkyPoint::new(0.5, 1.5)));
        assert!(polygon.contains(&SkyPoint::new(1.5, 0.5)));
        assert!(!polygon.contains(&SkyPoint::new(1.5, 1.5)));
    }

    #[test]
    fn test_invalid_polygons() {
        assert!(SphericalPolygon::new(vec![SkyPoint::new(0.0, 0.0), SkyPoint::new(1.0, 0.0)]).is_err());
        assert!(SphericalPolygon::new(vec![
            SkyPoint::new(0.0, 0.0),
            SkyPoint::new(f64::NAN, 0.0),
            SkyPoint::new(1.0, 1.0),
        ])
        .is_err());
        assert!(SphericalPolygon::new(vec![
            SkyPoint::new(0.0, 0.0),
            SkyPoint::new(120.0, 0.0),
            SkyPoint::new(240.0, 0.0),
        ])
        .is_err());
    }

    #[test]
    fn test_polygon_intersections() {
        let a = chip();
        let overlapping = SphericalPolygon::from_bounds(10.1, 10.3, 5.1, 5.3).unwrap();
        let disjoint = SphericalPolygon::from_bounds(11.0, 11.2, 5.0, 5.2).unwrap();
        // A cross: neither shape holds a vertex of the other.
        let tall = SphericalPolygon::from_bounds(10.05, 10.15, 4.9, 5.3).unwrap();
        let wide = SphericalPolygon::from_bounds(9.9, 10.3, 5.05, 5.15).unwrap();
        assert!(a.intersects(&overlapping));
        assert!(!a.intersects(&disjoint));
        assert!(tall.intersects(&wide));
    }

    #[test]
    fn test_healpix_region_contains() {
        let pixel = ang2pix_nest(7, 10.1, 5.1);
        let region = HealpixRegion::new(7, [pixel]).unwrap();
        assert!(region.contains(&SkyPoint::new(10.1, 5.1)));
        assert!(!region.contains(&SkyPoint::new(200.0, -40.0)));
    }

    #[test]
    fn test_healpix_region_rejects_bad_pixels() {
        assert!(HealpixRegion::new(1, [48]).is_err());
        assert!(HealpixRegion::new(30, [0]).is_err());
    }

    #[test]
    fn test_healpix_regions_at_different_orders() {
        let fine = HealpixRegion::new(4, [ang2pix_nest(4, 10.0, 5.0)]).unwrap();
        let coarse = HealpixRegion::new(2, [ang2pix_nest(2, 10.0, 5.0)]).unwrap();
        let elsewhere = HealpixRegion::new(2, [ang2pix_nest(2, 200.0, -40.0)]).unwrap();
        assert!(fine.intersects(&coarse));
        assert!(coarse.intersects(&fine));
        assert!(!fine.intersects(&elsewhere));
    }

    #[test]
    fn test_polygon_clipping_a_pixel_corner() {
        let pixel = ang2pix_nest(7, 10.1, 5.1);
        let region = HealpixRegion::new(7, [pixel]).unwrap();
        let north = region.pixel_polygon(pixel).unwrap().vertices()[0];

        // A thin band across the north tip: no band vertex or centre lies in
        // the pixel and the pixel centre lies outside the band.
        let band = SphericalPolygon::from_bounds(
            north.ra - 0.02,
            north.ra + 1.0,
            north.dec - 0.004,
            north.dec + 0.002,
        )
        .unwrap();
        assert!(band.vertices().iter().all(|v| !region.contains(v)));
        assert!(!region.contains(&band.centre()));
        assert!(region.intersects_polygon(&band));

        let above = SphericalPolygon::from_bounds(
            north.ra - 0.02,
            north.ra + 1.0,
            north.dec + 0.006,
            north.dec + 0.012,
        )
        .unwrap();
        assert!(!region.intersects_polygon(&above));
    }

    #[test]
    fn test_polygon_enclosing_a_pixel() {
        let pixel = ang2pix_nest(7, 10.1, 5.1);
        let region = HealpixRegion::new(7, [pixel]).unwrap();
        let around = SphericalPolygon::from_bounds(8.0, 12.0, 3.0, 7.0).unwrap();
        assert!(around.vertices().iter().all(|v| !region.contains(v)));
        assert!(region.intersects_polygon(&around));
    }

    #[test]
    fn test_footprint_dispatch() {
        let polygon: Footprint = chip().into();
        let region: Footprint = HealpixRegion::new(7, [ang2pix_nest(7, 10.1, 5.1)])
            .unwrap()
            .into();
        assert!(polygon.contains_radec(10.1, 5.1));
        assert!(region.contains_radec(10.1, 5.1));
        assert!(polygon.intersects(&region));
        assert!(region.intersects(&polygon));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_footprint_serde_keeps_vertices() {
        let footprint: Footprint = chip().into();
        let json = serde_json::to_string(&footprint).unwrap();
        let back: Footprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, footprint);
    }
}
