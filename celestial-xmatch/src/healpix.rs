//! HEALPix nested-scheme pixelisation.
//!
//! Sources are sharded by the nested pixel that contains them, so the two
//! directions of the mapping are needed: [`ang2pix_nest`] to place a source
//! in its shard and [`pix2ang_nest`] to recover a pixel centre when a list
//! of pixels has to be compared against exposure footprints.

use std::f64::consts::{FRAC_PI_2, PI};

use crate::error::{XmatchError, XmatchResult};

/// Highest order whose pixel indices fit the 64-bit nested scheme.
pub const MAX_ORDER: u32 = 29;

const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

/// Number of pixels covering the sphere at `order` (`12 * nside^2`).
pub fn npix(order: u32) -> u64 {
    let nside = 1u64 << order;
    12 * nside * nside
}

/// Reject orders the nested scheme cannot index.
pub fn check_order(order: u32) -> XmatchResult<()> {
    if order > MAX_ORDER {
        return Err(XmatchError::invalid_order(order));
    }
    Ok(())
}

/// Reject pixels outside `0..npix(order)`.
pub fn check_pixel(order: u32, pixel: u64) -> XmatchResult<()> {
    check_order(order)?;
    if pixel >= npix(order) {
        return Err(XmatchError::invalid_pixel(pixel, order));
    }
    Ok(())
}

/// Convert (RA, Dec) in degrees to the nested pixel index at `order`.
///
/// RA is wrapped into `[0, 360)` and Dec clamped to `[-90, 90]` first.
/// Implements the Gorski et al. (2005) face/position decomposition.
pub fn ang2pix_nest(order: u32, ra_deg: f64, dec_deg: f64) -> u64 {
    let phi = ra_deg.rem_euclid(360.0).to_radians();
    let z = libm::sin(dec_deg.clamp(-90.0, 90.0).to_radians());
    let nside = 1i64 << order;
    let (face, ix, iy) = face_and_position(phi, z, nside);
    face as u64 * (nside * nside) as u64 + xy2pix_nest(ix as u64, iy as u64, order)
}

/// Centre of a nested pixel as (RA, Dec) in degrees.
///
/// The caller is responsible for `pixel < npix(order)`; see [`check_pixel`].
pub fn pix2ang_nest(order: u32, pixel: u64) -> (f64, f64) {
    let nside = 1i64 << order;
    let npface = (nside * nside) as u64;
    let face = (pixel / npface) as usize;
    let (ix, iy) = pix2xy_nest(pixel % npface, order);
    let (ix, iy) = (ix as i64, iy as i64);

    let jr = JRLL[face] * nside - ix - iy - 1;
    let cap = 3.0 * npface as f64;
    let (nr, z, kshift) = if jr < nside {
        (jr, 1.0 - (jr * jr) as f64 / cap, 0)
    } else if jr > 3 * nside {
        let nr = 4 * nside - jr;
        (nr, (nr * nr) as f64 / cap - 1.0, 0)
    } else {
        let z = (2 * nside - jr) as f64 * 2.0 / (3.0 * nside as f64);
        (nside, z, (jr - nside) & 1)
    };

    let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
    if jp > 4 * nside {
        jp -= 4 * nside;
    } else if jp < 1 {
        jp += 4 * nside;
    }

    let phi = (jp as f64 - (kshift + 1) as f64 * 0.5) * (FRAC_PI_2 / nr as f64);
    let ra = phi.to_degrees().rem_euclid(360.0);
    let dec = libm::asin(z.clamp(-1.0, 1.0)).to_degrees();
    (ra, dec)
}

/// Points along the boundary of a nested pixel as (RA, Dec) degrees.
///
/// Walks north, east, south and west corners in that order with `step`
/// points per side, so `step == 1` yields just the four corners. Pixel
/// edges are not great circles; a larger `step` follows them more closely.
pub fn pixel_boundary(order: u32, pixel: u64, step: usize) -> Vec<(f64, f64)> {
    let nside = (1u64 << order) as f64;
    let npface = 1u64 << (2 * order);
    let face = (pixel / npface) as usize;
    let (ix, iy) = pix2xy_nest(pixel % npface, order);
    let (x0, y0) = (ix as f64, iy as f64);
    let step = step.max(1);

    let mut points = Vec::with_capacity(4 * step);
    for i in 0..step {
        let t = i as f64 / step as f64;
        points.push(face_xy_to_ang(face, (x0 + 1.0) / nside, (y0 + 1.0 - t) / nside));
    }
    for i in 0..step {
        let t = i as f64 / step as f64;
        points.push(face_xy_to_ang(face, (x0 + 1.0 - t) / nside, y0 / nside));
    }
    for i in 0..step {
        let t = i as f64 / step as f64;
        points.push(face_xy_to_ang(face, x0 / nside, (y0 + t) / nside));
    }
    for i in 0..step {
        let t = i as f64 / step as f64;
        points.push(face_xy_to_ang(face, (x0 + t) / nside, (y0 + 1.0) / nside));
    }
    points
}

/// Position of a point given in continuous face coordinates `x, y` in `[0, 1]`.
fn face_xy_to_ang(face: usize, x: f64, y: f64) -> (f64, f64) {
    let jr = JRLL[face] as f64 - x - y;
    let (nr, z) = if jr < 1.0 {
        (jr, 1.0 - jr * jr / 3.0)
    } else if jr > 3.0 {
        let nr = 4.0 - jr;
        (nr, nr * nr / 3.0 - 1.0)
    } else {
        (1.0, (2.0 - jr) * 2.0 / 3.0)
    };

    let mut tmp = JPLL[face] as f64 * nr + x - y;
    if tmp < 0.0 {
        tmp += 8.0;
    }
    if tmp >= 8.0 {
        tmp -= 8.0;
    }
    let phi = if nr < 1e-15 { 0.0 } else { 0.5 * FRAC_PI_2 * tmp / nr };

    let ra = phi.to_degrees().rem_euclid(360.0);
    let dec = libm::asin(z.clamp(-1.0, 1.0)).to_degrees();
    (ra, dec)
}

/// Great-circle distance between two positions, in degrees.
///
/// Vincenty form, well conditioned at every separation.
pub fn angular_separation_deg(ra1_deg: f64, dec1_deg: f64, ra2_deg: f64, dec2_deg: f64) -> f64 {
    let (sin_d1, cos_d1) = libm::sincos(dec1_deg.to_radians());
    let (sin_d2, cos_d2) = libm::sincos(dec2_deg.to_radians());
    let (sin_dl, cos_dl) = libm::sincos((ra2_deg - ra1_deg).to_radians());

    let num = libm::sqrt(
        (cos_d2 * sin_dl).powi(2) + (cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dl).powi(2),
    );
    let den = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dl;
    libm::atan2(num, den).to_degrees()
}

fn face_and_position(phi: f64, z: f64, nside: i64) -> (usize, i64, i64) {
    let tt = (phi / (0.5 * PI)).clamp(0.0, 4.0 - f64::EPSILON);
    if libm::fabs(z) <= 2.0 / 3.0 {
        equatorial_face(tt, z, nside)
    } else {
        polar_face(tt, z, nside)
    }
}

fn equatorial_face(tt: f64, z: f64, nside: i64) -> (usize, i64, i64) {
    let temp1 = nside as f64 * (0.5 + tt);
    let temp2 = nside as f64 * z * 0.75;
    let jp = (temp1 - temp2) as i64;
    let jm = (temp1 + temp2) as i64;
    let ifp = jp / nside;
    let ifm = jm / nside;
    let face = if ifp == ifm {
        (ifp | 4) as usize
    } else if ifp < ifm {
        ifp as usize
    } else {
        (ifm + 8) as usize
    };
    let ix = jm & (nside - 1);
    let iy = nside - (jp & (nside - 1)) - 1;
    (face, ix, iy)
}

fn polar_face(tt: f64, z: f64, nside: i64) -> (usize, i64, i64) {
    let ntt = (libm::floor(tt) as i64).min(3);
    let tp = tt - ntt as f64;
    let tmp = nside as f64 * libm::sqrt(3.0 * (1.0 - libm::fabs(z)));
    let jp = ((tp * tmp) as i64).min(nside - 1);
    let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);
    if z > 0.0 {
        (ntt as usize, nside - jm - 1, nside - jp - 1)
    } else {
        ((ntt + 8) as usize, jp, jm)
    }
}

/// Interleave (ix, iy) into a Z-order index within one base face.
fn xy2pix_nest(ix: u64, iy: u64, order: u32) -> u64 {
    let mut result = 0u64;
    for i in 0..order {
        result |= (((ix >> i) & 1) << (2 * i)) | (((iy >> i) & 1) << (2 * i + 1));
    }
    result
}

fn pix2xy_nest(ipf: u64, order: u32) -> (u64, u64) {
    let mut ix = 0u64;
    let mut iy = 0u64;
    for i in 0..order {
        ix |= ((ipf >> (2 * i)) & 1) << i;
        iy |= ((ipf >> (2 * i + 1)) & 1) << i;
    }
    (ix, iy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xy2pix_nest() {
        assert_eq!(xy2pix_nest(0, 0, 2), 0);
        assert_eq!(xy2pix_nest(1, 0, 2), 1);
        assert_eq!(xy2pix_nest(0, 1, 2), 2);
        assert_eq!(xy2pix_nest(1, 1, 2), 3);
        assert_eq!(pix2xy_nest(3, 2), (1, 1));
    }

    #[test]
    fn test_npix() {
        assert_eq!(npix(0), 12);
        assert_eq!(npix(1), 48);
        assert_eq!(npix(8), 786_432);
    }

    #[test]
    fn test_check_order_and_pixel() {
        assert!(check_order(MAX_ORDER).is_ok());
        assert!(check_order(MAX_ORDER + 1).is_err());
        assert!(check_pixel(1, 47).is_ok());
        assert!(check_pixel(1, 48).is_err());
    }

    #[test]
    fn test_first_base_pixel_centre() {
        let (ra, dec) = pix2ang_nest(0, 0);
        assert!((ra - 45.0).abs() < 1e-10);
        assert!((dec - libm::asin(2.0 / 3.0).to_degrees()).abs() < 1e-10);
    }

    #[test]
    fn test_equatorial_face_at_origin() {
        assert_eq!(ang2pix_nest(0, 0.0, 0.0), 4);
        assert_eq!(ang2pix_nest(0, 360.0, 0.0), 4);
    }

    #[test]
    fn test_poles_land_in_polar_faces() {
        assert!(ang2pix_nest(0, 0.0, 90.0) < 4);
        let south = ang2pix_nest(0, 0.0, -90.0);
        assert!((8..12).contains(&south));
    }

    #[test]
    fn test_pixel_centres_round_trip() {
        for order in 0..=4 {
            for pixel in 0..npix(order) {
                let (ra, dec) = pix2ang_nest(order, pixel);
                assert_eq!(
                    ang2pix_nest(order, ra, dec),
                    pixel,
                    "order {} pixel {} centre ({}, {})",
                    order,
                    pixel,
                    ra,
                    dec
                );
            }
        }
    }

    #[test]
    fn test_order8_bounds() {
        let limit = npix(8);
        for ra in [0.0, 90.0, 180.0, 270.0, 359.999] {
            for dec in [-89.9, -45.0, 0.0, 45.0, 89.9] {
                assert!(ang2pix_nest(8, ra, dec) < limit);
            }
        }
    }

    #[test]
    fn test_pixel_boundary_corners() {
        let corners = pixel_boundary(0, 0, 1);
        assert_eq!(corners.len(), 4);
        assert!((corners[0].1 - 90.0).abs() < 1e-10);

        let pixel = ang2pix_nest(7, 10.1, 5.1);
        let corners = pixel_boundary(7, pixel, 1);
        let (north, east, south, west) = (corners[0], corners[1], corners[2], corners[3]);
        assert!(north.1 > east.1 && north.1 > west.1);
        assert!(south.1 < east.1 && south.1 < west.1);
        assert!(east.0 > west.0);

        let (ra, dec) = pix2ang_nest(7, pixel);
        assert!((north.0 - ra).abs() < 1e-10);
        assert!((east.1 - dec).abs() < 1e-10);

        // Just inside each corner is still the same pixel.
        assert_eq!(ang2pix_nest(7, north.0, north.1 - 1e-6), pixel);
        assert_eq!(ang2pix_nest(7, east.0 - 1e-6, east.1), pixel);
        assert_eq!(ang2pix_nest(7, south.0, south.1 + 1e-6), pixel);
        assert_eq!(ang2pix_nest(7, west.0 + 1e-6, west.1), pixel);

        assert_eq!(pixel_boundary(7, pixel, 4).len(), 16);
    }

    #[test]
    fn test_angular_separation_deg() {
        assert!(angular_separation_deg(10.0, 5.0, 10.0, 5.0).abs() < 1e-12);
        assert!((angular_separation_deg(0.0, 0.0, 90.0, 0.0) - 90.0).abs() < 1e-10);
        assert!((angular_separation_deg(0.0, 90.0, 0.0, -90.0) - 180.0).abs() < 1e-10);
        let dist = angular_separation_deg(0.0, 0.0, 0.1, 0.1);
        assert!(dist > 0.14 && dist < 0.15);
    }
}
