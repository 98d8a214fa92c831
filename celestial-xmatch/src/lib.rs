//! Positional cross-matching primitives for survey source catalogs.
//!
//! Everything here is pure computation over positions in degrees; storage
//! and scheduling live in `celestial-stationary`.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`matcher`] | [`SpatialMatcher`]: nearest neighbour within a tolerance, [`MatchOutcome`] per source |
//! | [`footprint`] | [`Footprint`], [`SphericalPolygon`], [`HealpixRegion`]: coverage and containment |
//! | [`healpix`] | Nested-scheme [`ang2pix_nest`](healpix::ang2pix_nest) / [`pix2ang_nest`](healpix::pix2ang_nest), pixel boundaries |
//!
//! # Quick Start
//!
//! ```
//! use celestial_xmatch::{SkyPoint, SpatialMatcher};
//!
//! let matcher = SpatialMatcher::from_arcsec(0.5).unwrap();
//! let found = matcher.match_lists(
//!     &[SkyPoint::new(10.0, 5.0)],
//!     &[SkyPoint::new(10.00013, 5.0)],
//! );
//! assert!(found[0].is_matched());
//! ```
//!
//! # Features
//!
//! - **`serde`**: `Serialize`/`Deserialize` for [`SkyPoint`] and the footprint types.

mod error;
pub mod footprint;
pub mod healpix;
pub mod matcher;

pub use error::{XmatchError, XmatchResult};
pub use footprint::{Footprint, HealpixRegion, SphericalPolygon};
pub use matcher::{MatchOutcome, SkyPoint, SpatialMatcher, ARCSEC};
