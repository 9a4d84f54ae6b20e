//! Equal-area sky cells.
//!
//! A completeness table only needs three things from the sphere: which cell a
//! position falls in, where a cell's center is, and how many cells there are.
//! Those live behind [`Pixelization`] so tables can be built and evaluated
//! against any equal-area scheme with a stable numbering. [`NestedHealpix`]
//! is the scheme used everywhere by default.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SelectionError;
use crate::geom::sphere::wrap_longitude;
use crate::healpix;

/// Supported pixelization granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum Resolution {
    /// nside 8: 768 cells of roughly 7.3 degrees.
    Low,
    /// nside 32: 12288 cells of roughly 1.8 degrees.
    High,
}

impl Resolution {
    pub fn from_nside(nside: u64) -> Result<Self, SelectionError> {
        match nside {
            8 => Ok(Resolution::Low),
            32 => Ok(Resolution::High),
            _ => Err(SelectionError::InvalidResolution { nside }),
        }
    }

    pub fn nside(self) -> u64 {
        healpix::nside(self.depth())
    }

    /// HEALPix depth, log2(nside).
    pub fn depth(self) -> u8 {
        match self {
            Resolution::Low => 3,
            Resolution::High => 5,
        }
    }

    pub fn cell_count(self) -> usize {
        healpix::npix(self.depth()) as usize
    }

    /// Approximate cell side length in degrees, sqrt(cell area).
    pub fn cell_size_deg(self) -> f64 {
        healpix::pixel_area(self.depth()).sqrt().to_degrees()
    }
}

impl TryFrom<u64> for Resolution {
    type Error = SelectionError;

    fn try_from(nside: u64) -> Result<Self, Self::Error> {
        Resolution::from_nside(nside)
    }
}

impl From<Resolution> for u64 {
    fn from(resolution: Resolution) -> u64 {
        resolution.nside()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nside={}", self.nside())
    }
}

/// An equal-area partition of the sphere with a stable, resolution-dependent
/// cell numbering in `[0, cell_count)`.
///
/// Longitudes and latitudes are degrees. Callers guarantee the latitude is in
/// [-90, 90] and both values are finite; longitude may be any finite value.
pub trait Pixelization: Send + Sync {
    fn cell_of(&self, lon: f64, lat: f64, resolution: Resolution) -> usize;

    /// (longitude, latitude) of the cell's center, longitude in [0, 360).
    fn center_of(&self, cell: usize, resolution: Resolution) -> (f64, f64);

    fn cell_count(&self, resolution: Resolution) -> usize;
}

/// HEALPix in the nested numbering scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedHealpix;

impl Pixelization for NestedHealpix {
    fn cell_of(&self, lon: f64, lat: f64, resolution: Resolution) -> usize {
        healpix::lon_lat_to_nested(lon.to_radians(), lat.to_radians(), resolution.depth()) as usize
    }

    fn center_of(&self, cell: usize, resolution: Resolution) -> (f64, f64) {
        let (lon, lat) = healpix::nested_to_center(cell as u64, resolution.depth());
        (wrap_longitude(lon.to_degrees()), lat.to_degrees())
    }

    fn cell_count(&self, resolution: Resolution) -> usize {
        resolution.cell_count()
    }
}
