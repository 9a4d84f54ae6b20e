//! The completeness table: per (sky cell, magnitude bin) star counts from a
//! reference catalog and a target catalog, and the ratio between them.

pub mod builder;
pub mod store;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::binning::MagnitudeBinning;
use crate::error::SelectionError;
use crate::pixelization::{NestedHealpix, Pixelization, Resolution};

/// Completeness of one (cell, bin) entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Completeness {
    /// No reference star fell in this entry, so there is nothing to compare against.
    Undefined,
    /// Fraction of reference stars present in the target catalog, in [0, 1].
    Ratio(f64),
}

impl Completeness {
    pub fn ratio(self) -> Option<f64> {
        match self {
            Completeness::Ratio(r) => Some(r),
            Completeness::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Completeness::Ratio(_))
    }

    fn from_counts(reference: u32, target: u32) -> Self {
        if reference == 0 {
            Completeness::Undefined
        } else {
            Completeness::Ratio((f64::from(target) / f64::from(reference)).min(1.0))
        }
    }
}

/// A survey's hard sample cut on colour at low latitude. Stars inside it can
/// never enter the sample, whatever the table says.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColourCut {
    /// Cut applies where |latitude| is strictly below this (degrees).
    pub max_abs_latitude: f64,
    /// Stars bluer than this colour are excluded.
    pub min_colour: f64,
}

impl ColourCut {
    pub fn excludes(&self, lat: f64, colour: f64) -> bool {
        lat.abs() < self.max_abs_latitude && colour < self.min_colour
    }
}

/// Labels describing what a table characterises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyInfo {
    pub name: String,
    /// Photometric band the magnitudes are measured in.
    pub band: String,
    #[serde(default)]
    pub colour_cut: Option<ColourCut>,
}

impl SurveyInfo {
    pub fn new(name: impl Into<String>, band: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            band: band.into(),
            colour_cut: None,
        }
    }

    /// TGAS against 2MASS J.
    pub fn tgas() -> Self {
        Self::new("TGAS", "J")
    }

    /// TGAS-RAVE against 2MASS J, with RAVE's J-K > 0.5 cut for |b| < 25.
    pub fn tgas_rave() -> Self {
        Self {
            colour_cut: Some(ColourCut {
                max_abs_latitude: 25.0,
                min_colour: 0.5,
            }),
            ..Self::new("TGAS-RAVE", "J")
        }
    }
}

impl Default for SurveyInfo {
    fn default() -> Self {
        Self::new("catalog", "mag")
    }
}

/// Immutable completeness table over every (cell, bin) pair of a resolution
/// and binning.
///
/// Rows are cells, columns are bins. An entry with a zero reference count is
/// [`Completeness::Undefined`]; the counts are kept so that stays distinct
/// from a measured ratio of zero.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletenessTable {
    resolution: Resolution,
    binning: MagnitudeBinning,
    survey: SurveyInfo,
    reference_counts: Array2<u32>,
    target_counts: Array2<u32>,
}

impl CompletenessTable {
    /// Assemble a nested HEALPix table from count grids shaped
    /// `(cell_count, bin_count)`.
    pub fn from_counts(
        resolution: Resolution,
        binning: MagnitudeBinning,
        survey: SurveyInfo,
        reference_counts: Array2<u32>,
        target_counts: Array2<u32>,
    ) -> Result<Self, SelectionError> {
        Self::from_counts_on(
            &NestedHealpix,
            resolution,
            binning,
            survey,
            reference_counts,
            target_counts,
        )
    }

    /// Like [`from_counts`](Self::from_counts), with one row per cell of
    /// `pixelization` at `resolution`.
    pub fn from_counts_on<P: Pixelization>(
        pixelization: &P,
        resolution: Resolution,
        binning: MagnitudeBinning,
        survey: SurveyInfo,
        reference_counts: Array2<u32>,
        target_counts: Array2<u32>,
    ) -> Result<Self, SelectionError> {
        let expected = (pixelization.cell_count(resolution), binning.bin_count());
        for (label, grid) in [("reference", &reference_counts), ("target", &target_counts)] {
            if grid.dim() != expected {
                return Err(SelectionError::TableConsistency {
                    reason: format!(
                        "{label} counts have shape {:?}, expected {expected:?} for {resolution}",
                        grid.dim()
                    ),
                });
            }
        }
        Ok(Self {
            resolution,
            binning,
            survey,
            reference_counts,
            target_counts,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn binning(&self) -> &MagnitudeBinning {
        &self.binning
    }

    pub fn survey(&self) -> &SurveyInfo {
        &self.survey
    }

    pub fn cell_count(&self) -> usize {
        self.reference_counts.nrows()
    }

    pub fn bin_count(&self) -> usize {
        self.reference_counts.ncols()
    }

    /// Completeness of `(cell, bin)`, or a consistency error if the pair is
    /// outside the table's domain.
    pub fn get(&self, cell: usize, bin: usize) -> Result<Completeness, SelectionError> {
        let (reference, target) =
            self.counts(cell, bin)
                .ok_or_else(|| SelectionError::TableConsistency {
                    reason: format!(
                        "no entry for cell {cell}, bin {bin} in a {}x{} table",
                        self.cell_count(),
                        self.bin_count()
                    ),
                })?;
        Ok(Completeness::from_counts(reference, target))
    }

    /// `(reference, target)` counts for `(cell, bin)`.
    pub fn counts(&self, cell: usize, bin: usize) -> Option<(u32, u32)> {
        let reference = *self.reference_counts.get((cell, bin))?;
        let target = *self.target_counts.get((cell, bin))?;
        Some((reference, target))
    }

    /// Completeness of every cell in one bin, indexed by cell.
    pub fn bin_column(&self, bin: usize) -> Option<Vec<Completeness>> {
        (bin < self.bin_count()).then(|| {
            self.reference_counts
                .column(bin)
                .iter()
                .zip(self.target_counts.column(bin))
                .map(|(&r, &t)| Completeness::from_counts(r, t))
                .collect()
        })
    }

    pub fn undefined_count(&self) -> usize {
        self.reference_counts.iter().filter(|&&r| r == 0).count()
    }

    pub fn reference_counts(&self) -> &Array2<u32> {
        &self.reference_counts
    }

    pub fn target_counts(&self) -> &Array2<u32> {
        &self.target_counts
    }
}
