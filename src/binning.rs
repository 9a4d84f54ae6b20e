//! Magnitude bins.
//!
//! Bins are half-open, `[edge[i], edge[i + 1])`. The outermost edges double as
//! the catalog-wide inclusion bounds when a table is built: a star outside
//! `[first, last)` is not counted at all. Evaluation instead clamps an
//! out-of-range magnitude to the nearest end bin (see [`MagnitudeBinning::clamped_bin_of`]).

use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

/// Strictly increasing, finite magnitude edges (at least two).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct MagnitudeBinning {
    edges: Vec<f64>,
}

impl MagnitudeBinning {
    pub fn new(edges: Vec<f64>) -> Result<Self, SelectionError> {
        if edges.len() < 2 {
            return Err(SelectionError::InvalidBinning {
                reason: format!("need at least 2 edges, got {}", edges.len()),
            });
        }
        if let Some(bad) = edges.iter().find(|e| !e.is_finite()) {
            return Err(SelectionError::InvalidBinning {
                reason: format!("edge {bad} is not finite"),
            });
        }
        if let Some(pair) = edges.windows(2).find(|w| w[0] >= w[1]) {
            return Err(SelectionError::InvalidBinning {
                reason: format!("edges not strictly increasing at {} -> {}", pair[0], pair[1]),
            });
        }
        Ok(Self { edges })
    }

    /// `count` equal-width bins spanning `[lower, upper)`.
    pub fn uniform(lower: f64, upper: f64, count: usize) -> Result<Self, SelectionError> {
        if count == 0 {
            return Err(SelectionError::InvalidBinning {
                reason: "bin count must be positive".to_string(),
            });
        }
        let width = (upper - lower) / count as f64;
        let edges = (0..=count)
            .map(|i| if i == count { upper } else { lower + width * i as f64 })
            .collect();
        Self::new(edges)
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn bin_count(&self) -> usize {
        self.edges.len() - 1
    }

    /// Lower edge of the first bin.
    pub fn lower(&self) -> f64 {
        self.edges[0]
    }

    /// Upper edge of the last bin (exclusive).
    pub fn upper(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// `(low, high)` edges of bin `index`, if it exists.
    pub fn bin_range(&self, index: usize) -> Option<(f64, f64)> {
        (index < self.bin_count()).then(|| (self.edges[index], self.edges[index + 1]))
    }

    pub fn bin_center(&self, index: usize) -> Option<f64> {
        self.bin_range(index).map(|(lo, hi)| 0.5 * (lo + hi))
    }

    /// Bin containing `mag`, or `None` if it lies outside `[lower, upper)` or is NaN.
    pub fn bin_of(&self, mag: f64) -> Option<usize> {
        // Number of edges <= mag; a NaN compares false everywhere and yields 0.
        let above = self.edges.partition_point(|&edge| edge <= mag);
        (above > 0 && above < self.edges.len()).then(|| above - 1)
    }

    /// Bin containing `mag`, clamping anything below the first edge to the
    /// first bin and anything at or above the last edge to the last bin.
    ///
    /// NaN has no nearest bin and returns `None`.
    pub fn clamped_bin_of(&self, mag: f64) -> Option<usize> {
        if mag.is_nan() {
            return None;
        }
        let above = self.edges.partition_point(|&edge| edge <= mag);
        Some(above.clamp(1, self.bin_count()) - 1)
    }
}

impl TryFrom<Vec<f64>> for MagnitudeBinning {
    type Error = SelectionError;

    fn try_from(edges: Vec<f64>) -> Result<Self, Self::Error> {
        MagnitudeBinning::new(edges)
    }
}

impl From<MagnitudeBinning> for Vec<f64> {
    fn from(binning: MagnitudeBinning) -> Vec<f64> {
        binning.edges
    }
}
