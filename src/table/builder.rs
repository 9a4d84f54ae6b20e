use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::binning::MagnitudeBinning;
use crate::catalog::StarRecord;
use crate::error::SelectionError;
use crate::geom::sphere::is_valid_position;
use crate::pixelization::{NestedHealpix, Pixelization, Resolution};

use super::{CompletenessTable, SurveyInfo};

/// Parameters for building a completeness table.
#[derive(Debug, Clone)]
pub struct TableBuilderConfig {
    pub resolution: Resolution,
    pub binning: MagnitudeBinning,
    pub survey: SurveyInfo,
}

/// A (cell, bin) pair where the target catalog has more stars than the
/// reference catalog, which means the two catalogs are not matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQualityWarning {
    pub cell: usize,
    pub bin: usize,
    pub reference_count: u32,
    pub target_count: u32,
}

/// How many records of one catalog were counted and why the rest were not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTally {
    pub counted: usize,
    /// Non-finite coordinates or latitude outside [-90, 90].
    pub bad_position: usize,
    /// Magnitude outside the binning or NaN.
    pub out_of_range: usize,
}

/// A built table plus everything the build found worth reporting.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub table: CompletenessTable,
    /// One entry per (cell, bin) with more target than reference stars.
    pub warnings: Vec<DataQualityWarning>,
    pub reference: CatalogTally,
    pub target: CatalogTally,
}

/// Build a completeness table on the nested HEALPix grid.
pub fn build_table(
    reference: &[StarRecord],
    target: &[StarRecord],
    config: &TableBuilderConfig,
) -> Result<BuildOutcome, SelectionError> {
    build_table_with(&NestedHealpix, reference, target, config)
}

/// Build a completeness table on any pixelization.
///
/// Every record is placed in a (cell, bin) pair; records whose magnitude is
/// outside the binning are dropped. The result covers the full cross-product
/// of cells and bins, with pairs that saw no reference star left undefined.
pub fn build_table_with<P: Pixelization>(
    pixelization: &P,
    reference: &[StarRecord],
    target: &[StarRecord],
    config: &TableBuilderConfig,
) -> Result<BuildOutcome, SelectionError> {
    if reference.is_empty() {
        return Err(SelectionError::EmptyReferenceCatalog);
    }

    let shape = (
        pixelization.cell_count(config.resolution),
        config.binning.bin_count(),
    );
    let (reference_counts, reference_tally) = count_stars(pixelization, reference, config, shape)?;
    let (target_counts, target_tally) = count_stars(pixelization, target, config, shape)?;

    info!(
        "counted {} reference and {} target stars into {} cells x {} bins ({})",
        reference_tally.counted,
        target_tally.counted,
        shape.0,
        shape.1,
        config.resolution
    );
    for (label, tally) in [("reference", &reference_tally), ("target", &target_tally)] {
        if tally.bad_position > 0 || tally.out_of_range > 0 {
            info!(
                "discarded {label} stars: {} with unusable positions, {} outside magnitudes [{}, {})",
                tally.bad_position,
                tally.out_of_range,
                config.binning.lower(),
                config.binning.upper()
            );
        }
    }

    let warnings = find_excess_targets(&reference_counts, &target_counts);
    if !warnings.is_empty() {
        warn!(
            "{} (cell, bin) pairs have more target than reference stars; catalogs may be mismatched",
            warnings.len()
        );
        for w in &warnings {
            debug!(
                "cell {} bin {}: {} target vs {} reference",
                w.cell, w.bin, w.target_count, w.reference_count
            );
        }
    }

    let table = CompletenessTable::from_counts_on(
        pixelization,
        config.resolution,
        config.binning.clone(),
        config.survey.clone(),
        reference_counts,
        target_counts,
    )?;
    info!(
        "{} of {} entries undefined (no reference stars)",
        table.undefined_count(),
        shape.0 * shape.1
    );

    Ok(BuildOutcome {
        table,
        warnings,
        reference: reference_tally,
        target: target_tally,
    })
}

/// Counts accumulated by one rayon worker.
struct Partial {
    grid: Array2<u32>,
    tally: CatalogTally,
    /// First cell id the pixelization returned outside the grid.
    stray_cell: Option<usize>,
}

/// Per-worker count grids summed at the end; counts from disjoint subsets of
/// records add up to the counts of their union.
fn count_stars<P: Pixelization>(
    pixelization: &P,
    stars: &[StarRecord],
    config: &TableBuilderConfig,
    shape: (usize, usize),
) -> Result<(Array2<u32>, CatalogTally), SelectionError> {
    let empty = || Partial {
        grid: Array2::zeros(shape),
        tally: CatalogTally::default(),
        stray_cell: None,
    };

    let counts = stars
        .par_iter()
        .fold(empty, |mut acc, star| {
            if !is_valid_position(star.lon, star.lat) {
                acc.tally.bad_position += 1;
            } else if let Some(bin) = config.binning.bin_of(star.mag) {
                let cell = pixelization.cell_of(star.lon, star.lat, config.resolution);
                match acc.grid.get_mut((cell, bin)) {
                    Some(n) => {
                        *n += 1;
                        acc.tally.counted += 1;
                    }
                    None => {
                        acc.stray_cell.get_or_insert(cell);
                    }
                }
            } else {
                acc.tally.out_of_range += 1;
            }
            acc
        })
        .reduce(empty, |mut acc, other| {
            acc.grid += &other.grid;
            acc.tally = CatalogTally {
                counted: acc.tally.counted + other.tally.counted,
                bad_position: acc.tally.bad_position + other.tally.bad_position,
                out_of_range: acc.tally.out_of_range + other.tally.out_of_range,
            };
            acc.stray_cell = acc.stray_cell.or(other.stray_cell);
            acc
        });

    if let Some(cell) = counts.stray_cell {
        return Err(SelectionError::TableConsistency {
            reason: format!(
                "pixelization returned cell {cell} at {}, which has only {} cells",
                config.resolution, shape.0
            ),
        });
    }
    Ok((counts.grid, counts.tally))
}

fn find_excess_targets(reference: &Array2<u32>, target: &Array2<u32>) -> Vec<DataQualityWarning> {
    reference
        .indexed_iter()
        .zip(target.iter())
        .filter(|&((_, &r), &t)| t > r)
        .map(|(((cell, bin), &r), &t)| DataQualityWarning {
            cell,
            bin,
            reference_count: r,
            target_count: t,
        })
        .collect()
}
