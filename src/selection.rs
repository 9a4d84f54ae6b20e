//! Selection function evaluation.
//!
//! A [`SelectionFunction`] answers "what fraction of stars at this position
//! and magnitude are in the catalog?" by nearest-cell, containing-bin lookup
//! in a [`CompletenessTable`]. There is no blending across cell or bin
//! boundaries.
//!
//! Magnitudes outside the table's binning are clamped to the nearest end
//! bin, so a query never fails for being too bright or too faint. This is
//! deliberately different from table construction, which drops such stars.

use log::error;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SelectionError;
use crate::geom::sphere::is_valid_position;
use crate::pixelization::{NestedHealpix, Pixelization};
use crate::table::{Completeness, CompletenessTable};

/// One evaluation point: (longitude, latitude, magnitude).
pub type Query = (f64, f64, f64);

/// An immutable completeness table bound to the pixelization it was built on.
#[derive(Debug, Clone)]
pub struct SelectionFunction<P: Pixelization = NestedHealpix> {
    table: CompletenessTable,
    pixelization: P,
}

impl SelectionFunction<NestedHealpix> {
    pub fn new(table: CompletenessTable) -> Result<Self, SelectionError> {
        Self::with_pixelization(table, NestedHealpix)
    }
}

impl<P: Pixelization> SelectionFunction<P> {
    /// Wrap `table`, checking it covers every cell `pixelization` can return.
    pub fn with_pixelization(table: CompletenessTable, pixelization: P) -> Result<Self, SelectionError> {
        let cells = pixelization.cell_count(table.resolution());
        if table.cell_count() != cells || table.bin_count() != table.binning().bin_count() {
            return Err(SelectionError::TableConsistency {
                reason: format!(
                    "table is {}x{} but {} with {} bins needs {}x{}",
                    table.cell_count(),
                    table.bin_count(),
                    table.resolution(),
                    table.binning().bin_count(),
                    cells,
                    table.binning().bin_count()
                ),
            });
        }
        Ok(Self {
            table,
            pixelization,
        })
    }

    pub fn table(&self) -> &CompletenessTable {
        &self.table
    }

    pub fn into_table(self) -> CompletenessTable {
        self.table
    }

    /// Completeness at (lon, lat) in degrees for magnitude `mag`.
    ///
    /// Returns [`Completeness::Undefined`] where the table has no reference
    /// stars, and also for NaN inputs or a latitude off the sphere. A cell
    /// the pixelization places outside the table is logged and also reads
    /// as undefined; use [`try_evaluate`](Self::try_evaluate) to get the error.
    pub fn evaluate(&self, lon: f64, lat: f64, mag: f64) -> Completeness {
        self.try_evaluate(lon, lat, mag).unwrap_or_else(|err| {
            error!("evaluating ({lon}, {lat}, {mag}): {err}");
            Completeness::Undefined
        })
    }

    /// [`evaluate`](Self::evaluate), failing with
    /// [`SelectionError::TableConsistency`] if the pixelization returns a
    /// cell the table does not have.
    pub fn try_evaluate(&self, lon: f64, lat: f64, mag: f64) -> Result<Completeness, SelectionError> {
        if !is_valid_position(lon, lat) {
            return Ok(Completeness::Undefined);
        }
        let Some(bin) = self.table.binning().clamped_bin_of(mag) else {
            return Ok(Completeness::Undefined);
        };
        let cell = self.pixelization.cell_of(lon, lat, self.table.resolution());
        self.table.get(cell, bin)
    }

    /// Like [`evaluate`](Self::evaluate), then applies the survey's colour cut
    /// if it has one: a star the cut excludes has completeness exactly zero.
    pub fn evaluate_with_colour(&self, lon: f64, lat: f64, mag: f64, colour: f64) -> Completeness {
        match self.table.survey().colour_cut {
            Some(cut) if is_valid_position(lon, lat) && cut.excludes(lat, colour) => {
                Completeness::Ratio(0.0)
            }
            _ => self.evaluate(lon, lat, mag),
        }
    }

    /// Elementwise [`evaluate`](Self::evaluate), in parallel.
    pub fn evaluate_batch(&self, queries: &[Query]) -> Vec<Completeness> {
        queries
            .par_iter()
            .map(|&(lon, lat, mag)| self.evaluate(lon, lat, mag))
            .collect()
    }

    /// Completeness of every cell at one magnitude, clamped like
    /// [`evaluate`](Self::evaluate). `None` only for a NaN magnitude.
    pub fn map_at_magnitude(&self, mag: f64) -> Option<SkyMap> {
        let bin = self.table.binning().clamped_bin_of(mag)?;
        let resolution = self.table.resolution();
        let column = self.table.bin_column(bin)?;
        let cells = column
            .into_par_iter()
            .enumerate()
            .map(|(cell, completeness)| {
                let (lon, lat) = self.pixelization.center_of(cell, resolution);
                SkyCell {
                    cell,
                    lon,
                    lat,
                    completeness,
                }
            })
            .collect();

        let survey = self.table.survey();
        Some(SkyMap {
            title: format!("{} completeness at {} = {mag:.2}", survey.name, survey.band),
            magnitude: mag,
            bin,
            nside: resolution.nside(),
            cells,
        })
    }

    /// Mean completeness over all cells with a defined entry, per bin.
    pub fn mean_completeness_by_bin(&self) -> Vec<Option<f64>> {
        (0..self.table.bin_count())
            .map(|bin| {
                let (sum, n) = self
                    .table
                    .bin_column(bin)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|c| c.ratio())
                    .fold((0.0, 0usize), |(sum, n), r| (sum + r, n + 1));
                (n > 0).then(|| sum / n as f64)
            })
            .collect()
    }
}

/// One cell of a [`SkyMap`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCell {
    pub cell: usize,
    /// Cell center, degrees.
    pub lon: f64,
    pub lat: f64,
    pub completeness: Completeness,
}

/// Full-sky completeness snapshot at one magnitude, ordered by cell id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyMap {
    pub title: String,
    /// Magnitude that was asked for.
    pub magnitude: f64,
    /// Bin the magnitude resolved to.
    pub bin: usize,
    pub nside: u64,
    pub cells: Vec<SkyCell>,
}

impl SkyMap {
    pub fn get(&self, cell: usize) -> Option<Completeness> {
        self.cells.get(cell).map(|c| c.completeness)
    }

    pub fn defined_fraction(&self) -> f64 {
        if self.cells.is_empty() {
            return 0.0;
        }
        let defined = self.cells.iter().filter(|c| c.completeness.is_defined()).count();
        defined as f64 / self.cells.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::MagnitudeBinning;
    use crate::pixelization::Resolution;
    use crate::table::SurveyInfo;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    const CELL: usize = 5;

    fn table_with(survey: SurveyInfo) -> CompletenessTable {
        let resolution = Resolution::Low;
        let binning = MagnitudeBinning::new(vec![8.0, 9.0, 10.0]).unwrap();
        let mut reference = Array2::zeros((resolution.cell_count(), 2));
        let mut target = Array2::zeros((resolution.cell_count(), 2));
        reference[(CELL, 0)] = 10;
        target[(CELL, 0)] = 7;
        reference[(CELL + 1, 0)] = 4;
        target[(CELL + 1, 0)] = 1;
        reference[(CELL + 1, 1)] = 4;
        target[(CELL + 1, 1)] = 3;
        CompletenessTable::from_counts(resolution, binning, survey, reference, target).unwrap()
    }

    fn sf() -> SelectionFunction {
        SelectionFunction::new(table_with(SurveyInfo::tgas())).unwrap()
    }

    fn center(cell: usize) -> (f64, f64) {
        NestedHealpix.center_of(cell, Resolution::Low)
    }

    #[test]
    fn lookup_at_cell_center() {
        let sf = sf();
        let (l, b) = center(CELL);
        assert_eq!(sf.evaluate(l, b, 8.5), Completeness::Ratio(0.7));
        assert_eq!(sf.evaluate(l, b, 9.5), Completeness::Undefined);
    }

    #[test]
    fn agrees_with_table() {
        let sf = sf();
        for cell in 0..sf.table().cell_count() {
            let (l, b) = center(cell);
            for bin in 0..2 {
                let mag = sf.table().binning().bin_center(bin).unwrap();
                assert_eq!(sf.evaluate(l, b, mag), sf.table().get(cell, bin).unwrap());
            }
        }
    }

    #[test]
    fn magnitudes_clamp_to_end_bins() {
        let sf = sf();
        let (l, b) = center(CELL);
        assert_eq!(sf.evaluate(l, b, 7.5), sf.evaluate(l, b, 8.0));
        assert_eq!(sf.evaluate(l, b, -3.0), Completeness::Ratio(0.7));
        assert_eq!(sf.evaluate(l, b, f64::NEG_INFINITY), Completeness::Ratio(0.7));

        let (l, b) = center(CELL + 1);
        assert_eq!(sf.evaluate(l, b, 10.0), sf.evaluate(l, b, 9.999));
        assert_eq!(sf.evaluate(l, b, 25.0), Completeness::Ratio(0.75));
    }

    #[test]
    fn invalid_inputs_are_undefined() {
        let sf = sf();
        let (l, b) = center(CELL);
        assert_eq!(sf.evaluate(l, b, f64::NAN), Completeness::Undefined);
        assert_eq!(sf.evaluate(f64::NAN, b, 8.5), Completeness::Undefined);
        assert_eq!(sf.evaluate(l, 91.0, 8.5), Completeness::Undefined);
    }

    #[test]
    fn longitude_wraps() {
        let sf = sf();
        let (l, b) = center(CELL);
        assert_eq!(sf.evaluate(l - 360.0, b, 8.5), Completeness::Ratio(0.7));
        assert_eq!(sf.evaluate(l + 720.0, b, 8.5), Completeness::Ratio(0.7));
    }

    #[test]
    fn batch_matches_single() {
        let sf = sf();
        let queries: Vec<Query> = (0..2000)
            .map(|i| {
                let f = i as f64;
                ((f * 13.7) % 360.0, (f * 0.05).sin() * 90.0, 7.0 + (f * 0.003) % 4.0)
            })
            .chain([(1.0, 1.0, f64::NAN), center_query(CELL, 8.5)])
            .collect();
        let batch = sf.evaluate_batch(&queries);
        assert_eq!(batch.len(), queries.len());
        for (q, got) in queries.iter().zip(&batch) {
            assert_eq!(*got, sf.evaluate(q.0, q.1, q.2));
        }
        assert_eq!(batch.last(), Some(&Completeness::Ratio(0.7)));
    }

    fn center_query(cell: usize, mag: f64) -> Query {
        let (l, b) = center(cell);
        (l, b, mag)
    }

    #[test]
    fn sky_map_snapshot() {
        let sf = sf();
        let map = sf.map_at_magnitude(8.5).unwrap();
        assert_eq!(map.cells.len(), 768);
        assert_eq!(map.bin, 0);
        assert_eq!(map.nside, 8);
        assert_eq!(map.get(CELL), Some(Completeness::Ratio(0.7)));
        assert_eq!(map.get(CELL + 1), Some(Completeness::Ratio(0.25)));
        assert_eq!(map.get(0), Some(Completeness::Undefined));
        assert_eq!(map.title, "TGAS completeness at J = 8.50");
        assert_relative_eq!(map.defined_fraction(), 2.0 / 768.0);
        for (i, c) in map.cells.iter().enumerate() {
            assert_eq!(c.cell, i);
            assert_eq!((c.lon, c.lat), center(i));
        }

        let faint = sf.map_at_magnitude(30.0).unwrap();
        assert_eq!(faint.bin, 1);
        assert_eq!(faint.get(CELL + 1), Some(Completeness::Ratio(0.75)));
        assert!(sf.map_at_magnitude(f64::NAN).is_none());
    }

    #[test]
    fn colour_cut_zeroes_blue_low_latitude_stars() {
        let sf = SelectionFunction::new(table_with(SurveyInfo::tgas_rave())).unwrap();
        let (l, b) = center(CELL);
        assert!(b.abs() < 25.0);
        assert_eq!(sf.evaluate_with_colour(l, b, 8.5, 0.3), Completeness::Ratio(0.0));
        assert_eq!(sf.evaluate_with_colour(l, b, 8.5, 0.7), Completeness::Ratio(0.7));
        // The cut applies even where the table itself is undefined.
        assert_eq!(sf.evaluate_with_colour(l, b, 9.5, 0.3), Completeness::Ratio(0.0));
    }

    #[test]
    fn colour_ignored_without_cut() {
        let sf = sf();
        let (l, b) = center(CELL);
        assert_eq!(sf.evaluate_with_colour(l, b, 8.5, 0.0), Completeness::Ratio(0.7));
    }

    #[test]
    fn mean_by_bin() {
        let means = sf().mean_completeness_by_bin();
        assert_eq!(means.len(), 2);
        assert_relative_eq!(means[0].unwrap(), (0.7 + 0.25) / 2.0);
        assert_relative_eq!(means[1].unwrap(), 0.75);

        let empty = CompletenessTable::from_counts(
            Resolution::Low,
            MagnitudeBinning::new(vec![8.0, 9.0]).unwrap(),
            SurveyInfo::default(),
            Array2::zeros((768, 1)),
            Array2::zeros((768, 1)),
        )
        .unwrap();
        let sf = SelectionFunction::new(empty).unwrap();
        assert_eq!(sf.mean_completeness_by_bin(), vec![None]);
    }

    #[derive(Debug, Clone, Copy)]
    struct CoarseSky;

    impl Pixelization for CoarseSky {
        fn cell_of(&self, _lon: f64, lat: f64, _resolution: Resolution) -> usize {
            usize::from(lat >= 0.0)
        }

        fn center_of(&self, cell: usize, _resolution: Resolution) -> (f64, f64) {
            (0.0, if cell == 0 { -45.0 } else { 45.0 })
        }

        fn cell_count(&self, _resolution: Resolution) -> usize {
            2
        }
    }

    #[test]
    fn foreign_table_is_rejected() {
        let err = SelectionFunction::with_pixelization(table_with(SurveyInfo::tgas()), CoarseSky)
            .unwrap_err();
        assert!(matches!(err, SelectionError::TableConsistency { .. }));
    }

    #[test]
    fn builds_and_evaluates_on_custom_grid() {
        use crate::catalog::StarRecord;
        use crate::table::builder::{TableBuilderConfig, build_table_with};

        let config = TableBuilderConfig {
            resolution: Resolution::Low,
            binning: MagnitudeBinning::new(vec![8.0, 9.0]).unwrap(),
            survey: SurveyInfo::tgas(),
        };
        let reference: Vec<StarRecord> = [-30.0, -20.0, 10.0, 20.0, 30.0, 40.0]
            .iter()
            .map(|&lat| StarRecord::new(120.0, lat, 8.5))
            .collect();
        let target = vec![reference[0], reference[2], reference[3], reference[4]];

        let outcome = build_table_with(&CoarseSky, &reference, &target, &config).unwrap();
        assert_eq!(outcome.table.cell_count(), 2);

        let sf = SelectionFunction::with_pixelization(outcome.table, CoarseSky).unwrap();
        assert_eq!(sf.evaluate(0.0, -60.0, 8.2), Completeness::Ratio(0.5));
        assert_eq!(sf.evaluate(300.0, 60.0, 8.2), Completeness::Ratio(0.75));

        let map = sf.map_at_magnitude(8.5).unwrap();
        assert_eq!(map.cells.len(), 2);
        assert_eq!(map.cells[1].lat, 45.0);
        assert_eq!(map.get(1), Some(Completeness::Ratio(0.75)));
    }

    #[derive(Debug)]
    struct LeakySky;

    impl Pixelization for LeakySky {
        fn cell_of(&self, _lon: f64, _lat: f64, _resolution: Resolution) -> usize {
            7
        }

        fn center_of(&self, cell: usize, resolution: Resolution) -> (f64, f64) {
            CoarseSky.center_of(cell, resolution)
        }

        fn cell_count(&self, _resolution: Resolution) -> usize {
            2
        }
    }

    #[test]
    fn cell_outside_table_is_inconsistent() {
        let table = CompletenessTable::from_counts_on(
            &CoarseSky,
            Resolution::Low,
            MagnitudeBinning::new(vec![8.0, 9.0]).unwrap(),
            SurveyInfo::tgas(),
            Array2::from_elem((2, 1), 4),
            Array2::from_elem((2, 1), 2),
        )
        .unwrap();
        let sf = SelectionFunction::with_pixelization(table, LeakySky).unwrap();

        assert!(matches!(
            sf.try_evaluate(10.0, 10.0, 8.5),
            Err(SelectionError::TableConsistency { .. })
        ));
        assert_eq!(sf.evaluate(10.0, 10.0, 8.5), Completeness::Undefined);
        assert_eq!(sf.try_evaluate(10.0, f64::NAN, 8.5).unwrap(), Completeness::Undefined);
    }
}
