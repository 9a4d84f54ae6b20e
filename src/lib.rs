//! Catalog completeness (selection function) library.
//!
//! Starsel estimates what fraction of real stars at a given sky position and
//! magnitude are present in a catalog. A reference catalog and a target
//! catalog are counted into equal-area HEALPix cells and magnitude bins; the
//! ratio of the two counts is the completeness, which is then looked up by
//! nearest cell and containing bin.

pub mod binning;
pub mod catalog;
pub mod config;
pub mod error;
pub mod geom;
pub mod healpix;
pub mod pixelization;
pub mod selection;
pub mod table;

pub use binning::MagnitudeBinning;
pub use catalog::StarRecord;
pub use error::SelectionError;
pub use pixelization::{NestedHealpix, Pixelization, Resolution};
pub use selection::{SelectionFunction, SkyMap};
pub use table::builder::{BuildOutcome, DataQualityWarning, TableBuilderConfig, build_table};
pub use table::{Completeness, CompletenessTable, SurveyInfo};
