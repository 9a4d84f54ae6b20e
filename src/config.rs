//! JSON configuration for building tables.
//!
//! ```json
//! {
//!   "nside": 8,
//!   "magnitude_edges": [5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0],
//!   "survey": { "name": "TGAS", "band": "J" },
//!   "columns": { "longitude": "l", "latitude": "b", "magnitude": "j_mag" }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::binning::MagnitudeBinning;
use crate::catalog::CatalogColumns;
use crate::error::SelectionError;
use crate::pixelization::Resolution;
use crate::table::SurveyInfo;
use crate::table::builder::TableBuilderConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// 8 or 32.
    #[serde(default = "default_nside")]
    pub nside: u64,
    pub magnitude_edges: Vec<f64>,
    #[serde(default)]
    pub survey: SurveyInfo,
    #[serde(default)]
    pub columns: CatalogColumns,
}

fn default_nside() -> u64 {
    8
}

impl SelectionConfig {
    pub fn load(path: &Path) -> Result<Self, SelectionError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SelectionError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate resolution and binning into builder parameters.
    pub fn builder_config(&self) -> Result<TableBuilderConfig, SelectionError> {
        Ok(TableBuilderConfig {
            resolution: Resolution::from_nside(self.nside)?,
            binning: MagnitudeBinning::new(self.magnitude_edges.clone())?,
            survey: self.survey.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let json = r#"{
            "nside": 32,
            "magnitude_edges": [5.0, 7.0, 9.0],
            "survey": {
                "name": "TGAS-RAVE",
                "band": "J",
                "colour_cut": { "max_abs_latitude": 25.0, "min_colour": 0.5 }
            },
            "columns": { "longitude": "glon", "latitude": "glat", "magnitude": "j_mag" }
        }"#;
        let config: SelectionConfig = serde_json::from_str(json).unwrap();
        let builder = config.builder_config().unwrap();
        assert_eq!(builder.resolution, Resolution::High);
        assert_eq!(builder.binning.bin_count(), 2);
        assert_eq!(builder.survey, SurveyInfo::tgas_rave());
        assert_eq!(config.columns.magnitude, "j_mag");
    }

    #[test]
    fn defaults_fill_in() {
        let config: SelectionConfig =
            serde_json::from_str(r#"{ "magnitude_edges": [8.0, 9.0] }"#).unwrap();
        assert_eq!(config.nside, 8);
        assert_eq!(config.survey, SurveyInfo::default());
        assert_eq!(config.columns, CatalogColumns::default());

        let partial: SelectionConfig = serde_json::from_str(
            r#"{ "magnitude_edges": [8.0, 9.0], "columns": { "magnitude": "g" } }"#,
        )
        .unwrap();
        assert_eq!(partial.columns.longitude, "l");
        assert_eq!(partial.columns.magnitude, "g");
    }

    #[test]
    fn validation_happens_on_conversion() {
        let bad_nside = SelectionConfig {
            nside: 16,
            magnitude_edges: vec![8.0, 9.0],
            survey: SurveyInfo::default(),
            columns: CatalogColumns::default(),
        };
        assert!(matches!(
            bad_nside.builder_config(),
            Err(SelectionError::InvalidResolution { nside: 16 })
        ));

        let bad_edges = SelectionConfig {
            nside: 8,
            magnitude_edges: vec![9.0, 8.0],
            ..bad_nside
        };
        assert!(matches!(
            bad_edges.builder_config(),
            Err(SelectionError::InvalidBinning { .. })
        ));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = SelectionConfig {
            nside: 32,
            magnitude_edges: vec![6.0, 8.0, 10.0],
            survey: SurveyInfo::tgas(),
            columns: CatalogColumns::default(),
        };
        config.save(&path).unwrap();
        assert_eq!(SelectionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SelectionConfig::load(Path::new("/nonexistent/starsel.json")).unwrap_err();
        assert!(matches!(err, SelectionError::Io(_)));
    }
}
