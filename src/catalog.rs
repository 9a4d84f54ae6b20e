//! Star records and a CSV catalog reader.
//!
//! Catalogs arrive already cross-matched; the core only ever sees slices of
//! [`StarRecord`]. The CSV reader is a convenience for the command-line tool.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

/// One catalog entry: position in degrees and an apparent magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StarRecord {
    pub lon: f64,
    pub lat: f64,
    pub mag: f64,
}

impl StarRecord {
    pub fn new(lon: f64, lat: f64, mag: f64) -> Self {
        Self { lon, lat, mag }
    }
}

/// Header names of the columns holding each field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogColumns {
    pub longitude: String,
    pub latitude: String,
    pub magnitude: String,
}

impl Default for CatalogColumns {
    fn default() -> Self {
        Self {
            longitude: "l".to_string(),
            latitude: "b".to_string(),
            magnitude: "mag".to_string(),
        }
    }
}

/// Read a headed CSV file into star records. Extra columns are ignored.
pub fn load_csv(path: &Path, columns: &CatalogColumns) -> Result<Vec<StarRecord>, SelectionError> {
    let mut reader = csv::Reader::from_path(path)?;
    let stars = read_records(&mut reader, columns)?;
    debug!("read {} stars from {}", stars.len(), path.display());
    Ok(stars)
}

pub(crate) fn read_records<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
    columns: &CatalogColumns,
) -> Result<Vec<StarRecord>, SelectionError> {
    let headers = reader.headers()?.clone();
    let lon_idx = column_index(&headers, &columns.longitude)?;
    let lat_idx = column_index(&headers, &columns.latitude)?;
    let mag_idx = column_index(&headers, &columns.magnitude)?;

    let mut stars = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        stars.push(StarRecord {
            lon: parse_field(&record, lon_idx, row)?,
            lat: parse_field(&record, lat_idx, row)?,
            mag: parse_field(&record, mag_idx, row)?,
        });
    }
    Ok(stars)
}

pub(crate) fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, SelectionError> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| SelectionError::InvalidFormat {
            reason: format!("missing column '{name}'"),
        })
}

pub(crate) fn parse_field(
    record: &csv::StringRecord,
    index: usize,
    row: usize,
) -> Result<f64, SelectionError> {
    let raw = record.get(index).unwrap_or("").trim();
    raw.parse().map_err(|_| SelectionError::InvalidFormat {
        reason: format!("row {}: cannot parse '{raw}' as a number", row + 1),
    })
}
