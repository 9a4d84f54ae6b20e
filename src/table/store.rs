//! Binary persistence for completeness tables.
//!
//! Layout (all little-endian):
//! magic `SFCT`, version u32, nside u32, edge count u64 + edges f64,
//! survey name and band (u32 length + UTF-8), colour cut flag u8 (+ two f64),
//! cell count u64, bin count u64, reference counts then target counts as
//! row-major u32 grids.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::debug;
use ndarray::Array2;

use crate::binning::MagnitudeBinning;
use crate::error::SelectionError;
use crate::pixelization::Resolution;

use super::{ColourCut, CompletenessTable, SurveyInfo};

const MAGIC: &[u8; 4] = b"SFCT";
const VERSION: u32 = 1;

/// Guards allocation against garbage lengths in a corrupt file.
const MAX_EDGES: u64 = 1 << 16;
const MAX_LABEL_LEN: u32 = 1 << 12;

fn write_u8(w: &mut impl Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f64(w: &mut impl Write, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Length prefix for a label, refusing anything `read_str` would reject.
fn label_len(s: &str) -> io::Result<u32> {
    u32::try_from(s.len())
        .ok()
        .filter(|&len| len <= MAX_LABEL_LEN)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("label of {} bytes exceeds {MAX_LABEL_LEN}", s.len()),
            )
        })
}

fn write_str(w: &mut impl Write, s: &str) -> io::Result<()> {
    write_u32(w, label_len(s)?)?;
    w.write_all(s.as_bytes())
}

fn read_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_str(r: &mut impl Read) -> Result<String, SelectionError> {
    let len = read_u32(r)?;
    if len > MAX_LABEL_LEN {
        return Err(invalid(format!("label length {len} too large")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| invalid("label is not valid UTF-8".to_string()))
}

fn read_grid(r: &mut impl Read, shape: (usize, usize)) -> Result<Array2<u32>, SelectionError> {
    let mut values = Vec::with_capacity(shape.0 * shape.1);
    for _ in 0..shape.0 * shape.1 {
        values.push(read_u32(r)?);
    }
    Array2::from_shape_vec(shape, values).map_err(|e| SelectionError::TableConsistency {
        reason: e.to_string(),
    })
}

fn invalid(reason: String) -> SelectionError {
    SelectionError::InvalidFormat { reason }
}

impl CompletenessTable {
    pub fn save(&self, path: &Path) -> Result<(), SelectionError> {
        label_len(&self.survey.name)?;
        label_len(&self.survey.band)?;
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        self.write_to(&mut w)?;
        w.flush()?;
        debug!(
            "saved {}x{} completeness table to {}",
            self.cell_count(),
            self.bin_count(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<CompletenessTable, SelectionError> {
        let file = File::open(path)?;
        let table = Self::read_from(&mut BufReader::new(file))?;
        debug!(
            "loaded {}x{} completeness table ({}) from {}",
            table.cell_count(),
            table.bin_count(),
            table.resolution(),
            path.display()
        );
        Ok(table)
    }

    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(MAGIC)?;
        write_u32(w, VERSION)?;
        write_u32(w, self.resolution.nside() as u32)?;

        let edges = self.binning.edges();
        write_u64(w, edges.len() as u64)?;
        for &edge in edges {
            write_f64(w, edge)?;
        }

        write_str(w, &self.survey.name)?;
        write_str(w, &self.survey.band)?;
        match self.survey.colour_cut {
            Some(cut) => {
                write_u8(w, 1)?;
                write_f64(w, cut.max_abs_latitude)?;
                write_f64(w, cut.min_colour)?;
            }
            None => write_u8(w, 0)?,
        }

        write_u64(w, self.cell_count() as u64)?;
        write_u64(w, self.bin_count() as u64)?;
        for grid in [&self.reference_counts, &self.target_counts] {
            for &count in grid.iter() {
                write_u32(w, count)?;
            }
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<CompletenessTable, SelectionError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(invalid("invalid magic bytes".to_string()));
        }

        let version = read_u32(r)?;
        if version != VERSION {
            return Err(invalid(format!("unsupported version: {version}")));
        }

        let resolution = Resolution::from_nside(u64::from(read_u32(r)?))?;

        let n_edges = read_u64(r)?;
        if n_edges > MAX_EDGES {
            return Err(invalid(format!("edge count {n_edges} too large")));
        }
        let mut edges = Vec::with_capacity(n_edges as usize);
        for _ in 0..n_edges {
            edges.push(read_f64(r)?);
        }
        let binning = MagnitudeBinning::new(edges)?;

        let name = read_str(r)?;
        let band = read_str(r)?;
        let colour_cut = match read_u8(r)? {
            0 => None,
            1 => Some(ColourCut {
                max_abs_latitude: read_f64(r)?,
                min_colour: read_f64(r)?,
            }),
            flag => return Err(invalid(format!("bad colour cut flag {flag}"))),
        };
        let survey = SurveyInfo {
            name,
            band,
            colour_cut,
        };

        let cells = read_u64(r)? as usize;
        let bins = read_u64(r)? as usize;
        if cells != resolution.cell_count() || bins != binning.bin_count() {
            return Err(SelectionError::TableConsistency {
                reason: format!(
                    "stored grid is {cells}x{bins} but {resolution} with {} bins needs {}x{}",
                    binning.bin_count(),
                    resolution.cell_count(),
                    binning.bin_count()
                ),
            });
        }

        let reference_counts = read_grid(r, (cells, bins))?;
        let target_counts = read_grid(r, (cells, bins))?;

        CompletenessTable::from_counts(resolution, binning, survey, reference_counts, target_counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Completeness;

    fn make_table(survey: SurveyInfo) -> CompletenessTable {
        let resolution = Resolution::Low;
        let binning = MagnitudeBinning::new(vec![5.0, 7.5, 9.0, 13.0]).unwrap();
        let shape = (resolution.cell_count(), binning.bin_count());
        let reference = Array2::from_shape_fn(shape, |(c, b)| ((c * 7 + b * 3) % 5) as u32);
        let target = Array2::from_shape_fn(shape, |(c, b)| {
            let r = ((c * 7 + b * 3) % 5) as u32;
            r.saturating_sub((c % 3) as u32)
        });
        CompletenessTable::from_counts(resolution, binning, survey, reference, target).unwrap()
    }

    fn encode(table: &CompletenessTable) -> Vec<u8> {
        let mut buf = Vec::new();
        table.write_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn round_trip_file() {
        let table = make_table(SurveyInfo::tgas_rave());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.sfct");
        table.save(&path).unwrap();
        let loaded = CompletenessTable::load(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn undefined_survives_distinct_from_zero() {
        let table = make_table(SurveyInfo::tgas());
        let loaded = CompletenessTable::read_from(&mut encode(&table).as_slice()).unwrap();

        let mut saw_undefined = false;
        let mut saw_zero = false;
        for cell in 0..table.cell_count() {
            for bin in 0..table.bin_count() {
                let value = loaded.get(cell, bin).unwrap();
                assert_eq!(value, table.get(cell, bin).unwrap());
                saw_undefined |= value == Completeness::Undefined;
                saw_zero |= value == Completeness::Ratio(0.0);
            }
        }
        assert!(saw_undefined && saw_zero);
    }

    #[test]
    fn magic_validation() {
        let mut bytes = encode(&make_table(SurveyInfo::tgas()));
        bytes[..4].copy_from_slice(b"BAAD");
        let err = CompletenessTable::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, SelectionError::InvalidFormat { .. }));
    }

    #[test]
    fn version_validation() {
        let mut bytes = encode(&make_table(SurveyInfo::tgas()));
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        let err = CompletenessTable::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, SelectionError::InvalidFormat { ref reason } if reason.contains("99")));
    }

    #[test]
    fn unsupported_nside() {
        let mut bytes = encode(&make_table(SurveyInfo::tgas()));
        bytes[8..12].copy_from_slice(&16u32.to_le_bytes());
        let err = CompletenessTable::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, SelectionError::InvalidResolution { nside: 16 }));
    }

    #[test]
    fn foreign_grid_shape_is_inconsistent() {
        // Claim High resolution while the grid was written for Low.
        let mut bytes = encode(&make_table(SurveyInfo::tgas()));
        bytes[8..12].copy_from_slice(&32u32.to_le_bytes());
        let err = CompletenessTable::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, SelectionError::TableConsistency { .. }));
    }

    #[test]
    fn truncated_file_is_io_error() {
        let bytes = encode(&make_table(SurveyInfo::tgas()));
        let cut = &bytes[..bytes.len() - 10];
        let err = CompletenessTable::read_from(&mut &cut[..]).unwrap_err();
        assert!(matches!(err, SelectionError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn label_length_limit_is_symmetric() {
        let longest = SurveyInfo::new("x".repeat(MAX_LABEL_LEN as usize), "J");
        let table = make_table(longest);
        let loaded = CompletenessTable::read_from(&mut encode(&table).as_slice()).unwrap();
        assert_eq!(loaded, table);

        let too_long = make_table(SurveyInfo::new("x".repeat(MAX_LABEL_LEN as usize + 1), "J"));
        let err = too_long.write_to(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.sfct");
        let err = too_long.save(&path).unwrap_err();
        assert!(matches!(err, SelectionError::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));
        assert!(!path.exists());
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CompletenessTable::load(&dir.path().join("nope.sfct")).unwrap_err();
        assert!(matches!(err, SelectionError::Io(_)));
    }
}
