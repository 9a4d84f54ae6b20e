use thiserror::Error;

/// Errors raised while building, loading, or wrapping a completeness table.
///
/// Per-query conditions (undefined entries, clamped magnitudes) are never
/// errors; they are part of the returned [`crate::table::Completeness`].
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Magnitude edges are too few, non-finite, or not strictly increasing.
    #[error("invalid magnitude binning: {reason}")]
    InvalidBinning { reason: String },

    /// Only the supported HEALPix resolutions can back a table.
    #[error("unsupported nside {nside}: must be 8 or 32")]
    InvalidResolution { nside: u64 },

    #[error("reference catalog contains no stars")]
    EmptyReferenceCatalog,

    /// The table does not cover the full (cell, bin) cross-product.
    #[error("table consistency error: {reason}")]
    TableConsistency { reason: String },

    /// A stored table could not be decoded.
    #[error("invalid table file: {reason}")]
    InvalidFormat { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
