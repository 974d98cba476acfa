//! Error types for NextStat template building

use thiserror::Error;

/// NextStat error type
///
/// The variants follow the template-building taxonomy: malformed caller
/// input, histogram shape mismatches, bad bin content, and numerical
/// anomalies produced by symmetrization or smoothing.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed caller input (mismatched lengths, unknown enum names, ...)
    #[error("Config error: {0}")]
    Config(String),

    /// Histogram shape mismatch between nominal and variations
    #[error("Structural error: {0}")]
    Structural(String),

    /// Negative, zero or NaN bin content that could not be repaired
    #[error("Data quality issue: {0}")]
    DataQuality(String),

    /// Symmetrization or smoothing produced values outside expected bounds
    #[error("Numeric anomaly: {0}")]
    NumericAnomaly(String),

    /// Unrecoverable state of the input data (e.g. non-positive yield after repair)
    #[error("Data error: {0}")]
    Data(String),

    /// Requested histogram does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Short category label, used when errors are aggregated into reports.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Config(_) => "config",
            Error::Structural(_) => "structural",
            Error::DataQuality(_) => "data-quality",
            Error::NumericAnomaly(_) => "numeric-anomaly",
            Error::Data(_) => "data",
            Error::NotFound(_) => "not-found",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
