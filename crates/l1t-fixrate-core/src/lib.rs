//! # l1t-fixrate-core
//!
//! This is an internal crate used by `l1t-fixrate`.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// The immutable run configuration and its validation.
pub mod config;
/// Methods for loading, deriving and persisting per-event data.
pub mod data;
/// Binned turn-on efficiency curves.
pub mod efficiency;
/// Rate-scaled cumulative histograms and fixed-rate threshold matching.
pub mod rate;
/// Utility functions, enums, and traits
pub mod utils;
/// Per-event derived quantities (energy sums, missing energy, jet matching).
pub mod variables;

pub use crate::config::{
    AnalysisConfig, DistributionConfig, EfficiencyConfig, MatchingConfig, RateConfig,
    SelectionConfig,
};
pub use crate::data::{EventTable, JaggedColumn, NanoEvents};
pub use crate::efficiency::{efficiency, EfficiencyCurve, EfficiencyPoint};
pub use crate::rate::{
    calibrate, threshold_for_rate, Calibration, CumulativeRateHistogram, MatchedThreshold,
    RateScale, ThresholdSet,
};
pub use crate::utils::enums::{BranchType, InputFormat, Observable, SumType};
pub use crate::utils::vectors::{delta_phi, delta_r, TransverseVector};
pub use crate::utils::{get_bin_edges, get_bin_index, histogram, Histogram};
pub use crate::variables::{
    background_table, match_leading_jet, signal_table, JetCandidate, JetMatch,
};

pub type FixRateResult<T> = Result<T, FixRateError>;

/// The error type used by all `l1t-fixrate` internal methods
#[derive(Error, Debug)]
pub enum FixRateError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An alias for [`glob::PatternError`].
    #[error("Invalid file pattern: {0}")]
    PatternError(#[from] glob::PatternError),
    /// An alias for [`glob::GlobError`].
    #[error("Failed to read matched path: {0}")]
    GlobError(#[from] glob::GlobError),
    /// An alias for [`serde_yaml_ng::Error`].
    #[error("YAML Error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),
    /// An alias for [`serde_json::Error`].
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// The per-configuration inputs of a run do not all have the same length.
    #[error("Number of input datasets is not consistent: expected {expected} {field}, found {actual}")]
    InconsistentInputs {
        /// Name of the configuration field with the wrong length
        field: String,
        /// Number of configurations (the length of `labels`)
        expected: usize,
        /// Length of the offending field
        actual: usize,
    },
    /// No input files were found for a configuration.
    #[error("No input files for \"{label}\" matched \"{pattern}\"")]
    NoInputFiles {
        /// Configuration label
        label: String,
        /// The pattern which matched nothing
        pattern: String,
    },
    /// Two sequences which must be paired have different lengths.
    #[error("{context}: expected length {expected}, got {actual}")]
    LengthMismatch {
        /// Where the mismatch was found
        context: String,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
    /// A cumulative rate histogram increases from one bin to the next.
    #[error("Cumulative histogram is not non-increasing: bin {index} has {value} after {previous}")]
    NonMonotonicHistogram {
        /// Index of the first bin which exceeds its predecessor
        index: usize,
        /// Value of the preceding bin
        previous: f64,
        /// Value of the offending bin
        value: f64,
    },
    /// A rate (or histogram content) is negative or not finite.
    #[error("Invalid rate {0}: rates must be finite and non-negative")]
    InvalidRate(f64),
    /// A binning specification cannot be used.
    #[error("Invalid binning: {bins} bins over ({}, {})", .range.0, .range.1)]
    InvalidBinning {
        /// Number of bins requested
        bins: usize,
        /// Requested range
        range: (f64, f64),
    },
    /// A threshold does not fall inside the binning range of a histogram.
    #[error("Threshold {threshold} lies outside the histogram range ({}, {})", .range.0, .range.1)]
    ThresholdOutOfRange {
        /// The threshold
        threshold: f64,
        /// The histogram range
        range: (f64, f64),
    },
    /// A column or branch which is required was not found.
    #[error("Missing column \"{name}\"")]
    MissingColumn {
        /// Name of the column
        name: String,
    },
    /// A column or branch has a type which cannot be promoted to `f64`.
    #[error("Column \"{name}\" has unsupported type {datatype}")]
    InvalidColumnType {
        /// Name of the column
        name: String,
        /// The offending type
        datatype: String,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// Any error raised while processing a single trigger configuration.
    #[error("Configuration \"{label}\": {source}")]
    Configuration {
        /// Configuration label
        label: String,
        /// The underlying error
        #[source]
        source: Box<FixRateError>,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

impl FixRateError {
    /// Attach the label of the trigger configuration being processed.
    pub fn for_configuration<S: Into<String>>(self, label: S) -> Self {
        match self {
            err @ FixRateError::Configuration { .. } => err,
            err => FixRateError::Configuration {
                label: label.into(),
                source: Box::new(err),
            },
        }
    }
}

/// Extension trait to tag errors with the configuration label they belong to.
pub trait WithConfiguration<T> {
    /// Wrap the error (if any) in [`FixRateError::Configuration`].
    fn for_configuration(self, label: &str) -> FixRateResult<T>;
}

impl<T> WithConfiguration<T> for FixRateResult<T> {
    fn for_configuration(self, label: &str) -> FixRateResult<T> {
        self.map_err(|err| err.for_configuration(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_label_is_attached_once() {
        let err = FixRateError::InvalidRate(-1.0)
            .for_configuration("BaselineZS")
            .for_configuration("Other");
        assert_eq!(
            err.to_string(),
            "Configuration \"BaselineZS\": Invalid rate -1: rates must be finite and non-negative"
        );
    }

    #[test]
    fn test_result_extension() {
        let result: FixRateResult<()> = Err(FixRateError::MissingColumn {
            name: "PuppiMETNoMu".to_string(),
        });
        let err = result.for_configuration("Default").unwrap_err();
        assert!(matches!(err, FixRateError::Configuration { ref label, .. } if label == "Default"));
    }
}
