//! `l1t-fixrate` compares Level-1 trigger configurations at equal rate.
//!
//! For every configuration a zero-bias background sample gives the trigger rate as a function of
//! the threshold on an L1 quantity (missing transverse energy, jet $`H_T`$ or the leading jet
//! momentum). The thresholds of the first configuration are fixed; every other configuration gets
//! the thresholds that reproduce the same rates. Turn-on curves of all thresholds are then
//! measured on a signal sample against the matching offline PUPPI quantity.
//!
//! # Quick Start
//! A run is described by a YAML (or JSON) configuration:
//! ```yaml
//! labels: [Default, BaselineZS]
//! branch_types: [unp, emu]
//! root_dir: /data/L1T_fixRateEff/
//! signal_paths: [zmu_base/, zmu_base/]
//! background_paths: [zb_base/, zb_base/]
//! file_pattern: "nano_*.root"
//! observable: met
//! reference_thresholds: [50, 90]
//! ```
//! and executed with
//! ```shell
//! l1t-fixrate --config fixrate.yaml --output-dir results/
//! ```
//! Derived per-event tables are written to Parquet under `write_dir`, so subsequent runs can skip
//! the ntuples with `--input-format parquet`.
//!
//! The same steps are available as a library:
//! ```rust,no_run
//! use l1t_fixrate::{pipeline, AnalysisConfig};
//!
//! let config = AnalysisConfig::from_path("fixrate.yaml").unwrap();
//! let report = pipeline::run(&config).unwrap();
//! for set in &report.thresholds.calibration.threshold_sets {
//!     println!("{}: {:?}", set.label, set.values());
//! }
//! report.write(&config.output_dir).unwrap();
//! ```
//!
//! # Data Format
//! Inputs are NanoAOD ntuples with a tree named `Events` holding the L1 energy sums
//! (`L1EtSum_*`, or `L1EmulEtSum_*` for emulated configurations), L1 jets, offline PUPPI jets
//! (`Jet_*`), muons (`Muon_*`) and `PuppiMET_*`.
#![warn(clippy::perf, clippy::style, missing_docs)]

/// Plot-ready JSON results.
pub mod artifacts;
/// The end-to-end run: load, derive, calibrate, measure.
pub mod pipeline;

/// Methods for loading, deriving and persisting per-event data.
pub mod data {
    pub use l1t_fixrate_core::data::*;
}
/// Utility functions, enums, and vectors
pub mod utils {
    pub use l1t_fixrate_core::utils::*;
}
/// Per-event derived quantities.
pub mod variables {
    pub use l1t_fixrate_core::variables::*;
}

pub use artifacts::AnalysisReport;
pub use l1t_fixrate_core::config::{
    AnalysisConfig, DistributionConfig, EfficiencyConfig, MatchingConfig, RateConfig,
    SelectionConfig,
};
pub use l1t_fixrate_core::data::{EventTable, NanoEvents};
pub use l1t_fixrate_core::efficiency::{efficiency, EfficiencyCurve, EfficiencyPoint};
pub use l1t_fixrate_core::rate::{
    calibrate, threshold_for_rate, Calibration, CumulativeRateHistogram, MatchedThreshold,
    RateScale, ThresholdSet,
};
pub use l1t_fixrate_core::utils::enums::{BranchType, InputFormat, Observable, SumType};
pub use l1t_fixrate_core::utils::Histogram;
pub use l1t_fixrate_core::variables::{match_leading_jet, JetCandidate, JetMatch};
pub use l1t_fixrate_core::{FixRateError, FixRateResult};
