use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    data::io::{discover_files, expand_output_path, FloatPrecision, TableWriteOptions},
    rate::RateScale,
    utils::{
        enums::{BranchType, InputFormat, Observable},
        validate_binning,
    },
    FixRateError, FixRateResult,
};

fn default_file_pattern() -> String {
    "*.root".to_string()
}

fn default_tree() -> String {
    "Events".to_string()
}

fn default_signal_name() -> String {
    "zmu".to_string()
}

fn default_background_name() -> String {
    "zb".to_string()
}

fn default_write_dir() -> String {
    "./data/".to_string()
}

fn default_output_dir() -> String {
    "./results/".to_string()
}

/// Binning and scaling of the cumulative rate histograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Number of bins.
    pub bins: usize,
    /// Range of the observable in GeV.
    pub range: (f64, f64),
    /// LHC bunch-crossing frequency in Hz.
    pub bunch_crossing_frequency: f64,
    /// Number of colliding bunch pairs.
    pub colliding_bunches: f64,
    /// Number of bunch slots in the orbit.
    pub total_bunches: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        let scale = RateScale::default();
        Self {
            bins: 200,
            range: (0.0, 200.0),
            bunch_crossing_frequency: scale.bunch_crossing_frequency,
            colliding_bunches: scale.colliding_bunches,
            total_bunches: scale.total_bunches,
        }
    }
}

impl RateConfig {
    /// The conversion from event counts to rates.
    pub fn scale(&self) -> RateScale {
        RateScale {
            bunch_crossing_frequency: self.bunch_crossing_frequency,
            colliding_bunches: self.colliding_bunches,
            total_bunches: self.total_bunches,
        }
    }
}

/// Binning of the turn-on curves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EfficiencyConfig {
    /// Number of bins over `[0, max_range)`.
    pub bins: usize,
    /// Upper edge of the reference axis in GeV.
    pub max_range: f64,
    /// Efficiency of the plateau line drawn with the curves.
    pub plateau: f64,
}

impl Default for EfficiencyConfig {
    fn default() -> Self {
        Self {
            bins: 10,
            max_range: 400.0,
            plateau: 0.95,
        }
    }
}

/// Parameters of the L1 to offline leading-jet match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Largest accepted $`\Delta R`$ (exclusive).
    pub dr_max: f64,
    /// The offline leading jet must exceed this transverse momentum for any match.
    pub min_pt: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            dr_max: 0.4,
            min_pt: 20.0,
        }
    }
}

/// Optional event selections applied to the signal tables before histogramming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Drop events in which any column reaches this value (e.g. `1000.0` GeV).
    pub saturation_limit: Option<f64>,
    /// Keep only events whose efficiency reference exceeds this value.
    pub reference_cut: Option<f64>,
}

/// Binning of the trigger/reference distributions and of the resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Bins of the trigger and reference distributions.
    pub bins: usize,
    /// Range of the trigger and reference distributions.
    pub range: (f64, f64),
    /// Bins of the trigger minus reference distribution.
    pub resolution_bins: usize,
    /// Range of the trigger minus reference distribution.
    pub resolution_range: (f64, f64),
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            bins: 100,
            range: (0.0, 200.0),
            resolution_bins: 80,
            resolution_range: (-100.0, 100.0),
        }
    }
}

/// Everything a run needs to know, fixed before any data is read.
///
/// Entry `i` of `labels`, `branch_types`, `signal_paths` and `background_paths` together describe
/// one trigger configuration. The first configuration is the reference whose thresholds define
/// the rates every other configuration is matched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Configuration labels, also used as the name of the trigger column.
    pub labels: Vec<String>,
    /// Source of the L1 objects of each configuration.
    pub branch_types: Vec<BranchType>,
    /// Prefix joined to every sample path.
    #[serde(default)]
    pub root_dir: String,
    /// Signal sample directory of each configuration, relative to `root_dir`.
    pub signal_paths: Vec<String>,
    /// Background sample directory of each configuration, relative to `root_dir`.
    pub background_paths: Vec<String>,
    /// Glob pattern of the ntuples inside each sample directory.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Read at most this many files per sample.
    #[serde(default)]
    pub max_files: Option<usize>,
    /// Name of the tree in the ntuples.
    #[serde(default = "default_tree")]
    pub tree: String,
    /// Read ntuples, or tables persisted by a previous run.
    #[serde(default)]
    pub input_format: InputFormat,
    /// File-name prefix of persisted signal tables.
    #[serde(default = "default_signal_name")]
    pub signal_name: String,
    /// File-name prefix of persisted background tables.
    #[serde(default = "default_background_name")]
    pub background_name: String,
    /// Directory of persisted tables.
    #[serde(default = "default_write_dir")]
    pub write_dir: String,
    /// Float width of the persisted table columns.
    #[serde(default)]
    pub table_precision: FloatPrecision,
    /// Directory of the JSON artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// The quantity under study.
    #[serde(default)]
    pub observable: Observable,
    /// Thresholds of the reference configuration in GeV. Defaults depend on the observable.
    #[serde(default)]
    pub reference_thresholds: Option<Vec<f64>>,
    /// Rate histogram settings.
    #[serde(default)]
    pub rate: RateConfig,
    /// Efficiency curve settings.
    #[serde(default)]
    pub efficiency: EfficiencyConfig,
    /// Jet matching settings.
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Event selections.
    #[serde(default)]
    pub selection: SelectionConfig,
    /// Distribution binning.
    #[serde(default)]
    pub distributions: DistributionConfig,
    /// Read L1 sums computed by the main processor.
    #[serde(default)]
    pub use_mp_sums: bool,
}

impl AnalysisConfig {
    /// Load and validate a configuration file. Files ending in `.json` are read as JSON, anything
    /// else as YAML.
    pub fn from_path(file_path: &str) -> FixRateResult<Self> {
        let path = expand_output_path(file_path)?;
        let contents = fs::read_to_string(&path)?;
        let config = if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        {
            Self::from_json_str(&contents)?
        } else {
            Self::from_yaml_str(&contents)?
        };
        debug!(file = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML configuration.
    pub fn from_yaml_str(contents: &str) -> FixRateResult<Self> {
        let config: Self = serde_yaml_ng::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(contents: &str) -> FixRateResult<Self> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for consistency without touching any input.
    pub fn validate(&self) -> FixRateResult<()> {
        let expected = self.labels.len();
        if expected == 0 {
            return Err(FixRateError::Custom(
                "At least one trigger configuration is required".to_string(),
            ));
        }
        for (field, actual) in [
            ("branch_types", self.branch_types.len()),
            ("signal_paths", self.signal_paths.len()),
            ("background_paths", self.background_paths.len()),
        ] {
            if actual != expected {
                return Err(FixRateError::InconsistentInputs {
                    field: field.to_string(),
                    expected,
                    actual,
                });
            }
        }
        let mut seen = HashSet::new();
        for label in &self.labels {
            if label.is_empty() {
                return Err(FixRateError::Custom(
                    "Configuration labels must not be empty".to_string(),
                ));
            }
            if !seen.insert(label.as_str()) {
                return Err(FixRateError::Custom(format!(
                    "Duplicate configuration label \"{label}\""
                )));
            }
            if self.observable.reference_columns().contains(&label.as_str()) {
                return Err(FixRateError::Custom(format!(
                    "Configuration label \"{label}\" collides with a reference column"
                )));
            }
        }

        let thresholds = self.thresholds();
        if thresholds.is_empty() {
            return Err(FixRateError::Custom(
                "At least one reference threshold is required".to_string(),
            ));
        }
        if let Some(&bad) = thresholds.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(FixRateError::Custom(format!(
                "Reference thresholds must be finite and non-negative, got {bad}"
            )));
        }

        validate_binning(self.rate.bins, self.rate.range)?;
        self.rate.scale().validate()?;
        validate_binning(self.efficiency.bins, (0.0, self.efficiency.max_range))?;
        if !(0.0..=1.0).contains(&self.efficiency.plateau) {
            return Err(FixRateError::Custom(format!(
                "Plateau efficiency must lie in [0, 1], got {}",
                self.efficiency.plateau
            )));
        }
        validate_binning(self.distributions.bins, self.distributions.range)?;
        validate_binning(
            self.distributions.resolution_bins,
            self.distributions.resolution_range,
        )?;
        if !(self.matching.dr_max.is_finite() && self.matching.dr_max > 0.0) {
            return Err(FixRateError::Custom(format!(
                "Matching distance must be finite and positive, got {}",
                self.matching.dr_max
            )));
        }
        Ok(())
    }

    /// Number of trigger configurations.
    pub fn n_configurations(&self) -> usize {
        self.labels.len()
    }

    /// Label of the reference configuration.
    pub fn reference_label(&self) -> &str {
        &self.labels[0]
    }

    /// The reference thresholds, falling back to the defaults of the observable.
    pub fn thresholds(&self) -> Vec<f64> {
        self.reference_thresholds
            .clone()
            .unwrap_or_else(|| self.observable.default_thresholds())
    }

    /// Glob pattern of the signal ntuples of configuration `index`.
    pub fn signal_pattern(&self, index: usize) -> String {
        format!(
            "{}{}{}",
            self.root_dir, self.signal_paths[index], self.file_pattern
        )
    }

    /// Glob pattern of the background ntuples of configuration `index`.
    pub fn background_pattern(&self, index: usize) -> String {
        format!(
            "{}{}{}",
            self.root_dir, self.background_paths[index], self.file_pattern
        )
    }

    /// Signal ntuples of configuration `index`.
    pub fn signal_files(&self, index: usize) -> FixRateResult<Vec<PathBuf>> {
        discover_files(
            &self.labels[index],
            &self.signal_pattern(index),
            self.max_files,
        )
    }

    /// Background ntuples of configuration `index`.
    pub fn background_files(&self, index: usize) -> FixRateResult<Vec<PathBuf>> {
        discover_files(
            &self.labels[index],
            &self.background_pattern(index),
            self.max_files,
        )
    }

    /// Where the signal table of `label` is persisted.
    pub fn signal_table_path(&self, label: &str) -> PathBuf {
        Path::new(&self.write_dir).join(format!("{}{label}.parquet", self.signal_name))
    }

    /// Where the background table of `label` is persisted.
    pub fn background_table_path(&self, label: &str) -> PathBuf {
        Path::new(&self.write_dir).join(format!("{}{label}.parquet", self.background_name))
    }

    /// How persisted tables are written.
    pub fn table_write_options(&self) -> TableWriteOptions {
        TableWriteOptions::default().precision(self.table_precision)
    }

    /// Override the input format.
    pub fn with_input_format(mut self, input_format: InputFormat) -> Self {
        self.input_format = input_format;
        self
    }

    /// Override the artifact directory.
    pub fn with_output_dir<S: Into<String>>(mut self, output_dir: S) -> Self {
        self.output_dir = output_dir.into();
        self
    }
}
