use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use l1t_fixrate_core::{
    data::expand_output_path, Calibration, CumulativeRateHistogram, EfficiencyCurve,
    FixRateResult, Histogram, MatchedThreshold, Observable,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A binned distribution of one table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Configuration the column belongs to.
    pub label: String,
    /// Column (or column difference) which was histogrammed.
    pub column: String,
    /// Events without a value.
    pub missing: usize,
    /// The binned values.
    pub histogram: Histogram,
}

/// Trigger and reference distributions of the signal samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionsArtifact {
    /// The quantity under study.
    pub observable: Observable,
    /// Axis title of the trigger quantity.
    pub axis_title: String,
    /// One entry per configuration trigger column, then the reference columns.
    pub distributions: Vec<Distribution>,
}

/// Trigger minus reference distributions of the signal samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionArtifact {
    /// The quantity under study.
    pub observable: Observable,
    /// Reference column subtracted from each trigger column.
    pub reference: String,
    /// One entry per configuration.
    pub resolutions: Vec<Distribution>,
}

/// The cumulative rate of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCurve {
    /// Configuration label.
    pub label: String,
    /// Background events the rates are normalised to.
    pub n_events: usize,
    /// Bin edges of the threshold axis.
    pub bin_edges: Vec<f64>,
    /// Rate in Hz at or above the lower edge of each bin.
    pub rates: Vec<f64>,
}

impl RateCurve {
    /// Flatten a rate histogram for output.
    pub fn new(label: &str, n_events: usize, histogram: &CumulativeRateHistogram) -> Self {
        Self {
            label: label.to_string(),
            n_events,
            bin_edges: histogram.bin_edges(),
            rates: histogram.rates().to_vec(),
        }
    }
}

/// Cumulative rate curves of every configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatesArtifact {
    /// The quantity under study.
    pub observable: Observable,
    /// One curve per configuration, reference first.
    pub curves: Vec<RateCurve>,
}

/// The fixed-rate thresholds of every configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdsArtifact {
    /// The quantity under study.
    pub observable: Observable,
    /// Label of the reference configuration.
    pub reference_label: String,
    /// Reference rate points and matched thresholds.
    pub calibration: Calibration,
}

/// The turn-on curve of one threshold of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyEntry {
    /// Configuration label.
    pub label: String,
    /// Rate point this threshold belongs to (index into the reference thresholds).
    pub rate_point: usize,
    /// The threshold and how it was obtained.
    pub threshold: MatchedThreshold,
    /// The measured curve.
    pub curve: EfficiencyCurve,
}

/// Turn-on curves of every configuration and threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficienciesArtifact {
    /// The quantity under study.
    pub observable: Observable,
    /// Offline reference column on the x-axis.
    pub reference: String,
    /// Efficiency of the plateau line.
    pub plateau: f64,
    /// Curves grouped by rate point, configurations in order within each group.
    pub curves: Vec<EfficiencyEntry>,
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// `distributions.json`
    pub distributions: DistributionsArtifact,
    /// `resolution.json`
    pub resolution: ResolutionArtifact,
    /// `rates.json`
    pub rates: RatesArtifact,
    /// `thresholds.json`
    pub thresholds: ThresholdsArtifact,
    /// `efficiencies.json`
    pub efficiencies: EfficienciesArtifact,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> FixRateResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

impl AnalysisReport {
    /// Write every artifact as pretty JSON into `output_dir`, creating it if needed. Returns the
    /// written paths.
    pub fn write(&self, output_dir: &str) -> FixRateResult<Vec<PathBuf>> {
        let dir = expand_output_path(output_dir)?;
        fs::create_dir_all(&dir)?;
        let paths = [
            "distributions.json",
            "resolution.json",
            "rates.json",
            "thresholds.json",
            "efficiencies.json",
        ]
        .map(|name| dir.join(name));
        write_json(&paths[0], &self.distributions)?;
        write_json(&paths[1], &self.resolution)?;
        write_json(&paths[2], &self.rates)?;
        write_json(&paths[3], &self.thresholds)?;
        write_json(&paths[4], &self.efficiencies)?;
        info!(output_dir = %dir.display(), "wrote artifacts");
        Ok(paths.to_vec())
    }
}
