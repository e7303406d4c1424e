#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{info, warn};

use l1t_fixrate_core::{
    background_table, calibrate,
    data::{read_nano_files, read_table, write_table, NanoBranches},
    efficiency, histogram, signal_table, AnalysisConfig, Calibration, CumulativeRateHistogram,
    EventTable, FixRateResult, InputFormat, WithConfiguration,
};

use crate::artifacts::{
    AnalysisReport, Distribution, DistributionsArtifact, EfficienciesArtifact, EfficiencyEntry,
    RateCurve, RatesArtifact, ResolutionArtifact, ThresholdsArtifact,
};

/// The derived tables of one trigger configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationTables {
    /// Configuration label.
    pub label: String,
    /// Trigger and reference values of the signal sample.
    pub signal: EventTable,
    /// Trigger values of the background sample.
    pub background: EventTable,
}

fn check_columns(table: &EventTable, columns: &[&str]) -> FixRateResult<()> {
    for column in columns {
        table.column(column)?;
    }
    Ok(())
}

fn derive_configuration(config: &AnalysisConfig, index: usize) -> FixRateResult<ConfigurationTables> {
    let label = &config.labels[index];
    let branches = NanoBranches::new(config.branch_types[index], config.use_mp_sums);
    let signal_files = config.signal_files(index)?;
    let background_files = config.background_files(index)?;
    info!(
        label = %label,
        branch_type = %config.branch_types[index],
        signal_files = signal_files.len(),
        background_files = background_files.len(),
        "reading ntuples"
    );
    let signal_events = read_nano_files(&signal_files, &branches, &config.tree)?;
    let signal = signal_table(label, &signal_events, config.observable, &config.matching)?;
    drop(signal_events);
    let background_events = read_nano_files(&background_files, &branches, &config.tree)?;
    let background = background_table(label, &background_events, config.observable)?;

    let options = config.table_write_options();
    write_table(
        &signal,
        &config.signal_table_path(label).to_string_lossy(),
        &options,
    )?;
    write_table(
        &background,
        &config.background_table_path(label).to_string_lossy(),
        &options,
    )?;
    Ok(ConfigurationTables {
        label: label.clone(),
        signal,
        background,
    })
}

fn read_configuration(config: &AnalysisConfig, index: usize) -> FixRateResult<ConfigurationTables> {
    let label = &config.labels[index];
    let signal = read_table(&config.signal_table_path(label).to_string_lossy(), label)?;
    let background = read_table(&config.background_table_path(label).to_string_lossy(), label)?;
    let mut signal_columns = vec![label.as_str()];
    signal_columns.extend_from_slice(config.observable.reference_columns());
    check_columns(&signal, &signal_columns)?;
    check_columns(&background, &[label.as_str()])?;
    info!(
        label = %label,
        signal_events = signal.n_events(),
        background_events = background.n_events(),
        "read persisted tables"
    );
    Ok(ConfigurationTables {
        label: label.clone(),
        signal,
        background,
    })
}

fn load_configuration(config: &AnalysisConfig, index: usize) -> FixRateResult<ConfigurationTables> {
    let tables = match config.input_format {
        InputFormat::Root => derive_configuration(config, index),
        InputFormat::Parquet => read_configuration(config, index),
    };
    tables.for_configuration(&config.labels[index])
}

/// Load (or derive and persist) the tables of every configuration, in configuration order.
pub fn load_tables(config: &AnalysisConfig) -> FixRateResult<Vec<ConfigurationTables>> {
    #[cfg(feature = "rayon")]
    let tables = (0..config.n_configurations())
        .into_par_iter()
        .map(|index| load_configuration(config, index))
        .collect::<FixRateResult<Vec<_>>>()?;
    #[cfg(not(feature = "rayon"))]
    let tables = (0..config.n_configurations())
        .map(|index| load_configuration(config, index))
        .collect::<FixRateResult<Vec<_>>>()?;
    Ok(tables)
}

/// Apply the configured signal selections.
pub fn apply_selections(
    config: &AnalysisConfig,
    tables: ConfigurationTables,
) -> FixRateResult<ConfigurationTables> {
    let mut signal = tables.signal;
    if let Some(limit) = config.selection.saturation_limit {
        signal = signal.remove_saturated(limit)?;
    }
    if let Some(cut) = config.selection.reference_cut {
        signal = signal.apply_cut(config.observable.efficiency_reference(), cut)?;
    }
    if signal.n_events() == 0 {
        warn!(label = %tables.label, "no signal events pass the selection");
    }
    Ok(ConfigurationTables { signal, ..tables })
}

fn distribution(
    label: &str,
    column: &str,
    values: &[Option<f64>],
    bins: usize,
    range: (f64, f64),
) -> FixRateResult<Distribution> {
    let plain: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    Ok(Distribution {
        label: label.to_string(),
        column: column.to_string(),
        missing: values.iter().filter(|v| v.is_none()).count(),
        histogram: histogram(&plain, bins, range, None)?,
    })
}

fn distributions(
    config: &AnalysisConfig,
    tables: &[ConfigurationTables],
) -> FixRateResult<DistributionsArtifact> {
    let settings = &config.distributions;
    let mut distributions = tables
        .iter()
        .map(|t| {
            distribution(
                &t.label,
                &t.label,
                t.signal.trigger()?,
                settings.bins,
                settings.range,
            )
        })
        .collect::<FixRateResult<Vec<_>>>()?;
    let reference = &tables[0];
    for column in config.observable.reference_columns() {
        distributions.push(distribution(
            &reference.label,
            column,
            reference.signal.column(column)?,
            settings.bins,
            settings.range,
        )?);
    }
    Ok(DistributionsArtifact {
        observable: config.observable,
        axis_title: config.observable.axis_title().to_string(),
        distributions,
    })
}

fn resolution(
    config: &AnalysisConfig,
    tables: &[ConfigurationTables],
) -> FixRateResult<ResolutionArtifact> {
    let settings = &config.distributions;
    let reference = config.observable.efficiency_reference();
    let resolutions = tables
        .iter()
        .map(|t| {
            let difference = t.signal.difference(&t.label, reference)?;
            distribution(
                &t.label,
                &format!("{} - {reference}", t.label),
                &difference,
                settings.resolution_bins,
                settings.resolution_range,
            )
        })
        .collect::<FixRateResult<Vec<_>>>()?;
    Ok(ResolutionArtifact {
        observable: config.observable,
        reference: reference.to_string(),
        resolutions,
    })
}

/// Build the cumulative rate histogram of each configuration from its background table.
pub fn rate_histograms(
    config: &AnalysisConfig,
    tables: &[ConfigurationTables],
) -> FixRateResult<Vec<CumulativeRateHistogram>> {
    let scale = config.rate.scale();
    tables
        .iter()
        .map(|t| {
            let values = t.background.values(&t.label)?;
            CumulativeRateHistogram::from_values(&values, config.rate.bins, config.rate.range, &scale)
                .for_configuration(&t.label)
        })
        .collect()
}

/// Match every configuration to the reference rates.
pub fn calibrate_thresholds(
    config: &AnalysisConfig,
    tables: &[ConfigurationTables],
    histograms: &[CumulativeRateHistogram],
) -> FixRateResult<Calibration> {
    let others = tables[1..]
        .iter()
        .zip(&histograms[1..])
        .map(|(t, h)| (t.label.as_str(), h));
    let calibration = calibrate(&tables[0].label, &histograms[0], others, &config.thresholds())?;
    for set in &calibration.threshold_sets {
        info!(label = %set.label, thresholds = ?set.values(), "fixed-rate thresholds");
    }
    Ok(calibration)
}

/// Measure the turn-on curve of every threshold of every configuration.
pub fn efficiencies(
    config: &AnalysisConfig,
    tables: &[ConfigurationTables],
    calibration: &Calibration,
) -> FixRateResult<EfficienciesArtifact> {
    let reference = config.observable.efficiency_reference();
    let n_points = calibration.reference_rates.len();
    let mut curves = Vec::with_capacity(n_points * tables.len());
    for rate_point in 0..n_points {
        for (t, set) in tables.iter().zip(&calibration.threshold_sets) {
            let threshold = set.thresholds[rate_point];
            let curve = efficiency(
                &t.signal.values(&t.label)?,
                &t.signal.values(reference)?,
                threshold.value(),
                config.efficiency.bins,
                config.efficiency.max_range,
            )
            .for_configuration(&t.label)?;
            if curve.n_empty() > 0 {
                warn!(
                    label = %t.label,
                    threshold = threshold.value(),
                    empty_bins = curve.n_empty(),
                    "efficiency bins without events"
                );
            }
            curves.push(EfficiencyEntry {
                label: t.label.clone(),
                rate_point,
                threshold,
                curve,
            });
        }
    }
    Ok(EfficienciesArtifact {
        observable: config.observable,
        reference: reference.to_string(),
        plateau: config.efficiency.plateau,
        curves,
    })
}

/// Run the analysis described by `config` and return every artifact.
pub fn run(config: &AnalysisConfig) -> FixRateResult<AnalysisReport> {
    config.validate()?;
    info!(
        observable = %config.observable,
        configurations = config.n_configurations(),
        input_format = %config.input_format,
        "starting fixed-rate analysis"
    );
    let tables = load_tables(config)?
        .into_iter()
        .map(|t| apply_selections(config, t))
        .collect::<FixRateResult<Vec<_>>>()?;

    let distributions = distributions(config, &tables)?;
    let resolution = resolution(config, &tables)?;

    let histograms = rate_histograms(config, &tables)?;
    let rates = RatesArtifact {
        observable: config.observable,
        curves: tables
            .iter()
            .zip(&histograms)
            .map(|(t, h)| RateCurve::new(&t.label, t.background.n_events(), h))
            .collect(),
    };
    info!(
        reference = %tables[0].label,
        "calibrating thresholds to the reference rates"
    );
    let calibration = calibrate_thresholds(config, &tables, &histograms)?;
    let efficiencies = efficiencies(config, &tables, &calibration)?;
    info!(curves = efficiencies.curves.len(), "measured efficiencies");

    Ok(AnalysisReport {
        distributions,
        resolution,
        rates,
        thresholds: ThresholdsArtifact {
            observable: config.observable,
            reference_label: tables[0].label.clone(),
            calibration,
        },
        efficiencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use l1t_fixrate_core::{FixRateError, MatchedThreshold};
    use std::{env, fs, path::PathBuf};

    fn make_temp_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("l1t_fixrate_pipeline_{}", fastrand::u64(..)));
        fs::create_dir(&dir).expect("temp dir should be created");
        dir
    }

    fn test_config(dir: &std::path::Path) -> AnalysisConfig {
        let contents = format!(
            r#"
labels: [Default, Shifted]
branch_types: [unp, emu]
signal_paths: [zmu/, zmu/]
background_paths: [zb/, zb/]
input_format: parquet
table_precision: f32
write_dir: "{}/"
output_dir: "{}/results/"
observable: met
reference_thresholds: [50, 90]
selection:
  saturation_limit: 1000.0
"#,
            dir.display(),
            dir.display()
        );
        AnalysisConfig::from_yaml_str(&contents).expect("config should parse")
    }

    fn write_inputs(config: &AnalysisConfig, shift: f64) {
        let mut rng = fastrand::Rng::with_seed(7);
        let n_background = 20_000;
        let background: Vec<f64> = (0..n_background)
            .map(|_| -30.0 * (1.0 - rng.f64()).ln())
            .collect();
        let n_signal = 5_000;
        let reference: Vec<f64> = (0..n_signal).map(|_| rng.f64() * 400.0).collect();
        let options = config.table_write_options();
        for (label, offset) in [("Default", 0.0), ("Shifted", shift)] {
            let mut trigger: Vec<Option<f64>> =
                background.iter().map(|v| Some(v + offset)).collect();
            trigger[0] = None;
            let table = EventTable::new(label, n_background)
                .with_column(label, trigger)
                .unwrap();
            write_table(
                &table,
                &config.background_table_path(label).to_string_lossy(),
                &options,
            )
            .unwrap();

            let mut signal_trigger: Vec<Option<f64>> =
                reference.iter().map(|r| Some(0.9 * r + offset)).collect();
            signal_trigger[1] = None;
            signal_trigger[2] = Some(1500.0);
            let table = EventTable::new(label, n_signal)
                .with_column(label, signal_trigger)
                .unwrap()
                .with_dense_column("PuppiMET", reference.clone())
                .unwrap()
                .with_dense_column("PuppiMETNoMu", reference.clone())
                .unwrap();
            write_table(
                &table,
                &config.signal_table_path(label).to_string_lossy(),
                &options,
            )
            .unwrap();
        }
    }

    #[test]
    fn test_run_over_persisted_tables() {
        let dir = make_temp_dir();
        let config = test_config(&dir);
        write_inputs(&config, 10.0);

        let report = run(&config).unwrap();

        let sets = &report.thresholds.calibration.threshold_sets;
        assert_eq!(sets.len(), 2);
        assert!(sets.iter().all(|set| set.len() == 2));
        assert_eq!(sets[0].thresholds[0], MatchedThreshold::Configured(50.0));
        assert!(matches!(
            sets[1].thresholds[0],
            MatchedThreshold::Interpolated(_)
        ));
        assert_relative_eq!(sets[1].values()[0], 60.0, epsilon = 0.5);
        assert_relative_eq!(sets[1].values()[1], 100.0, epsilon = 0.5);

        assert_eq!(report.rates.curves.len(), 2);
        assert_eq!(report.rates.curves[0].n_events, 20_000);
        assert_eq!(report.rates.curves[0].bin_edges.len(), 201);

        assert_eq!(report.efficiencies.curves.len(), 4);
        assert_eq!(report.efficiencies.reference, "PuppiMETNoMu");
        for entry in &report.efficiencies.curves {
            assert_eq!(entry.curve.n_bins(), 10);
            assert_eq!(entry.curve.efficiencies().last().copied().flatten(), Some(1.0));
        }
        // The saturated signal event is removed before any histogram is filled.
        let total: usize = report.efficiencies.curves[0]
            .curve
            .points
            .iter()
            .map(|p| p.n)
            .sum();
        assert_eq!(total, 4_999);

        assert_eq!(report.distributions.distributions.len(), 4);
        assert_eq!(report.distributions.distributions[0].missing, 1);
        assert_eq!(report.resolution.resolutions.len(), 2);

        let paths = report.write(&config.output_dir).unwrap();
        assert_eq!(paths.len(), 5);
        let thresholds = fs::read_to_string(&paths[3]).unwrap();
        assert!(thresholds.contains("\"status\": \"configured\""));
        assert!(thresholds.contains("\"status\": \"interpolated\""));
        fs::remove_dir_all(&dir).expect("temp dir cleanup should succeed");
    }

    #[test]
    fn test_missing_tables_name_the_configuration() {
        let dir = make_temp_dir();
        let config = test_config(&dir);
        let err = run(&config).unwrap_err();
        assert!(matches!(err, FixRateError::Configuration { .. }));
        fs::remove_dir_all(&dir).expect("temp dir cleanup should succeed");
    }

    #[test]
    fn test_missing_root_inputs_are_reported() {
        let dir = make_temp_dir();
        let config = test_config(&dir).with_input_format(InputFormat::Root);
        match load_tables(&config) {
            Err(FixRateError::Configuration { label, source }) => {
                assert!(label == "Default" || label == "Shifted");
                assert!(matches!(*source, FixRateError::NoInputFiles { .. }));
            }
            other => panic!("expected a configuration error, got {other:?}"),
        }
        fs::remove_dir_all(&dir).expect("temp dir cleanup should succeed");
    }
}
