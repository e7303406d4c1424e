use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    utils::{get_bin_edges, get_bin_index, histogram, validate_binning, Histogram},
    FixRateError, FixRateResult, WithConfiguration,
};

/// Conversion of event counts in a zero-bias sample into trigger rates.
///
/// A sample of `n_events` zero-bias events represents the full colliding-bunch crossing rate
/// $`f \cdot n_{\text{colliding}} / n_{\text{total}}`$, so each event carries that rate divided
/// by `n_events`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateScale {
    /// LHC bunch-crossing frequency in Hz.
    pub bunch_crossing_frequency: f64,
    /// Number of colliding bunch pairs.
    pub colliding_bunches: f64,
    /// Number of bunch slots in the orbit.
    pub total_bunches: f64,
}

impl Default for RateScale {
    fn default() -> Self {
        Self {
            bunch_crossing_frequency: 40_000_000.0,
            colliding_bunches: 2452.0,
            total_bunches: 3564.0,
        }
    }
}

impl RateScale {
    /// Check that every constant is finite and positive.
    pub fn validate(&self) -> FixRateResult<()> {
        for (name, value) in [
            ("bunch_crossing_frequency", self.bunch_crossing_frequency),
            ("colliding_bunches", self.colliding_bunches),
            ("total_bunches", self.total_bunches),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(FixRateError::Custom(format!(
                    "Rate constant {name} must be finite and positive, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// The rate of colliding bunch crossings in Hz.
    pub fn zero_bias_rate(&self) -> f64 {
        self.bunch_crossing_frequency * self.colliding_bunches / self.total_bunches
    }

    /// The rate carried by one event of a sample with `n_events` events (zero for an empty
    /// sample).
    pub fn event_weight(&self, n_events: usize) -> f64 {
        if n_events == 0 {
            0.0
        } else {
            self.zero_bias_rate() / n_events as f64
        }
    }

    /// Convert a raw count into a rate.
    pub fn to_rate(&self, count: f64, n_events: usize) -> f64 {
        count * self.event_weight(n_events)
    }
}

/// How a threshold was obtained.
///
/// Values are in the units of whatever axis they were computed on: bins for
/// [`threshold_for_rate`], the observable for [`CumulativeRateHistogram::threshold_for_rate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MatchedThreshold {
    /// Supplied by the user for the reference configuration.
    Configured(f64),
    /// Linear interpolation between the two bins bracketing the target rate.
    Interpolated(f64),
    /// The target rate is at or above the rate of the lowest bin; the threshold is the lower edge.
    AtLowerEdge(f64),
    /// The rate never drops to the target inside the range; the threshold is the upper edge.
    Unreachable(f64),
}

impl MatchedThreshold {
    /// The threshold, whatever its status.
    pub fn value(&self) -> f64 {
        match self {
            Self::Configured(v)
            | Self::Interpolated(v)
            | Self::AtLowerEdge(v)
            | Self::Unreachable(v) => *v,
        }
    }

    /// `true` for thresholds pinned to a range edge.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Self::AtLowerEdge(_) | Self::Unreachable(_))
    }

    /// Apply `f` to the value, keeping the status.
    pub fn map<F: FnOnce(f64) -> f64>(self, f: F) -> Self {
        match self {
            Self::Configured(v) => Self::Configured(f(v)),
            Self::Interpolated(v) => Self::Interpolated(f(v)),
            Self::AtLowerEdge(v) => Self::AtLowerEdge(f(v)),
            Self::Unreachable(v) => Self::Unreachable(f(v)),
        }
    }
}

fn validate_rates(rates: &[f64]) -> FixRateResult<()> {
    for (index, &value) in rates.iter().enumerate() {
        if !value.is_finite() || value < 0.0 {
            return Err(FixRateError::InvalidRate(value));
        }
        if index > 0 && value > rates[index - 1] {
            return Err(FixRateError::NonMonotonicHistogram {
                index,
                previous: rates[index - 1],
                value,
            });
        }
    }
    Ok(())
}

/// Find the (fractional) bin at which a non-increasing cumulative rate histogram falls to
/// `target_rate`.
///
/// With `i` the first bin whose rate is at most `target_rate`, the result interpolates linearly
/// between bins `i - 1` and `i`. A target at or above the first bin gives
/// [`MatchedThreshold::AtLowerEdge`] at bin `0`, and a target below every bin gives
/// [`MatchedThreshold::Unreachable`] at bin `num_bins`.
///
/// # Errors
///
/// The histogram must be non-empty, have `num_bins` finite non-negative non-increasing entries,
/// and `target_rate` must be finite and non-negative.
pub fn threshold_for_rate(
    histogram: &[f64],
    num_bins: usize,
    target_rate: f64,
) -> FixRateResult<MatchedThreshold> {
    if num_bins == 0 || histogram.len() != num_bins {
        return Err(FixRateError::LengthMismatch {
            context: "Cumulative rate histogram".to_string(),
            expected: num_bins,
            actual: histogram.len(),
        });
    }
    validate_rates(histogram)?;
    if !target_rate.is_finite() || target_rate < 0.0 {
        return Err(FixRateError::InvalidRate(target_rate));
    }
    match histogram.iter().position(|&rate| rate <= target_rate) {
        Some(0) => Ok(MatchedThreshold::AtLowerEdge(0.0)),
        Some(i) => {
            let (upper, lower) = (histogram[i - 1], histogram[i]);
            Ok(MatchedThreshold::Interpolated(
                (i - 1) as f64 + (upper - target_rate) / (upper - lower),
            ))
        }
        None => Ok(MatchedThreshold::Unreachable(num_bins as f64)),
    }
}

/// A reverse-cumulative histogram of a background observable, scaled to rates in Hz.
///
/// Entry `i` is the rate of events with the observable at or above the lower edge of bin `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeRateHistogram {
    rates: Vec<f64>,
    range: (f64, f64),
}

impl CumulativeRateHistogram {
    /// Wrap precomputed rates.
    pub fn new(rates: Vec<f64>, range: (f64, f64)) -> FixRateResult<Self> {
        validate_binning(rates.len(), range)?;
        validate_rates(&rates)?;
        Ok(Self { rates, range })
    }

    /// Scale the reverse cumulative counts of `histogram` from a sample of `n_events` events.
    pub fn from_histogram(
        histogram: &Histogram,
        n_events: usize,
        scale: &RateScale,
    ) -> FixRateResult<Self> {
        let weight = scale.event_weight(n_events);
        let rates = histogram
            .reverse_cumulative()
            .into_iter()
            .map(|count| count * weight)
            .collect();
        Self::new(rates, histogram.range())
    }

    /// Histogram per-event `values` of a background sample. Every entry counts towards the sample
    /// size, including NaN entries for events without the observable.
    pub fn from_values(
        values: &[f64],
        bins: usize,
        range: (f64, f64),
        scale: &RateScale,
    ) -> FixRateResult<Self> {
        let counts = histogram(values, bins, range, None)?;
        debug!(
            n_events = values.len(),
            in_range = counts.total(),
            overflow = counts.overflow,
            "filled rate histogram"
        );
        Self::from_histogram(&counts, values.len(), scale)
    }

    /// The rate in each bin.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.rates.len()
    }

    /// The observable range.
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    /// Width of each bin.
    pub fn bin_width(&self) -> f64 {
        (self.range.1 - self.range.0) / self.n_bins() as f64
    }

    /// Bin edges (one more than the number of bins).
    pub fn bin_edges(&self) -> Vec<f64> {
        get_bin_edges(self.n_bins(), self.range)
    }

    /// The rate of the bin containing `threshold`.
    pub fn rate_at(&self, threshold: f64) -> FixRateResult<f64> {
        get_bin_index(threshold, self.n_bins(), self.range)
            .map(|index| self.rates[index])
            .ok_or(FixRateError::ThresholdOutOfRange {
                threshold,
                range: self.range,
            })
    }

    /// The observable value at which the rate falls to `target_rate`, see [`threshold_for_rate`].
    pub fn threshold_for_rate(&self, target_rate: f64) -> FixRateResult<MatchedThreshold> {
        let (lo, width) = (self.range.0, self.bin_width());
        Ok(threshold_for_rate(&self.rates, self.n_bins(), target_rate)?.map(|t| lo + t * width))
    }
}

/// The thresholds of one configuration, one per reference rate point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    /// Configuration label.
    pub label: String,
    /// Thresholds in observable units.
    pub thresholds: Vec<MatchedThreshold>,
}

impl ThresholdSet {
    /// The plain threshold values.
    pub fn values(&self) -> Vec<f64> {
        self.thresholds.iter().map(MatchedThreshold::value).collect()
    }

    /// Number of rate points.
    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    /// `true` if there are no rate points.
    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

/// The outcome of matching every configuration to the rates of the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Rate of the reference configuration at each reference threshold, in Hz.
    pub reference_rates: Vec<f64>,
    /// One set per configuration, the reference first.
    pub threshold_sets: Vec<ThresholdSet>,
}

/// Match every configuration to the rates the reference reaches at `reference_thresholds`.
///
/// The reference rates are read off the bin containing each threshold. Errors for one of the
/// `others` carry its label.
pub fn calibrate<'a, I>(
    reference_label: &str,
    reference: &CumulativeRateHistogram,
    others: I,
    reference_thresholds: &[f64],
) -> FixRateResult<Calibration>
where
    I: IntoIterator<Item = (&'a str, &'a CumulativeRateHistogram)>,
{
    let reference_rates = reference_thresholds
        .iter()
        .map(|&threshold| reference.rate_at(threshold))
        .collect::<FixRateResult<Vec<f64>>>()
        .for_configuration(reference_label)?;
    let mut threshold_sets = vec![ThresholdSet {
        label: reference_label.to_string(),
        thresholds: reference_thresholds
            .iter()
            .map(|&t| MatchedThreshold::Configured(t))
            .collect(),
    }];
    for (label, histogram) in others {
        let thresholds = reference_rates
            .iter()
            .map(|&rate| histogram.threshold_for_rate(rate))
            .collect::<FixRateResult<Vec<_>>>()
            .for_configuration(label)?;
        for (rate, threshold) in reference_rates.iter().zip(&thresholds) {
            if let MatchedThreshold::Unreachable(value) = threshold {
                warn!(
                    label,
                    rate,
                    threshold = value,
                    "rate not reached, threshold saturates at the upper edge"
                );
            }
        }
        threshold_sets.push(ThresholdSet {
            label: label.to_string(),
            thresholds,
        });
    }
    Ok(Calibration {
        reference_rates,
        threshold_sets,
    })
}
