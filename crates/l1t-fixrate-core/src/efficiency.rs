use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    utils::{get_bin_index, validate_binning},
    FixRateError, FixRateResult,
};

/// One bin of a turn-on curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyPoint {
    /// Center of the reference bin.
    pub bin_center: f64,
    /// Fraction of events in the bin passing the threshold, `None` for an empty bin.
    pub efficiency: Option<f64>,
    /// Binomial uncertainty of the efficiency, `None` for an empty bin.
    pub uncertainty: Option<f64>,
    /// Events in the bin.
    pub n: usize,
    /// Events in the bin passing the threshold.
    pub k: usize,
}

/// The efficiency of a trigger threshold as a function of an offline reference quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyCurve {
    /// The trigger threshold.
    pub threshold: f64,
    /// Upper edge of the reference axis (the lower edge is zero).
    pub max_range: f64,
    /// Bins in order of increasing reference value.
    pub points: Vec<EfficiencyPoint>,
}

impl EfficiencyCurve {
    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.points.len()
    }

    /// Width of each bin.
    pub fn bin_width(&self) -> f64 {
        self.max_range / self.n_bins() as f64
    }

    /// Efficiencies of each bin.
    pub fn efficiencies(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.efficiency).collect()
    }

    /// Centers of each bin.
    pub fn bin_centers(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.bin_center).collect()
    }

    /// Uncertainties of each bin.
    pub fn errors(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.uncertainty).collect()
    }

    /// `(efficiencies, bin_centers, errors)` as parallel sequences.
    pub fn to_arrays(&self) -> (Vec<Option<f64>>, Vec<f64>, Vec<Option<f64>>) {
        (self.efficiencies(), self.bin_centers(), self.errors())
    }

    /// Number of bins without any event.
    pub fn n_empty(&self) -> usize {
        self.points.iter().filter(|p| p.n == 0).count()
    }
}

/// Build the turn-on curve of `threshold` binned in `reference_values` on `[0, max_range)`.
///
/// An event passes when its trigger value is strictly above `threshold`, so NaN never passes.
/// Events whose reference is NaN or outside the range are not counted. Each bin with `n` events of
/// which `k` pass gets efficiency $`\epsilon = k/n`$ and uncertainty
/// $`\sqrt{\epsilon(1-\epsilon)/n}`$.
///
/// ```
/// use l1t_fixrate_core::efficiency;
///
/// let curve = efficiency(
///     &[10.0, 60.0, 40.0, 90.0],
///     &[5.0, 15.0, 25.0, 35.0],
///     50.0,
///     4,
///     40.0,
/// )
/// .unwrap();
/// assert_eq!(curve.efficiencies(), vec![Some(0.0), Some(1.0), Some(0.0), Some(1.0)]);
/// assert_eq!(curve.bin_centers(), vec![5.0, 15.0, 25.0, 35.0]);
/// ```
pub fn efficiency(
    trigger_values: &[f64],
    reference_values: &[f64],
    threshold: f64,
    num_bins: usize,
    max_range: f64,
) -> FixRateResult<EfficiencyCurve> {
    if trigger_values.len() != reference_values.len() {
        return Err(FixRateError::LengthMismatch {
            context: "Trigger and reference values".to_string(),
            expected: reference_values.len(),
            actual: trigger_values.len(),
        });
    }
    validate_binning(num_bins, (0.0, max_range))?;

    let mut n = vec![0usize; num_bins];
    let mut k = vec![0usize; num_bins];
    for (&trigger, &reference) in trigger_values.iter().zip(reference_values) {
        if let Some(index) = get_bin_index(reference, num_bins, (0.0, max_range)) {
            n[index] += 1;
            if trigger > threshold {
                k[index] += 1;
            }
        }
    }

    let width = max_range / num_bins as f64;
    let points: Vec<EfficiencyPoint> = n
        .into_iter()
        .zip(k)
        .enumerate()
        .map(|(index, (n, k))| {
            let (efficiency, uncertainty) = if n == 0 {
                (None, None)
            } else {
                let eff = k as f64 / n as f64;
                (Some(eff), Some((eff * (1.0 - eff) / n as f64).sqrt()))
            };
            EfficiencyPoint {
                bin_center: (index as f64 + 0.5) * width,
                efficiency,
                uncertainty,
                n,
                k,
            }
        })
        .collect();
    let curve = EfficiencyCurve {
        threshold,
        max_range,
        points,
    };
    debug!(threshold, empty_bins = curve.n_empty(), "built efficiency curve");
    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_step_turn_on() {
        let curve = efficiency(
            &[10.0, 60.0, 40.0, 90.0],
            &[5.0, 15.0, 25.0, 35.0],
            50.0,
            4,
            40.0,
        )
        .unwrap();
        let (effs, centers, errs) = curve.to_arrays();
        assert_eq!(effs, vec![Some(0.0), Some(1.0), Some(0.0), Some(1.0)]);
        assert_eq!(centers, vec![5.0, 15.0, 25.0, 35.0]);
        assert_eq!(errs, vec![Some(0.0); 4]);
        assert_eq!(curve.n_bins(), 4);
        assert_relative_eq!(curve.bin_width(), 10.0);
    }

    #[test]
    fn test_empty_bins_have_no_efficiency() {
        let curve = efficiency(&[60.0, 70.0], &[5.0, 6.0], 50.0, 4, 40.0).unwrap();
        assert_eq!(curve.points[0].n, 2);
        assert_eq!(curve.points[0].efficiency, Some(1.0));
        for point in &curve.points[1..] {
            assert_eq!(point.n, 0);
            assert_eq!(point.efficiency, None);
            assert_eq!(point.uncertainty, None);
        }
        assert_eq!(curve.n_empty(), 3);
    }

    #[test]
    fn test_binomial_uncertainty() {
        let trigger = [60.0, 10.0, 70.0, 20.0];
        let reference = [1.0, 2.0, 3.0, 4.0];
        let curve = efficiency(&trigger, &reference, 50.0, 1, 10.0).unwrap();
        let point = curve.points[0];
        assert_eq!((point.n, point.k), (4, 2));
        assert_relative_eq!(point.efficiency.unwrap(), 0.5);
        assert_relative_eq!(point.uncertainty.unwrap(), (0.25f64 / 4.0).sqrt());
    }

    #[test]
    fn test_strict_threshold_and_missing_values() {
        let trigger = [50.0, f64::NAN, 50.1, 80.0];
        let reference = [5.0, 5.0, 5.0, f64::NAN];
        let curve = efficiency(&trigger, &reference, 50.0, 2, 20.0).unwrap();
        assert_eq!((curve.points[0].n, curve.points[0].k), (3, 1));
        assert_eq!(curve.points[1].n, 0);
    }

    #[test]
    fn test_out_of_range_reference_is_dropped() {
        let curve = efficiency(&[60.0, 60.0, 60.0], &[-1.0, 40.0, 39.9], 50.0, 4, 40.0).unwrap();
        let total: usize = curve.points.iter().map(|p| p.n).sum();
        assert_eq!(total, 1);
        assert_eq!(curve.points[3].n, 1);
    }

    #[test]
    fn test_efficiency_bounds_and_threshold_monotonicity() {
        let mut rng = fastrand::Rng::with_seed(42);
        let reference: Vec<f64> = (0..2000).map(|_| rng.f64() * 400.0).collect();
        let trigger: Vec<f64> = reference
            .iter()
            .map(|r| r * (0.6 + 0.8 * rng.f64()))
            .collect();
        let mut previous: Option<EfficiencyCurve> = None;
        for threshold in [0.0, 30.0, 60.0, 120.0, 180.0, 500.0] {
            let curve = efficiency(&trigger, &reference, threshold, 10, 400.0).unwrap();
            for point in &curve.points {
                if let (Some(eff), Some(err)) = (point.efficiency, point.uncertainty) {
                    assert!((0.0..=1.0).contains(&eff));
                    assert!(err >= 0.0);
                }
            }
            if let Some(previous) = &previous {
                for (low, high) in previous.points.iter().zip(&curve.points) {
                    assert_eq!(low.n, high.n);
                    assert!(high.k <= low.k);
                }
            }
            previous = Some(curve);
        }
    }

    #[test]
    fn test_efficiency_is_idempotent() {
        let mut rng = fastrand::Rng::with_seed(7);
        let reference: Vec<f64> = (0..1000).map(|_| rng.f64() * 400.0).collect();
        let trigger: Vec<f64> = reference
            .iter()
            .map(|r| if rng.f64() < 0.05 { f64::NAN } else { r * (0.6 + 0.8 * rng.f64()) })
            .collect();
        let first = efficiency(&trigger, &reference, 90.0, 10, 400.0).unwrap();
        let second = efficiency(&trigger, &reference, 90.0, 10, 400.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            efficiency(&[1.0], &[1.0, 2.0], 0.0, 4, 40.0),
            Err(FixRateError::LengthMismatch { .. })
        ));
        assert!(matches!(
            efficiency(&[1.0], &[1.0], 0.0, 0, 40.0),
            Err(FixRateError::InvalidBinning { .. })
        ));
        assert!(matches!(
            efficiency(&[1.0], &[1.0], 0.0, 4, 0.0),
            Err(FixRateError::InvalidBinning { .. })
        ));
        assert!(matches!(
            efficiency(&[1.0], &[1.0], 0.0, 4, f64::INFINITY),
            Err(FixRateError::InvalidBinning { .. })
        ));
    }
}
