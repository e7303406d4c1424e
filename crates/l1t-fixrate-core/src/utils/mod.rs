use serde::{Deserialize, Serialize};

use crate::{FixRateError, FixRateResult};

/// Useful enumerations for branch types, sum types, and observables.
pub mod enums;
/// Transverse-plane vectors and angular distances.
pub mod vectors;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`Histogram`]
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`
///
/// Values outside of `[limits.0, limits.1)` (including NaN) have no bin.
///
/// # See Also
/// [`Histogram`]
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// Check that `bins` evenly spaced bins over `range` form a usable binning.
pub fn validate_binning(bins: usize, range: (f64, f64)) -> FixRateResult<()> {
    if bins == 0 || !range.0.is_finite() || !range.1.is_finite() || range.1 <= range.0 {
        return Err(FixRateError::InvalidBinning { bins, range });
    }
    Ok(())
}

/// A simple struct which represents a histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// The number of counts in each bin (can be `f64`s since these might be weighted counts)
    pub counts: Vec<f64>,
    /// The edges of each bin (length is one greater than `counts`)
    pub bin_edges: Vec<f64>,
    /// Weighted count of finite values below the lowest edge
    pub underflow: f64,
    /// Weighted count of values at or above the highest edge
    pub overflow: f64,
}

impl Histogram {
    /// The number of bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// The range covered by the bins.
    pub fn range(&self) -> (f64, f64) {
        (self.bin_edges[0], self.bin_edges[self.n_bins()])
    }

    /// The width of each bin.
    pub fn bin_width(&self) -> f64 {
        let (lo, hi) = self.range();
        (hi - lo) / self.n_bins() as f64
    }

    /// Centers of each bin.
    pub fn bin_centers(&self) -> Vec<f64> {
        self.bin_edges
            .windows(2)
            .map(|edges| 0.5 * (edges[0] + edges[1]))
            .collect()
    }

    /// The sum of in-range counts.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// The reverse cumulative sum: entry `i` is the weighted count of every value at or above the
    /// lower edge of bin `i`, overflow included.
    pub fn reverse_cumulative(&self) -> Vec<f64> {
        let mut cumulative = vec![0.0; self.n_bins()];
        let mut running = self.overflow;
        for (index, count) in self.counts.iter().enumerate().rev() {
            running += count;
            cumulative[index] = running;
        }
        cumulative
    }
}

/// A method which creates a histogram from some data by binning it with evenly spaced `bins` within
/// the given `range`
///
/// NaN values are skipped entirely; they are neither counted in a bin nor in the under/overflow.
pub fn histogram<T: AsRef<[f64]>>(
    values: T,
    bins: usize,
    range: (f64, f64),
    weights: Option<T>,
) -> FixRateResult<Histogram> {
    validate_binning(bins, range)?;
    if let Some(w) = &weights {
        if values.as_ref().len() != w.as_ref().len() {
            return Err(FixRateError::LengthMismatch {
                context: "Histogram weights".to_string(),
                expected: values.as_ref().len(),
                actual: w.as_ref().len(),
            });
        }
    }
    let mut counts = vec![0.0; bins];
    let mut underflow = 0.0;
    let mut overflow = 0.0;
    for (i, &value) in values.as_ref().iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        let weight = weights.as_ref().map_or(1.0, |w| w.as_ref()[i]);
        match get_bin_index(value, bins, range) {
            Some(bin_index) => counts[bin_index] += weight,
            None if value < range.0 => underflow += weight,
            None => overflow += weight,
        }
    }
    Ok(Histogram {
        counts,
        bin_edges: get_bin_edges(bins, range),
        underflow,
        overflow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_binning() {
        let bin_index = get_bin_index(0.5, 3, (0.0, 1.0));
        assert_eq!(bin_index, Some(1));
        let bin_index = get_bin_index(0.0, 3, (0.0, 1.0));
        assert_eq!(bin_index, Some(0));
        let bin_index = get_bin_index(0.1, 3, (0.0, 1.0));
        assert_eq!(bin_index, Some(0));
        let bin_index = get_bin_index(0.9, 3, (0.0, 1.0));
        assert_eq!(bin_index, Some(2));
        let bin_index = get_bin_index(1.0, 3, (0.0, 1.0));
        assert_eq!(bin_index, None);
        let bin_index = get_bin_index(2.0, 3, (0.0, 1.0));
        assert_eq!(bin_index, None);
        let bin_index = get_bin_index(f64::NAN, 3, (0.0, 1.0));
        assert_eq!(bin_index, None);
    }

    #[test]
    fn test_bin_edges() {
        let edges = get_bin_edges(4, (0.0, 200.0));
        assert_eq!(edges, vec![0.0, 50.0, 100.0, 150.0, 200.0]);
    }

    #[test]
    fn test_histogram() {
        let values = vec![0.1, 0.5, 0.5, 0.95, -1.0, 3.0, f64::NAN];
        let weights = vec![1.0, 2.0, 0.5, 1.0, 4.0, 8.0, 16.0];
        let hist = histogram(&values, 3, (0.0, 1.0), Some(&weights)).unwrap();
        assert_eq!(hist.counts, vec![1.0, 2.5, 1.0]);
        assert_relative_eq!(hist.underflow, 4.0);
        assert_relative_eq!(hist.overflow, 8.0);
        assert_relative_eq!(hist.total(), 4.5);
        assert_relative_eq!(hist.bin_width(), 1.0 / 3.0);
        assert_eq!(hist.range(), (0.0, 1.0));
    }

    #[test]
    fn test_reverse_cumulative_includes_overflow() {
        let values = vec![0.5, 1.5, 1.7, 2.5, 10.0];
        let hist = histogram(&values, 3, (0.0, 3.0), None).unwrap();
        assert_eq!(hist.reverse_cumulative(), vec![5.0, 4.0, 2.0]);
    }

    #[test]
    fn test_histogram_rejects_bad_binning() {
        let values = vec![1.0];
        assert!(matches!(
            histogram(&values, 0, (0.0, 1.0), None),
            Err(FixRateError::InvalidBinning { .. })
        ));
        assert!(matches!(
            histogram(&values, 2, (1.0, 1.0), None),
            Err(FixRateError::InvalidBinning { .. })
        ));
    }

    #[test]
    fn test_histogram_rejects_mismatched_weights() {
        let values = vec![1.0, 2.0];
        let weights = vec![1.0];
        assert!(matches!(
            histogram(&values, 2, (0.0, 4.0), Some(&weights)),
            Err(FixRateError::LengthMismatch { .. })
        ));
    }
}
