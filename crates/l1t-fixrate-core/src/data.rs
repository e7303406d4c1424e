use std::fmt::Display;

use indexmap::IndexMap;
use tracing::debug;

use crate::{FixRateError, FixRateResult};

/// NanoAOD reading and Parquet persistence of [`EventTable`]s.
pub mod io;

pub use io::{
    discover_files, expand_output_path, read_nano, read_nano_files, read_table, write_table,
    FloatPrecision, NanoBranches, TableWriteOptions,
};

/// A variable-length collection per event, stored as a flat buffer plus row offsets.
///
/// Row `i` spans `values[offsets[i]..offsets[i + 1]]`, so `offsets` always has one more entry than
/// there are events.
#[derive(Debug, Clone, PartialEq)]
pub struct JaggedColumn {
    offsets: Vec<usize>,
    values: Vec<f64>,
}

impl Default for JaggedColumn {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            values: Vec::new(),
        }
    }
}

impl JaggedColumn {
    /// Create an empty column with no events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a column from one slice of values per event.
    pub fn from_rows<I, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[f64]>,
    {
        let mut column = Self::new();
        for row in rows {
            column.push_row(row.as_ref());
        }
        column
    }

    /// Append the values of one event.
    pub fn push_row(&mut self, row: &[f64]) {
        self.values.extend_from_slice(row);
        self.offsets.push(self.values.len());
    }

    /// Append every event of another column.
    pub fn extend(&mut self, other: &JaggedColumn) {
        for row in other.rows() {
            self.push_row(row);
        }
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of values over all events.
    pub fn n_values(&self) -> usize {
        self.values.len()
    }

    /// The values of event `event_index`.
    pub fn row(&self, event_index: usize) -> &[f64] {
        &self.values[self.offsets[event_index]..self.offsets[event_index + 1]]
    }

    /// Iterate over the rows of each event.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.offsets
            .windows(2)
            .map(move |bounds| &self.values[bounds[0]..bounds[1]])
    }

    /// Number of values in each event.
    pub fn counts(&self) -> Vec<usize> {
        self.offsets
            .windows(2)
            .map(|bounds| bounds[1] - bounds[0])
            .collect()
    }

    fn check_aligned(&self, other: &JaggedColumn, context: &str) -> FixRateResult<()> {
        if self.n_events() != other.n_events() {
            return Err(FixRateError::LengthMismatch {
                context: format!("{context} (events)"),
                expected: self.n_events(),
                actual: other.n_events(),
            });
        }
        if self.offsets != other.offsets {
            return Err(FixRateError::LengthMismatch {
                context: format!("{context} (objects)"),
                expected: self.n_values(),
                actual: other.n_values(),
            });
        }
        Ok(())
    }
}

/// L1 energy sums of every type and bunch crossing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EtSums {
    /// Transverse energy of each sum.
    pub pt: JaggedColumn,
    /// `etSumType` code of each sum, see [`SumType`](crate::SumType).
    pub sum_type: JaggedColumn,
    /// Bunch crossing of each sum relative to the triggered one.
    pub bx: JaggedColumn,
}

impl EtSums {
    fn validate(&self) -> FixRateResult<()> {
        self.pt.check_aligned(&self.sum_type, "EtSum_etSumType")?;
        self.pt.check_aligned(&self.bx, "EtSum_bx")
    }

    fn extend(&mut self, other: &EtSums) {
        self.pt.extend(&other.pt);
        self.sum_type.extend(&other.sum_type);
        self.bx.extend(&other.bx);
    }
}

/// A jet collection (L1 or offline).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Jets {
    /// Transverse momenta.
    pub pt: JaggedColumn,
    /// Pseudorapidities.
    pub eta: JaggedColumn,
    /// Azimuthal angles.
    pub phi: JaggedColumn,
}

impl Jets {
    fn validate(&self, name: &str) -> FixRateResult<()> {
        self.pt.check_aligned(&self.eta, &format!("{name}_eta"))?;
        self.pt.check_aligned(&self.phi, &format!("{name}_phi"))
    }

    fn extend(&mut self, other: &Jets) {
        self.pt.extend(&other.pt);
        self.eta.extend(&other.eta);
        self.phi.extend(&other.phi);
    }
}

/// Offline muons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Muons {
    /// Transverse momenta.
    pub pt: JaggedColumn,
    /// Azimuthal angles.
    pub phi: JaggedColumn,
    /// `1.0` for muons which are PF candidates, `0.0` otherwise.
    pub is_pf_cand: JaggedColumn,
}

impl Muons {
    fn validate(&self) -> FixRateResult<()> {
        self.pt.check_aligned(&self.phi, "Muon_phi")?;
        self.pt.check_aligned(&self.is_pf_cand, "Muon_isPFcand")
    }

    fn extend(&mut self, other: &Muons) {
        self.pt.extend(&other.pt);
        self.phi.extend(&other.phi);
        self.is_pf_cand.extend(&other.is_pf_cand);
    }
}

/// Offline PUPPI missing transverse energy, one entry per event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PuppiMet {
    /// Magnitude.
    pub pt: Vec<f64>,
    /// Azimuthal angle.
    pub phi: Vec<f64>,
}

/// The physics-object collections of one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct NanoEvents {
    /// L1 energy sums.
    pub l1_sums: EtSums,
    /// L1 jets.
    pub l1_jets: Jets,
    /// Offline PUPPI jets.
    pub reco_jets: Jets,
    /// Offline muons.
    pub muons: Muons,
    /// Offline PUPPI MET.
    pub puppi_met: PuppiMet,
}

impl NanoEvents {
    /// Bundle collections, checking that every collection describes the same events.
    pub fn new(
        l1_sums: EtSums,
        l1_jets: Jets,
        reco_jets: Jets,
        muons: Muons,
        puppi_met: PuppiMet,
    ) -> FixRateResult<Self> {
        let events = Self {
            l1_sums,
            l1_jets,
            reco_jets,
            muons,
            puppi_met,
        };
        events.validate()?;
        Ok(events)
    }

    fn validate(&self) -> FixRateResult<()> {
        self.l1_sums.validate()?;
        self.l1_jets.validate("L1Jet")?;
        self.reco_jets.validate("Jet")?;
        self.muons.validate()?;
        let n_events = self.n_events();
        let counts = [
            ("L1 jets", self.l1_jets.pt.n_events()),
            ("offline jets", self.reco_jets.pt.n_events()),
            ("muons", self.muons.pt.n_events()),
            ("PuppiMET_pt", self.puppi_met.pt.len()),
            ("PuppiMET_phi", self.puppi_met.phi.len()),
        ];
        for (context, actual) in counts {
            if actual != n_events {
                return Err(FixRateError::LengthMismatch {
                    context: format!("Collection '{context}'"),
                    expected: n_events,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.l1_sums.pt.n_events()
    }

    /// Concatenate the events of several samples (e.g. files) in order.
    pub fn concat(parts: Vec<NanoEvents>) -> FixRateResult<Self> {
        let mut parts = parts.into_iter();
        let mut combined = parts
            .next()
            .ok_or_else(|| FixRateError::Custom("Cannot concatenate zero samples".to_string()))?;
        for part in parts {
            combined.l1_sums.extend(&part.l1_sums);
            combined.l1_jets.extend(&part.l1_jets);
            combined.reco_jets.extend(&part.reco_jets);
            combined.muons.extend(&part.muons);
            combined.puppi_met.pt.extend_from_slice(&part.puppi_met.pt);
            combined.puppi_met.phi.extend_from_slice(&part.puppi_met.phi);
        }
        combined.validate()?;
        Ok(combined)
    }
}

/// Named per-event columns of derived quantities for one trigger configuration.
///
/// A `None` cell marks a quantity which does not exist for that event (for instance a leading jet
/// that could not be matched). Columns keep their insertion order, which is also the order in which
/// they are persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    label: String,
    n_events: usize,
    columns: IndexMap<String, Vec<Option<f64>>>,
}

impl Display for EventTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "EventTable \"{}\" ({} events):", self.label, self.n_events)?;
        for (name, values) in &self.columns {
            let missing = values.iter().filter(|v| v.is_none()).count();
            writeln!(f, "  {name} ({missing} missing)")?;
        }
        Ok(())
    }
}

impl EventTable {
    /// Create a table with no columns for `n_events` events.
    pub fn new<S: Into<String>>(label: S, n_events: usize) -> Self {
        Self {
            label: label.into(),
            n_events,
            columns: IndexMap::new(),
        }
    }

    /// Add (or replace) a column.
    pub fn with_column<S: Into<String>>(
        mut self,
        name: S,
        values: Vec<Option<f64>>,
    ) -> FixRateResult<Self> {
        let name = name.into();
        if values.len() != self.n_events {
            return Err(FixRateError::LengthMismatch {
                context: format!("Column '{name}' of table '{}'", self.label),
                expected: self.n_events,
                actual: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(self)
    }

    /// Add (or replace) a column in which every event has a value.
    pub fn with_dense_column<S: Into<String>>(
        self,
        name: S,
        values: Vec<f64>,
    ) -> FixRateResult<Self> {
        self.with_column(name, values.into_iter().map(Some).collect())
    }

    /// The label of the trigger configuration this table belongs to.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of events (rows).
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Names of every column in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    /// Check whether a column is present.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Borrow a column.
    pub fn column(&self, name: &str) -> FixRateResult<&[Option<f64>]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| FixRateError::MissingColumn {
                name: name.to_string(),
            })
    }

    /// The trigger column, which carries the table's own label.
    pub fn trigger(&self) -> FixRateResult<&[Option<f64>]> {
        self.column(&self.label)
    }

    /// A column as plain floats, with missing entries as NaN.
    ///
    /// NaN never passes a threshold and never falls into a bin, so missing values stay visible as
    /// "no data" in every downstream histogram and efficiency.
    pub fn values(&self, name: &str) -> FixRateResult<Vec<f64>> {
        Ok(self
            .column(name)?
            .iter()
            .map(|value| value.unwrap_or(f64::NAN))
            .collect())
    }

    /// Number of missing entries in a column.
    pub fn n_missing(&self, name: &str) -> FixRateResult<usize> {
        Ok(self.column(name)?.iter().filter(|v| v.is_none()).count())
    }

    /// The per-event difference of two columns, missing where either input is missing.
    pub fn difference(&self, minuend: &str, subtrahend: &str) -> FixRateResult<Vec<Option<f64>>> {
        let a = self.column(minuend)?;
        let b = self.column(subtrahend)?;
        Ok(a.iter()
            .zip(b)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => Some(a - b),
                _ => None,
            })
            .collect())
    }

    /// Keep the rows for which `mask` is `true`.
    pub fn select(&self, mask: &[bool]) -> FixRateResult<Self> {
        if mask.len() != self.n_events {
            return Err(FixRateError::LengthMismatch {
                context: format!("Row selection of table '{}'", self.label),
                expected: self.n_events,
                actual: mask.len(),
            });
        }
        let n_events = mask.iter().filter(|keep| **keep).count();
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let kept = values
                    .iter()
                    .zip(mask)
                    .filter_map(|(value, keep)| keep.then_some(*value))
                    .collect();
                (name.clone(), kept)
            })
            .collect();
        debug!(
            table = %self.label,
            kept = n_events,
            total = self.n_events,
            "selected rows"
        );
        Ok(Self {
            label: self.label.clone(),
            n_events,
            columns,
        })
    }

    /// Drop every row in which any column reaches `limit` (saturated objects).
    pub fn remove_saturated(&self, limit: f64) -> FixRateResult<Self> {
        let mask: Vec<bool> = (0..self.n_events)
            .map(|row| {
                self.columns
                    .values()
                    .all(|values| values[row].map_or(true, |value| value < limit))
            })
            .collect();
        self.select(&mask)
    }

    /// Keep the rows in which `column` exceeds `cut`. Missing values never pass.
    pub fn apply_cut(&self, column: &str, cut: f64) -> FixRateResult<Self> {
        let mask: Vec<bool> = self
            .column(column)?
            .iter()
            .map(|value| value.is_some_and(|value| value > cut))
            .collect();
        self.select(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_events() -> NanoEvents {
        NanoEvents::new(
            EtSums {
                pt: JaggedColumn::from_rows([vec![55.0, 30.0, 12.0], vec![20.0], vec![]]),
                sum_type: JaggedColumn::from_rows([vec![8.0, 8.0, 2.0], vec![2.0], vec![]]),
                bx: JaggedColumn::from_rows([vec![-1.0, 0.0, 0.0], vec![0.0], vec![]]),
            },
            Jets {
                pt: JaggedColumn::from_rows([vec![40.0, 25.0], vec![], vec![70.0]]),
                eta: JaggedColumn::from_rows([vec![0.1, -1.2], vec![], vec![2.0]]),
                phi: JaggedColumn::from_rows([vec![0.5, 2.0], vec![], vec![-3.0]]),
            },
            Jets {
                pt: JaggedColumn::from_rows([vec![38.0, 22.0], vec![15.0], vec![]]),
                eta: JaggedColumn::from_rows([vec![0.15, -1.1], vec![0.0], vec![]]),
                phi: JaggedColumn::from_rows([vec![0.45, 2.1], vec![1.0], vec![]]),
            },
            Muons {
                pt: JaggedColumn::from_rows([vec![30.0], vec![10.0, 5.0], vec![]]),
                phi: JaggedColumn::from_rows([vec![0.0], vec![0.0, 1.0], vec![]]),
                is_pf_cand: JaggedColumn::from_rows([vec![1.0], vec![0.0, 1.0], vec![]]),
            },
            PuppiMet {
                pt: vec![10.0, 5.0, 50.0],
                phi: vec![0.0, 3.0, -1.0],
            },
        )
        .expect("test events should be valid")
    }

    #[test]
    fn test_jagged_column_rows() {
        let column = JaggedColumn::from_rows([vec![1.0, 2.0], vec![], vec![3.0]]);
        assert_eq!(column.n_events(), 3);
        assert_eq!(column.n_values(), 3);
        assert_eq!(column.row(0), &[1.0, 2.0]);
        assert!(column.row(1).is_empty());
        assert_eq!(column.counts(), vec![2, 0, 1]);
        let rows: Vec<&[f64]> = column.rows().collect();
        assert_eq!(rows[2], &[3.0]);
        assert_eq!(JaggedColumn::new().n_events(), 0);
    }

    #[test]
    fn test_events_reject_misaligned_collections() {
        let mut events = test_events();
        events.puppi_met.pt.pop();
        assert!(matches!(
            events.validate(),
            Err(FixRateError::LengthMismatch { .. })
        ));

        let mut events = test_events();
        events.l1_jets.eta = JaggedColumn::from_rows([vec![0.1], vec![], vec![2.0]]);
        assert!(matches!(
            events.validate(),
            Err(FixRateError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_events_concat() {
        let combined = NanoEvents::concat(vec![test_events(), test_events()]).unwrap();
        assert_eq!(combined.n_events(), 6);
        assert_eq!(combined.l1_jets.pt.row(5), &[70.0]);
        assert_eq!(combined.puppi_met.pt[3], 10.0);
        assert!(NanoEvents::concat(Vec::new()).is_err());
    }

    fn test_table() -> EventTable {
        EventTable::new("Default", 4)
            .with_column("Default", vec![Some(10.0), Some(1200.0), None, Some(60.0)])
            .unwrap()
            .with_dense_column("PuppiMETNoMu", vec![5.0, 15.0, 25.0, 35.0])
            .unwrap()
    }

    #[test]
    fn test_table_columns() {
        let table = test_table();
        assert_eq!(table.column_names(), vec!["Default", "PuppiMETNoMu"]);
        assert_eq!(table.trigger().unwrap()[2], None);
        assert!(table.values("Default").unwrap()[2].is_nan());
        assert_eq!(table.n_missing("Default").unwrap(), 1);
        assert!(matches!(
            table.column("PuppiHT"),
            Err(FixRateError::MissingColumn { .. })
        ));
        assert!(matches!(
            EventTable::new("Default", 2).with_dense_column("Default", vec![1.0]),
            Err(FixRateError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_table_difference() {
        let table = test_table();
        let diff = table.difference("Default", "PuppiMETNoMu").unwrap();
        assert_eq!(diff, vec![Some(5.0), Some(1185.0), None, Some(25.0)]);
    }

    #[test]
    fn test_table_selections() {
        let table = test_table();
        let unsaturated = table.remove_saturated(1000.0).unwrap();
        assert_eq!(unsaturated.n_events(), 3);
        assert_eq!(
            unsaturated.column("PuppiMETNoMu").unwrap(),
            &[Some(5.0), Some(25.0), Some(35.0)]
        );
        let cut = table.apply_cut("Default", 20.0).unwrap();
        assert_eq!(cut.n_events(), 2);
        assert_eq!(cut.trigger().unwrap(), &[Some(1200.0), Some(60.0)]);
        assert!(table.select(&[true]).is_err());
    }
}
