#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::MatchingConfig,
    data::{EtSums, EventTable, Jets, Muons, NanoEvents},
    utils::{
        enums::{Observable, SumType, PUPPI_HT, PUPPI_LEADING_JET, PUPPI_MET, PUPPI_MET_NO_MU},
        vectors::{delta_r, TransverseVector},
    },
    FixRateResult,
};

/// The transverse momentum of the first L1 sum of type `kind` in the triggered bunch crossing.
pub fn l1_sum(pt: &[f64], sum_type: &[f64], bx: &[f64], kind: SumType) -> Option<f64> {
    let code = kind.code() as f64;
    pt.iter()
        .zip(sum_type)
        .zip(bx)
        .find(|&((_, &t), &b)| t == code && b == 0.0)
        .map(|((&pt, _), _)| pt)
}

/// PUPPI MET with the transverse momenta of PF-candidate muons added back.
pub fn puppi_met_no_mu(
    met: TransverseVector,
    muon_pt: &[f64],
    muon_phi: &[f64],
    muon_is_pf_cand: &[f64],
) -> f64 {
    let muons: TransverseVector = muon_pt
        .iter()
        .zip(muon_phi)
        .zip(muon_is_pf_cand)
        .filter(|&(_, &is_pf)| is_pf == 1.0)
        .map(|((&pt, &phi), _)| TransverseVector::from_pt_phi(pt, phi))
        .sum();
    (met + muons).pt()
}

/// Scalar sum of transverse momenta (zero for an empty collection).
pub fn scalar_sum(pt: &[f64]) -> f64 {
    pt.iter().sum()
}

/// The largest transverse momentum, `None` for an empty collection.
pub fn leading_pt(pt: &[f64]) -> Option<f64> {
    pt.iter().copied().reduce(f64::max)
}

/// A jet as seen by the matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JetCandidate {
    /// Transverse momentum.
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Azimuthal angle.
    pub phi: f64,
}

impl JetCandidate {
    /// Collect the jets of one event.
    pub fn from_event(jets: &Jets, event_index: usize) -> Vec<JetCandidate> {
        jets.pt
            .row(event_index)
            .iter()
            .zip(jets.eta.row(event_index))
            .zip(jets.phi.row(event_index))
            .map(|((&pt, &eta), &phi)| JetCandidate { pt, eta, phi })
            .collect()
    }

    /// The jet with the largest transverse momentum (the first one on ties).
    pub fn leading(candidates: &[JetCandidate]) -> Option<JetCandidate> {
        candidates
            .iter()
            .copied()
            .fold(None, |best: Option<JetCandidate>, jet| match best {
                Some(best) if best.pt >= jet.pt => Some(best),
                _ => Some(jet),
            })
    }

    /// Distance to another jet in the $`\eta`$-$`\phi`$ plane.
    pub fn delta_r(&self, other: &JetCandidate) -> f64 {
        delta_r(self.eta, self.phi, other.eta, other.phi)
    }
}

/// The result of matching an offline jet to a trigger jet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JetMatch {
    /// The transverse momentum of the matched trigger jet.
    Matched(f64),
    /// No trigger jet qualified.
    Unmatched,
}

impl JetMatch {
    /// The matched transverse momentum, if any.
    pub fn pt(&self) -> Option<f64> {
        match self {
            JetMatch::Matched(pt) => Some(*pt),
            JetMatch::Unmatched => None,
        }
    }
}

/// Match the leading offline jet to the first trigger jet (in collection order) closer than
/// `dr_max`.
///
/// The transverse momentum requirement `min_pt` applies to the offline jet, not to the candidates:
/// an offline jet at or below it never matches anything.
pub fn match_leading_jet(
    leading_reference: Option<&JetCandidate>,
    candidates: &[JetCandidate],
    dr_max: f64,
    min_pt: f64,
) -> JetMatch {
    let Some(reference) = leading_reference else {
        return JetMatch::Unmatched;
    };
    candidates
        .iter()
        .find(|candidate| reference.delta_r(candidate) < dr_max && reference.pt > min_pt)
        .map_or(JetMatch::Unmatched, |candidate| JetMatch::Matched(candidate.pt))
}

#[cfg(feature = "rayon")]
fn per_event<T, F>(n_events: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..n_events).into_par_iter().map(f).collect()
}

#[cfg(not(feature = "rayon"))]
fn per_event<T, F>(n_events: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> T,
{
    (0..n_events).map(f).collect()
}

/// The L1 sum of type `kind` in every event.
pub fn l1_sums(sums: &EtSums, kind: SumType) -> Vec<Option<f64>> {
    per_event(sums.pt.n_events(), |i| {
        l1_sum(sums.pt.row(i), sums.sum_type.row(i), sums.bx.row(i), kind)
    })
}

/// The PUPPI MET with PF muons added back in every event.
pub fn puppi_met_no_mu_column(met_pt: &[f64], met_phi: &[f64], muons: &Muons) -> Vec<f64> {
    per_event(met_pt.len(), |i| {
        puppi_met_no_mu(
            TransverseVector::from_pt_phi(met_pt[i], met_phi[i]),
            muons.pt.row(i),
            muons.phi.row(i),
            muons.is_pf_cand.row(i),
        )
    })
}

/// The scalar jet sum in every event.
pub fn scalar_sums(jets: &Jets) -> Vec<f64> {
    per_event(jets.pt.n_events(), |i| scalar_sum(jets.pt.row(i)))
}

/// The leading jet transverse momentum in every event.
pub fn leading_pts(jets: &Jets) -> Vec<Option<f64>> {
    per_event(jets.pt.n_events(), |i| leading_pt(jets.pt.row(i)))
}

/// The offline leading jet and the pt of its matched trigger jet in every event.
pub fn matched_leading_jets(
    reference_jets: &Jets,
    trigger_jets: &Jets,
    matching: &MatchingConfig,
) -> Vec<(Option<f64>, JetMatch)> {
    per_event(reference_jets.pt.n_events(), |i| {
        let leading = JetCandidate::leading(&JetCandidate::from_event(reference_jets, i));
        let candidates = JetCandidate::from_event(trigger_jets, i);
        let matched = match_leading_jet(
            leading.as_ref(),
            &candidates,
            matching.dr_max,
            matching.min_pt,
        );
        (leading.map(|jet| jet.pt), matched)
    })
}

fn report_missing(table: &EventTable) -> FixRateResult<()> {
    let missing = table.n_missing(table.label())?;
    if missing > 0 {
        warn!(
            table = table.label(),
            missing,
            n_events = table.n_events(),
            "events without a trigger value"
        );
    }
    Ok(())
}

/// Derive the trigger value and the offline references of every signal event.
///
/// The trigger column is named `label`; the reference columns are those of
/// [`Observable::reference_columns`].
pub fn signal_table(
    label: &str,
    events: &NanoEvents,
    observable: Observable,
    matching: &MatchingConfig,
) -> FixRateResult<EventTable> {
    let n_events = events.n_events();
    let table = EventTable::new(label, n_events);
    let table = match observable {
        Observable::Met => table
            .with_column(label, l1_sums(&events.l1_sums, SumType::MetHf))?
            .with_dense_column(PUPPI_MET, events.puppi_met.pt.clone())?
            .with_dense_column(
                PUPPI_MET_NO_MU,
                puppi_met_no_mu_column(
                    &events.puppi_met.pt,
                    &events.puppi_met.phi,
                    &events.muons,
                ),
            )?,
        Observable::Ht => table
            .with_dense_column(label, scalar_sums(&events.l1_jets))?
            .with_dense_column(PUPPI_HT, scalar_sums(&events.reco_jets))?,
        Observable::LeadingJet => {
            let (reference, matched): (Vec<Option<f64>>, Vec<JetMatch>) =
                matched_leading_jets(&events.reco_jets, &events.l1_jets, matching)
                    .into_iter()
                    .unzip();
            let unmatched = matched.iter().filter(|m| **m == JetMatch::Unmatched).count();
            debug!(label, unmatched, n_events, "matched leading jets");
            table
                .with_column(label, matched.iter().map(JetMatch::pt).collect())?
                .with_column(PUPPI_LEADING_JET, reference)?
        }
    };
    report_missing(&table)?;
    Ok(table)
}

/// Derive the trigger value of every background event.
pub fn background_table(
    label: &str,
    events: &NanoEvents,
    observable: Observable,
) -> FixRateResult<EventTable> {
    let table = EventTable::new(label, events.n_events());
    let table = match observable {
        Observable::Met => table.with_column(label, l1_sums(&events.l1_sums, SumType::MetHf))?,
        Observable::Ht => table.with_dense_column(label, scalar_sums(&events.l1_jets))?,
        Observable::LeadingJet => table.with_column(label, leading_pts(&events.l1_jets))?,
    };
    report_missing(&table)?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{JaggedColumn, PuppiMet};
    use approx::assert_relative_eq;

    fn jet(pt: f64, eta: f64, phi: f64) -> JetCandidate {
        JetCandidate { pt, eta, phi }
    }

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
    fn test_l1_sum_requires_type_and_bx() {
        let pt = [55.0, 30.0, 12.0];
        let sum_type = [8.0, 8.0, 2.0];
        let bx = [-1.0, 0.0, 0.0];
        assert_eq!(l1_sum(&pt, &sum_type, &bx, SumType::MetHf), Some(30.0));
        assert_eq!(l1_sum(&pt, &sum_type, &bx, SumType::Met), Some(12.0));
        assert_eq!(l1_sum(&pt, &sum_type, &bx, SumType::Htt), None);
        assert_eq!(l1_sum(&[], &[], &[], SumType::MetHf), None);
    }

    #[test]
    fn test_puppi_met_no_mu() {
        let met = TransverseVector::new(10.0, 0.0);
        assert_relative_eq!(
            puppi_met_no_mu(met, &[30.0], &[0.0], &[1.0]),
            40.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            puppi_met_no_mu(met, &[30.0], &[0.0], &[0.0]),
            10.0,
            epsilon = 1e-12
        );
        let perpendicular =
            puppi_met_no_mu(met, &[10.0], &[std::f64::consts::FRAC_PI_2], &[1.0]);
        assert_relative_eq!(perpendicular, 200.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_sums_and_leading() {
        assert_eq!(scalar_sum(&[]), 0.0);
        assert_eq!(scalar_sum(&[10.0, 20.5]), 30.5);
        assert_eq!(leading_pt(&[]), None);
        assert_eq!(leading_pt(&[12.0, 40.0, 3.0]), Some(40.0));
        let leading = JetCandidate::leading(&[jet(20.0, 0.0, 0.0), jet(20.0, 1.0, 1.0)]);
        assert_eq!(leading, Some(jet(20.0, 0.0, 0.0)));
        assert_eq!(JetCandidate::leading(&[]), None);
    }

    #[test]
    fn test_match_first_close_candidate() {
        let reference = jet(50.0, 0.0, 0.0);
        let candidates = [jet(45.0, 2.0, 0.0), jet(48.0, 0.1, 0.1), jet(60.0, 0.0, 0.05)];
        assert_eq!(
            match_leading_jet(Some(&reference), &candidates, 0.4, 20.0),
            JetMatch::Matched(48.0)
        );
    }

    #[test]
    fn test_match_cut_is_on_reference_pt() {
        let candidates = [jet(100.0, 0.0, 0.0)];
        let soft_reference = jet(15.0, 0.0, 0.0);
        assert_eq!(
            match_leading_jet(Some(&soft_reference), &candidates, 0.4, 20.0),
            JetMatch::Unmatched
        );
        let soft_candidate = [jet(5.0, 0.0, 0.0)];
        let hard_reference = jet(50.0, 0.0, 0.0);
        assert_eq!(
            match_leading_jet(Some(&hard_reference), &soft_candidate, 0.4, 20.0),
            JetMatch::Matched(5.0)
        );
    }

    #[test]
    fn test_match_edge_cases() {
        let reference = jet(50.0, 0.0, 0.0);
        assert_eq!(
            match_leading_jet(Some(&reference), &[], 0.4, 20.0),
            JetMatch::Unmatched
        );
        assert_eq!(
            match_leading_jet(None, &[jet(50.0, 0.0, 0.0)], 0.4, 20.0),
            JetMatch::Unmatched
        );
        // The distance cut is exclusive.
        assert_eq!(
            match_leading_jet(Some(&reference), &[jet(50.0, 0.4, 0.0)], 0.4, 20.0),
            JetMatch::Unmatched
        );
        // Matching works across the phi wrap.
        let wrapped = jet(50.0, 0.0, 3.1);
        assert_eq!(
            match_leading_jet(Some(&wrapped), &[jet(40.0, 0.0, -3.1)], 0.4, 20.0),
            JetMatch::Matched(40.0)
        );
        assert_eq!(JetMatch::Matched(40.0).pt(), Some(40.0));
        assert_eq!(JetMatch::Unmatched.pt(), None);
    }

    #[test]
    fn test_met_tables() {
        let events = test_events();
        let signal = signal_table("Default", &events, Observable::Met, &MatchingConfig::default())
            .unwrap();
        assert_eq!(
            signal.column_names(),
            vec!["Default", PUPPI_MET, PUPPI_MET_NO_MU]
        );
        assert_eq!(signal.trigger().unwrap(), &[Some(30.0), None, None]);
        assert_eq!(
            signal.column(PUPPI_MET).unwrap(),
            &[Some(10.0), Some(5.0), Some(50.0)]
        );
        assert_relative_eq!(
            signal.column(PUPPI_MET_NO_MU).unwrap()[0].unwrap(),
            40.0,
            epsilon = 1e-12
        );
        let background = background_table("Default", &events, Observable::Met).unwrap();
        assert_eq!(background.column_names(), vec!["Default"]);
        assert_eq!(background.n_missing("Default").unwrap(), 2);
    }

    #[test]
    fn test_ht_tables() {
        let events = test_events();
        let signal =
            signal_table("Emu", &events, Observable::Ht, &MatchingConfig::default()).unwrap();
        assert_eq!(signal.trigger().unwrap(), &[Some(65.0), Some(0.0), Some(70.0)]);
        assert_eq!(
            signal.column(PUPPI_HT).unwrap(),
            &[Some(60.0), Some(15.0), Some(0.0)]
        );
    }

    #[test]
    fn test_leading_jet_tables() {
        let events = test_events();
        let signal = signal_table(
            "Emu",
            &events,
            Observable::LeadingJet,
            &MatchingConfig::default(),
        )
        .unwrap();
        assert_eq!(signal.trigger().unwrap(), &[Some(40.0), None, None]);
        assert_eq!(
            signal.column(PUPPI_LEADING_JET).unwrap(),
            &[Some(38.0), Some(15.0), None]
        );
        let background = background_table("Emu", &events, Observable::LeadingJet).unwrap();
        assert_eq!(background.trigger().unwrap(), &[Some(40.0), None, Some(70.0)]);
    }
}
