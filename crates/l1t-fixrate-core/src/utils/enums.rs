use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::FixRateError;

/// Where the L1 objects of a sample come from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchType {
    /// Objects unpacked from the hardware readout (`L1*` branches).
    #[serde(rename = "unp", alias = "unpacked")]
    Unpacked,
    /// Objects produced by the trigger emulator (`L1Emul*` branches).
    #[serde(rename = "emu", alias = "emulated")]
    Emulated,
}

impl BranchType {
    /// The branch-name prefix of the L1 objects.
    pub fn object_prefix(&self) -> &'static str {
        match self {
            BranchType::Unpacked => "L1",
            BranchType::Emulated => "L1Emul",
        }
    }

    /// The branch-name prefix of the L1 energy sums. Sums computed by the main processor carry an
    /// extra `MP` suffix.
    pub fn sum_prefix(&self, use_mp: bool) -> String {
        if use_mp {
            format!("{}MP", self.object_prefix())
        } else {
            self.object_prefix().to_string()
        }
    }
}

impl Display for BranchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchType::Unpacked => write!(f, "unp"),
            BranchType::Emulated => write!(f, "emu"),
        }
    }
}

impl FromStr for BranchType {
    type Err = FixRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unp" | "unpacked" | "l1" => Ok(Self::Unpacked),
            "emu" | "emulated" | "emul" | "l1emul" => Ok(Self::Emulated),
            _ => Err(FixRateError::ParseError {
                name: s.to_string(),
                object: "BranchType".to_string(),
            }),
        }
    }
}

/// Types of L1 energy sums, numbered as in the `EtSum` data format of the L1 trigger.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SumType {
    /// Total transverse energy.
    Ett,
    /// Scalar sum of jet transverse momenta.
    Htt,
    /// Missing transverse energy.
    Met,
    /// Missing transverse momentum of jets.
    Mht,
    /// Missing transverse energy including the forward calorimeter.
    MetHf,
    /// Missing jet transverse momentum including the forward calorimeter.
    MhtHf,
}

impl SumType {
    /// The `etSumType` code stored in the ntuples.
    pub fn code(&self) -> i32 {
        match self {
            SumType::Ett => 0,
            SumType::Htt => 1,
            SumType::Met => 2,
            SumType::Mht => 3,
            SumType::MetHf => 8,
            SumType::MhtHf => 20,
        }
    }
}

impl Display for SumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SumType::Ett => write!(f, "ett"),
            SumType::Htt => write!(f, "htt"),
            SumType::Met => write!(f, "met"),
            SumType::Mht => write!(f, "mht"),
            SumType::MetHf => write!(f, "methf"),
            SumType::MhtHf => write!(f, "mhthf"),
        }
    }
}

impl FromStr for SumType {
    type Err = FixRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ett" => Ok(Self::Ett),
            "htt" => Ok(Self::Htt),
            "met" => Ok(Self::Met),
            "mht" => Ok(Self::Mht),
            "methf" => Ok(Self::MetHf),
            "mhthf" => Ok(Self::MhtHf),
            _ => Err(FixRateError::ParseError {
                name: s.to_string(),
                object: "SumType".to_string(),
            }),
        }
    }
}

/// The trigger quantity under study, together with its offline reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observable {
    /// L1 missing transverse energy (HF sum at bx 0) against PUPPI MET with muons removed.
    #[default]
    Met,
    /// Scalar sum of L1 jet transverse momenta against the offline PUPPI jet sum.
    Ht,
    /// Transverse momentum of the L1 jet matched to the leading offline PUPPI jet.
    LeadingJet,
}

/// Column holding PUPPI MET.
pub const PUPPI_MET: &str = "PuppiMET";
/// Column holding PUPPI MET with PF muons added back.
pub const PUPPI_MET_NO_MU: &str = "PuppiMETNoMu";
/// Column holding the scalar sum of offline PUPPI jet momenta.
pub const PUPPI_HT: &str = "PuppiHT";
/// Column holding the momentum of the leading offline PUPPI jet.
pub const PUPPI_LEADING_JET: &str = "PuppiLeadingJet";

impl Observable {
    /// Names of the reference columns stored next to the trigger column in signal tables.
    pub fn reference_columns(&self) -> &'static [&'static str] {
        match self {
            Observable::Met => &[PUPPI_MET, PUPPI_MET_NO_MU],
            Observable::Ht => &[PUPPI_HT],
            Observable::LeadingJet => &[PUPPI_LEADING_JET],
        }
    }

    /// The reference column used as the x-axis of efficiency curves.
    pub fn efficiency_reference(&self) -> &'static str {
        match self {
            Observable::Met => PUPPI_MET_NO_MU,
            Observable::Ht => PUPPI_HT,
            Observable::LeadingJet => PUPPI_LEADING_JET,
        }
    }

    /// A short axis title for artifacts.
    pub fn axis_title(&self) -> &'static str {
        match self {
            Observable::Met => "L1 MET [GeV]",
            Observable::Ht => "L1 HT [GeV]",
            Observable::LeadingJet => "L1 leading jet pT [GeV]",
        }
    }

    /// The default reference thresholds in GeV.
    pub fn default_thresholds(&self) -> Vec<f64> {
        match self {
            Observable::Met => vec![50.0, 90.0],
            Observable::Ht | Observable::LeadingJet => vec![30.0, 120.0, 180.0],
        }
    }
}

impl Display for Observable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Observable::Met => write!(f, "met"),
            Observable::Ht => write!(f, "ht"),
            Observable::LeadingJet => write!(f, "leading_jet"),
        }
    }
}

impl FromStr for Observable {
    type Err = FixRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "met" | "methf" => Ok(Self::Met),
            "ht" | "jetht" | "htt" => Ok(Self::Ht),
            "leading_jet" | "leadingjet" | "jet" | "jet1" => Ok(Self::LeadingJet),
            _ => Err(FixRateError::ParseError {
                name: s.to_string(),
                object: "Observable".to_string(),
            }),
        }
    }
}

/// The format of the inputs of a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// NanoAOD ROOT ntuples; derived tables are written to Parquet as a side product.
    #[default]
    #[serde(alias = "nano")]
    Root,
    /// Tables persisted by a previous run.
    Parquet,
}

impl Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputFormat::Root => write!(f, "root"),
            InputFormat::Parquet => write!(f, "parquet"),
        }
    }
}

impl FromStr for InputFormat {
    type Err = FixRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "root" | "nano" | "nanoaod" => Ok(Self::Root),
            "parquet" | "parq" => Ok(Self::Parquet),
            _ => Err(FixRateError::ParseError {
                name: s.to_string(),
                object: "InputFormat".to_string(),
            }),
        }
    }
}
