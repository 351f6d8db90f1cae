use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Treatment regime. Determines the milestone schedule a patient is enrolled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    /// Initial regimen
    Ir,
    /// Continuation regimen
    Cr,
    /// Rifampicin-resistant regimen
    Rr,
}

impl Regime {
    /// Milestone labels and their day offsets from the treatment start date.
    ///
    /// The last entry is always the terminal ("M-end") milestone.
    pub fn milestones(&self) -> &'static [(&'static str, i64)] {
        match self {
            Regime::Ir | Regime::Cr => &[("Start", 0), ("M2", 56), ("M5", 140), ("M6/M-end", 168)],
            Regime::Rr => &[("Start", 0), ("M3", 84), ("M5", 140), ("M8/M-end", 224)],
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Ir => write!(f, "IR"),
            Regime::Cr => write!(f, "CR"),
            Regime::Rr => write!(f, "RR"),
        }
    }
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "IR" => Ok(Regime::Ir),
            "CR" => Ok(Regime::Cr),
            "RR" => Ok(Regime::Rr),
            _ => Err(format!(
                "Invalid regime '{}'. Valid options: IR, CR, RR",
                s
            )),
        }
    }
}
