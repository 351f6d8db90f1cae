use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Recorded outcome of a treatment milestone.
///
/// Serialized as the bare label; "no outcome yet" is the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Outcome {
    #[default]
    #[serde(rename = "", alias = "Start")]
    Pending,
    Cured,
    Completed,
    Failed,
    #[serde(rename = "LTFU")]
    Ltfu,
    Died,
}

impl Outcome {
    /// Outcomes allowed on non-terminal milestones.
    pub const INTERIM: [Outcome; 4] = [
        Outcome::Pending,
        Outcome::Failed,
        Outcome::Ltfu,
        Outcome::Died,
    ];

    /// Whether this outcome may be recorded on a milestone of the given kind.
    pub fn allowed_on(&self, terminal: bool) -> bool {
        terminal || Self::INTERIM.contains(self)
    }

    /// Whether the outcome ends treatment successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Cured | Outcome::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pending => "",
            Outcome::Cured => "Cured",
            Outcome::Completed => "Completed",
            Outcome::Failed => "Failed",
            Outcome::Ltfu => "LTFU",
            Outcome::Died => "Died",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "Start" => Ok(Outcome::Pending),
            "Cured" => Ok(Outcome::Cured),
            "Completed" => Ok(Outcome::Completed),
            "Failed" => Ok(Outcome::Failed),
            "LTFU" => Ok(Outcome::Ltfu),
            "Died" => Ok(Outcome::Died),
            other => Err(format!(
                "Invalid outcome '{}'. Valid options: Cured, Completed, Failed, LTFU, Died",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_json_labels() {
        assert_eq!(serde_json::to_string(&Outcome::Pending).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&Outcome::Ltfu).unwrap(), "\"LTFU\"");

        let parsed: Outcome = serde_json::from_str("\"Cured\"").unwrap();
        assert_eq!(parsed, Outcome::Cured);
    }

    #[test]
    fn test_legacy_start_reads_as_pending() {
        let parsed: Outcome = serde_json::from_str("\"Start\"").unwrap();
        assert_eq!(parsed, Outcome::Pending);
        assert_eq!(Outcome::from_str("Start").unwrap(), Outcome::Pending);
    }

    #[test]
    fn test_allowed_on_interim_milestone() {
        assert!(Outcome::Failed.allowed_on(false));
        assert!(Outcome::Pending.allowed_on(false));
        assert!(!Outcome::Cured.allowed_on(false));
        assert!(!Outcome::Completed.allowed_on(false));
        assert!(Outcome::Cured.allowed_on(true));
    }

    #[test]
    fn test_from_str_invalid() {
        assert!(Outcome::from_str("Recovered").is_err());
    }
}
