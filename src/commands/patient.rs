use chrono::{Local, NaiveDate};
use clap::{Args, Subcommand};
use std::io::{self, Write};

use tbtrack::config::Config;
use tbtrack::db::SqliteStore;
use tbtrack_core::{pick_color, Patient, PatientStatus, RecordStore, Regime, WriteBatch};

use super::OutputFormat;

#[derive(Args)]
pub struct PatientCommand {
    #[command(subcommand)]
    pub command: PatientSubcommand,
}

#[derive(Subcommand)]
pub enum PatientSubcommand {
    /// Enroll a new patient and create their milestones
    Add {
        /// Patient name
        name: String,

        /// Treatment regime (IR, CR, RR)
        #[arg(long, short)]
        regime: Regime,

        /// Treatment start date (YYYY-MM-DD, default: today)
        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long, default_value_t = 0)]
        age: u32,

        #[arg(long, default_value = "")]
        sex: String,

        #[arg(long, default_value = "")]
        address: String,

        /// Remark, copied to every milestone
        #[arg(long, default_value = "")]
        remark: String,

        /// Calendar color (default: first unused palette color)
        #[arg(long)]
        color: Option<String>,
    },

    /// List patients of the current team
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only patients with this status (active, cured, closed)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a patient and their milestone schedule
    Show {
        /// Patient UID or name
        identifier: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove a patient; the deletion is propagated on the next push
    Remove {
        /// Patient UID or name
        identifier: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

/// Finds a patient by uid, then by case-insensitive name.
pub(crate) async fn find_patient(
    store: &SqliteStore,
    team: &str,
    identifier: &str,
) -> Result<Patient, Box<dyn std::error::Error>> {
    if let Some(patient) = store.get(team, identifier).await? {
        return Ok(patient);
    }

    let wanted = identifier.trim().to_lowercase();
    let mut matches: Vec<Patient> = store
        .list(team)
        .await?
        .into_iter()
        .filter(|p| p.name.to_lowercase() == wanted)
        .collect();

    match matches.len() {
        0 => Err(format!("Patient not found: {}", identifier).into()),
        1 => Ok(matches.remove(0)),
        n => Err(format!("{} patients are named '{}'; use the UID", n, identifier).into()),
    }
}

fn parse_status(s: &str) -> Result<PatientStatus, String> {
    match s.trim().to_lowercase().as_str() {
        "active" => Ok(PatientStatus::Active),
        "cured" => Ok(PatientStatus::Cured),
        "closed" => Ok(PatientStatus::Closed),
        _ => Err(format!(
            "Invalid status '{}'. Valid options: active, cured, closed",
            s
        )),
    }
}

/// Next milestone without an outcome, as "title (date)".
fn next_milestone(patient: &Patient) -> String {
    patient
        .schedule()
        .into_iter()
        .find(|s| s.event.outcome == tbtrack_core::Outcome::Pending)
        .map(|s| format!("{} ({})", s.event.title, s.date))
        .unwrap_or_else(|| "-".to_string())
}

impl PatientCommand {
    pub async fn run(
        &self,
        store: &SqliteStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let team = &config.team.value;

        match &self.command {
            PatientSubcommand::Add {
                name,
                regime,
                start,
                age,
                sex,
                address,
                remark,
                color,
            } => {
                if name.trim().is_empty() {
                    return Err("Patient name cannot be empty".into());
                }

                let color = match color {
                    Some(color) => color.clone(),
                    None => {
                        let existing = store.list(team).await?;
                        pick_color(
                            existing
                                .iter()
                                .flat_map(|p| p.events.iter().map(|e| e.color.as_str())),
                        )
                    }
                };
                let start = start.unwrap_or_else(|| Local::now().date_naive());

                let patient = Patient::new(name.trim(), *regime)
                    .with_age(*age)
                    .with_sex(sex.trim())
                    .with_address(address.trim())
                    .with_remark(remark.trim())
                    .enroll(start, color);

                store.apply(team, &WriteBatch::upsert(patient.clone())).await?;
                println!("Enrolled patient:");
                print!("{}", patient);
                Ok(())
            }

            PatientSubcommand::List { format, status } => {
                let wanted = status.as_deref().map(parse_status).transpose()?;
                let patients: Vec<Patient> = store
                    .list(team)
                    .await?
                    .into_iter()
                    .filter(|p| wanted.map_or(true, |s| p.status() == s))
                    .collect();

                if patients.is_empty() {
                    println!("No patients found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&patients)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<36}  {:<24}  {:<6}  {:<7}  NEXT",
                            "UID", "NAME", "REGIME", "STATUS"
                        );
                        println!("{}", "-".repeat(100));
                        for patient in &patients {
                            let name = if patient.name.chars().count() > 24 {
                                format!("{}...", patient.name.chars().take(21).collect::<String>())
                            } else {
                                patient.name.clone()
                            };
                            println!(
                                "{:<36}  {:<24}  {:<6}  {:<7}  {}",
                                patient.uid,
                                name,
                                patient.regime.to_string(),
                                patient.status().to_string(),
                                next_milestone(patient)
                            );
                        }
                        println!("\nTotal: {} patient(s)", patients.len());
                    }
                }
                Ok(())
            }

            PatientSubcommand::Show { identifier, format } => {
                let patient = find_patient(store, team, identifier).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&patient)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", patient);
                    }
                }
                Ok(())
            }

            PatientSubcommand::Remove { identifier, force } => {
                let patient = find_patient(store, team, identifier).await?;

                if !force {
                    print!("Remove patient '{}' ({})? [y/N] ", patient.name, patient.uid);
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Removal cancelled.");
                        return Ok(());
                    }
                }

                store
                    .apply(team, &WriteBatch::delete(patient.uid.clone()))
                    .await?;
                println!("Removed patient: {}", patient.name);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Active").unwrap(), PatientStatus::Active);
        assert_eq!(parse_status(" closed ").unwrap(), PatientStatus::Closed);
        assert!(parse_status("gone").is_err());
    }

    #[test]
    fn test_next_milestone() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut patient = Patient::new("A", Regime::Ir).enroll(start, "#FF5733");
        assert_eq!(next_milestone(&patient), "Start (2024-01-01)");

        patient
            .update_event(1, 0, "", tbtrack_core::Outcome::Died)
            .unwrap();
        assert_eq!(next_milestone(&patient), "M2 (2024-02-26)");

        patient.events.clear();
        assert_eq!(next_milestone(&patient), "-");
    }
}
