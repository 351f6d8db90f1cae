use clap::{Args, Subcommand};

use tbtrack::config::Config;
use tbtrack::db::SqliteStore;
use tbtrack_core::{Outcome, RecordStore, WriteBatch};

use super::patient::find_patient;

#[derive(Args)]
pub struct EventCommand {
    #[command(subcommand)]
    pub command: EventSubcommand,
}

#[derive(Subcommand)]
pub enum EventSubcommand {
    /// Record missed days, a remark or an outcome on a milestone
    Update {
        /// Patient UID or name
        patient: String,

        /// Milestone id (as shown by `patient show`)
        id: u32,

        /// Days missed before this milestone; shifts every later milestone
        #[arg(long)]
        missed_days: Option<u32>,

        #[arg(long)]
        remark: Option<String>,

        /// Cured, Completed, Failed, LTFU, Died, or "" to clear
        #[arg(long)]
        outcome: Option<Outcome>,
    },
}

impl EventCommand {
    pub async fn run(
        &self,
        store: &SqliteStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let team = &config.team.value;

        match &self.command {
            EventSubcommand::Update {
                patient,
                id,
                missed_days,
                remark,
                outcome,
            } => {
                if missed_days.is_none() && remark.is_none() && outcome.is_none() {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let mut patient = find_patient(store, team, patient).await?;
                let current = patient
                    .event(*id)
                    .cloned()
                    .ok_or_else(|| format!("Milestone {} not found for {}", id, patient.name))?;

                patient.update_event(
                    *id,
                    missed_days.unwrap_or(current.missed_days),
                    remark.clone().unwrap_or(current.remark),
                    outcome.unwrap_or(current.outcome),
                )?;
                store.apply(team, &WriteBatch::upsert(patient.clone())).await?;

                println!("Updated milestone {} of {}:", id, patient.name);
                print!("{}", patient);
                Ok(())
            }
        }
    }
}
