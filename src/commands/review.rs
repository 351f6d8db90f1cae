use clap::{Args, Subcommand};
use std::collections::BTreeMap;
use uuid::Uuid;

use tbtrack::client::HostClient;
use tbtrack::config::Config;
use tbtrack_core::sync::{
    summarize, CommitRequest, DeviceFilter, DeviceOutcome, Selection, StagedRecord, StagedStatus,
};

use super::OutputFormat;

/// Review records staged on the local host
#[derive(Args)]
pub struct ReviewCommand {
    #[command(subcommand)]
    pub command: ReviewSubcommand,
}

#[derive(Subcommand)]
pub enum ReviewSubcommand {
    /// List staged records
    List {
        /// Device name, or "all"
        #[arg(long, default_value = "all")]
        device: DeviceFilter,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Commit selected staged records into the host database
    Commit {
        /// Device whose batch is committed (default with --all: every device)
        #[arg(long)]
        device: Option<String>,

        /// Batch id shown by `review list`
        #[arg(long, required_unless_present = "all")]
        batch: Option<Uuid>,

        /// Record index within the batch (can be repeated)
        #[arg(long = "idx", value_name = "IDX", required_unless_present = "all")]
        indices: Vec<usize>,

        /// Commit every NEW, UPDATE and DELETE record
        #[arg(long, conflicts_with_all = ["batch", "indices"])]
        all: bool,
    },
}

/// Selects every actionable record, per device and batch.
fn select_all(records: &[StagedRecord]) -> BTreeMap<String, Selection> {
    let mut selections: BTreeMap<String, Selection> = BTreeMap::new();
    for record in records.iter().filter(|r| r.status() != StagedStatus::Same) {
        selections
            .entry(record.source_device.clone())
            .or_insert_with(|| Selection {
                batch_id: record.batch_id,
                indices: Vec::new(),
            })
            .indices
            .push(record.idx);
    }
    selections
}

/// One table row. The batch column is the full id `review commit --batch` takes.
fn record_row(record: &StagedRecord) -> String {
    format!(
        "{:<16}  {:<36}  {:>4}  {:<6}  {:<36}  {}",
        record.source_device,
        record.batch_id.to_string(),
        record.idx,
        record.status().to_string(),
        record.uid(),
        record.change.name().unwrap_or("-")
    )
}

fn print_records(records: &[StagedRecord]) {
    println!(
        "{:<16}  {:<36}  {:>4}  {:<6}  {:<36}  NAME",
        "DEVICE", "BATCH", "IDX", "STATUS", "UID"
    );
    println!("{}", "-".repeat(128));
    for record in records {
        println!("{}", record_row(record));
    }

    let summary = summarize(records);
    println!(
        "\nNew: {}  Update: {}  Delete: {}  Same: {}",
        summary.new, summary.update, summary.delete, summary.same
    );
}

impl ReviewCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let client = HostClient::new(
            &config.local_url(),
            config.device_name.value.clone(),
            config.sync.request_timeout(),
        )?;
        let team = &config.team.value;

        match &self.command {
            ReviewSubcommand::List { device, format } => {
                let records = client.get_staged(team, device).await?;
                if records.is_empty() {
                    println!("Nothing staged");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&records)?);
                    }
                    OutputFormat::Text => print_records(&records),
                }
                Ok(())
            }

            ReviewSubcommand::Commit {
                device,
                batch,
                indices,
                all,
            } => {
                let commits_by_device = if *all {
                    let filter = device
                        .as_deref()
                        .map_or(DeviceFilter::All, |d| DeviceFilter::Device(d.to_string()));
                    select_all(&client.get_staged(team, &filter).await?)
                } else {
                    let device = device
                        .clone()
                        .ok_or("--device is required unless --all is given")?;
                    let batch_id = batch.ok_or("--batch is required unless --all is given")?;
                    BTreeMap::from([(
                        device,
                        Selection {
                            batch_id,
                            indices: indices.clone(),
                        },
                    )])
                };

                if commits_by_device.is_empty() {
                    println!("Nothing to commit");
                    return Ok(());
                }

                let response = client
                    .commit(&CommitRequest {
                        team: team.clone(),
                        commits_by_device,
                    })
                    .await?;

                for (device, outcome) in &response.devices {
                    match outcome {
                        DeviceOutcome::Applied { added, deleted } => {
                            println!("  ✓ {}: {} added or updated, {} removed", device, added, deleted)
                        }
                        DeviceOutcome::Stale { reason } => {
                            println!("  ✗ {}: stale ({})", device, reason)
                        }
                        DeviceOutcome::Failed { message } => {
                            println!("  ✗ {}: failed ({})", device, message)
                        }
                    }
                }
                println!(
                    "\nCommitted: {} added or updated, {} removed.",
                    response.count, response.deleted
                );
                Ok(())
            }
        }
    }
}
