use clap::ValueEnum;

mod config_cmd;
mod event;
mod patient;
mod review;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use event::EventCommand;
pub use patient::PatientCommand;
pub use review::ReviewCommand;
pub use sync_cmd::SyncCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
