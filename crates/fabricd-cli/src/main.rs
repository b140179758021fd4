mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, ConfigCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            artifact_dir,
            realm_label,
            realm_value,
            topology,
            fabric,
        } => commands::run(artifact_dir, realm_label, realm_value, topology, fabric).await,
        Command::Config { command } => match command {
            ConfigCommand::Add {
                artifact_dir,
                id,
                kind,
                artifacts,
            } => commands::config_add(artifact_dir, id, kind, artifacts).await,
            ConfigCommand::Get { artifact_dir, id } => {
                commands::config_get(artifact_dir, id).await
            }
            ConfigCommand::List { artifact_dir, kind } => {
                commands::config_list(artifact_dir, kind).await
            }
            ConfigCommand::Delete { artifact_dir, id } => {
                commands::config_delete(artifact_dir, id).await
            }
        },
    }
}
