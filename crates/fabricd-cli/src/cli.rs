use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fabricd",
    about = "Reconciles declared pipeline and chassis configurations onto Stratum switches",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the reconciliation engine until interrupted.
    Run {
        /// On-disk root for configuration artifacts.
        #[arg(long, env = "FABRICD_ARTIFACT_DIR", default_value = "artifacts")]
        artifact_dir: PathBuf,

        /// Label key scoping the managed realm.
        #[arg(long, default_value = "pod")]
        realm_label: String,

        /// Label value scoping the managed realm.
        #[arg(long)]
        realm_value: String,

        /// JSON file with the topology entities to seed the embedded store.
        #[arg(long)]
        topology: Option<PathBuf>,

        /// Southbound backend: real gRPC devices or the simulated fleet.
        #[arg(long, default_value = "grpc")]
        fabric: FabricArg,
    },

    /// Manage the configuration inventory.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Register a configuration with its artifacts.
    Add {
        #[arg(long, env = "FABRICD_ARTIFACT_DIR", default_value = "artifacts")]
        artifact_dir: PathBuf,

        /// Config id, unique across kinds.
        #[arg(long)]
        id: String,

        /// Config kind.
        #[arg(long)]
        kind: KindArg,

        /// Artifacts as name=path pairs (e.g. p4info=build/p4info.bin).
        #[arg(long = "artifact", value_name = "NAME=PATH")]
        artifacts: Vec<String>,
    },

    /// Show one configuration record.
    Get {
        #[arg(long, env = "FABRICD_ARTIFACT_DIR", default_value = "artifacts")]
        artifact_dir: PathBuf,

        id: String,
    },

    /// List configuration records.
    List {
        #[arg(long, env = "FABRICD_ARTIFACT_DIR", default_value = "artifacts")]
        artifact_dir: PathBuf,

        /// Restrict to one kind.
        #[arg(long)]
        kind: Option<KindArg>,
    },

    /// Remove a configuration and its artifacts.
    Delete {
        #[arg(long, env = "FABRICD_ARTIFACT_DIR", default_value = "artifacts")]
        artifact_dir: PathBuf,

        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FabricArg {
    Grpc,
    Sim,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Pipeline,
    Chassis,
}
