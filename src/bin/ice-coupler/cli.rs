//! Command line interface definitions
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Prepare ice sheet forcing from atmosphere output, and hand ice sheet
/// output on to a solid earth model.
#[derive(Debug, Parser)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) command: Commands,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,

    /// Also write the log to this file, including DEBUG messages
    /// (e.g. the exact CDO and NCO command lines).
    #[clap(long, global = true)]
    pub(crate) log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Commands {
    /// Run one coupling step and print the ice model options for the new forcing
    Couple(CoupleCli),
    /// Export ice thickness from an ice model output file for a solid earth model
    ExportSolidEarth(ExportCli),
    /// Print the parsed configuration, after environment overrides.
    /// This can help confirm the configuration means what you intended.
    ShowConfig(ConfigArg),
}

#[derive(Debug, Clone, Args)]
pub(crate) struct ConfigArg {
    /// Path to the coupling configuration TOML file
    #[clap(long)]
    pub(crate) config: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct CoupleCli {
    #[clap(flatten)]
    pub(crate) config: ConfigArg,

    /// Print the committed bundle as JSON rather than just the ice model options
    #[clap(long)]
    pub(crate) json: bool,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct ExportCli {
    #[clap(flatten)]
    pub(crate) config: ConfigArg,

    /// The ice model output file to take the thickness from
    pub(crate) ice_output: PathBuf,

    /// Print the committed bundle as JSON
    #[clap(long)]
    pub(crate) json: bool,
}
