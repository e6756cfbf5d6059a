use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "baton",
    version,
    about = "Checkpoint and resume long builds across time-boxed CI invocations",
    after_help = "\
Configuration file lookup order:
  1. --config <path>   (explicit flag)
  2. $BATON_CONFIG     (environment variable)
  3. ./baton.toml      (working directory)

Environment variables:
  BATON_CONFIG      Path to configuration file (overrides default search)
  The encryption secret is read from the variable named by
  checkpoint.secret_env in the config; it is never written to disk."
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides BATON_CONFIG and ./baton.toml)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run one bounded build invocation: restore, execute the current
    /// stage, then checkpoint or finalize
    Run,

    /// Checkpoint the working tree now, without running a stage
    Save,

    /// Restore the working tree from the stored checkpoint
    Restore,

    /// Show the stored checkpoint and the local stage marker
    Status,

    /// Delete the stored checkpoint blobs
    Discard,

    /// Generate a starter configuration file
    Config {
        /// Destination path (default: ./baton.toml)
        #[arg(short, long)]
        dest: Option<String>,
    },
}

impl Commands {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Save => "save",
            Self::Restore => "restore",
            Self::Status => "status",
            Self::Discard => "discard",
            Self::Config { .. } => "config",
        }
    }
}
