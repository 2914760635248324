use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::charm::RelationKind;
use crate::paths::ENV_CONFIG_FILE;

#[derive(Parser)]
#[command(name = "license-agent-charm")]
#[command(author = "License Manager Charmers")]
#[command(version)]
#[command(
    about = "Install, configure and manage the license-manager agent on a Slurm controller",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (TOML with [target] and [layout] tables)
    #[arg(short, long, global = true, env = ENV_CONFIG_FILE)]
    pub config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install the agent, its hook scripts, account, directories and units
    Install,

    /// Start the agent (only after a successful install)
    Start,

    /// Stop the timer and the service
    Stop,

    /// Stop, then start
    Restart,

    /// Rewrite the environment file and units; restart if already started
    ConfigChanged,

    /// Install an exact agent version and restart
    #[command(disable_version_flag = true)]
    Upgrade {
        /// Version to pin, e.g. 3.2.0
        #[arg(long)]
        version: String,
    },

    /// Remove everything the charm provisioned
    Remove,

    /// Show drift between the host and the configured target
    Status {
        /// Also show line diffs of managed files
        #[arg(long)]
        diff: bool,
    },

    /// Print relation data as JSON
    RelationData {
        #[arg(value_enum)]
        relation: RelationArg,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RelationArg {
    /// Scheduler prolog and epilog script paths
    PrologEpilog,
    /// Log shipper input and multiline parser
    LogForwarding,
}

impl From<RelationArg> for RelationKind {
    fn from(arg: RelationArg) -> Self {
        match arg {
            RelationArg::PrologEpilog => Self::PrologEpilog,
            RelationArg::LogForwarding => Self::LogForwarding,
        }
    }
}
