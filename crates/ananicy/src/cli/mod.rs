//! CLI command definitions and handlers.

mod dump;

use std::path::PathBuf;

use ananicy_common::AnanicyPaths;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::Result;

use crate::daemon::Daemon;

pub use dump::{AutogroupView, ThreadView};

/// Ananicy - auto nice daemon
#[derive(Parser)]
#[command(name = "ananicy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding ananicy.conf and the rule files
    /// [default: $ANANICY_CONFIG_DIR or /etc/ananicy.d]
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon
    Start,

    /// Print loaded configuration or process state as JSON
    Dump {
        /// What to print
        #[arg(value_enum)]
        target: DumpTarget,
    },
}

/// Things `dump` can print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpTarget {
    /// Rules with their types merged in
    Rules,
    /// Types
    Types,
    /// Cgroups with derived quota values
    Cgroups,
    /// Every thread with its current attributes
    Proc,
    /// Threads grouped by autogroup
    Autogroup,
}

impl Cli {
    /// Filesystem locations for this invocation.
    #[must_use]
    pub fn paths(&self) -> AnanicyPaths {
        self.config_dir
            .as_ref()
            .map_or_else(AnanicyPaths::new, |dir| AnanicyPaths::new().with_config_dir(dir))
    }

    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let paths = self.paths();

        match self.command {
            Commands::Start => {
                let daemon = Daemon::init(&paths)?;
                daemon.run().await?;
                Ok(())
            }

            Commands::Dump { target } => {
                let output = dump::render(target, &paths)?;
                println!("{output}");
                Ok(())
            }
        }
    }
}
