use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "afisha-sync", version, about = "Event catalog snapshots, reconciliation and API")]
pub struct Cli {
    /// Config file (defaults to config.json in the data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Migrate the database, then serve the HTTP API
    Serve,
    /// Reconcile one snapshot into the database
    Reconcile {
        /// Snapshot file; the latest one in the snapshot directory when omitted
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Crawl the catalog and save a new snapshot
    Scrape {
        /// Reconcile the new snapshot right after saving it
        #[arg(long)]
        reconcile: bool,
    },
    /// Apply pending schema migrations and exit
    Migrate,
    /// Print the effective configuration
    Config {
        /// Also write it back to the config file
        #[arg(long)]
        write: bool,
    },
}
