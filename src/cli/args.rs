//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

use crate::domain::PropagationMode;

/// Inspect, verify and restore form-instance snapshots
#[derive(Parser, Debug)]
#[command(name = "formtree")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Turn debugging information on (repeat for more: -d info, -dd debug, -ddd trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Config file (default: ./.formtree.toml)
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Cascade strategy for relevant/enabled flips (overrides config)
    #[arg(long, global = true, value_parser = parse_propagation)]
    pub propagation: Option<PropagationMode>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a snapshot as a tree
    Show {
        /// Snapshot file
        #[arg(value_hint = ValueHint::FilePath)]
        snapshot: PathBuf,
    },

    /// List the reference of every node with its state
    Refs {
        /// Snapshot file
        #[arg(value_hint = ValueHint::FilePath)]
        snapshot: PathBuf,

        /// Only list leaves
        #[arg(short, long)]
        leaves: bool,
    },

    /// Populate a template snapshot with the answers of a data snapshot
    Restore {
        /// Template snapshot (structure, repeat templates)
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        template: PathBuf,

        /// Data snapshot (answers, repeat counts)
        #[arg(short = 'D', long, value_hint = ValueHint::FilePath)]
        data: PathBuf,

        /// Write the restored instance here instead of printing it
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },

    /// Check that a snapshot decodes and re-encodes byte for byte
    Verify {
        /// Snapshot files
        #[arg(required = true, value_hint = ValueHint::FilePath)]
        snapshots: Vec<PathBuf>,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show merged config
    Show,

    /// Print a commented config template, or write it to a file
    Template {
        /// Target file
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },

    /// Show config paths
    Path,
}

fn parse_propagation(s: &str) -> Result<PropagationMode, String> {
    s.parse()
}
