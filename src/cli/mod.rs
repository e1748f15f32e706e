//! CLI command definitions for taskdeck.
//!
//! The entry point is the `Cli` struct; each subcommand drives the sync
//! layer or the import pipeline against the local store.

pub mod import;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use import::ImportArgs;

use crate::format::OutputFormat;

/// Task list kept in a local document store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Identity to act as (overrides config and TASKDECK_USER)
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the current tasks with their descriptions
    List(ListArgs),

    /// Create a task
    Add(AddArgs),

    /// Flip a task's completion flag
    Toggle {
        /// Task id
        id: String,
    },

    /// Delete a task
    Delete {
        /// Task id
        id: String,
    },

    /// Save a new description revision for a task
    Describe {
        /// Task id
        id: String,
        /// Description text
        text: String,
    },

    /// Parse files into tasks and save them
    Import(ImportArgs),

    /// Print every change to the task list until interrupted
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ListFormat {
    #[default]
    Text,
    Json,
}

impl From<ListFormat> for OutputFormat {
    fn from(format: ListFormat) -> Self {
        match format {
            ListFormat::Text => OutputFormat::Text,
            ListFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = ListFormat::Text)]
    pub format: ListFormat,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Task text
    pub text: String,

    /// Initial description (saved as revision 1)
    #[arg(long)]
    pub description: Option<String>,

    /// Due date, YYYY-MM-DD
    #[arg(long)]
    pub due: Option<NaiveDate>,
}
