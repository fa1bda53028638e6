//! stockyard cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every pallet matching a filter
    ///
    /// Filter terms are `key=value` for exact matches or `key~=regexp`
    /// for pattern matches. All terms must hold; no terms matches every
    /// pallet. Lookups are deep, so inherited values match too.
    Query(QueryCommand),

    /// Print exactly one pallet, by kind and name
    Fetch(FetchCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct WarehouseArgs {
    /// Warehouse root directory
    #[clap(short = 'w', long = "warehouse")]
    pub warehouse: PathBuf,
}

#[derive(Parser, Debug)]
pub struct QueryCommand {
    #[clap(flatten)]
    pub warehouse: WarehouseArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Filter terms, `key=value` or `key~=regexp`
    pub terms: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct FetchCommand {
    #[clap(flatten)]
    pub warehouse: WarehouseArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Pallet kind, e.g. `system`
    pub kind: String,

    /// Pallet name, e.g. `vmhost1`
    pub name: String,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,

    /// Append the source position of every value
    #[arg(short = 'P', long = "positions")]
    pub positions: bool,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[clap(flatten)]
    pub warehouse: WarehouseArgs,

    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// List every pallet as kind/full_name
    Pallets,
    /// Dump the loaded graph
    Graph,
}
