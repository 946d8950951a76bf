use std::path::PathBuf;

use ccs_types::ObjectIdentifier;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ccs",
    about = "Inspect and verify compiler cache stores",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// TOML store configuration; the store directory argument overrides its base_path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List store file generations and their health
    List(StoreArgs),
    /// Open the store with full recovery and decode every object
    Fsck(StoreArgs),
    /// Show object counts and performance counters
    Stats(StoreArgs),
    /// Decode one object by identifier
    Show(ShowArgs),
}

#[derive(Args)]
pub struct StoreArgs {
    /// Store directory
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Store directory
    pub dir: PathBuf,
    /// Object identifier, as `12` or `#12`
    #[arg(value_parser = parse_identifier)]
    pub id: ObjectIdentifier,
}

fn parse_identifier(s: &str) -> Result<ObjectIdentifier, String> {
    let digits = s.strip_prefix('#').unwrap_or(s);
    let raw: i64 = digits
        .parse()
        .map_err(|_| format!("{s:?} is not an object identifier"))?;
    ObjectIdentifier::from_wire(raw).map_err(|e| e.to_string())
}
